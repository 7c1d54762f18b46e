//! Message layout helpers for exchange payloads.
//!
//! A message is the concatenation, in tag order, of one block per tag; each
//! block holds `ncomp` component planes of the tag's region with x varying
//! fastest. Elements travel in native byte order: every rank of one job runs
//! the same binary on the same architecture.

use crate::algs::copy_tag::{CopyComTag, tag_volume};
use crate::exchange_error::FabExchangeError;
use bytemuck::Pod;
use static_assertions::const_assert;
use std::mem::size_of;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("expected {expected} bytes, got {actual}"))
    }
}

/// Elements in the message carrying `tags` with `ncomp` components.
pub fn message_elems(tags: &[CopyComTag], ncomp: usize) -> usize {
    tag_volume(tags) * ncomp
}

/// Bytes in the message carrying `tags` with `ncomp` components of `T`.
pub fn message_bytes<T: Pod>(tags: &[CopyComTag], ncomp: usize) -> usize {
    message_elems(tags, ncomp) * size_of::<T>()
}

/// Element offset of each tag's block inside its message.
pub fn block_offsets(tags: &[CopyComTag], ncomp: usize) -> Vec<usize> {
    tags.iter()
        .scan(0usize, |off, t| {
            let here = *off;
            *off += t.num_pts() * ncomp;
            Some(here)
        })
        .collect()
}

/// Copy a received message from `peer` into `out`, checking its length first.
///
/// Received byte vectors carry no alignment guarantee for `T`, so the bytes
/// are copied into the typed buffer rather than cast in place.
pub fn copy_message_into<T: Pod>(
    peer: usize,
    raw: &[u8],
    out: &mut [T],
) -> Result<(), FabExchangeError> {
    expect_exact_len(raw.len(), std::mem::size_of_val(out))
        .map_err(|msg| FabExchangeError::comm(peer, msg))?;
    cast_slice_mut(out).copy_from_slice(raw);
    Ok(())
}

// Message lengths are computed in elements and multiplied out in bytes.
const_assert!(size_of::<usize>() >= size_of::<u32>());
