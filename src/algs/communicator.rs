//! Thin façade over intra-process (threads) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! All handles are **waitable** but non-blocking: the exchange engine calls
//! `.wait()` before it trusts that a buffer has arrived.

use bytes::Bytes;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

/// Message tag. Exchanges offset a base tag per round so that consecutive
/// rounds of one exchange never match each other's messages.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommTag(u16);

impl CommTag {
    pub const fn new(v: u16) -> Self {
        Self(v)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Tag of round `k` of an exchange started at `self`.
    pub const fn offset(self, k: u16) -> Self {
        Self(self.0.wrapping_add(k))
    }
}

/// Base tag of halo-fill exchanges. Kept below the MPI-guaranteed tag bound.
pub const HALO_FILL_TAG: CommTag = CommTag::new(0x1B00);
/// Base tag of parallel-copy exchanges.
pub const PARALLEL_COPY_TAG: CommTag = CommTag::new(0x1C00);

/// Non-blocking communication interface.
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// Post a send of `buf`; the data is copied before returning.
    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    /// Post a receive of a message of `len` bytes from `peer`.
    fn irecv(&self, peer: usize, tag: u16, len: usize) -> Self::RecvHandle;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    fn barrier(&self) {}
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Single-rank communicator. Nothing is ever sent or received.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _len: usize) {}

    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }
}

// --- LocalComm: ranks as threads of one process ---
type Key = (usize, usize, u16); // (src, dst, tag)

/// How long a thread-rank waits for a message before reporting it missing.
const LOCAL_RECV_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug)]
struct Mailbox {
    slots: DashMap<Key, VecDeque<Bytes>>,
    barrier: Barrier,
}

/// Communicator connecting `n` ranks that run as threads of one process.
///
/// Each world owns its mailbox, so independent worlds (e.g. concurrent tests)
/// never see each other's messages. Messages between one pair of ranks with
/// one tag are delivered in send order.
#[derive(Clone, Debug)]
pub struct LocalComm {
    rank: usize,
    size: usize,
    shared: Arc<Mailbox>,
}

impl LocalComm {
    /// One communicator per rank of a fresh `n`-rank world.
    pub fn world(n: usize) -> Vec<LocalComm> {
        let n = n.max(1);
        let shared = Arc::new(Mailbox {
            slots: DashMap::new(),
            barrier: Barrier::new(n),
        });
        (0..n)
            .map(|rank| LocalComm {
                rank,
                size: n,
                shared: shared.clone(),
            })
            .collect()
    }
}

/// Pending receive on a [`LocalComm`]; polls the mailbox in `wait`.
pub struct LocalRecv {
    shared: Arc<Mailbox>,
    key: Key,
}

impl Wait for LocalRecv {
    fn wait(self) -> Option<Vec<u8>> {
        let start = Instant::now();
        loop {
            if let Some(mut queue) = self.shared.slots.get_mut(&self.key) {
                if let Some(bytes) = queue.pop_front() {
                    return Some(bytes.to_vec());
                }
            }
            if start.elapsed() > LOCAL_RECV_TIMEOUT {
                log::error!(
                    "rank {}: no message from rank {} with tag {:#x}",
                    self.key.1,
                    self.key.0,
                    self.key.2
                );
                return None;
            }
            std::thread::yield_now();
        }
    }
}

impl Communicator for LocalComm {
    type SendHandle = ();
    type RecvHandle = LocalRecv;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
        let key = (self.rank, peer, tag);
        self.shared
            .slots
            .entry(key)
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, _len: usize) -> LocalRecv {
        LocalRecv {
            shared: self.shared.clone(),
            key: (peer, self.rank, tag),
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) {
        self.shared.barrier.wait();
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Wait};
    use crate::exchange_error::FabExchangeError;
    use mpi::environment::Universe;
    use mpi::request::StaticScope;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;
    use std::sync::Arc;

    struct World {
        // Dropping the universe finalizes MPI; keep it alive as long as any handle.
        _universe: Universe,
        comm: SimpleCommunicator,
    }

    /// Communicator over `MPI_COMM_WORLD`.
    #[derive(Clone)]
    pub struct MpiComm {
        world: Arc<World>,
        rank: usize,
        size: usize,
    }

    // SAFETY: MPI is initialised with at least funneled threading and every
    // call on a communicator is issued from the thread that runs the exchange.
    unsafe impl Send for MpiComm {}
    unsafe impl Sync for MpiComm {}

    impl MpiComm {
        pub fn new() -> Result<Self, FabExchangeError> {
            let universe = mpi::initialize()
                .ok_or_else(|| FabExchangeError::comm(0, "MPI already initialized"))?;
            let comm = universe.world();
            let rank = comm.rank() as usize;
            let size = comm.size() as usize;
            Ok(Self {
                world: Arc::new(World {
                    _universe: universe,
                    comm,
                }),
                rank,
                size,
            })
        }
    }

    /// Outstanding send. The payload is leaked for the `'static` request scope
    /// and reclaimed once the request completes.
    pub struct MpiSend {
        finish: Box<dyn FnOnce()>,
    }

    impl Wait for MpiSend {
        fn wait(self) -> Option<Vec<u8>> {
            (self.finish)();
            None
        }
    }

    /// Outstanding receive; the blocking receive runs in `wait`.
    pub struct MpiRecv {
        world: Arc<World>,
        peer: usize,
        tag: u16,
    }

    impl Wait for MpiRecv {
        fn wait(self) -> Option<Vec<u8>> {
            let (data, _status) = self
                .world
                .comm
                .process_at_rank(self.peer as i32)
                .receive_vec_with_tag::<u8>(self.tag as i32);
            Some(data)
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSend;
        type RecvHandle = MpiRecv;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSend {
            let raw: *mut [u8] = Box::into_raw(buf.to_vec().into_boxed_slice());
            // SAFETY: `raw` stays allocated until the request below has completed.
            let payload: &'static [u8] = unsafe { &*raw };
            let req = self
                .world
                .comm
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, payload, tag as i32);
            MpiSend {
                finish: Box::new(move || {
                    req.wait();
                    // SAFETY: the send completed; nothing references `raw` any more.
                    drop(unsafe { Box::from_raw(raw) });
                }),
            }
        }

        fn irecv(&self, peer: usize, tag: u16, _len: usize) -> MpiRecv {
            MpiRecv {
                world: self.world.clone(),
                peer,
                tag,
            }
        }

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn barrier(&self) {
            self.world.comm.barrier();
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_roundtrip_two_ranks() {
        let world = LocalComm::world(2);
        let (comm0, comm1) = (&world[0], &world[1]);

        let recv_handle = comm1.irecv(0, 7, 4);
        let send_handle = comm0.isend(1, 7, &[1, 2, 3, 4]);
        send_handle.wait();

        let data = recv_handle
            .wait()
            .expect("Expected to receive data from rank 0");
        assert_eq!(&data, &[1, 2, 3, 4]);
    }

    #[test]
    fn same_tag_messages_arrive_in_order() {
        let world = LocalComm::world(2);
        world[0].isend(1, 3, &[1]);
        world[0].isend(1, 3, &[2]);
        assert_eq!(world[1].irecv(0, 3, 1).wait(), Some(vec![1]));
        assert_eq!(world[1].irecv(0, 3, 1).wait(), Some(vec![2]));
    }

    #[test]
    fn worlds_are_isolated() {
        let a = LocalComm::world(2);
        let b = LocalComm::world(2);
        a[0].isend(1, 5, &[9]);
        b[0].isend(1, 5, &[7]);
        assert_eq!(b[1].irecv(0, 5, 1).wait(), Some(vec![7]));
        assert_eq!(a[1].irecv(0, 5, 1).wait(), Some(vec![9]));
    }

    #[test]
    fn tag_offsets_wrap() {
        assert_eq!(CommTag::new(u16::MAX).offset(1).as_u16(), 0);
        assert_eq!(HALO_FILL_TAG.offset(2).as_u16(), 0x1B02);
    }

    #[test]
    fn no_comm_is_single_rank() {
        assert_eq!(NoComm.rank(), 0);
        assert_eq!(NoComm.size(), 1);
        assert!(NoComm.irecv(0, 0, 8).wait().is_none());
    }
}
