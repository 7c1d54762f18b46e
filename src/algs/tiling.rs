//! Tile decomposition of the local boxes of a decomposition.

use crate::cache::{CacheKey, Cached};
use crate::geometry::{IndexBox, IntVect};
use crate::layout::{BDKey, DomainDecomposition};
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache key of a tiling.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub bd_key: BDKey,
    pub my_rank: usize,
    pub tile_size: IntVect,
}

impl TileKey {
    pub fn new(decomp: &DomainDecomposition, tile_size: IntVect) -> Self {
        Self {
            bd_key: decomp.bd_key(),
            my_rank: decomp.my_rank(),
            tile_size,
        }
    }
}

impl CacheKey for TileKey {
    fn bd_keys(&self) -> Vec<BDKey> {
        vec![self.bd_key]
    }
}

/// One tile of a [`TileArray`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Tile {
    /// Global index of the box the tile belongs to.
    pub global_index: usize,
    /// Position of that box among the rank's local boxes.
    pub local_index: usize,
    /// Position of the tile within its box.
    pub tile_index: usize,
    pub bx: IndexBox,
}

/// Tiles of all local boxes, ordered by local box then x-fastest within a box.
#[derive(Debug)]
pub struct TileArray {
    num_local_tiles: Vec<usize>,
    index_map: Vec<usize>,
    local_index_map: Vec<usize>,
    local_tile_index_map: Vec<usize>,
    tiles: Vec<IndexBox>,
    nuse: AtomicU64,
}

impl TileArray {
    pub fn build(decomp: &DomainDecomposition, tile_size: IntVect) -> Self {
        let boxes = decomp.box_array().boxes();
        let mut ta = TileArray {
            num_local_tiles: Vec::with_capacity(decomp.local_len()),
            index_map: Vec::new(),
            local_index_map: Vec::new(),
            local_tile_index_map: Vec::new(),
            tiles: Vec::new(),
            nuse: AtomicU64::new(0),
        };
        for (li, &k) in decomp.local_indices().iter().enumerate() {
            let tiles = boxes[k].tiles(tile_size);
            ta.num_local_tiles.push(tiles.len());
            for (t, bx) in tiles.into_iter().enumerate() {
                ta.index_map.push(k);
                ta.local_index_map.push(li);
                ta.local_tile_index_map.push(t);
                ta.tiles.push(bx);
            }
        }
        log::debug!(
            "tiled {} local boxes of {} into {} tiles of size {}",
            decomp.local_len(),
            decomp.bd_key(),
            ta.tiles.len(),
            tile_size
        );
        ta
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Tile count of each local box.
    pub fn num_local_tiles(&self) -> &[usize] {
        &self.num_local_tiles
    }

    pub fn get(&self, i: usize) -> Option<Tile> {
        Some(Tile {
            global_index: *self.index_map.get(i)?,
            local_index: self.local_index_map[i],
            tile_index: self.local_tile_index_map[i],
            bx: self.tiles[i],
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Tile> + '_ {
        (0..self.len()).filter_map(|i| self.get(i))
    }

    /// All tiles as a vector, for parallel iteration.
    pub fn to_vec(&self) -> Vec<Tile> {
        self.iter().collect()
    }

    pub fn use_count(&self) -> u64 {
        self.nuse.load(Ordering::Relaxed)
    }
}

impl Cached for TileArray {
    fn record_use(&self) -> u64 {
        self.nuse.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn use_count(&self) -> u64 {
        TileArray::use_count(self)
    }

    fn bytes(&self) -> usize {
        std::mem::size_of::<Self>()
            + (self.num_local_tiles.capacity()
                + self.index_map.capacity()
                + self.local_index_map.capacity()
                + self.local_tile_index_map.capacity())
                * std::mem::size_of::<usize>()
            + self.tiles.capacity() * std::mem::size_of::<IndexBox>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{BoxArray, DistributionMapping};

    #[test]
    fn tiles_only_local_boxes_in_order() {
        let ba = BoxArray::cell_centered(vec![
            IndexBox::from_bounds([0, 0, 0], [15, 15, 0]),
            IndexBox::from_bounds([16, 0, 0], [31, 15, 0]),
            IndexBox::from_bounds([32, 0, 0], [47, 15, 0]),
        ]);
        let dm = DistributionMapping::new(vec![1, 0, 1], 2).unwrap();
        let dd = DomainDecomposition::new(ba, dm, 1).unwrap();
        let ta = TileArray::build(&dd, IntVect::new(8, 8, 0));
        assert_eq!(ta.num_local_tiles(), &[4, 4]);
        let first = ta.get(0).unwrap();
        assert_eq!((first.global_index, first.local_index, first.tile_index), (0, 0, 0));
        let fifth = ta.get(4).unwrap();
        assert_eq!((fifth.global_index, fifth.local_index, fifth.tile_index), (2, 1, 0));
        assert_eq!(fifth.bx, IndexBox::from_bounds([32, 0, 0], [39, 7, 0]));
        assert!(ta.get(8).is_none());
    }
}
