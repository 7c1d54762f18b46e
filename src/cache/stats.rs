//! Counters describing how a metadata cache is used.

use serde::Serialize;

/// Build/use/erase statistics of one cache.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub name: &'static str,
    /// Entries currently held.
    pub size: usize,
    /// High-water mark of `size`.
    pub maxsize: usize,
    /// Largest use count seen on any entry.
    pub maxuse: u64,
    /// Total lookups served, hits and misses.
    pub nuse: u64,
    pub nbuild: u64,
    pub nerase: u64,
    /// Estimated bytes currently held.
    pub bytes: usize,
    pub bytes_hwm: usize,
}

impl CacheStats {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    pub(crate) fn record_build(&mut self, bytes: usize) {
        self.size += 1;
        self.nbuild += 1;
        self.maxsize = self.maxsize.max(self.size);
        self.bytes += bytes;
        self.bytes_hwm = self.bytes_hwm.max(self.bytes);
    }

    pub(crate) fn record_use(&mut self, entry_uses: u64) {
        self.nuse += 1;
        self.maxuse = self.maxuse.max(entry_uses);
    }

    pub(crate) fn record_erase(&mut self, entry_uses: u64, bytes: usize) {
        self.maxuse = self.maxuse.max(entry_uses);
        self.size = self.size.saturating_sub(1);
        self.nerase += 1;
        self.bytes = self.bytes.saturating_sub(bytes);
    }

    /// Log the counters at info level.
    pub fn report(&self) {
        log::info!(
            "{} cache: size {} (max {}), builds {}, erasures {}, \
             uses {} (max per entry {}), {} bytes (max {})",
            self.name,
            self.size,
            self.maxsize,
            self.nbuild,
            self.nerase,
            self.nuse,
            self.maxuse,
            self.bytes,
            self.bytes_hwm,
        );
    }
}
