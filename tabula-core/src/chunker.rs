//! Content-defined chunk boundaries.
//!
//! Items are fed to a [`Chunker`] one at a time as canonical bytes. Each byte
//! rolls a buzhash over a trailing window; when the window hash has its low
//! `pattern_bits` bits set, the current item ends a chunk (once the chunk
//! holds `min_chunk_items`). Chunks are also cut at `max_chunk_bytes`. The
//! hasher resets at every boundary, so a boundary depends only on the bytes
//! since the previous one.

use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::config::ChunkConfig;

/// Per-byte random values for the buzhash, derived from the seed.
fn byte_table(seed: u64) -> [u32; 256] {
    let mut table = [0u32; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        let mut hasher = Sha256::new();
        hasher.update(seed.to_be_bytes());
        hasher.update((i as u32).to_be_bytes());
        let digest = hasher.finalize();
        *slot = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    }
    table
}

/// Buzhash over the last `window_size` bytes.
#[derive(Clone)]
pub struct RollingHasher {
    table: Arc<[u32; 256]>,
    window: Vec<u8>,
    pos: usize,
    filled: usize,
    hash: u32,
}

impl RollingHasher {
    pub fn new(window_size: usize, seed: u64) -> Self {
        RollingHasher {
            table: Arc::new(byte_table(seed)),
            window: vec![0; window_size.max(1)],
            pos: 0,
            filled: 0,
            hash: 0,
        }
    }

    /// Roll one byte in, returning the updated window hash.
    #[inline]
    pub fn roll(&mut self, byte: u8) -> u32 {
        let size = self.window.len();
        self.hash = self.hash.rotate_left(1) ^ self.table[byte as usize];
        if self.filled == size {
            let out = self.window[self.pos];
            self.hash ^= self.table[out as usize].rotate_left((size % 32) as u32);
        } else {
            self.filled += 1;
        }
        self.window[self.pos] = byte;
        self.pos = (self.pos + 1) % size;
        self.hash
    }

    pub fn reset(&mut self) {
        self.pos = 0;
        self.filled = 0;
        self.hash = 0;
    }
}

/// Decides chunk boundaries for one tree level.
#[derive(Clone)]
pub struct Chunker {
    hasher: RollingHasher,
    mask: u32,
    min_items: usize,
    max_bytes: usize,
    items: usize,
    bytes: usize,
}

impl Chunker {
    pub fn new(config: &ChunkConfig) -> Self {
        let bits = config.pattern_bits.clamp(1, 31);
        Chunker {
            hasher: RollingHasher::new(config.window_size, config.seed),
            mask: (1u32 << bits) - 1,
            // one-item chunks would stop meta levels from shrinking
            min_items: config.min_chunk_items.max(2),
            max_bytes: config.max_chunk_bytes.max(1),
            items: 0,
            bytes: 0,
        }
    }

    /// Feed one item; true if a chunk boundary falls after it.
    pub fn append(&mut self, item: &[u8]) -> bool {
        let mut crossed = false;
        for &byte in item {
            if self.hasher.roll(byte) & self.mask == self.mask {
                crossed = true;
            }
        }
        self.items += 1;
        self.bytes += item.len();

        let boundary = (crossed && self.items >= self.min_items) || self.bytes >= self.max_bytes;
        if boundary {
            self.reset();
        }
        boundary
    }

    /// Items fed since the last boundary.
    pub fn pending_items(&self) -> usize {
        self.items
    }

    pub fn reset(&mut self) {
        self.hasher.reset();
        self.items = 0;
        self.bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(bits: u32) -> ChunkConfig {
        ChunkConfig {
            pattern_bits: bits,
            ..ChunkConfig::default()
        }
    }

    fn boundaries(chunker: &mut Chunker, items: &[Vec<u8>]) -> Vec<usize> {
        items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| chunker.append(item).then_some(i))
            .collect()
    }

    fn items(n: usize) -> Vec<Vec<u8>> {
        (0..n).map(|i| format!("item-{:06}", i).into_bytes()).collect()
    }

    #[test]
    fn test_rolling_hash_depends_only_on_window() {
        let mut a = RollingHasher::new(4, 7);
        let mut b = RollingHasher::new(4, 7);
        let ha = b"xxxxxxabcd".iter().fold(0, |_, byte| a.roll(*byte));
        let hb = b"zzabcd".iter().fold(0, |_, byte| b.roll(*byte));
        assert_eq!(ha, hb);

        let mut c = RollingHasher::new(4, 8);
        let hc = b"abcd".iter().fold(0, |_, byte| c.roll(*byte));
        assert_ne!(ha, hc);
    }

    #[test]
    fn test_boundaries_deterministic() {
        let data = items(2000);
        let first = boundaries(&mut Chunker::new(&config(6)), &data);
        let second = boundaries(&mut Chunker::new(&config(6)), &data);
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn test_boundaries_resync_after_edit() {
        let data = items(2000);
        let mut edited = data.clone();
        edited[10] = b"something else entirely".to_vec();

        let config = ChunkConfig {
            window_size: 16,
            ..config(6)
        };
        let original = boundaries(&mut Chunker::new(&config), &data);
        let changed = boundaries(&mut Chunker::new(&config), &edited);

        // past the first few chunks the cut points line up again
        let tail = |b: &[usize]| b.iter().copied().filter(|i| *i > 500).collect::<Vec<_>>();
        assert_eq!(tail(&original), tail(&changed));
    }

    #[test]
    fn test_min_items_respected() {
        let mut chunker = Chunker::new(&ChunkConfig {
            pattern_bits: 1,
            min_chunk_items: 5,
            ..ChunkConfig::default()
        });
        let cuts = boundaries(&mut chunker, &items(200));
        let mut prev: Option<usize> = None;
        for cut in cuts {
            let len = match prev {
                Some(p) => cut - p,
                None => cut + 1,
            };
            assert!(len >= 5);
            prev = Some(cut);
        }
    }

    #[test]
    fn test_max_bytes_forces_boundary() {
        let mut chunker = Chunker::new(&ChunkConfig {
            pattern_bits: 31,
            max_chunk_bytes: 100,
            ..ChunkConfig::default()
        });
        let cuts = boundaries(&mut chunker, &vec![vec![0u8; 30]; 12]);
        assert_eq!(cuts, vec![3, 7, 11]);
        assert_eq!(chunker.pending_items(), 0);
    }
}
