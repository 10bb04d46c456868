//! Block allocator.
//!
//! A bitmap covers a window of `lookahead_size * 8` blocks. When the window
//! runs out it slides forward and is rebuilt by traversing every block the
//! filesystem can reach. Blocks are never freed explicitly: a block is free
//! exactly when no traversal finds it.
//!
//! `ckpoint` counts how many blocks may still be scanned before every block
//! has been looked at since the last commit; reaching zero means the volume
//! is full.

/// Window position and scan progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct LookaheadState {
    start: u32,
    size: u32,
    next: u32,
    ckpoint: u32,
}

impl LookaheadState {
    pub const fn new() -> Self {
        Self {
            start: 0,
            size: 0,
            next: 0,
            ckpoint: 0,
        }
    }

    /// Start over at `seed`, with an empty window so the next allocation
    /// rebuilds it.
    pub fn seed(&mut self, seed: u32, block_count: u32) {
        *self = Self {
            start: seed % block_count,
            size: 0,
            next: 0,
            ckpoint: block_count,
        };
    }

    /// Blocks freed by a commit become eligible again.
    pub fn checkpoint(&mut self, block_count: u32) {
        self.ckpoint = block_count;
    }

    /// Whether every block has been scanned since the last checkpoint.
    pub fn exhausted(&self) -> bool {
        self.ckpoint == 0
    }

    /// First block of the current window.
    pub fn start(&self) -> u32 {
        self.start
    }

    /// Slide the window past the blocks just scanned. The caller clears the
    /// bitmap and marks the new window.
    pub fn advance(&mut self, window: u32, block_count: u32) {
        self.start = (self.start + self.size) % block_count;
        self.size = window.min(self.ckpoint);
        self.next = 0;
        self.ckpoint -= self.size;
    }

    /// Record `block` as in use if it falls inside the window.
    pub fn mark(&self, bits: &mut [u8], block: u32, block_count: u32) {
        if block >= block_count {
            return;
        }
        let rel = (block + block_count - self.start) % block_count;
        if rel < self.size {
            bits[(rel / 8) as usize] |= 1 << (rel % 8);
        }
    }

    /// Take the next free block of the window, if any.
    pub fn take(&mut self, bits: &mut [u8], block_count: u32) -> Option<u32> {
        while self.next < self.size {
            let rel = self.next;
            self.next += 1;
            let (byte, bit) = ((rel / 8) as usize, 1u8 << (rel % 8));
            if bits[byte] & bit == 0 {
                bits[byte] |= bit;
                return Some((self.start + rel) % block_count);
            }
        }
        None
    }
}
