/// Fixed buffer pool: the wiring between instructions
///
/// Every instruction reads its inputs from, and writes its output to, a
/// block addressed by a small integer index. The pool is sized once at
/// construction and never grows, so addressing can never fail at run time.
///
/// # Design
/// - One contiguous allocation of 32-byte aligned blocks
/// - `BUFFER_UNUSED` (and any out-of-range index) reads as a silent block
/// - Writes to an unusable index land in a scratch sink and are discarded
use crate::constants::{BLOCK_SIZE, BUFFER_UNUSED};
use std::ops::{Deref, DerefMut};

/// One block of samples, aligned for SIMD loads.
#[derive(Clone, Copy, Debug, PartialEq)]
#[repr(C, align(32))]
pub struct Block(pub [f32; BLOCK_SIZE]);

impl Block {
    pub const ZERO: Block = Block([0.0; BLOCK_SIZE]);

    pub fn splat(value: f32) -> Self {
        Block([value; BLOCK_SIZE])
    }
}

impl Default for Block {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Deref for Block {
    type Target = [f32; BLOCK_SIZE];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Block {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Pre-sized array of blocks addressed by `u16` index.
///
/// # Example
/// ```ignore
/// let mut pool = BufferPool::new(16);
/// pool.fill(3, 0.5);
/// pool.copy(4, 3);
/// assert_eq!(pool.get(4)[0], 0.5);
/// ```
pub struct BufferPool {
    blocks: Box<[Block]>,
    zero: Block,
    sink: Block,
}

impl BufferPool {
    pub fn new(count: usize) -> Self {
        Self {
            blocks: vec![Block::ZERO; count].into_boxed_slice(),
            zero: Block::ZERO,
            sink: Block::ZERO,
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Read a block. Unused and out-of-range indices read as silence.
    #[inline]
    pub fn get(&self, index: u16) -> &Block {
        if index == BUFFER_UNUSED {
            return &self.zero;
        }
        self.blocks.get(index as usize).unwrap_or(&self.zero)
    }

    /// Writable block. Unused and out-of-range indices hand out a scratch
    /// sink whose contents are never read back.
    #[inline]
    pub fn get_mut(&mut self, index: u16) -> &mut Block {
        if index != BUFFER_UNUSED {
            if let Some(block) = self.blocks.get_mut(index as usize) {
                return block;
            }
        }
        &mut self.sink
    }

    pub fn clear(&mut self, index: u16) {
        self.fill(index, 0.0);
    }

    pub fn fill(&mut self, index: u16, value: f32) {
        self.get_mut(index).fill(value);
    }

    pub fn copy(&mut self, dst: u16, src: u16) {
        if dst == src {
            return;
        }
        let block = *self.get(src);
        *self.get_mut(dst) = block;
    }

    pub fn clear_all(&mut self) {
        self.blocks.fill(Block::ZERO);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_pool_basic() {
        let mut pool = BufferPool::new(8);
        assert_eq!(pool.len(), 8);

        pool.fill(2, 0.75);
        assert!(pool.get(2).iter().all(|&s| s == 0.75));

        pool.copy(5, 2);
        assert!(pool.get(5).iter().all(|&s| s == 0.75));

        pool.clear(2);
        assert!(pool.get(2).iter().all(|&s| s == 0.0));
        assert_eq!(pool.get(5)[0], 0.75, "copy must be independent of source");
    }

    #[test]
    fn test_buffer_alignment() {
        let pool = BufferPool::new(4);
        for i in 0..4 {
            let addr = pool.get(i).as_ptr() as usize;
            assert_eq!(addr % 32, 0, "block {} is not 32-byte aligned", i);
        }
    }

    #[test]
    fn test_get_is_stable() {
        let mut pool = BufferPool::new(4);
        let first = pool.get(3) as *const Block;
        pool.fill(3, 1.0);
        pool.fill(1, 2.0);
        let second = pool.get(3) as *const Block;
        assert!(std::ptr::eq(first, second), "block address moved");
    }

    #[test]
    fn test_unused_and_out_of_range_indices() {
        let mut pool = BufferPool::new(4);

        pool.fill(BUFFER_UNUSED, 9.0);
        pool.fill(100, 9.0);
        assert!(pool.get(BUFFER_UNUSED).iter().all(|&s| s == 0.0));
        assert!(pool.get(100).iter().all(|&s| s == 0.0));
        for i in 0..4 {
            assert!(pool.get(i).iter().all(|&s| s == 0.0), "sink write leaked into {}", i);
        }
    }

    #[test]
    fn test_clear_all() {
        let mut pool = BufferPool::new(3);
        for i in 0..3 {
            pool.fill(i, i as f32 + 1.0);
        }
        pool.clear_all();
        for i in 0..3 {
            assert!(pool.get(i).iter().all(|&s| s == 0.0));
        }
    }
}
