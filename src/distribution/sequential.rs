//! Sequential block generation

use crate::distribution::Distribution;

/// Yields 0, 1, 2, ... and starts over at 0 once `num_blocks` is reached
#[derive(Debug, Default)]
pub struct SequentialDistribution {
    next: u64,
}

impl SequentialDistribution {
    pub fn new() -> Self {
        Self { next: 0 }
    }
}

impl Distribution for SequentialDistribution {
    #[inline]
    fn next_block(&mut self, num_blocks: u64) -> u64 {
        if num_blocks == 0 {
            return 0;
        }

        if self.next >= num_blocks {
            self.next = 0;
        }
        let block = self.next;
        self.next += 1;
        block
    }
}
