//! Block-number distributions for offset generation
//!
//! Distributions produce block numbers in `[0, num_blocks)`; the request
//! generator turns them into byte offsets with `offset = block * io_size`,
//! which keeps every offset aligned to the request size.
//!
//! # Distributions
//!
//! - **Sequential**: 0, 1, 2, ... in order
//! - **Uniform**: every block equally likely, independent draws
//!
//! # Example
//!
//! ```
//! use fsperf::distribution::{Distribution, uniform::UniformDistribution};
//!
//! let mut dist = UniformDistribution::with_seed(7);
//! let block = dist.next_block(1024);
//! assert!(block < 1024);
//!
//! let offset = block * 4096;
//! assert_eq!(offset % 4096, 0);
//! ```

pub mod sequential;
pub mod uniform;

/// Source of block numbers
///
/// Each generator owns its distribution, so implementations only need to be
/// `Send`.
pub trait Distribution: Send {
    /// Next block number in `[0, num_blocks)`; 0 when `num_blocks` is 0
    fn next_block(&mut self, num_blocks: u64) -> u64;
}

/// Build the distribution for an access pattern
///
/// `seed` only affects random patterns; `None` seeds from OS entropy.
pub fn for_pattern(random: bool, seed: Option<u64>) -> Box<dyn Distribution> {
    if random {
        Box::new(match seed {
            Some(seed) => uniform::UniformDistribution::with_seed(seed),
            None => uniform::UniformDistribution::new(),
        })
    } else {
        Box::new(sequential::SequentialDistribution::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_pattern_sequential() {
        let mut dist = for_pattern(false, Some(1));
        assert_eq!(dist.next_block(10), 0);
        assert_eq!(dist.next_block(10), 1);
    }

    #[test]
    fn test_for_pattern_random_is_seeded() {
        let mut a = for_pattern(true, Some(99));
        let mut b = for_pattern(true, Some(99));
        for _ in 0..32 {
            assert_eq!(a.next_block(1 << 20), b.next_block(1 << 20));
        }
    }
}
