//! Bijective remappings of k-mer codes.
//!
//! A [`Permutation`] assigns every k-mer code an ordering key. Keys are
//! signed so that hashed orders can use the full 64-bit range.

use thiserror::Error;
use tracing::debug;

use crate::alphabet::KmerAlphabet;
use crate::table::KmerTable;

/// LCG multiplier of [`RandomPermutation`].
///
/// Compatibility contract: outputs depend bit-exactly on this value and
/// [`LCG_C`]. The multiplier is `1 mod 4` and the increment is odd, so the
/// map `c -> A*c + C (mod 2^64)` has full period.
pub const LCG_A: u64 = 0xd134_2543_de82_ef95;

/// LCG increment of [`RandomPermutation`].
pub const LCG_C: u64 = 1;

/// Errors returned by permutations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PermutationError {
    /// The code lies outside the domain the permutation was fitted on.
    #[error("k-mer {code} is outside the fitted code space [0, {size})")]
    UnknownKmer {
        /// The offending code.
        code: u64,
        /// Size of the fitted code space.
        size: u64,
    },
    /// A dense count vector does not cover the code space.
    #[error("count vector has {actual} entries, expected {expected}")]
    CountLength {
        /// Size of the code space.
        expected: u64,
        /// Length of the given vector.
        actual: usize,
    },
}

/// Elementwise, deterministic remapping of k-mer codes.
pub trait Permutation: Send + Sync {
    /// Smallest value `permute_one` can return.
    fn min(&self) -> i64;

    /// Largest value `permute_one` can return.
    fn max(&self) -> i64;

    /// Permuted value of a single code.
    fn permute_one(&self, code: u64) -> Result<i64, PermutationError>;

    /// Permuted value for each code, in input order.
    fn permute(&self, codes: &[u64]) -> Result<Vec<i64>, PermutationError> {
        codes.iter().map(|&c| self.permute_one(c)).collect()
    }
}

/// Pseudo-random bijection over all 64-bit values.
///
/// Each code is hashed independently with one LCG step,
/// `(LCG_A * code + LCG_C) mod 2^64`, and the resulting bit pattern is
/// reinterpreted as `i64`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RandomPermutation;

impl RandomPermutation {
    /// Create the permutation. It carries no state.
    pub fn new() -> Self {
        Self
    }

    /// The LCG step on a single value.
    #[inline]
    pub const fn hash(code: u64) -> i64 {
        LCG_A.wrapping_mul(code).wrapping_add(LCG_C) as i64
    }
}

impl Permutation for RandomPermutation {
    fn min(&self) -> i64 {
        i64::MIN
    }

    fn max(&self) -> i64 {
        i64::MAX
    }

    #[inline]
    fn permute_one(&self, code: u64) -> Result<i64, PermutationError> {
        Ok(Self::hash(code))
    }

    fn permute(&self, codes: &[u64]) -> Result<Vec<i64>, PermutationError> {
        Ok(codes.iter().map(|&c| Self::hash(c)).collect())
    }
}

/// Orders k-mers by how often they occur: rare k-mers get small values.
///
/// Codes are ranked by `(count ascending, code ascending)` over the whole
/// code space of the fitted k-mer alphabet; codes that never occurred have
/// count 0 and therefore take the first ranks. Codes outside the code space
/// fail with [`PermutationError::UnknownKmer`].
///
/// Only codes with a non-zero count are stored; the rank of a zero-count
/// code is derived from how many counted codes precede it.
#[derive(Clone, Debug)]
pub struct FrequencyPermutation {
    code_space: u64,
    /// Ascending codes with a non-zero count.
    counted: Vec<u64>,
    /// Rank of `counted[i]`.
    ranks: Vec<u64>,
}

impl FrequencyPermutation {
    /// Fit from a dense count vector with one entry per code.
    pub fn new(kmer_alphabet: &KmerAlphabet, counts: &[u64]) -> Result<Self, PermutationError> {
        let code_space = kmer_alphabet.code_space();
        if counts.len() as u64 != code_space {
            return Err(PermutationError::CountLength {
                expected: code_space,
                actual: counts.len(),
            });
        }
        let sparse = counts
            .iter()
            .enumerate()
            .filter(|&(_, &n)| n > 0)
            .map(|(code, &n)| (code as u64, n));
        Ok(Self::fit(code_space, sparse))
    }

    /// Fit from the bucket sizes of a built table.
    pub fn from_table(table: &KmerTable) -> Self {
        let sparse = table
            .iter()
            .map(|(code, bucket)| (code, bucket.len() as u64));
        let permutation = Self::fit(table.kmer_alphabet().code_space(), sparse);
        debug!(
            counted = permutation.counted.len(),
            code_space = permutation.code_space,
            "fitted frequency permutation"
        );
        permutation
    }

    /// `counts` must yield non-zero counts in ascending code order.
    fn fit(code_space: u64, counts: impl Iterator<Item = (u64, u64)>) -> Self {
        let (counted, values): (Vec<u64>, Vec<u64>) = counts.unzip();
        let zero_count = code_space - counted.len() as u64;

        // Stable sort on the count keeps ascending code order among ties.
        let mut order: Vec<usize> = (0..counted.len()).collect();
        order.sort_by_key(|&i| values[i]);

        let mut ranks = vec![0u64; counted.len()];
        for (rank, &i) in order.iter().enumerate() {
            ranks[i] = zero_count + rank as u64;
        }
        Self {
            code_space,
            counted,
            ranks,
        }
    }

    /// Size of the fitted code space.
    pub fn code_space(&self) -> u64 {
        self.code_space
    }
}

impl Permutation for FrequencyPermutation {
    fn min(&self) -> i64 {
        0
    }

    fn max(&self) -> i64 {
        // Code spaces never exceed i64::MAX, see `alphabet::MAX_CODE_SPACE`.
        self.code_space as i64 - 1
    }

    fn permute_one(&self, code: u64) -> Result<i64, PermutationError> {
        if code >= self.code_space {
            return Err(PermutationError::UnknownKmer {
                code,
                size: self.code_space,
            });
        }
        let rank = match self.counted.binary_search(&code) {
            Ok(i) => self.ranks[i],
            // `i` counted codes are smaller, all other smaller codes have count 0.
            Err(i) => code - i as u64,
        };
        Ok(rank as i64)
    }
}
