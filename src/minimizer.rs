//! Minimizer selection over k-mer codes.
//!
//! For every run of `window` consecutive k-mers the one with the smallest
//! ordering key is selected. Keys come from a [`Permutation`]; without one
//! the code itself is the key. Consecutive windows that select the same
//! k-mer report it once.

use std::collections::VecDeque;

use thiserror::Error;

use crate::alphabet::{AlphabetError, KmerAlphabet};
use crate::permutation::{Permutation, PermutationError};

/// Errors returned by [`MinimizerSelector`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MinimizerError {
    /// The window must span at least one k-mer.
    #[error("window size must be at least 1")]
    InvalidWindow,
    /// The sequence could not be encoded.
    #[error(transparent)]
    Alphabet(#[from] AlphabetError),
    /// The permutation rejected a code.
    #[error(transparent)]
    Permutation(#[from] PermutationError),
}

/// Selected k-mers: window start positions and their codes.
pub type Selection = (Vec<usize>, Vec<u64>);

/// Selects minimizers from sequences or precomputed k-mer codes.
pub struct MinimizerSelector {
    kmer_alphabet: KmerAlphabet,
    window: usize,
    permutation: Option<Box<dyn Permutation>>,
}

impl MinimizerSelector {
    /// Select one k-mer per `window` consecutive k-mers, ordered by code.
    pub fn new(kmer_alphabet: KmerAlphabet, window: usize) -> Result<Self, MinimizerError> {
        if window == 0 {
            return Err(MinimizerError::InvalidWindow);
        }
        Ok(Self {
            kmer_alphabet,
            window,
            permutation: None,
        })
    }

    /// Order k-mers by `permutation` instead of by code.
    pub fn with_permutation(mut self, permutation: Box<dyn Permutation>) -> Self {
        self.permutation = Some(permutation);
        self
    }

    /// The k-mer alphabet sequences are encoded with.
    pub fn kmer_alphabet(&self) -> &KmerAlphabet {
        &self.kmer_alphabet
    }

    /// Number of k-mers per window.
    pub fn window(&self) -> usize {
        self.window
    }

    /// Minimizers of `sequence`.
    pub fn select(&self, sequence: &[u8]) -> Result<Selection, MinimizerError> {
        let kmers = self.kmer_alphabet.create_kmers(sequence)?;
        self.select_from_kmers(&kmers)
    }

    /// Minimizers of a precomputed code array; positions index into `kmers`.
    pub fn select_from_kmers(&self, kmers: &[u64]) -> Result<Selection, MinimizerError> {
        if kmers.len() < self.window {
            return Ok((Vec::new(), Vec::new()));
        }
        let keys: Vec<i64> = match &self.permutation {
            Some(p) => p.permute(kmers)?,
            None => kmers.iter().map(|&c| c as i64).collect(),
        };

        let mut positions = Vec::new();
        let mut codes = Vec::new();
        // Indices with strictly increasing keys; the front is the leftmost minimum.
        let mut candidates: VecDeque<usize> = VecDeque::with_capacity(self.window);
        for (i, &key) in keys.iter().enumerate() {
            while candidates.back().is_some_and(|&j| keys[j] > key) {
                candidates.pop_back();
            }
            candidates.push_back(i);
            if i + 1 < self.window {
                continue;
            }
            let window_start = i + 1 - self.window;
            while candidates.front().is_some_and(|&j| j < window_start) {
                candidates.pop_front();
            }
            if let Some(&best) = candidates.front() {
                if positions.last() != Some(&best) {
                    positions.push(best);
                    codes.push(kmers[best]);
                }
            }
        }
        Ok((positions, codes))
    }
}
