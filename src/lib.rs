//! K-mer indexing and matching for fast approximate sequence similarity
//! search.
//!
//! - [`KmerAlphabet`] turns windows of a base [`Alphabet`] into integer codes
//!   in `[0, S^k)`, optionally through a spacing model.
//! - [`Permutation`]s remap codes to ordering keys: [`RandomPermutation`]
//!   (one LCG step per code) and [`FrequencyPermutation`] (rarest first).
//! - [`KmerTable`] maps every code to its `(ref_id, pos)` occurrences and
//!   matches tables against tables or sequences, optionally expanding each
//!   k-mer through a [`SimilarityRule`].
//! - [`MinimizerSelector`] picks one k-mer per window for sparse tables.
//!
//! Tables are immutable once built and can be saved to and loaded from the
//! `.kmt` format ([`KmerTableWriter`], [`KmerTable::open`]).

pub mod alphabet;
mod builder;
mod io;
pub mod minimizer;
pub mod permutation;
mod radix;
pub mod similarity;
mod table;

pub use alphabet::{Alphabet, AlphabetError, KmerAlphabet};
pub use builder::{BuildConfig, MAX_DENSE_CODE_SPACE, TableBuilder};
pub use io::KmerTableWriter;
pub use minimizer::{MinimizerError, MinimizerSelector};
pub use permutation::{FrequencyPermutation, Permutation, PermutationError, RandomPermutation};
pub use similarity::{ScoreThresholdRule, SimilarityRule, SubstitutionMatrix};
pub use table::{Buckets, KmerTable, Match, Occurrence, StorageKind, TableError};
