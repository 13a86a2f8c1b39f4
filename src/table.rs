//! KmerTable: per-code buckets of `(ref_id, pos)` occurrences, and matching.
//!
//! Occurrences live in one flat array grouped by ascending code; within a
//! code they keep insertion order. Bucket boundaries come from one of two
//! layouts chosen at build time:
//! - `Dense`: an offsets array with one entry per code of the code space.
//! - `Sparse`: ascending present codes, their offsets, and a hash map from
//!   code to bucket slot.

use bytemuck::{Pod, Zeroable};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::debug;

use crate::alphabet::{AlphabetError, KmerAlphabet};
use crate::builder::{BuildConfig, TableBuilder};
use crate::similarity::SimilarityRule;

/// Occurrence record: `(ref_id, pos)`.
#[repr(C)]
#[derive(Copy, Clone, Default, Pod, Zeroable, PartialEq, Eq, Hash, Debug)]
pub struct Occurrence {
    /// Reference (sequence) id.
    pub ref_id: u32,
    /// Window start within the reference (0-based).
    pub pos: u32,
}

impl Occurrence {
    /// Create an occurrence record.
    #[inline]
    pub const fn new(ref_id: u32, pos: u32) -> Self {
        Self { ref_id, pos }
    }
}

impl From<(u32, u32)> for Occurrence {
    #[inline]
    fn from((ref_id, pos): (u32, u32)) -> Self {
        Self { ref_id, pos }
    }
}

/// A pair of occurrences sharing a k-mer: one from this table (`ref_*`), one
/// from the query table or sequence (`query_*`).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Match {
    /// Reference id in this table.
    pub ref_id: u32,
    /// Position in the reference.
    pub ref_pos: u32,
    /// Reference id on the query side (0 for single query sequences).
    pub query_id: u32,
    /// Position in the query.
    pub query_pos: u32,
}

impl Match {
    #[inline]
    fn pair(reference: &Occurrence, query: &Occurrence) -> Self {
        Self {
            ref_id: reference.ref_id,
            ref_pos: reference.pos,
            query_id: query.ref_id,
            query_pos: query.pos,
        }
    }
}

/// Errors returned by KmerTable construction and queries.
#[derive(Debug, Error)]
pub enum TableError {
    /// Encoding failed.
    #[error(transparent)]
    Alphabet(#[from] AlphabetError),
    /// A code lies outside `[0, S^k)`.
    #[error("k-mer code {code} is outside the code space [0, {size})")]
    CodeOutOfRange {
        /// The offending code.
        code: u64,
        /// Size of the code space.
        size: u64,
    },
    /// Parallel bulk-load inputs disagree in length.
    #[error("{what} has {actual} entries, expected {expected}")]
    LengthMismatch {
        /// The input that does not fit.
        what: &'static str,
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },
    /// Tables over different k-mer alphabets cannot be combined.
    #[error("tables use different k-mer alphabets")]
    AlphabetMismatch,
    /// Merging needs at least one table.
    #[error("no tables to merge")]
    NoTables,
    /// An id or position does not fit the 32-bit occurrence record.
    #[error("{what} {value} does not fit into 32 bits")]
    Overflow {
        /// Which value overflowed.
        what: &'static str,
        /// The value.
        value: u64,
    },
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Invalid table file.
    #[error("invalid table file: {0}")]
    Format(String),
}

/// Bucket layout of a built table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageKind {
    /// One offsets entry per code of the code space.
    Dense,
    /// Hash-keyed buckets for present codes only.
    Sparse,
}

#[derive(Clone, Debug)]
pub(crate) enum Storage {
    Dense {
        /// `offsets[c]..offsets[c + 1]` is the bucket of code `c`.
        offsets: Vec<usize>,
        /// Number of non-empty buckets.
        n_kmers: usize,
    },
    Sparse {
        /// Ascending present codes.
        codes: Vec<u64>,
        /// `offsets[i]..offsets[i + 1]` is the bucket of `codes[i]`.
        offsets: Vec<usize>,
        slots: FxHashMap<u64, usize>,
    },
}

impl Storage {
    pub(crate) fn dense(offsets: Vec<usize>) -> Self {
        let n_kmers = offsets.windows(2).filter(|w| w[0] < w[1]).count();
        Storage::Dense { offsets, n_kmers }
    }

    pub(crate) fn sparse(codes: Vec<u64>, offsets: Vec<usize>) -> Self {
        let slots = codes.iter().enumerate().map(|(i, &c)| (c, i)).collect();
        Storage::Sparse {
            codes,
            offsets,
            slots,
        }
    }
}

/// Immutable index from k-mer code to its occurrences.
///
/// Built in one shot by the `from_*` constructors or a [`TableBuilder`];
/// there is no mutation afterwards, so a table can be shared freely across
/// threads.
#[derive(Clone, Debug)]
pub struct KmerTable {
    kmer_alphabet: KmerAlphabet,
    storage: Storage,
    occurrences: Vec<Occurrence>,
    parallel_min_codes: usize,
}

impl PartialEq for KmerTable {
    /// Equal alphabets and equal buckets, regardless of layout.
    fn eq(&self, other: &Self) -> bool {
        self.kmer_alphabet == other.kmer_alphabet && self.iter().eq(other.iter())
    }
}

impl KmerTable {
    pub(crate) fn from_parts(
        kmer_alphabet: KmerAlphabet,
        storage: Storage,
        occurrences: Vec<Occurrence>,
        parallel_min_codes: usize,
    ) -> Self {
        Self {
            kmer_alphabet,
            storage,
            occurrences,
            parallel_min_codes,
        }
    }

    /// A builder with the default [`BuildConfig`].
    pub fn builder(kmer_alphabet: KmerAlphabet) -> TableBuilder {
        TableBuilder::new(kmer_alphabet, BuildConfig::default())
    }

    /// Bulk load from `(code, occurrences)` entries.
    ///
    /// Buckets receive occurrences in entry order, and within an entry in
    /// the given order. Entries may repeat a code.
    pub fn from_positions<I, P, O>(kmer_alphabet: KmerAlphabet, entries: I) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = (u64, P)>,
        P: IntoIterator<Item = O>,
        O: Into<Occurrence>,
    {
        let mut builder = Self::builder(kmer_alphabet);
        for (code, occurrences) in entries {
            builder.check_code(code)?;
            for o in occurrences {
                builder.push_unchecked(code, o.into());
            }
        }
        Ok(builder.build())
    }

    /// Index every window of every sequence; sequence `i` gets ref id `i`.
    ///
    /// Windows containing symbols outside the alphabet are skipped.
    pub fn from_sequences<S: AsRef<[u8]>>(
        kmer_alphabet: KmerAlphabet,
        sequences: &[S],
    ) -> Result<Self, TableError> {
        let ids = index_ids(sequences.len())?;
        Self::from_sequences_with_ids(kmer_alphabet, sequences, &ids)
    }

    /// Like [`from_sequences`](Self::from_sequences) with explicit ref ids.
    pub fn from_sequences_with_ids<S: AsRef<[u8]>>(
        kmer_alphabet: KmerAlphabet,
        sequences: &[S],
        ref_ids: &[u32],
    ) -> Result<Self, TableError> {
        expect_len("ref_ids", sequences.len(), ref_ids.len())?;
        let mut builder = Self::builder(kmer_alphabet);
        for (seq, &id) in sequences.iter().zip(ref_ids) {
            builder.push_sequence(id, seq.as_ref())?;
        }
        Ok(builder.build())
    }

    /// Index precomputed code arrays; `kmers[i]` belongs to `ref_ids[i]` and
    /// code `j` of it sits at position `j`.
    pub fn from_kmers<K: AsRef<[u64]>>(
        kmer_alphabet: KmerAlphabet,
        kmers: &[K],
        ref_ids: &[u32],
    ) -> Result<Self, TableError> {
        expect_len("ref_ids", kmers.len(), ref_ids.len())?;
        let mut builder = Self::builder(kmer_alphabet);
        for (codes, &id) in kmers.iter().zip(ref_ids) {
            builder.push_kmers(id, codes.as_ref(), None)?;
        }
        Ok(builder.build())
    }

    /// Like [`from_kmers`](Self::from_kmers); positions whose mask entry is
    /// `true` are ignored.
    pub fn from_kmers_masked<K: AsRef<[u64]>, M: AsRef<[bool]>>(
        kmer_alphabet: KmerAlphabet,
        kmers: &[K],
        ref_ids: &[u32],
        ignore_masks: &[M],
    ) -> Result<Self, TableError> {
        expect_len("ref_ids", kmers.len(), ref_ids.len())?;
        expect_len("ignore_masks", kmers.len(), ignore_masks.len())?;
        let mut builder = Self::builder(kmer_alphabet);
        for ((codes, &id), mask) in kmers.iter().zip(ref_ids).zip(ignore_masks) {
            builder.push_kmers(id, codes.as_ref(), Some(mask.as_ref()))?;
        }
        Ok(builder.build())
    }

    /// Index selected k-mers, e.g. minimizers: `kmers[i][j]` occurs in
    /// reference `ref_ids[i]` at `positions[i][j]`.
    pub fn from_kmer_selection<P: AsRef<[usize]>, K: AsRef<[u64]>>(
        kmer_alphabet: KmerAlphabet,
        ref_ids: &[u32],
        positions: &[P],
        kmers: &[K],
    ) -> Result<Self, TableError> {
        expect_len("positions", ref_ids.len(), positions.len())?;
        expect_len("kmers", ref_ids.len(), kmers.len())?;
        let mut builder = Self::builder(kmer_alphabet);
        for ((&id, pos), codes) in ref_ids.iter().zip(positions).zip(kmers) {
            let (pos, codes) = (pos.as_ref(), codes.as_ref());
            expect_len("selected kmers", pos.len(), codes.len())?;
            for &c in codes {
                builder.check_code(c)?;
            }
            let pos = pos
                .iter()
                .map(|&p| to_u32("position", p as u64))
                .collect::<Result<Vec<_>, _>>()?;
            for (&p, &c) in pos.iter().zip(codes) {
                builder.push_unchecked(c, Occurrence::new(id, p));
            }
        }
        Ok(builder.build())
    }

    /// Merge tables over the same k-mer alphabet. Buckets are concatenated
    /// in table order.
    pub fn from_tables(tables: &[&KmerTable]) -> Result<Self, TableError> {
        let (first, rest) = tables.split_first().ok_or(TableError::NoTables)?;
        if rest.iter().any(|t| t.kmer_alphabet != first.kmer_alphabet) {
            return Err(TableError::AlphabetMismatch);
        }
        let mut builder = Self::builder(first.kmer_alphabet.clone());
        for table in tables {
            for (code, bucket) in table.iter() {
                for &o in bucket {
                    builder.push_unchecked(code, o);
                }
            }
        }
        debug!(tables = tables.len(), "merging k-mer tables");
        Ok(builder.build())
    }

    /// The k-mer alphabet codes refer to.
    #[inline]
    pub fn kmer_alphabet(&self) -> &KmerAlphabet {
        &self.kmer_alphabet
    }

    /// Number of informative symbols per k-mer.
    #[inline]
    pub fn k(&self) -> usize {
        self.kmer_alphabet.k()
    }

    /// Layout chosen at build time.
    pub fn storage_kind(&self) -> StorageKind {
        match self.storage {
            Storage::Dense { .. } => StorageKind::Dense,
            Storage::Sparse { .. } => StorageKind::Sparse,
        }
    }

    /// Total number of occurrence records.
    #[inline]
    pub fn num_occurrences(&self) -> usize {
        self.occurrences.len()
    }

    /// Number of codes with at least one occurrence.
    pub fn num_kmers(&self) -> usize {
        match &self.storage {
            Storage::Dense { n_kmers, .. } => *n_kmers,
            Storage::Sparse { codes, .. } => codes.len(),
        }
    }

    /// Occurrences of `code`, empty if it never occurred.
    pub fn get(&self, code: u64) -> Result<&[Occurrence], TableError> {
        self.check_code(code)?;
        Ok(self.bucket(code))
    }

    /// Bucket length of `code`; 0 if it never occurred.
    pub fn count(&self, code: u64) -> Result<usize, TableError> {
        self.get(code).map(<[Occurrence]>::len)
    }

    /// [`count`](Self::count) for each code.
    pub fn count_many(&self, codes: &[u64]) -> Result<Vec<usize>, TableError> {
        codes.iter().map(|&c| self.count(c)).collect()
    }

    /// Whether `code` has at least one occurrence.
    pub fn contains(&self, code: u64) -> bool {
        !self.bucket(code).is_empty()
    }

    /// Codes with at least one occurrence, ascending.
    pub fn kmers(&self) -> Vec<u64> {
        self.iter().map(|(code, _)| code).collect()
    }

    /// Non-empty buckets in ascending code order.
    pub fn iter(&self) -> Buckets<'_> {
        Buckets {
            table: self,
            slot: 0,
        }
    }

    /// All pairs of occurrences that share a code, one from this table and
    /// one from `other`.
    ///
    /// Ordered by ascending code; within a code, this table's bucket order
    /// times `other`'s bucket order, row-major.
    pub fn match_table(&self, other: &KmerTable) -> Result<Vec<Match>, TableError> {
        self.check_compatible(other)?;
        // Both sides iterate in ascending code order, so walking the cheaper
        // one and probing the other keeps the result order.
        let pairs: Vec<(&[Occurrence], &[Occurrence])> = if self.scan_cost() <= other.scan_cost() {
            self.iter()
                .filter_map(|(code, refs)| {
                    let query = other.bucket(code);
                    (!query.is_empty()).then_some((refs, query))
                })
                .collect()
        } else {
            other
                .iter()
                .filter_map(|(code, query)| {
                    let refs = self.bucket(code);
                    (!refs.is_empty()).then_some((refs, query))
                })
                .collect()
        };
        Ok(self.cross_product(&pairs))
    }

    /// Like [`match_table`](Self::match_table), but every k-mer of `other`
    /// also matches the k-mers `rule` considers similar to it.
    ///
    /// Ordered by ascending query code, then ascending similar code.
    pub fn match_table_with(
        &self,
        other: &KmerTable,
        rule: &dyn SimilarityRule,
    ) -> Result<Vec<Match>, TableError> {
        self.check_compatible(other)?;
        let mut pairs = Vec::new();
        for (code, query) in other.iter() {
            for similar in rule.similar_kmers(&self.kmer_alphabet, code)? {
                let refs = self.bucket(similar);
                if !refs.is_empty() {
                    pairs.push((refs, query));
                }
            }
        }
        Ok(self.cross_product(&pairs))
    }

    /// Match a single query sequence; its occurrences get query id 0.
    pub fn match_sequence(&self, sequence: &[u8]) -> Result<Vec<Match>, TableError> {
        let query = self.query_table(sequence)?;
        self.match_table(&query)
    }

    /// [`match_sequence`](Self::match_sequence) with similar-k-mer expansion.
    pub fn match_sequence_with(
        &self,
        sequence: &[u8],
        rule: &dyn SimilarityRule,
    ) -> Result<Vec<Match>, TableError> {
        let query = self.query_table(sequence)?;
        self.match_table_with(&query, rule)
    }

    // -------- internals --------

    pub(crate) fn occurrences(&self) -> &[Occurrence] {
        &self.occurrences
    }

    /// Bucket of an in-range or out-of-range code; the latter is empty.
    pub(crate) fn bucket(&self, code: u64) -> &[Occurrence] {
        let range = match &self.storage {
            Storage::Dense { offsets, .. } => {
                if !self.kmer_alphabet.contains(code) {
                    return &[];
                }
                let c = code as usize;
                offsets[c]..offsets[c + 1]
            }
            Storage::Sparse { offsets, slots, .. } => match slots.get(&code) {
                Some(&slot) => offsets[slot]..offsets[slot + 1],
                None => return &[],
            },
        };
        &self.occurrences[range]
    }

    fn check_code(&self, code: u64) -> Result<(), TableError> {
        if self.kmer_alphabet.contains(code) {
            Ok(())
        } else {
            Err(TableError::CodeOutOfRange {
                code,
                size: self.kmer_alphabet.code_space(),
            })
        }
    }

    fn check_compatible(&self, other: &KmerTable) -> Result<(), TableError> {
        if self.kmer_alphabet == other.kmer_alphabet {
            Ok(())
        } else {
            Err(TableError::AlphabetMismatch)
        }
    }

    /// Slots visited by [`iter`](Self::iter).
    fn scan_cost(&self) -> usize {
        match &self.storage {
            Storage::Dense { offsets, .. } => offsets.len().saturating_sub(1),
            Storage::Sparse { codes, .. } => codes.len(),
        }
    }

    /// One-sequence query table; sparse, so its cost follows the query
    /// length rather than the code space.
    fn query_table(&self, sequence: &[u8]) -> Result<KmerTable, TableError> {
        let config = BuildConfig::default()
            .storage(StorageKind::Sparse)
            .parallel_min_codes(self.parallel_min_codes);
        let mut builder = TableBuilder::new(self.kmer_alphabet.clone(), config);
        builder.push_sequence(0, sequence)?;
        Ok(builder.build())
    }

    /// Expand `(refs, query)` bucket pairs in order. Shards across rayon
    /// workers for many pairs; `collect` keeps the sequential order.
    fn cross_product(&self, pairs: &[(&[Occurrence], &[Occurrence])]) -> Vec<Match> {
        let total: usize = pairs.iter().map(|(r, q)| r.len() * q.len()).sum();
        debug!(codes = pairs.len(), matches = total, "matching k-mer buckets");
        if pairs.len() >= self.parallel_min_codes {
            pairs
                .par_iter()
                .flat_map_iter(|&(refs, query)| cross(refs, query))
                .collect()
        } else {
            let mut out = Vec::with_capacity(total);
            for &(refs, query) in pairs {
                out.extend(cross(refs, query));
            }
            out
        }
    }
}

fn cross<'a>(refs: &'a [Occurrence], query: &'a [Occurrence]) -> impl Iterator<Item = Match> + 'a {
    refs.iter()
        .flat_map(move |r| query.iter().map(move |q| Match::pair(r, q)))
}

impl<'a> IntoIterator for &'a KmerTable {
    type Item = (u64, &'a [Occurrence]);
    type IntoIter = Buckets<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the non-empty buckets of a [`KmerTable`], ascending by code.
pub struct Buckets<'a> {
    table: &'a KmerTable,
    slot: usize,
}

impl<'a> Iterator for Buckets<'a> {
    type Item = (u64, &'a [Occurrence]);

    fn next(&mut self) -> Option<Self::Item> {
        let table: &'a KmerTable = self.table;
        match &table.storage {
            Storage::Dense { offsets, .. } => {
                while self.slot + 1 < offsets.len() {
                    let code = self.slot as u64;
                    let (start, end) = (offsets[self.slot], offsets[self.slot + 1]);
                    self.slot += 1;
                    if start < end {
                        return Some((code, &table.occurrences[start..end]));
                    }
                }
                None
            }
            Storage::Sparse { codes, offsets, .. } => {
                let code = *codes.get(self.slot)?;
                let (start, end) = (offsets[self.slot], offsets[self.slot + 1]);
                self.slot += 1;
                Some((code, &table.occurrences[start..end]))
            }
        }
    }
}

pub(crate) fn to_u32(what: &'static str, value: u64) -> Result<u32, TableError> {
    u32::try_from(value).map_err(|_| TableError::Overflow { what, value })
}

fn index_ids(n: usize) -> Result<Vec<u32>, TableError> {
    (0..n).map(|i| to_u32("ref id", i as u64)).collect()
}

fn expect_len(what: &'static str, expected: usize, actual: usize) -> Result<(), TableError> {
    if expected == actual {
        Ok(())
    } else {
        Err(TableError::LengthMismatch {
            what,
            expected,
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet::Alphabet;

    fn dna(k: usize) -> KmerAlphabet {
        KmerAlphabet::new(Alphabet::nucleotide(), k).unwrap()
    }

    #[test]
    fn test_query_table_is_sparse() {
        let reference = KmerTable::from_sequences(dna(11), &[b"ACGTTGCAAGCTAGGATCCAGGTACCAT"]).unwrap();
        assert_eq!(reference.storage_kind(), StorageKind::Dense);
        let query = reference.query_table(b"TTGCAAGCTAGGATCC").unwrap();
        assert_eq!(query.storage_kind(), StorageKind::Sparse);
        assert_eq!(query.num_kmers(), 6);
        assert_eq!(query.scan_cost(), 6);
        assert_eq!(reference.scan_cost(), 1 << 22);
    }

    #[test]
    fn test_dense_kmer_count_is_stored() {
        let table = KmerTable::from_sequences(dna(3), &[b"ACGACGTT"]).unwrap();
        assert_eq!(table.storage_kind(), StorageKind::Dense);
        // ACG twice, CGA GAC CGT GTT
        assert_eq!(table.num_kmers(), 5);
        assert_eq!(table.num_kmers(), table.iter().count());
    }

    #[test]
    fn test_match_walks_either_side_in_code_order() {
        let ka = dna(4);
        let seqs: [&[u8]; 2] = [b"ACGTTGCAAGCTAGGATCCA", b"TTGCAAGCTTTCCCGGGACGT"];
        let dense = KmerTable::from_sequences(ka.clone(), &seqs).unwrap();
        let mut b = TableBuilder::new(ka, BuildConfig::default().storage(StorageKind::Sparse));
        b.push_sequence(3, b"GCAAGCTTT").unwrap();
        let sparse = b.build();
        assert!(sparse.scan_cost() < dense.scan_cost());

        // dense x sparse walks the query, sparse x dense walks self
        for (reference, query) in [(&dense, &sparse), (&sparse, &dense)] {
            let mut expected = Vec::new();
            for (code, refs) in reference.iter() {
                for r in refs {
                    for q in query.get(code).unwrap() {
                        expected.push(Match::pair(r, q));
                    }
                }
            }
            assert!(!expected.is_empty());
            assert_eq!(reference.match_table(query).unwrap(), expected);
        }
    }
}
