//! Table construction: build configuration and the bulk loader.
//!
//! A [`TableBuilder`] collects `(code, occurrence)` pairs in insertion order;
//! [`TableBuilder::build`] groups them by code in one pass (counting sort for
//! the dense layout, radix sort for the sparse one) and freezes the result.

use tracing::debug;

use crate::alphabet::KmerAlphabet;
use crate::radix::radix_sort_by_code;
use crate::table::{KmerTable, Occurrence, Storage, StorageKind, TableError, to_u32};

/// Largest code space the dense layout is ever used for (`2^28` codes,
/// 2 GiB of offsets on 64-bit targets).
pub const MAX_DENSE_CODE_SPACE: u64 = 1 << 28;

/// Build-time configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuildConfig {
    dense_limit: u64,
    storage: Option<StorageKind>,
    parallel_min_codes: usize,
    threads: Option<usize>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            dense_limit: 1 << 22,
            storage: None,
            parallel_min_codes: 4096,
            threads: None,
        }
    }
}

impl BuildConfig {
    /// Largest code space that gets the dense layout (default `2^22`).
    pub fn with_dense_limit(mut self, limit: u64) -> Self {
        self.dense_limit = limit;
        self
    }
    /// Force a layout. A forced `Dense` still falls back to `Sparse` above
    /// [`MAX_DENSE_CODE_SPACE`].
    pub fn storage(mut self, kind: StorageKind) -> Self {
        self.storage = Some(kind);
        self
    }
    /// Minimum number of shared codes before matching runs on rayon
    /// (default 4096).
    pub fn parallel_min_codes(mut self, n: usize) -> Self {
        self.parallel_min_codes = n.max(1);
        self
    }
    /// Fix the number of threads of the rayon global pool.
    pub fn threads(mut self, n: usize) -> Self {
        self.threads = Some(n);
        self
    }

    /// Layout for a code space of `code_space` codes.
    ///
    /// Code spaces above [`MAX_DENSE_CODE_SPACE`] are always sparse, even
    /// when `Dense` was forced.
    pub(crate) fn storage_for(&self, code_space: u64) -> StorageKind {
        // the dense offsets array must be addressable and allocatable
        let dense_ok = code_space <= MAX_DENSE_CODE_SPACE
            && usize::try_from(code_space).is_ok_and(|n| n < usize::MAX);
        let kind = match self.storage {
            Some(kind) => kind,
            None if code_space <= self.dense_limit => StorageKind::Dense,
            None => StorageKind::Sparse,
        };
        if kind == StorageKind::Dense && !dense_ok {
            if self.storage.is_some() {
                debug!(code_space, "code space too large for dense storage, using sparse");
            }
            return StorageKind::Sparse;
        }
        kind
    }
}

/// Collects occurrences and builds an immutable [`KmerTable`].
pub struct TableBuilder {
    kmer_alphabet: KmerAlphabet,
    config: BuildConfig,
    codes: Vec<u64>,
    occurrences: Vec<Occurrence>,
}

impl TableBuilder {
    /// Empty builder.
    pub fn new(kmer_alphabet: KmerAlphabet, config: BuildConfig) -> Self {
        Self {
            kmer_alphabet,
            config,
            codes: Vec::new(),
            occurrences: Vec::new(),
        }
    }

    /// The k-mer alphabet codes refer to.
    pub fn kmer_alphabet(&self) -> &KmerAlphabet {
        &self.kmer_alphabet
    }

    /// Number of collected occurrences.
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// Whether nothing was collected yet.
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Append one occurrence of `code`.
    pub fn push(&mut self, code: u64, occurrence: Occurrence) -> Result<(), TableError> {
        self.check_code(code)?;
        self.push_unchecked(code, occurrence);
        Ok(())
    }

    /// Append every window of `sequence`; windows with foreign symbols are
    /// skipped.
    pub fn push_sequence(&mut self, ref_id: u32, sequence: &[u8]) -> Result<(), TableError> {
        // window starts must fit the record
        to_u32("sequence length", sequence.len() as u64)?;
        for (pos, code) in self.kmer_alphabet.kmer_positions(sequence) {
            self.push_unchecked(code, Occurrence::new(ref_id, pos as u32));
        }
        Ok(())
    }

    /// Append `kmers[j]` at position `j`, skipping positions set in
    /// `ignore`. Nothing is appended if any code is out of range.
    pub fn push_kmers(
        &mut self,
        ref_id: u32,
        kmers: &[u64],
        ignore: Option<&[bool]>,
    ) -> Result<(), TableError> {
        if let Some(mask) = ignore {
            if mask.len() != kmers.len() {
                return Err(TableError::LengthMismatch {
                    what: "ignore mask",
                    expected: kmers.len(),
                    actual: mask.len(),
                });
            }
        }
        to_u32("sequence length", kmers.len() as u64)?;
        for &c in kmers {
            self.check_code(c)?;
        }
        for (pos, &code) in kmers.iter().enumerate() {
            if ignore.is_some_and(|mask| mask[pos]) {
                continue;
            }
            self.push_unchecked(code, Occurrence::new(ref_id, pos as u32));
        }
        Ok(())
    }

    pub(crate) fn check_code(&self, code: u64) -> Result<(), TableError> {
        if self.kmer_alphabet.contains(code) {
            Ok(())
        } else {
            Err(TableError::CodeOutOfRange {
                code,
                size: self.kmer_alphabet.code_space(),
            })
        }
    }

    #[inline]
    pub(crate) fn push_unchecked(&mut self, code: u64, occurrence: Occurrence) {
        self.codes.push(code);
        self.occurrences.push(occurrence);
    }

    /// Group occurrences by code and freeze the table.
    pub fn build(self) -> KmerTable {
        let TableBuilder {
            kmer_alphabet,
            config,
            mut codes,
            mut occurrences,
        } = self;

        if let Some(n) = config.threads {
            if rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build_global()
                .is_err()
            {
                debug!(threads = n, "rayon global pool already initialized");
            }
        }

        let code_space = kmer_alphabet.code_space();
        let kind = config.storage_for(code_space);
        let storage = match kind {
            StorageKind::Dense => {
                let (offsets, grouped) = dense_layout(code_space as usize, &codes, &occurrences);
                occurrences = grouped;
                Storage::dense(offsets)
            }
            StorageKind::Sparse => {
                radix_sort_by_code(&mut codes, &mut occurrences);
                let (present, offsets) = runs(&codes);
                Storage::sparse(present, offsets)
            }
        };
        debug!(
            k = kmer_alphabet.k(),
            code_space,
            occurrences = occurrences.len(),
            storage = ?kind,
            "built k-mer table"
        );
        KmerTable::from_parts(kmer_alphabet, storage, occurrences, config.parallel_min_codes)
    }
}

/// Reassemble a table from ascending present codes, their bucket offsets and
/// the grouped occurrences.
pub(crate) fn assemble(
    kmer_alphabet: KmerAlphabet,
    config: BuildConfig,
    codes: Vec<u64>,
    offsets: Vec<usize>,
    occurrences: Vec<Occurrence>,
) -> KmerTable {
    let code_space = kmer_alphabet.code_space();
    let storage = match config.storage_for(code_space) {
        StorageKind::Dense => {
            let mut dense = vec![0usize; code_space as usize + 1];
            for (i, &c) in codes.iter().enumerate() {
                dense[c as usize + 1] = offsets[i + 1] - offsets[i];
            }
            prefix_sum(&mut dense);
            Storage::dense(dense)
        }
        StorageKind::Sparse => Storage::sparse(codes, offsets),
    };
    KmerTable::from_parts(kmer_alphabet, storage, occurrences, config.parallel_min_codes)
}

/// Stable counting sort into one bucket per code.
fn dense_layout(
    code_space: usize,
    codes: &[u64],
    occurrences: &[Occurrence],
) -> (Vec<usize>, Vec<Occurrence>) {
    let mut offsets = vec![0usize; code_space + 1];
    for &c in codes {
        offsets[c as usize + 1] += 1;
    }
    prefix_sum(&mut offsets);

    let mut cursor = offsets[..code_space].to_vec();
    let mut grouped = vec![Occurrence::default(); occurrences.len()];
    for (&c, &o) in codes.iter().zip(occurrences) {
        let next = &mut cursor[c as usize];
        grouped[*next] = o;
        *next += 1;
    }
    (offsets, grouped)
}

/// Run starts of sorted codes: `(distinct codes, offsets)` with a trailing
/// end offset.
fn runs(sorted: &[u64]) -> (Vec<u64>, Vec<usize>) {
    let mut present = Vec::new();
    let mut offsets = Vec::new();
    for (i, &c) in sorted.iter().enumerate() {
        if present.last() != Some(&c) {
            present.push(c);
            offsets.push(i);
        }
    }
    offsets.push(sorted.len());
    (present, offsets)
}

fn prefix_sum(values: &mut [usize]) {
    let mut sum = 0usize;
    for v in values.iter_mut() {
        sum += *v;
        *v = sum;
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
    fn test_storage_selection() {
        let cfg = BuildConfig::default().with_dense_limit(1024);
        assert_eq!(cfg.storage_for(1024), StorageKind::Dense);
        assert_eq!(cfg.storage_for(1025), StorageKind::Sparse);
        let forced = cfg.storage(StorageKind::Sparse);
        assert_eq!(forced.storage_for(4), StorageKind::Sparse);

        let dense = BuildConfig::default().storage(StorageKind::Dense);
        assert_eq!(dense.storage_for(1 << 20), StorageKind::Dense);
        assert_eq!(dense.storage_for(MAX_DENSE_CODE_SPACE), StorageKind::Dense);
        assert_eq!(dense.storage_for(MAX_DENSE_CODE_SPACE + 1), StorageKind::Sparse);
        let unlimited = BuildConfig::default().with_dense_limit(u64::MAX);
        assert_eq!(unlimited.storage_for(u64::MAX), StorageKind::Sparse);
    }

    #[test]
    fn test_forced_dense_on_huge_code_space_builds_sparse() {
        let ka = KmerAlphabet::new(Alphabet::protein(), 12).unwrap();
        let mut b = TableBuilder::new(ka.clone(), BuildConfig::default().storage(StorageKind::Dense));
        b.push_sequence(0, b"MKVLAAGIVGLLLAQW").unwrap();
        let table = b.build();
        assert_eq!(table.storage_kind(), StorageKind::Sparse);
        assert_eq!(table.num_occurrences(), 5);
        let code = ka.encode(b"MKVLAAGIVGLL").unwrap();
        assert_eq!(table.get(code).unwrap(), &[Occurrence::new(0, 0)]);
    }

    #[test]
    fn test_runs() {
        let (present, offsets) = runs(&[1, 1, 4, 9, 9, 9]);
        assert_eq!(present, vec![1, 4, 9]);
        assert_eq!(offsets, vec![0, 2, 3, 6]);
    }

    #[test]
    fn test_dense_and_sparse_builds_agree() {
        let mut tables = Vec::new();
        for kind in [StorageKind::Dense, StorageKind::Sparse] {
            let mut b = TableBuilder::new(dna(3), BuildConfig::default().storage(kind));
            b.push_sequence(0, b"ACGTACGTTTGCA").unwrap();
            b.push_sequence(1, b"GGGACGTNACG").unwrap();
            tables.push(b.build());
        }
        assert_eq!(tables[0].storage_kind(), StorageKind::Dense);
        assert_eq!(tables[1].storage_kind(), StorageKind::Sparse);
        assert_eq!(tables[0], tables[1]);
        assert_eq!(tables[0].kmers(), tables[1].kmers());
    }

    #[test]
    fn test_push_kmers_is_atomic() {
        let mut b = TableBuilder::new(dna(2), BuildConfig::default());
        assert!(b.push_kmers(0, &[1, 2, 16], None).is_err());
        assert!(b.is_empty());
        assert!(matches!(
            b.push_kmers(0, &[1, 2], Some(&[false])),
            Err(TableError::LengthMismatch { .. })
        ));
        b.push_kmers(0, &[1, 2, 3], Some(&[false, true, false])).unwrap();
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn test_assemble_round_trip() {
        let table = KmerTable::from_sequences(dna(4), &[b"ACGTTGCAACGT".as_slice()]).unwrap();
        let codes = table.kmers();
        let mut offsets = vec![0usize];
        for (_, bucket) in table.iter() {
            offsets.push(offsets.last().unwrap() + bucket.len());
        }
        for kind in [StorageKind::Dense, StorageKind::Sparse] {
            let rebuilt = assemble(
                dna(4),
                BuildConfig::default().storage(kind),
                codes.clone(),
                offsets.clone(),
                table.occurrences().to_vec(),
            );
            assert_eq!(rebuilt.storage_kind(), kind);
            assert_eq!(rebuilt, table);
        }
    }
}
