use kmer_table::*;
use proptest::prelude::*;
use std::collections::HashMap;

/// Naive per-window encoding, skipping windows with foreign symbols.
fn naive_scan(ka: &KmerAlphabet, seq: &[u8]) -> Vec<(usize, u64)> {
    let base = ka.base_alphabet();
    let s = base.len() as u64;
    let offsets: Vec<usize> = match ka.spacing() {
        Some(offsets) => offsets.to_vec(),
        None => (0..ka.k()).collect(),
    };
    let mut out = Vec::new();
    if seq.len() < ka.span() {
        return out;
    }
    'windows: for start in 0..=seq.len() - ka.span() {
        let mut code = 0u64;
        for &o in &offsets {
            let Some(c) = base.index_of(seq[start + o]) else {
                continue 'windows;
            };
            code = code * s + c as u64;
        }
        out.push((start, code));
    }
    out
}

fn dna_seq(len: std::ops::Range<usize>) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(prop::sample::select(b"ACGTN".to_vec()), len)
}

proptest! {
    #[test]
    fn prop_kmer_positions_match_naive_scan(
        k in 1usize..=12,
        seq in dna_seq(0..256),
    ) {
        let ka = KmerAlphabet::new(Alphabet::nucleotide(), k).unwrap();
        prop_assert_eq!(ka.kmer_positions(&seq), naive_scan(&ka, &seq));
    }

    #[test]
    fn prop_spaced_positions_match_naive_scan(
        model in prop::sample::select(vec!["11", "101", "1101", "11011", "1001001"]),
        seq in dna_seq(0..128),
    ) {
        let ka = KmerAlphabet::spaced(Alphabet::nucleotide(), model).unwrap();
        prop_assert_eq!(ka.kmer_positions(&seq), naive_scan(&ka, &seq));
    }

    #[test]
    fn prop_decode_encode(k in 1usize..=6, seed in any::<u64>()) {
        let ka = KmerAlphabet::new(Alphabet::protein(), k).unwrap();
        let code = seed % ka.code_space();
        let symbols = ka.decode(code).unwrap();
        prop_assert_eq!(symbols.len(), k);
        prop_assert_eq!(ka.encode(&symbols).unwrap(), code);
        prop_assert_eq!(ka.fuse(&ka.split(code).unwrap()).unwrap(), code);
    }

    #[test]
    fn prop_random_permutation_is_lcg_step(code in any::<u64>()) {
        let expected = (0xd134_2543_de82_ef95u128 * code as u128 + 1) as u64 as i64;
        prop_assert_eq!(RandomPermutation::hash(code), expected);
        prop_assert_eq!(RandomPermutation::new().permute_one(code).unwrap(), expected);
    }

    #[test]
    fn prop_table_buckets_match_naive_scan(
        k in 1usize..=6,
        seqs in prop::collection::vec(dna_seq(0..96), 1..6),
    ) {
        let ka = KmerAlphabet::new(Alphabet::nucleotide(), k).unwrap();
        let mut expected = HashMap::<u64, Vec<Occurrence>>::new();
        for (id, seq) in seqs.iter().enumerate() {
            for (pos, code) in naive_scan(&ka, seq) {
                expected.entry(code).or_default().push(Occurrence::new(id as u32, pos as u32));
            }
        }
        let table = KmerTable::from_sequences(ka, &seqs).unwrap();
        prop_assert_eq!(table.num_kmers(), expected.len());
        for (code, bucket) in &table {
            prop_assert_eq!(bucket, expected[&code].as_slice());
        }
    }

    #[test]
    fn prop_dense_and_sparse_match_alike(
        k in 2usize..=5,
        refs in prop::collection::vec(dna_seq(0..64), 1..4),
        queries in prop::collection::vec(dna_seq(0..64), 1..4),
    ) {
        let ka = KmerAlphabet::new(Alphabet::nucleotide(), k).unwrap();
        let build = |seqs: &[Vec<u8>], kind: StorageKind| {
            let mut b = TableBuilder::new(ka.clone(), BuildConfig::default().storage(kind));
            for (i, s) in seqs.iter().enumerate() {
                b.push_sequence(i as u32, s).unwrap();
            }
            b.build()
        };
        let dense = build(&refs, StorageKind::Dense);
        let sparse = build(&refs, StorageKind::Sparse);
        let query = build(&queries, StorageKind::Sparse);
        let matches = dense.match_table(&query).unwrap();
        prop_assert_eq!(&matches, &sparse.match_table(&query).unwrap());

        let expected: usize = dense.iter().map(|(c, b)| b.len() * query.count(c).unwrap()).sum();
        prop_assert_eq!(matches.len(), expected);
    }
}
