use kmer_table::alphabet::{MAX_CODE_SPACE, UNKNOWN};
use kmer_table::*;

fn dna(k: usize) -> KmerAlphabet {
    KmerAlphabet::new(Alphabet::nucleotide(), k).unwrap()
}

#[test]
fn test_encode_decode_mixed_radix() {
    let ka = dna(5);
    assert_eq!(ka.k(), 5);
    assert_eq!(ka.code_space(), 1024);

    // A=0 C=1 G=2 T=3: 0*256 + 1*64 + 2*16 + 3*4 + 0
    let code = ka.encode(b"ACGTA").unwrap();
    assert_eq!(code, 108);
    assert_eq!(ka.encode(b"acgta").unwrap(), 108);
    assert_eq!(ka.decode(108).unwrap(), b"ACGTA".to_vec());
    assert_eq!(ka.split(108).unwrap(), vec![0, 1, 2, 3, 0]);
    assert_eq!(ka.fuse(&[0, 1, 2, 3, 0]).unwrap(), 108);
}

#[test]
fn test_encode_rejects_foreign_symbol() {
    let ka = dna(3);
    assert_eq!(
        ka.encode(b"ANA"),
        Err(AlphabetError::InvalidSymbol {
            symbol: 'N',
            offset: 1
        })
    );
    assert!(matches!(
        ka.encode(b"ACGT"),
        Err(AlphabetError::LengthMismatch {
            expected: 3,
            actual: 4
        })
    ));
    assert!(matches!(
        ka.fuse(&[0, 4, 1]),
        Err(AlphabetError::InvalidSymbolCode { code: 4, size: 4 })
    ));
}

#[test]
fn test_decode_rejects_out_of_range_code() {
    let ka = dna(5);
    assert_eq!(
        ka.decode(1024),
        Err(AlphabetError::InvalidCode {
            code: 1024,
            size: 1024
        })
    );
    assert!(ka.decode(1023).is_ok());
}

#[test]
fn test_round_trip_every_code() {
    for ka in [dna(4), KmerAlphabet::new(Alphabet::protein(), 2).unwrap()] {
        for code in 0..ka.code_space() {
            let window = ka.decode(code).unwrap();
            assert_eq!(ka.encode(&window).unwrap(), code);
        }
    }
}

#[test]
fn test_create_kmers_rolling_matches_direct() {
    let ka = dna(4);
    let seq = b"GATTACAGATTACACCGT";
    let kmers = ka.create_kmers(seq).unwrap();
    assert_eq!(kmers.len(), seq.len() - 3);
    for (i, &code) in kmers.iter().enumerate() {
        assert_eq!(code, ka.encode(&seq[i..i + 4]).unwrap());
    }
    assert!(ka.create_kmers(b"ACG").unwrap().is_empty());
}

#[test]
fn test_kmer_positions_skip_ambiguous_windows() {
    let ka = dna(3);
    let positions = ka.kmer_positions(b"ACGTNACGTA");
    let starts: Vec<usize> = positions.iter().map(|&(p, _)| p).collect();
    assert_eq!(starts, vec![0, 1, 5, 6, 7]);
    assert_eq!(positions[0].1, positions[2].1);
    assert!(ka.create_kmers(b"ACGTNACGTA").is_err());
}

#[test]
fn test_spaced_kmers() {
    let ka = KmerAlphabet::spaced(Alphabet::nucleotide(), "1101").unwrap();
    assert_eq!(ka.k(), 3);
    assert_eq!(ka.span(), 4);
    assert_eq!(ka.spacing(), Some(&[0usize, 1, 3][..]));
    assert_eq!(ka.spacing_model().as_deref(), Some("1101"));
    // ACGTA -> windows ACgT (A,C,T) and CGtA (C,G,A)
    assert_eq!(ka.create_kmers(b"ACGTA").unwrap(), vec![7, 24]);
    // the ignored position may hold anything
    assert_eq!(ka.kmer_positions(b"ACNT"), vec![(0, 7)]);

    let contiguous = KmerAlphabet::spaced(Alphabet::nucleotide(), "111").unwrap();
    assert_eq!(contiguous, dna(3));
}

#[test]
fn test_invalid_geometry() {
    assert!(KmerAlphabet::new(Alphabet::nucleotide(), 0).is_err());
    assert!(KmerAlphabet::spaced(Alphabet::nucleotide(), "0110").is_err());
    assert!(KmerAlphabet::spaced(Alphabet::nucleotide(), "1x1").is_err());
    // 24^14 > i64::MAX, 24^13 fits
    assert!(KmerAlphabet::new(Alphabet::protein(), 14).is_err());
    let ka = KmerAlphabet::new(Alphabet::protein(), 13).unwrap();
    assert!(ka.code_space() <= MAX_CODE_SPACE);
    assert!(KmerAlphabet::new(Alphabet::nucleotide(), 31).is_ok());
    assert!(KmerAlphabet::new(Alphabet::nucleotide(), 32).is_err());
}

#[test]
fn test_custom_alphabet() {
    let alphabet = Alphabet::new(b"xyz").unwrap();
    assert_eq!(alphabet.len(), 3);
    assert_eq!(alphabet.index_of(b'Y'), Some(1));
    assert_eq!(alphabet.symbol(2), Some(b'z'));
    assert_eq!(alphabet.index_of(b'w'), None);
    assert!(Alphabet::new(b"aA").is_err());
    assert!(Alphabet::new(b"").is_err());
    assert_eq!(UNKNOWN, 0xFF);

    let ka = KmerAlphabet::new(alphabet, 2).unwrap();
    assert_eq!(ka.decode(5).unwrap(), b"yz".to_vec());
}
