//! Similar-k-mer expansion for approximate matching.

use crate::alphabet::{Alphabet, AlphabetError, KmerAlphabet};

/// Expands a k-mer into the k-mers considered similar to it.
pub trait SimilarityRule: Send + Sync {
    /// Codes similar to `code`, in ascending order. Includes `code` itself
    /// when it qualifies.
    fn similar_kmers(
        &self,
        kmer_alphabet: &KmerAlphabet,
        code: u64,
    ) -> Result<Vec<u64>, AlphabetError>;
}

/// Pairwise symbol scores over an alphabet, stored row-major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubstitutionMatrix {
    alphabet: Alphabet,
    scores: Vec<i32>,
}

impl SubstitutionMatrix {
    /// Build from an `S×S` score table whose rows and columns follow the
    /// alphabet's code order.
    pub fn new(alphabet: Alphabet, scores: &[Vec<i32>]) -> Result<Self, AlphabetError> {
        let s = alphabet.len();
        if scores.len() != s || scores.iter().any(|row| row.len() != s) {
            return Err(AlphabetError::InvalidAlphabet(format!(
                "substitution matrix must be {s}x{s}"
            )));
        }
        Ok(Self {
            alphabet,
            scores: scores.concat(),
        })
    }

    /// 1 for identical symbols, 0 otherwise.
    pub fn identity(alphabet: Alphabet) -> Self {
        let s = alphabet.len();
        let scores = (0..s * s)
            .map(|i| i32::from(i / s == i % s))
            .collect();
        Self { alphabet, scores }
    }

    /// The alphabet rows and columns refer to.
    pub fn alphabet(&self) -> &Alphabet {
        &self.alphabet
    }

    /// Score of aligning symbol code `a` against `b`.
    #[inline]
    pub fn score(&self, a: u8, b: u8) -> i32 {
        self.scores[a as usize * self.alphabet.len() + b as usize]
    }
}

/// K-mers whose summed position-wise substitution score against the query
/// k-mer reaches a threshold.
#[derive(Clone, Debug)]
pub struct ScoreThresholdRule {
    matrix: SubstitutionMatrix,
    threshold: i32,
}

impl ScoreThresholdRule {
    /// Similar means `Σ score(query[i], other[i]) >= threshold`.
    pub fn new(matrix: SubstitutionMatrix, threshold: i32) -> Self {
        Self { matrix, threshold }
    }

    /// Score threshold.
    pub fn threshold(&self) -> i32 {
        self.threshold
    }
}

impl SimilarityRule for ScoreThresholdRule {
    fn similar_kmers(
        &self,
        kmer_alphabet: &KmerAlphabet,
        code: u64,
    ) -> Result<Vec<u64>, AlphabetError> {
        if kmer_alphabet.base_alphabet() != self.matrix.alphabet() {
            return Err(AlphabetError::InvalidAlphabet(
                "substitution matrix and k-mer alphabet differ".into(),
            ));
        }
        let query = kmer_alphabet.split(code)?;
        let s = self.matrix.alphabet().len() as u8;

        // best_rest[i]: highest score reachable by positions i..k.
        let mut best_rest = vec![0i32; query.len() + 1];
        for i in (0..query.len()).rev() {
            let best = (0..s)
                .map(|b| self.matrix.score(query[i], b))
                .max()
                .unwrap_or(0);
            best_rest[i] = best_rest[i + 1].saturating_add(best);
        }

        let mut out = Vec::new();
        let mut search = Search {
            matrix: &self.matrix,
            threshold: self.threshold,
            query: &query,
            best_rest: &best_rest,
            symbols: s,
            out: &mut out,
        };
        search.descend(0, 0, 0);
        Ok(out)
    }
}

/// Depth-first enumeration in ascending symbol order, which yields codes in
/// ascending order.
struct Search<'a> {
    matrix: &'a SubstitutionMatrix,
    threshold: i32,
    query: &'a [u8],
    best_rest: &'a [i32],
    symbols: u8,
    out: &'a mut Vec<u64>,
}

impl Search<'_> {
    fn descend(&mut self, depth: usize, score: i32, prefix: u64) {
        if depth == self.query.len() {
            self.out.push(prefix);
            return;
        }
        for b in 0..self.symbols {
            let next = score.saturating_add(self.matrix.score(self.query[depth], b));
            if next.saturating_add(self.best_rest[depth + 1]) < self.threshold {
                continue;
            }
            self.descend(depth + 1, next, prefix * self.symbols as u64 + b as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_threshold_hamming_ball() {
        let ka = KmerAlphabet::new(Alphabet::nucleotide(), 3).unwrap();
        let rule = ScoreThresholdRule::new(SubstitutionMatrix::identity(Alphabet::nucleotide()), 2);
        let aaa = ka.encode(b"AAA").unwrap();
        let similar = rule.similar_kmers(&ka, aaa).unwrap();
        // AAA plus 3 positions x 3 substitutions
        assert_eq!(similar.len(), 10);
        assert!(similar.windows(2).all(|w| w[0] < w[1]));
        assert!(similar.contains(&aaa));
        assert!(similar.contains(&ka.encode(b"ATA").unwrap()));
        assert!(!similar.contains(&ka.encode(b"TTA").unwrap()));
    }

    #[test]
    fn test_full_threshold_is_exact() {
        let ka = KmerAlphabet::new(Alphabet::nucleotide(), 4).unwrap();
        let rule = ScoreThresholdRule::new(SubstitutionMatrix::identity(Alphabet::nucleotide()), 4);
        let code = ka.encode(b"GATC").unwrap();
        assert_eq!(rule.similar_kmers(&ka, code).unwrap(), vec![code]);
    }

    #[test]
    fn test_matrix_shape_checked() {
        let bad = vec![vec![1, 0], vec![0, 1]];
        assert!(SubstitutionMatrix::new(Alphabet::nucleotide(), &bad).is_err());
    }

    #[test]
    fn test_extreme_scores_saturate() {
        let s = Alphabet::nucleotide().len();
        let scores: Vec<Vec<i32>> = (0..s)
            .map(|a| (0..s).map(|b| if a == b { i32::MAX } else { i32::MIN }).collect())
            .collect();
        let matrix = SubstitutionMatrix::new(Alphabet::nucleotide(), &scores).unwrap();
        let ka = KmerAlphabet::new(Alphabet::nucleotide(), 4).unwrap();
        let code = ka.encode(b"ACGT").unwrap();
        let rule = ScoreThresholdRule::new(matrix, i32::MAX);
        assert_eq!(rule.similar_kmers(&ka, code).unwrap(), vec![code]);
    }

    #[test]
    fn test_alphabet_mismatch_rejected() {
        let ka = KmerAlphabet::new(Alphabet::protein(), 2).unwrap();
        let rule = ScoreThresholdRule::new(SubstitutionMatrix::identity(Alphabet::nucleotide()), 1);
        assert!(rule.similar_kmers(&ka, 0).is_err());
    }
}
