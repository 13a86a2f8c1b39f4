//! Symbol alphabets and k-mer codes.
//!
//! Conventions
//! - A sequence is a byte string; each byte is looked up in a 256-entry table
//!   that maps it to its *symbol code* (index in the alphabet) or to
//!   [`UNKNOWN`].
//! - A k-mer code is the mixed-radix number `Σ c[i] * S^(k-1-i)` over the
//!   symbol codes of the k informative positions, so codes cover `[0, S^k)`.
//! - Spaced models (e.g. `"1101"`) select the informative positions inside a
//!   window of width `span`; contiguous k-mers have `span == k`.

use thiserror::Error;

/// Table value for bytes that are not part of an alphabet.
pub const UNKNOWN: u8 = 0xFF;

/// Largest number of symbols an alphabet may hold (`UNKNOWN` is reserved).
pub const MAX_SYMBOLS: usize = UNKNOWN as usize;

/// Largest code space a [`KmerAlphabet`] may span, so that every code is also
/// a valid signed 64-bit key.
pub const MAX_CODE_SPACE: u64 = i64::MAX as u64;

/// Errors returned by alphabet and k-mer encoding operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AlphabetError {
    /// A byte in the input is not a symbol of the alphabet.
    #[error("symbol {symbol:?} at offset {offset} is not part of the alphabet")]
    InvalidSymbol {
        /// The offending byte.
        symbol: char,
        /// Offset of the byte in the input.
        offset: usize,
    },
    /// A symbol code is not smaller than the alphabet size.
    #[error("symbol code {code} is out of range for an alphabet of {size} symbols")]
    InvalidSymbolCode {
        /// The offending symbol code.
        code: u8,
        /// Alphabet size.
        size: usize,
    },
    /// A k-mer code lies outside `[0, S^k)`.
    #[error("k-mer code {code} is outside the code space [0, {size})")]
    InvalidCode {
        /// The offending code.
        code: u64,
        /// Size of the code space.
        size: u64,
    },
    /// A window does not have exactly `k` symbols.
    #[error("window has {actual} symbols, expected {expected}")]
    LengthMismatch {
        /// Expected number of symbols.
        expected: usize,
        /// Actual number of symbols.
        actual: usize,
    },
    /// The symbol set itself is malformed.
    #[error("invalid alphabet: {0}")]
    InvalidAlphabet(String),
    /// Bad `k`, spacing model or code space size.
    #[error("invalid k-mer geometry: {0}")]
    InvalidGeometry(String),
}

/// An ordered set of single-byte symbols.
///
/// Letters are matched case-insensitively; decoding yields the case the
/// symbol was declared with.
#[derive(Clone, Debug)]
pub struct Alphabet {
    symbols: Vec<u8>,
    lut: [u8; 256],
}

impl PartialEq for Alphabet {
    fn eq(&self, other: &Self) -> bool {
        self.symbols == other.symbols
    }
}

impl Eq for Alphabet {}

impl Alphabet {
    /// Create an alphabet from distinct ASCII symbols, in code order.
    pub fn new(symbols: &[u8]) -> Result<Self, AlphabetError> {
        if symbols.is_empty() {
            return Err(AlphabetError::InvalidAlphabet("no symbols".into()));
        }
        if symbols.len() > MAX_SYMBOLS {
            return Err(AlphabetError::InvalidAlphabet(format!(
                "{} symbols exceed the maximum of {MAX_SYMBOLS}",
                symbols.len()
            )));
        }
        let mut lut = [UNKNOWN; 256];
        for (i, &s) in symbols.iter().enumerate() {
            if !s.is_ascii() {
                return Err(AlphabetError::InvalidAlphabet(format!(
                    "symbol 0x{s:02X} is not ASCII"
                )));
            }
            for variant in case_variants(s) {
                if lut[variant as usize] != UNKNOWN {
                    return Err(AlphabetError::InvalidAlphabet(format!(
                        "symbol {:?} is declared twice",
                        s as char
                    )));
                }
                lut[variant as usize] = i as u8;
            }
        }
        Ok(Self {
            symbols: symbols.to_vec(),
            lut,
        })
    }

    /// Unambiguous nucleotides: `A`, `C`, `G`, `T` (codes 0..=3).
    pub fn nucleotide() -> Self {
        Self::from_valid(b"ACGT")
    }

    /// Protein alphabet: the 20 amino acids, `B`, `Z`, `X` and the stop `*`.
    pub fn protein() -> Self {
        Self::from_valid(b"ACDEFGHIKLMNPQRSTVWYBZX*")
    }

    fn from_valid(symbols: &[u8]) -> Self {
        let mut lut = [UNKNOWN; 256];
        for (i, &s) in symbols.iter().enumerate() {
            for variant in case_variants(s) {
                lut[variant as usize] = i as u8;
            }
        }
        Self {
            symbols: symbols.to_vec(),
            lut,
        }
    }

    /// Symbols in code order.
    #[inline]
    pub fn symbols(&self) -> &[u8] {
        &self.symbols
    }

    /// Number of symbols `S`.
    #[inline]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Always false; alphabets hold at least one symbol.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Symbol code of `symbol`, `None` if it is not part of the alphabet.
    #[inline]
    pub fn index_of(&self, symbol: u8) -> Option<u8> {
        let v = self.lut[symbol as usize];
        if v == UNKNOWN { None } else { Some(v) }
    }

    /// Symbol for a symbol code.
    #[inline]
    pub fn symbol(&self, code: u8) -> Option<u8> {
        self.symbols.get(code as usize).copied()
    }

    /// Map a sequence to symbol codes, failing on the first foreign byte.
    pub fn encode_sequence(&self, sequence: &[u8]) -> Result<Vec<u8>, AlphabetError> {
        sequence
            .iter()
            .enumerate()
            .map(|(offset, &b)| {
                self.index_of(b)
                    .ok_or(AlphabetError::InvalidSymbol {
                        symbol: b as char,
                        offset,
                    })
            })
            .collect()
    }

    /// Map a sequence to symbol codes, writing [`UNKNOWN`] for foreign bytes.
    pub(crate) fn map_lenient(&self, sequence: &[u8]) -> Vec<u8> {
        sequence.iter().map(|&b| self.lut[b as usize]).collect()
    }
}

fn case_variants(s: u8) -> impl Iterator<Item = u8> {
    let upper = s.to_ascii_uppercase();
    let lower = s.to_ascii_lowercase();
    std::iter::once(upper).chain((lower != upper).then_some(lower))
}

/// Encodes windows of a base [`Alphabet`] into integer k-mer codes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KmerAlphabet {
    base: Alphabet,
    k: usize,
    span: usize,
    /// Informative offsets inside a window; `None` for contiguous k-mers.
    spacing: Option<Vec<usize>>,
    code_space: u64,
}

impl KmerAlphabet {
    /// Contiguous k-mers of length `k` over `base`.
    pub fn new(base: Alphabet, k: usize) -> Result<Self, AlphabetError> {
        let code_space = code_space(base.len(), k)?;
        Ok(Self {
            base,
            k,
            span: k,
            spacing: None,
            code_space,
        })
    }

    /// Spaced k-mers: `model` is a string of `1` (informative) and `0`
    /// (ignored) positions that starts and ends with `1`, e.g. `"1101"`.
    pub fn spaced(base: Alphabet, model: &str) -> Result<Self, AlphabetError> {
        if model.bytes().any(|b| b != b'0' && b != b'1') {
            return Err(AlphabetError::InvalidGeometry(format!(
                "spacing model {model:?} may only contain '0' and '1'"
            )));
        }
        if !model.starts_with('1') || !model.ends_with('1') {
            return Err(AlphabetError::InvalidGeometry(format!(
                "spacing model {model:?} must start and end with '1'"
            )));
        }
        let offsets: Vec<usize> = model
            .bytes()
            .enumerate()
            .filter_map(|(i, b)| (b == b'1').then_some(i))
            .collect();
        let k = offsets.len();
        let code_space = code_space(base.len(), k)?;
        let spacing = (k != model.len()).then_some(offsets);
        Ok(Self {
            base,
            k,
            span: model.len(),
            spacing,
            code_space,
        })
    }

    /// The base alphabet.
    #[inline]
    pub fn base_alphabet(&self) -> &Alphabet {
        &self.base
    }

    /// Number of informative symbols per k-mer.
    #[inline]
    pub fn k(&self) -> usize {
        self.k
    }

    /// Window width in the sequence (`k` unless spaced).
    #[inline]
    pub fn span(&self) -> usize {
        self.span
    }

    /// Informative offsets of a spaced model.
    #[inline]
    pub fn spacing(&self) -> Option<&[usize]> {
        self.spacing.as_deref()
    }

    /// The spacing model as a `0`/`1` string, `None` for contiguous k-mers.
    pub fn spacing_model(&self) -> Option<String> {
        self.spacing.as_ref().map(|offsets| {
            let mut model = vec![b'0'; self.span];
            for &o in offsets {
                model[o] = b'1';
            }
            String::from_utf8_lossy(&model).into_owned()
        })
    }

    /// Size of the code space, `S^k`.
    #[inline]
    pub fn code_space(&self) -> u64 {
        self.code_space
    }

    /// Whether `code` lies in `[0, S^k)`.
    #[inline]
    pub fn contains(&self, code: u64) -> bool {
        code < self.code_space
    }

    /// Fuse `k` symbol codes into a k-mer code.
    pub fn fuse(&self, symbol_codes: &[u8]) -> Result<u64, AlphabetError> {
        if symbol_codes.len() != self.k {
            return Err(AlphabetError::LengthMismatch {
                expected: self.k,
                actual: symbol_codes.len(),
            });
        }
        let s = self.base.len();
        symbol_codes.iter().try_fold(0u64, |code, &c| {
            if c as usize >= s {
                return Err(AlphabetError::InvalidSymbolCode { code: c, size: s });
            }
            Ok(code * s as u64 + c as u64)
        })
    }

    /// Split a k-mer code into its `k` symbol codes.
    pub fn split(&self, code: u64) -> Result<Vec<u8>, AlphabetError> {
        if !self.contains(code) {
            return Err(AlphabetError::InvalidCode {
                code,
                size: self.code_space,
            });
        }
        let s = self.base.len() as u64;
        let mut rest = code;
        let mut out = vec![0u8; self.k];
        for slot in out.iter_mut().rev() {
            *slot = (rest % s) as u8;
            rest /= s;
        }
        Ok(out)
    }

    /// Encode a window of `k` symbols (the informative symbols for spaced
    /// models) into its code.
    pub fn encode(&self, window: &[u8]) -> Result<u64, AlphabetError> {
        let codes = self.base.encode_sequence(window)?;
        self.fuse(&codes)
    }

    /// Decode a code back into its `k` symbols.
    pub fn decode(&self, code: u64) -> Result<Vec<u8>, AlphabetError> {
        let codes = self.split(code)?;
        Ok(codes
            .into_iter()
            .map(|c| self.base.symbols[c as usize])
            .collect())
    }

    /// Codes of every window of `sequence`, in window order.
    ///
    /// Fails on the first symbol outside the alphabet.
    pub fn create_kmers(&self, sequence: &[u8]) -> Result<Vec<u64>, AlphabetError> {
        let symbols = self.base.encode_sequence(sequence)?;
        let mut out = Vec::with_capacity(symbols.len().saturating_sub(self.span - 1));
        self.scan(&symbols, |_, code| out.push(code));
        Ok(out)
    }

    /// `(window start, code)` for every window of `sequence` that contains
    /// only alphabet symbols; windows touching foreign bytes are skipped.
    pub fn kmer_positions(&self, sequence: &[u8]) -> Vec<(usize, u64)> {
        let symbols = self.base.map_lenient(sequence);
        let mut out = Vec::with_capacity(symbols.len().saturating_sub(self.span - 1));
        self.scan(&symbols, |pos, code| out.push((pos, code)));
        out
    }

    /// Walk all windows over mapped symbol codes, calling `emit(start, code)`
    /// for windows without [`UNKNOWN`] entries.
    fn scan(&self, symbols: &[u8], mut emit: impl FnMut(usize, u64)) {
        if symbols.len() < self.span {
            return;
        }
        let s = self.base.len() as u64;
        match &self.spacing {
            None => {
                // Rolling update: drop the leading digit, append the new one.
                let lead = self.code_space / s;
                let mut code = 0u64;
                let mut len = 0usize;
                for (i, &v) in symbols.iter().enumerate() {
                    if v == UNKNOWN {
                        code = 0;
                        len = 0;
                        continue;
                    }
                    if len == self.k {
                        code %= lead;
                    } else {
                        len += 1;
                    }
                    code = code * s + v as u64;
                    if len == self.k {
                        emit(i + 1 - self.k, code);
                    }
                }
            }
            Some(offsets) => {
                'windows: for start in 0..=(symbols.len() - self.span) {
                    let mut code = 0u64;
                    for &o in offsets {
                        let v = symbols[start + o];
                        if v == UNKNOWN {
                            continue 'windows;
                        }
                        code = code * s + v as u64;
                    }
                    emit(start, code);
                }
            }
        }
    }
}

fn code_space(symbols: usize, k: usize) -> Result<u64, AlphabetError> {
    if k == 0 {
        return Err(AlphabetError::InvalidGeometry("k must be at least 1".into()));
    }
    let k32 = u32::try_from(k)
        .map_err(|_| AlphabetError::InvalidGeometry(format!("k={k} is too large")))?;
    match (symbols as u64).checked_pow(k32) {
        Some(size) if size <= MAX_CODE_SPACE => Ok(size),
        _ => Err(AlphabetError::InvalidGeometry(format!(
            "{symbols}^{k} k-mers exceed the 63-bit code space"
        ))),
    }
}
