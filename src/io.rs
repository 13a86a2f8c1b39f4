//! On-disk `.kmt` format: header + three 8-byte aligned sections.
//!
//! Header fields are little-endian. Sections are raw arrays in host byte
//! order (little-endian on every supported target):
//!
//! ```text
//! magic u32 | version u32 | k u16 | span u16 | n_symbols u16 | model_len u16
//! n_codes u64 | n_occurrences u64 | symbols [u8] | spacing model [u8]
//! pad to 8 | codes [u64; n_codes] | offsets [u64; n_codes + 1]
//! occurrences [(u32, u32); n_occurrences]
//! ```
//!
//! `model_len` is 0 for contiguous k-mers.

use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{BufWriter, Cursor, Write};
use std::path::Path;
use tracing::debug;

use crate::alphabet::{Alphabet, KmerAlphabet};
use crate::builder::{BuildConfig, assemble};
use crate::table::{KmerTable, Occurrence, TableError};

pub const KMT_MAGIC: u32 = 0x4B_4D_54_31; // "KMT1"
pub const KMT_VERSION: u32 = 1;

/// Header of a `.kmt` file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct FileHeader {
    k: u16,
    span: u16,
    symbols: Vec<u8>,
    spacing_model: Vec<u8>,
    n_codes: u64,
    n_occurrences: u64,
}

impl FileHeader {
    fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<u64> {
        w.write_u32::<LE>(KMT_MAGIC)?;
        w.write_u32::<LE>(KMT_VERSION)?;
        w.write_u16::<LE>(self.k)?;
        w.write_u16::<LE>(self.span)?;
        w.write_u16::<LE>(self.symbols.len() as u16)?;
        w.write_u16::<LE>(self.spacing_model.len() as u16)?;
        w.write_u64::<LE>(self.n_codes)?;
        w.write_u64::<LE>(self.n_occurrences)?;
        w.write_all(&self.symbols)?;
        w.write_all(&self.spacing_model)?;
        Ok(self.encoded_len())
    }

    fn read_from(bytes: &[u8]) -> Result<Self, TableError> {
        let mut r = Cursor::new(bytes);
        let truncated = |_| TableError::Format("truncated header".into());
        if r.read_u32::<LE>().map_err(truncated)? != KMT_MAGIC {
            return Err(TableError::Format("bad magic".into()));
        }
        let version = r.read_u32::<LE>().map_err(truncated)?;
        if version != KMT_VERSION {
            return Err(TableError::Format(format!("unsupported version {version}")));
        }
        let k = r.read_u16::<LE>().map_err(truncated)?;
        let span = r.read_u16::<LE>().map_err(truncated)?;
        let n_symbols = r.read_u16::<LE>().map_err(truncated)? as usize;
        let model_len = r.read_u16::<LE>().map_err(truncated)? as usize;
        let n_codes = r.read_u64::<LE>().map_err(truncated)?;
        let n_occurrences = r.read_u64::<LE>().map_err(truncated)?;

        let start = r.position() as usize;
        let symbols = bytes
            .get(start..start + n_symbols)
            .ok_or_else(|| TableError::Format("truncated symbols".into()))?
            .to_vec();
        let model_start = start + n_symbols;
        let spacing_model = bytes
            .get(model_start..model_start + model_len)
            .ok_or_else(|| TableError::Format("truncated spacing model".into()))?
            .to_vec();
        Ok(Self {
            k,
            span,
            symbols,
            spacing_model,
            n_codes,
            n_occurrences,
        })
    }

    fn encoded_len(&self) -> u64 {
        32 + self.symbols.len() as u64 + self.spacing_model.len() as u64
    }

    fn kmer_alphabet(&self) -> Result<KmerAlphabet, TableError> {
        let base = Alphabet::new(&self.symbols)?;
        let kmer_alphabet = if self.spacing_model.is_empty() {
            KmerAlphabet::new(base, self.k as usize)?
        } else {
            let model = std::str::from_utf8(&self.spacing_model)
                .map_err(|_| TableError::Format("spacing model is not ASCII".into()))?;
            KmerAlphabet::spaced(base, model)?
        };
        if kmer_alphabet.k() != self.k as usize || kmer_alphabet.span() != self.span as usize {
            return Err(TableError::Format("k-mer geometry does not match header".into()));
        }
        Ok(kmer_alphabet)
    }
}

#[inline]
fn align8(pos: u64) -> u64 {
    (pos + 7) & !7
}

/// Writer that serializes a [`KmerTable`] to a `.kmt` file.
pub struct KmerTableWriter<'a> {
    table: &'a KmerTable,
}

impl<'a> KmerTableWriter<'a> {
    /// Create a new writer for `table`.
    pub fn new(table: &'a KmerTable) -> Self {
        Self { table }
    }

    /// Serialize to `path`. The output is deterministic for equal tables.
    pub fn write_to(&self, path: &Path) -> Result<(), TableError> {
        let file = File::create(path)?;
        let mut w = BufWriter::new(file);
        self.write(&mut w)?;
        w.flush()?;
        Ok(())
    }

    /// Serialize into any writer.
    pub fn write<W: Write>(&self, w: &mut W) -> Result<(), TableError> {
        let ka = self.table.kmer_alphabet();
        let mut codes = Vec::with_capacity(self.table.num_kmers());
        let mut offsets = Vec::with_capacity(self.table.num_kmers() + 1);
        offsets.push(0u64);
        for (code, bucket) in self.table.iter() {
            codes.push(code);
            offsets.push(offsets.last().copied().unwrap_or(0) + bucket.len() as u64);
        }

        let header = FileHeader {
            k: header_u16("k", ka.k())?,
            span: header_u16("span", ka.span())?,
            symbols: ka.base_alphabet().symbols().to_vec(),
            spacing_model: ka.spacing_model().unwrap_or_default().into_bytes(),
            n_codes: codes.len() as u64,
            n_occurrences: self.table.num_occurrences() as u64,
        };
        let written = header.write_to(w)?;
        let padding = (align8(written) - written) as usize;
        w.write_all(&[0u8; 8][..padding])?;

        w.write_all(bytemuck::cast_slice::<u64, u8>(&codes))?;
        w.write_all(bytemuck::cast_slice::<u64, u8>(&offsets))?;
        w.write_all(bytemuck::cast_slice::<Occurrence, u8>(self.table.occurrences()))?;
        debug!(
            kmers = codes.len(),
            occurrences = self.table.num_occurrences(),
            "wrote k-mer table"
        );
        Ok(())
    }
}

fn header_u16(what: &str, value: usize) -> Result<u16, TableError> {
    u16::try_from(value).map_err(|_| TableError::Format(format!("{what}={value} exceeds 16 bits")))
}

impl KmerTable {
    /// Load a `.kmt` file through a memory map, with the default layout
    /// choice.
    pub fn open(path: &Path) -> Result<Self, TableError> {
        Self::open_with(path, BuildConfig::default())
    }

    /// Load a `.kmt` file; `config` picks the in-memory layout.
    pub fn open_with(path: &Path, config: BuildConfig) -> Result<Self, TableError> {
        let file = File::open(path)?;
        // SAFETY: the map is read-only and copied out before it is dropped.
        let map = unsafe { memmap2::MmapOptions::new().map(&file)? };
        Self::from_bytes(&map, config)
    }

    fn from_bytes(bytes: &[u8], config: BuildConfig) -> Result<Self, TableError> {
        let header = FileHeader::read_from(bytes)?;
        let kmer_alphabet = header.kmer_alphabet()?;

        let n_codes = usize::try_from(header.n_codes)
            .map_err(|_| TableError::Format("code count overflows".into()))?;
        let n_occ = usize::try_from(header.n_occurrences)
            .map_err(|_| TableError::Format("occurrence count overflows".into()))?;

        let mut pos = align8(header.encoded_len()) as usize;
        let codes: &[u64] = section(bytes, &mut pos, n_codes, "codes")?;
        let offsets: &[u64] = section(bytes, &mut pos, n_codes + 1, "offsets")?;
        let occurrences: &[Occurrence] = section(bytes, &mut pos, n_occ, "occurrences")?;

        if codes.windows(2).any(|w| w[0] >= w[1])
            || codes.last().is_some_and(|&c| !kmer_alphabet.contains(c))
        {
            return Err(TableError::Format("codes are not ascending within the code space".into()));
        }
        if offsets[0] != 0
            || offsets.windows(2).any(|w| w[0] >= w[1])
            || offsets[n_codes] != n_occ as u64
        {
            return Err(TableError::Format("bucket offsets are inconsistent".into()));
        }

        let table = assemble(
            kmer_alphabet,
            config,
            codes.to_vec(),
            offsets.iter().map(|&o| o as usize).collect(),
            occurrences.to_vec(),
        );
        debug!(
            kmers = n_codes,
            occurrences = n_occ,
            storage = ?table.storage_kind(),
            "loaded k-mer table"
        );
        Ok(table)
    }
}

/// Borrow `len` values of `T` at `*pos` and advance past them.
fn section<'a, T: bytemuck::Pod>(
    bytes: &'a [u8],
    pos: &mut usize,
    len: usize,
    what: &str,
) -> Result<&'a [T], TableError> {
    let size = len
        .checked_mul(std::mem::size_of::<T>())
        .ok_or_else(|| TableError::Format(format!("{what} section overflows")))?;
    let start = *pos;
    let end = start
        .checked_add(size)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| TableError::Format(format!("truncated {what} section")))?;
    *pos = end;
    bytemuck::try_cast_slice(&bytes[start..end])
        .map_err(|e| TableError::Format(format!("{what} section: {e:?}")))
}
