//! Stable LSD radix sort of k-mer codes with their occurrences.
//!
//! 8-bit passes; only the bytes below the highest set bit of the largest code
//! are sorted, so small code spaces need one or two passes. Stability keeps
//! insertion order within a code.

use crate::table::Occurrence;

/// Sort `codes` ascending and reorder `occurrences` alongside.
pub(crate) fn radix_sort_by_code(codes: &mut Vec<u64>, occurrences: &mut Vec<Occurrence>) {
    debug_assert_eq!(codes.len(), occurrences.len());
    let n = codes.len();
    if n <= 1 {
        return;
    }
    let max = codes.iter().copied().max().unwrap_or(0);
    let passes = (u64::BITS - max.leading_zeros()).div_ceil(8);

    let mut tmp_codes = vec![0u64; n];
    let mut tmp_occ = vec![Occurrence::default(); n];

    for pass in 0..passes {
        let shift = pass * 8;
        let mut counts = [0usize; 256];
        for &c in codes.iter() {
            counts[((c >> shift) & 0xFF) as usize] += 1;
        }
        if counts.iter().any(|&c| c == n) {
            // every key shares this byte
            continue;
        }

        let mut sum = 0usize;
        for c in counts.iter_mut() {
            let here = *c;
            *c = sum;
            sum += here;
        }

        for (&c, &o) in codes.iter().zip(occurrences.iter()) {
            let b = ((c >> shift) & 0xFF) as usize;
            let dst = counts[b];
            tmp_codes[dst] = c;
            tmp_occ[dst] = o;
            counts[b] = dst + 1;
        }

        std::mem::swap(codes, &mut tmp_codes);
        std::mem::swap(occurrences, &mut tmp_occ);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorts_and_keeps_order_within_code() {
        let mut codes = vec![70_000u64, 3, 70_000, 256, 3, 0];
        let mut occ: Vec<Occurrence> = (0..6).map(|i| Occurrence::new(i, i * 10)).collect();
        radix_sort_by_code(&mut codes, &mut occ);
        assert_eq!(codes, vec![0, 3, 3, 256, 70_000, 70_000]);
        let ids: Vec<u32> = occ.iter().map(|o| o.ref_id).collect();
        assert_eq!(ids, vec![5, 1, 4, 3, 0, 2]);
    }

    #[test]
    fn test_uniform_byte_pass_skipped() {
        let mut codes = vec![0x0102u64, 0x0101, 0x0103];
        let mut occ: Vec<Occurrence> = (0..3).map(|i| Occurrence::new(i, 0)).collect();
        radix_sort_by_code(&mut codes, &mut occ);
        assert_eq!(codes, vec![0x0101, 0x0102, 0x0103]);
        assert_eq!(occ[0].ref_id, 1);
    }
}
