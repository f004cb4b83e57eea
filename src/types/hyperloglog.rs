//! HyperLogLog probabilistic cardinality estimator.
//!
//! The register array is encoded into an ordinary string payload: a
//! 4-byte magic header followed by one byte per register. Precision is
//! 12 bits, so 4096 registers; each register holds the maximum observed
//! "rank" (position of the leading 1 bit in the non-index hash bits,
//! plus one) for elements landing in it.

/// Number of hash bits used for the register index.
pub const PRECISION: usize = 12;
/// 2^12 = 4096 registers.
pub const REGISTERS: usize = 1 << PRECISION;

const INDEX_MASK: u64 = (REGISTERS as u64) - 1;
const RANK_BITS: usize = 64 - PRECISION; // 52
const MAGIC: &[u8; 4] = b"CHLL";
const ALPHA: f64 = 0.7213 / (1.0 + 1.079 / REGISTERS as f64);

/// Total encoded length: header + dense registers.
pub const DENSE_LEN: usize = MAGIC.len() + REGISTERS;

/// A fresh, zero-register encoding.
pub fn empty() -> Vec<u8> {
    let mut data = vec![0u8; DENSE_LEN];
    data[..MAGIC.len()].copy_from_slice(MAGIC);
    data
}

/// Whether a string payload is a well-formed register encoding.
pub fn is_valid(data: &[u8]) -> bool {
    data.len() == DENSE_LEN && &data[..MAGIC.len()] == MAGIC
}

fn registers(data: &[u8]) -> &[u8] {
    &data[MAGIC.len()..]
}

/// Add an element. Returns true if a register changed (i.e. the
/// estimate may have changed). The payload must be `is_valid`.
pub fn add(data: &mut [u8], element: &[u8]) -> bool {
    let hash = fnv1a_hash(element);
    let index = (hash & INDEX_MASK) as usize;
    let remaining = hash >> PRECISION;
    let rank = leading_zeros_in_window(remaining) + 1;

    let slot = &mut data[MAGIC.len() + index];
    if rank > *slot {
        *slot = rank;
        true
    } else {
        false
    }
}

/// Bias-corrected cardinality estimate for one encoding.
pub fn count(data: &[u8]) -> u64 {
    estimate(registers(data))
}

/// Estimate the cardinality of the union of several encodings without
/// materializing a merged key.
pub fn count_union(sources: &[&[u8]]) -> u64 {
    let mut merged = [0u8; REGISTERS];
    for src in sources {
        for (slot, &reg) in merged.iter_mut().zip(registers(src)) {
            if reg > *slot {
                *slot = reg;
            }
        }
    }
    estimate(&merged)
}

/// Fold `src` into `dest` by taking the elementwise register maximum.
pub fn merge_into(dest: &mut [u8], src: &[u8]) {
    let dest_regs = &mut dest[MAGIC.len()..];
    for (slot, &reg) in dest_regs.iter_mut().zip(registers(src)) {
        if reg > *slot {
            *slot = reg;
        }
    }
}

fn estimate(regs: &[u8]) -> u64 {
    let mut sum = 0.0f64;
    let mut zero_registers = 0u32;

    for &val in regs {
        sum += 2.0f64.powi(-(val as i32));
        if val == 0 {
            zero_registers += 1;
        }
    }

    let m = REGISTERS as f64;
    let raw_estimate = ALPHA * m * m / sum;

    if raw_estimate <= 2.5 * m {
        // Small range: linear counting while zero-valued registers remain
        if zero_registers > 0 {
            (m * (m / zero_registers as f64).ln()) as u64
        } else {
            raw_estimate as u64
        }
    } else if raw_estimate > (1u64 << 32) as f64 / 30.0 {
        // Large range correction
        let two_32 = (1u64 << 32) as f64;
        (-two_32 * (1.0 - raw_estimate / two_32).ln()) as u64
    } else {
        raw_estimate as u64
    }
}

/// FNV-1a 64-bit hash.
fn fnv1a_hash(data: &[u8]) -> u64 {
    const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x00000100000001B3;

    let mut hash = FNV_OFFSET_BASIS;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Leading zeros within the 52-bit window that remains after the index
/// bits are removed.
fn leading_zeros_in_window(value: u64) -> u8 {
    for i in 0..RANK_BITS {
        if (value >> (RANK_BITS - 1 - i)) & 1 == 1 {
            return i as u8;
        }
    }
    RANK_BITS as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_counts_zero() {
        let data = empty();
        assert!(is_valid(&data));
        assert_eq!(count(&data), 0);
    }

    #[test]
    fn test_plain_string_is_not_valid() {
        assert!(!is_valid(b"hello"));
        assert!(!is_valid(&vec![0u8; DENSE_LEN]));
    }

    #[test]
    fn test_add_single_element() {
        let mut data = empty();
        assert!(add(&mut data, b"hello"));
        assert!(count(&data) > 0);
    }

    #[test]
    fn test_add_duplicate_does_not_change() {
        let mut data = empty();
        add(&mut data, b"hello");
        assert!(!add(&mut data, b"hello"));
    }

    #[test]
    fn test_cardinality_estimate() {
        let mut data = empty();
        let n = 10_000;
        for i in 0..n {
            add(&mut data, format!("element-{i}").as_bytes());
        }
        let estimate = count(&data);
        let error = (estimate as f64 - n as f64).abs() / n as f64;
        assert!(
            error < 0.05,
            "estimate {estimate} too far from {n} (error: {:.2}%)",
            error * 100.0
        );
    }

    #[test]
    fn test_merge_disjoint() {
        let mut a = empty();
        let mut b = empty();
        for i in 0..5000 {
            add(&mut a, format!("a-{i}").as_bytes());
        }
        for i in 0..5000 {
            add(&mut b, format!("b-{i}").as_bytes());
        }

        let count_a = count(&a);
        let count_b = count(&b);

        merge_into(&mut a, &b);
        let merged = count(&a);

        assert!(merged > count_a);
        assert!(merged > count_b);
    }

    #[test]
    fn test_union_estimate_matches_merge() {
        let mut a = empty();
        let mut b = empty();
        for i in 0..2000 {
            add(&mut a, format!("x-{i}").as_bytes());
            add(&mut b, format!("y-{i}").as_bytes());
        }

        let union = count_union(&[&a, &b]);
        let mut merged = a.clone();
        merge_into(&mut merged, &b);
        assert_eq!(union, count(&merged));
    }

    #[test]
    fn test_hash_deterministic() {
        assert_eq!(fnv1a_hash(b"test"), fnv1a_hash(b"test"));
        assert_ne!(fnv1a_hash(b"hello"), fnv1a_hash(b"world"));
    }
}
