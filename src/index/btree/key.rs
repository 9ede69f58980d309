//! Key types and comparators for the B+Tree.

use std::cmp::Ordering;
use std::fmt;

use crate::storage::page::FixedCodec;

/// Total order over keys, injected into a [`BPlusTree`](super::BPlusTree).
///
/// Any `Fn(&K, &K) -> Ordering` closure that is `Send + Sync` is a comparator.
pub trait KeyComparator<K>: Send + Sync {
    fn compare(&self, lhs: &K, rhs: &K) -> Ordering;
}

/// Compares keys with their [`Ord`] implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct OrdComparator;

impl<K: Ord> KeyComparator<K> for OrdComparator {
    #[inline]
    fn compare(&self, lhs: &K, rhs: &K) -> Ordering {
        lhs.cmp(rhs)
    }
}

impl<K, F> KeyComparator<K> for F
where
    F: Fn(&K, &K) -> Ordering + Send + Sync,
{
    #[inline]
    fn compare(&self, lhs: &K, rhs: &K) -> Ordering {
        self(lhs, rhs)
    }
}

/// A fixed-width, byte-comparable key of `N` bytes.
///
/// Integers stored with [`GenericKey::from_i64`] keep their numeric order
/// under plain byte comparison: the value is written big-endian with the
/// sign bit flipped, so negatives sort before positives.
///
/// # Example
/// ```
/// use tesseradb::index::btree::GenericKey;
///
/// let a = GenericKey::<8>::from_i64(-3);
/// let b = GenericKey::<8>::from_i64(2);
/// assert!(a < b);
/// assert_eq!(a.to_i64(), -3);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GenericKey<const N: usize> {
    data: [u8; N],
}

impl<const N: usize> GenericKey<N> {
    pub fn new(data: [u8; N]) -> Self {
        Self { data }
    }

    /// Encode an integer into the first 8 bytes; the rest stay zero.
    ///
    /// # Panics
    /// Panics if `N < 8`.
    pub fn from_i64(value: i64) -> Self {
        assert!(N >= 8, "GenericKey<{}> cannot hold an i64", N);
        let mut data = [0u8; N];
        let flipped = (value as u64) ^ (1 << 63);
        data[..8].copy_from_slice(&flipped.to_be_bytes());
        Self { data }
    }

    /// Inverse of [`GenericKey::from_i64`].
    pub fn to_i64(&self) -> i64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.data[..8]);
        (u64::from_be_bytes(bytes) ^ (1 << 63)) as i64
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl<const N: usize> Default for GenericKey<N> {
    fn default() -> Self {
        Self { data: [0u8; N] }
    }
}

impl<const N: usize> fmt::Debug for GenericKey<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if N >= 8 {
            write!(f, "{}", self.to_i64())
        } else {
            write!(f, "{:02x?}", &self.data)
        }
    }
}

impl<const N: usize> FixedCodec for GenericKey<N> {
    const ENCODED_SIZE: usize = N;

    fn encode(&self, buf: &mut [u8]) {
        buf[..N].copy_from_slice(&self.data);
    }

    fn decode(buf: &[u8]) -> Self {
        let mut data = [0u8; N];
        data.copy_from_slice(&buf[..N]);
        Self { data }
    }
}

/// Byte-wise (memcmp) comparator for [`GenericKey`].
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericComparator<const N: usize>;

impl<const N: usize> KeyComparator<GenericKey<N>> for GenericComparator<N> {
    #[inline]
    fn compare(&self, lhs: &GenericKey<N>, rhs: &GenericKey<N>) -> Ordering {
        lhs.data.as_slice().cmp(rhs.data.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_key_preserves_integer_order() {
        let values = [i64::MIN, -1000, -1, 0, 1, 42, i64::MAX];
        let keys: Vec<_> = values.iter().map(|&v| GenericKey::<16>::from_i64(v)).collect();
        let cmp = GenericComparator::<16>;
        for pair in keys.windows(2) {
            assert_eq!(cmp.compare(&pair[0], &pair[1]), Ordering::Less);
        }
        for (key, value) in keys.iter().zip(values) {
            assert_eq!(key.to_i64(), value);
        }
    }

    #[test]
    fn test_generic_key_codec_width() {
        let key = GenericKey::<16>::from_i64(7);
        let mut buf = [0xAAu8; 20];
        key.encode(&mut buf);
        assert_eq!(buf[16..], [0xAA; 4]);
        assert_eq!(GenericKey::<16>::decode(&buf), key);
    }

    #[test]
    fn test_closure_comparator() {
        let reverse = |a: &u32, b: &u32| b.cmp(a);
        assert_eq!(reverse.compare(&1, &2), Ordering::Greater);
        assert_eq!(OrdComparator.compare(&1u32, &2u32), Ordering::Less);
    }
}
