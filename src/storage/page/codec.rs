//! Fixed-width encoding of keys and values stored in index pages.
//!
//! Index pages address entries by position (`offset = header + i * width`), so
//! every key and value type must encode to the same number of bytes.

use crate::common::{PageId, Rid};

/// A type with a fixed-size, self-contained byte encoding.
///
/// `encode` writes exactly `ENCODED_SIZE` bytes to the front of `buf`;
/// `decode` reads exactly that many.
pub trait FixedCodec: Sized + Clone {
    /// Number of bytes one value occupies on a page.
    const ENCODED_SIZE: usize;

    fn encode(&self, buf: &mut [u8]);

    fn decode(buf: &[u8]) -> Self;
}

macro_rules! impl_int_codec {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FixedCodec for $ty {
                const ENCODED_SIZE: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn encode(&self, buf: &mut [u8]) {
                    buf[..Self::ENCODED_SIZE].copy_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn decode(buf: &[u8]) -> Self {
                    let mut bytes = [0u8; std::mem::size_of::<$ty>()];
                    bytes.copy_from_slice(&buf[..Self::ENCODED_SIZE]);
                    <$ty>::from_le_bytes(bytes)
                }
            }
        )*
    };
}

impl_int_codec!(u32, i32, u64, i64);

impl FixedCodec for PageId {
    const ENCODED_SIZE: usize = 4;

    #[inline]
    fn encode(&self, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&self.to_le_bytes());
    }

    #[inline]
    fn decode(buf: &[u8]) -> Self {
        PageId::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
    }
}

impl FixedCodec for Rid {
    const ENCODED_SIZE: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        self.page_id.encode(&mut buf[..4]);
        self.slot.encode(&mut buf[4..8]);
    }

    fn decode(buf: &[u8]) -> Self {
        Rid {
            page_id: PageId::decode(&buf[..4]),
            slot: u32::decode(&buf[4..8]),
        }
    }
}

/// Read a little-endian `u32` at `offset`.
#[inline]
pub(crate) fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::decode(&buf[offset..offset + 4])
}

/// Write a little-endian `u32` at `offset`.
#[inline]
pub(crate) fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    value.encode(&mut buf[offset..offset + 4]);
}
