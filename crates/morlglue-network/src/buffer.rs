//! Wire Buffer - reusable, growable byte buffer in network byte order
//!
//! Scalars are always stored big-endian. On a little-endian host every
//! element is byte-reversed on its way in and out; on a big-endian host
//! bytes are copied unchanged. One buffer is cleared and reused for every
//! message on a connection, and only released at teardown.

use morlglue_common::{GlueError, Result};
use tracing::error;

/// Fixed-size scalar that can be carried by a [`WireBuffer`]
pub trait WireScalar: Copy + Default {
    /// Encoded size in bytes
    const SIZE: usize;

    /// Native-order bytes of `self` into `out` (`out.len() == SIZE`)
    fn put_native(self, out: &mut [u8]);

    /// Value from native-order bytes (`bytes.len() == SIZE`)
    fn from_native(bytes: &[u8]) -> Self;
}

macro_rules! impl_wire_scalar {
    ($($t:ty),*) => {
        $(
            impl WireScalar for $t {
                const SIZE: usize = std::mem::size_of::<$t>();

                fn put_native(self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_ne_bytes());
                }

                fn from_native(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(bytes);
                    <$t>::from_ne_bytes(raw)
                }
            }
        )*
    };
}

impl_wire_scalar!(u8, i32, u32, f64);

/// Largest scalar size, used for scratch space
const MAX_SCALAR_SIZE: usize = 8;

/// Whether the low-order byte of `1u32` sits at the lowest address
pub fn host_is_little_endian() -> bool {
    1u32.to_ne_bytes()[0] == 1
}

/// Write the bytes of `src` into `dst` in reverse order.
///
/// Both spans hold one element and must have the same length. Because `dst`
/// is borrowed mutably and `src` immutably, they can never overlap.
pub fn swap_endian(dst: &mut [u8], src: &[u8]) {
    debug_assert_eq!(dst.len(), src.len());
    for (d, s) in dst.iter_mut().zip(src.iter().rev()) {
        *d = *s;
    }
}

/// Owned, growable byte buffer with a logical size
#[derive(Debug, Default, Clone)]
pub struct WireBuffer {
    /// Backing storage; its length is the capacity, zero-filled past `size`
    data: Vec<u8>,
    size: u32,
}

impl WireBuffer {
    /// Empty buffer with no storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer with `capacity` zeroed bytes already allocated
    pub fn with_capacity(capacity: u32) -> Result<Self> {
        let mut buffer = Self::new();
        buffer.reserve(capacity)?;
        Ok(buffer)
    }

    /// Logical used length
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Allocated length
    pub fn capacity(&self) -> u32 {
        // data never grows past u32::MAX, see reserve
        self.data.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Bytes in use
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.size as usize]
    }

    /// Grow to at least `min_capacity` bytes, keeping existing bytes.
    ///
    /// New capacity is `min_capacity + (min_capacity - old_capacity) * 2`,
    /// capped at `u32::MAX`. No-op when the buffer is already large enough.
    pub fn reserve(&mut self, min_capacity: u32) -> Result<()> {
        let old_capacity = self.capacity();
        if min_capacity <= old_capacity {
            return Ok(());
        }

        let wanted = min_capacity as u64 + (min_capacity - old_capacity) as u64 * 2;
        let new_capacity = wanted.min(u32::MAX as u64) as usize;

        if let Err(e) = self.data.try_reserve_exact(new_capacity - self.data.len()) {
            error!(
                requested = new_capacity,
                capacity = old_capacity,
                error = %e,
                "Wire buffer allocation failed"
            );
            return Err(GlueError::Allocation {
                requested: new_capacity as u64,
                capacity: old_capacity,
            });
        }
        self.data.resize(new_capacity, 0);
        Ok(())
    }

    /// Logical reset between messages; storage is kept
    pub fn clear(&mut self) {
        self.size = 0;
    }

    /// Release all storage
    pub fn release(&mut self) {
        self.data = Vec::new();
        self.size = 0;
    }

    /// Write `src`, a run of `element_size`-byte elements already in host
    /// order, starting at byte `offset`. Returns the offset after the last
    /// element.
    pub fn write_raw(&mut self, offset: u32, src: &[u8], element_size: usize) -> Result<u32> {
        debug_assert!(element_size > 0 && src.len() % element_size == 0);
        let end = span_end(offset, src.len())?;
        self.reserve(end)?;

        let dst = &mut self.data[offset as usize..end as usize];
        if element_size > 1 && host_is_little_endian() {
            for (d, s) in dst
                .chunks_exact_mut(element_size)
                .zip(src.chunks_exact(element_size))
            {
                swap_endian(d, s);
            }
        } else {
            dst.copy_from_slice(src);
        }

        self.size = self.size.max(end);
        Ok(end)
    }

    /// Write a run of scalars starting at `offset`
    pub fn write_slice<T: WireScalar>(&mut self, offset: u32, values: &[T]) -> Result<u32> {
        let end = span_end(offset, values.len() * T::SIZE)?;
        self.reserve(end)?;

        let swap = T::SIZE > 1 && host_is_little_endian();
        let mut scratch = [0u8; MAX_SCALAR_SIZE];
        let dst = &mut self.data[offset as usize..end as usize];
        for (chunk, value) in dst.chunks_exact_mut(T::SIZE).zip(values) {
            value.put_native(&mut scratch[..T::SIZE]);
            if swap {
                swap_endian(chunk, &scratch[..T::SIZE]);
            } else {
                chunk.copy_from_slice(&scratch[..T::SIZE]);
            }
        }

        self.size = self.size.max(end);
        Ok(end)
    }

    /// Write one scalar at `offset`
    pub fn write<T: WireScalar>(&mut self, offset: u32, value: T) -> Result<u32> {
        self.write_slice(offset, &[value])
    }

    /// Fail unless `needed` bytes starting at `offset` lie within the logical size
    pub fn check_readable(&self, offset: u32, needed: u64) -> Result<()> {
        if offset as u64 + needed > self.size as u64 {
            return Err(GlueError::BufferUnderrun {
                offset: offset as u64,
                needed,
                size: self.size,
            });
        }
        Ok(())
    }

    /// Fill `dst` with scalars read from `offset`
    pub fn read_slice<T: WireScalar>(&self, offset: u32, dst: &mut [T]) -> Result<u32> {
        let len = dst.len() * T::SIZE;
        self.check_readable(offset, len as u64)?;
        let end = offset as usize + len;

        let swap = T::SIZE > 1 && host_is_little_endian();
        let mut scratch = [0u8; MAX_SCALAR_SIZE];
        let src = &self.data[offset as usize..end];
        for (slot, chunk) in dst.iter_mut().zip(src.chunks_exact(T::SIZE)) {
            *slot = if swap {
                swap_endian(&mut scratch[..T::SIZE], chunk);
                T::from_native(&scratch[..T::SIZE])
            } else {
                T::from_native(chunk)
            };
        }

        // end <= size <= u32::MAX
        Ok(end as u32)
    }

    /// Read one scalar at `offset`, returning it with the next offset
    pub fn read<T: WireScalar>(&self, offset: u32) -> Result<(T, u32)> {
        let mut value = [T::default()];
        let next = self.read_slice(offset, &mut value)?;
        Ok((value[0], next))
    }

    /// Reset the buffer to hold exactly `len` payload bytes and hand them out
    /// for filling from the network.
    pub(crate) fn prepare_payload(&mut self, len: u32) -> Result<&mut [u8]> {
        self.reserve(len)?;
        self.size = len;
        Ok(&mut self.data[..len as usize])
    }
}

fn span_end(offset: u32, len: usize) -> Result<u32> {
    let end = offset as u64 + len as u64;
    u32::try_from(end).map_err(|_| GlueError::PayloadTooLarge(end))
}
