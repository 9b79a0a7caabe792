use std::cell::OnceCell;
use std::ffi::CStr;
use std::mem::align_of;
use std::mem::size_of;
use std::slice;

use crate::Addr;
use crate::Result;


/// Initialize `cell` with the result of `f`, unless it already holds
/// a value.
///
/// The standard library's `OnceCell::get_or_try_init` is not yet
/// stable, so this is a fallible version built on top of the stable
/// API.
pub(crate) fn get_or_try_init<T, F>(cell: &OnceCell<T>, f: F) -> Result<&T>
where
    F: FnOnce() -> Result<T>,
{
    if let Some(value) = cell.get() {
        return Ok(value)
    }

    let value = f()?;
    Ok(cell.get_or_init(|| value))
}


/// Round `value` up to the next multiple of `align`.
///
/// `align` has to be a power of two.
#[inline]
pub(crate) fn align_up(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two(), "{align}");
    (value + align - 1) & !(align - 1)
}

/// Round `value` down to the previous multiple of `align`.
///
/// `align` has to be a power of two.
#[inline]
pub(crate) fn align_down(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two(), "{align}");
    value & !(align - 1)
}

/// Decode a little endian unsigned integer of one, two, four, or
/// eight bytes.
pub(crate) fn decode_uint(data: &[u8]) -> Option<u64> {
    let mut data = data;
    match data.len() {
        1 => data.read_u8().map(u64::from),
        2 => data.read_pod::<[u8; 2]>().map(|b| u16::from_le_bytes(b).into()),
        4 => data.read_pod::<[u8; 4]>().map(|b| u32::from_le_bytes(b).into()),
        8 => data.read_pod::<[u8; 8]>().map(u64::from_le_bytes),
        _ => None,
    }
}

/// Iterate over all `width` aligned words in `data`, yielding the
/// address each word lives at (based on `base`) and its value.
pub(crate) fn words(data: &[u8], base: Addr, width: usize) -> impl Iterator<Item = (Addr, u64)> + '_ {
    data.chunks_exact(width)
        .enumerate()
        .filter_map(move |(i, word)| {
            let value = decode_uint(word)?;
            Some((base + (i * width) as Addr, value))
        })
}


/// A marker trait for "plain old data" data types.
///
/// # Safety
/// Only safe to implement for types that are valid for any bit pattern.
pub(crate) unsafe trait Pod {}

unsafe impl Pod for u8 {}
unsafe impl Pod for u16 {}
unsafe impl Pod for u32 {}
unsafe impl Pod for u64 {}
unsafe impl<const N: usize> Pod for [u8; N] {}


/// An trait providing utility functions for reading data from a byte buffer.
pub(crate) trait ReadRaw<'data> {
    /// Ensure that `len` bytes are available for consumption.
    fn ensure(&self, len: usize) -> Option<()>;

    /// Consume and return `len` bytes.
    fn read_slice(&mut self, len: usize) -> Option<&'data [u8]>;

    /// Read a NUL terminated string.
    fn read_cstr(&mut self) -> Option<&'data CStr>;

    /// Read anything implementing `Pod`.
    #[inline]
    fn read_pod<T>(&mut self) -> Option<T>
    where
        T: Pod,
    {
        let data = self.read_slice(size_of::<T>())?;
        // SAFETY: `T` is `Pod` and hence valid for any bit pattern. The pointer
        //         is guaranteed to be valid and to point to memory of at least
        //         `sizeof(T)` bytes.
        let value = unsafe { data.as_ptr().cast::<T>().read_unaligned() };
        Some(value)
    }

    /// Read a reference to something implementing `Pod`.
    #[inline]
    fn read_pod_ref<T>(&mut self) -> Option<&'data T>
    where
        T: Pod,
    {
        let data = self.read_slice(size_of::<T>())?;
        let ptr = data.as_ptr();

        if ptr.align_offset(align_of::<T>()) == 0 {
            // SAFETY: `T` is `Pod` and hence valid for any bit pattern. The pointer
            //         is guaranteed to be valid and to point to memory of at least
            //         `sizeof(T)` bytes. We know it is properly aligned
            //         because we checked that.
            unsafe { ptr.cast::<T>().as_ref() }
        } else {
            None
        }
    }

    /// Read a slice of something implementing `Pod`.
    #[inline]
    fn read_pod_slice_ref<T>(&mut self, count: usize) -> Option<&'data [T]>
    where
        T: Pod,
    {
        let data = self.read_slice(size_of::<T>().checked_mul(count)?)?;
        let ptr = data.as_ptr();

        if ptr.align_offset(align_of::<T>()) == 0 {
            // SAFETY: `T` is `Pod` and hence valid for any bit pattern. The pointer
            //         is guaranteed to be valid and to point to memory of at least
            //         `sizeof(T)` bytes. We know it is properly aligned
            //         because we checked that.
            Some(unsafe { slice::from_raw_parts(ptr.cast::<T>(), count) })
        } else {
            None
        }
    }

    /// Read a `u8` value.
    #[inline]
    fn read_u8(&mut self) -> Option<u8> {
        self.read_pod::<u8>()
    }
}

impl<'data> ReadRaw<'data> for &'data [u8] {
    #[inline]
    fn ensure(&self, len: usize) -> Option<()> {
        if len > self.len() {
            return None
        }
        Some(())
    }

    #[inline]
    fn read_slice(&mut self, len: usize) -> Option<&'data [u8]> {
        self.ensure(len)?;
        let (a, b) = self.split_at(len);
        *self = b;
        Some(a)
    }

    #[inline]
    fn read_cstr(&mut self) -> Option<&'data CStr> {
        let idx = self.iter().position(|byte| *byte == b'\0')?;
        CStr::from_bytes_with_nul(self.read_slice(idx + 1)?).ok()
    }
}
