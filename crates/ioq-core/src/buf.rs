//! Size-clamping byte views
//!
//! [`ConstBuf`] and [`MutBuf`] are `(pointer, length)` views over existing
//! storage. Construction never overflows the source: a requested size larger
//! than the source is clamped to the source length. Advancing past the end
//! leaves an empty view at the end instead of panicking.

use std::ops::{Deref, DerefMut};

/// Read-only view into a byte sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConstBuf<'a> {
    data: &'a [u8],
}

impl<'a> ConstBuf<'a> {
    /// View the whole of `src`.
    #[inline]
    pub fn new(src: &'a [u8]) -> Self {
        Self { data: src }
    }

    /// View at most `size` bytes of `src`.
    #[inline]
    pub fn with_size(src: &'a [u8], size: usize) -> Self {
        Self {
            data: &src[..size.min(src.len())],
        }
    }

    /// Drop `n` bytes from the front, stopping at the end.
    #[inline]
    pub fn advance(&mut self, n: usize) {
        self.data = &self.data[n.min(self.data.len())..];
    }

    #[inline]
    pub fn as_slice(&self) -> &'a [u8] {
        self.data
    }
}

impl Deref for ConstBuf<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data
    }
}

impl<'a> From<&'a [u8]> for ConstBuf<'a> {
    fn from(src: &'a [u8]) -> Self {
        Self::new(src)
    }
}

impl<'a> From<&'a str> for ConstBuf<'a> {
    fn from(src: &'a str) -> Self {
        Self::new(src.as_bytes())
    }
}

impl<'a> From<&'a Vec<u8>> for ConstBuf<'a> {
    fn from(src: &'a Vec<u8>) -> Self {
        Self::new(src)
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for ConstBuf<'a> {
    fn from(src: &'a [u8; N]) -> Self {
        Self::new(src)
    }
}

/// Writable view into a byte buffer.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MutBuf<'a> {
    data: &'a mut [u8],
}

impl<'a> MutBuf<'a> {
    #[inline]
    pub fn new(src: &'a mut [u8]) -> Self {
        Self { data: src }
    }

    #[inline]
    pub fn with_size(src: &'a mut [u8], size: usize) -> Self {
        let len = size.min(src.len());
        Self {
            data: &mut src[..len],
        }
    }

    #[inline]
    pub fn advance(&mut self, n: usize) {
        let data = std::mem::take(&mut self.data);
        let n = n.min(data.len());
        self.data = &mut data[n..];
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut *self.data
    }

    /// Give up the view, keeping the borrowed storage.
    #[inline]
    pub fn into_slice(self) -> &'a mut [u8] {
        self.data
    }
}

impl Deref for MutBuf<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &*self.data
    }
}

impl DerefMut for MutBuf<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut *self.data
    }
}

impl<'a> From<&'a mut [u8]> for MutBuf<'a> {
    fn from(src: &'a mut [u8]) -> Self {
        Self::new(src)
    }
}

impl<'a> From<&'a mut Vec<u8>> for MutBuf<'a> {
    fn from(src: &'a mut Vec<u8>) -> Self {
        Self::new(src)
    }
}

impl<'a, const N: usize> From<&'a mut [u8; N]> for MutBuf<'a> {
    fn from(src: &'a mut [u8; N]) -> Self {
        Self::new(src)
    }
}

/// View at most `size` bytes of anything byte-like.
#[inline]
pub fn make_buf<T: AsRef<[u8]> + ?Sized>(src: &T, size: usize) -> ConstBuf<'_> {
    ConstBuf::with_size(src.as_ref(), size)
}

/// Writable view of at most `size` bytes.
#[inline]
pub fn make_buf_mut<T: AsMut<[u8]> + ?Sized>(src: &mut T, size: usize) -> MutBuf<'_> {
    MutBuf::with_size(src.as_mut(), size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_empty() {
        let buf = ConstBuf::default();
        assert!(buf.is_empty());
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn test_size_is_clamped() {
        let data = [1u8, 2, 3, 4];
        assert_eq!(make_buf(&data, 2).len(), 2);
        assert_eq!(make_buf(&data, 4).len(), 4);
        assert_eq!(make_buf(&data, 400).len(), 4);
        assert_eq!(make_buf("test", usize::MAX).as_slice(), b"test");

        let mut storage = vec![0u8; 4];
        assert_eq!(make_buf_mut(&mut storage, 9).len(), 4);
    }

    #[test]
    fn test_advance_stops_at_end() {
        let data = [1u8, 2, 3, 4];
        let mut buf = ConstBuf::from(&data);
        buf.advance(2);
        assert_eq!(&*buf, &[3, 4]);
        buf.advance(10);
        assert!(buf.is_empty());

        let mut storage = [0u8; 4];
        let mut view = MutBuf::from(&mut storage);
        view.advance(1);
        view[0] = 9;
        view.advance(usize::MAX);
        assert!(view.is_empty());
        assert_eq!(storage, [0, 9, 0, 0]);
    }
}
