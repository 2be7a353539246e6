//! Caller-owned memory as seen by the request entry points.

use thiserror::Error;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Error)]
#[error("caller memory is not readable")]
pub struct Fault;

/// An array in caller memory: a declared element count over the prefix that is actually
/// readable. Reading an element past the readable prefix faults, just like copying from an
/// unmapped user page would.
#[derive(Debug)]
pub struct UserSlice<'a, T> {
    readable: &'a [T],
    len: usize,
}

impl<T> Clone for UserSlice<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for UserSlice<'_, T> {}

impl<'a, T: Copy> UserSlice<'a, T> {
    pub fn new(data: &'a [T]) -> Self {
        Self {
            readable: data,
            len: data.len(),
        }
    }

    /// Declares `len` elements of which only `readable` can be copied.
    pub fn with_len(readable: &'a [T], len: usize) -> Self {
        Self { readable, len }
    }

    pub fn empty() -> Self {
        Self::new(&[])
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> Result<T, Fault> {
        if index >= self.len {
            return Err(Fault);
        }
        self.readable.get(index).copied().ok_or(Fault)
    }
}

impl UserSlice<'_, u8> {
    /// Copies `dst.len()` bytes starting at `offset`.
    pub fn read_bytes(&self, offset: usize, dst: &mut [u8]) -> Result<(), Fault> {
        let end = offset.checked_add(dst.len()).ok_or(Fault)?;
        if end > self.len {
            return Err(Fault);
        }
        dst.copy_from_slice(self.readable.get(offset..end).ok_or(Fault)?);
        Ok(())
    }
}

impl<'a, T: Copy> From<&'a [T]> for UserSlice<'a, T> {
    fn from(data: &'a [T]) -> Self {
        Self::new(data)
    }
}

impl<'a, T: Copy> From<&'a Vec<T>> for UserSlice<'a, T> {
    fn from(data: &'a Vec<T>) -> Self {
        Self::new(data)
    }
}

impl<'a, T: Copy, const N: usize> From<&'a [T; N]> for UserSlice<'a, T> {
    fn from(data: &'a [T; N]) -> Self {
        Self::new(data)
    }
}
