// SPDX-License-Identifier: Apache-2.0

use crate::{Result, MAX_DATA_SIZE};

use core::mem::align_of;

use libc::{EINVAL, ENOMEM};

/// Bump allocator laying out the data section of an envelope.
///
/// Every allocation is aligned to `usize` and returns its offset from the start of the data
/// section. Growing past [`MAX_DATA_SIZE`] or running out of memory fails with [`ENOMEM`].
#[derive(Debug, Default)]
pub struct Alloc {
    data: Vec<u8>,
}

impl Alloc {
    #[inline]
    pub const fn new() -> Self {
        Self { data: Vec::new() }
    }

    fn reserve(&mut self, len: usize) -> Result<usize> {
        let align = align_of::<usize>();
        let offset = self.data.len().checked_add(align - 1).ok_or(ENOMEM)? & !(align - 1);
        let end = offset.checked_add(len).ok_or(ENOMEM)?;
        if end > MAX_DATA_SIZE {
            return Err(ENOMEM);
        }
        self.data
            .try_reserve_exact(end - self.data.len())
            .map_err(|_| ENOMEM)?;
        self.data.resize(end, 0);
        Ok(offset)
    }

    /// Copies `bytes` into the data section.
    pub fn input(&mut self, bytes: &[u8]) -> Result<usize> {
        let offset = self.reserve(bytes.len())?;
        self.data[offset..].copy_from_slice(bytes);
        Ok(offset)
    }

    /// Copies `s` into the data section as a NUL terminated string.
    ///
    /// Fails with [`EINVAL`] if `s` contains a NUL byte.
    pub fn input_str(&mut self, s: &str) -> Result<usize> {
        if s.as_bytes().contains(&0) {
            return Err(EINVAL);
        }
        let offset = self.reserve(s.len() + 1)?;
        self.data[offset..offset + s.len()].copy_from_slice(s.as_bytes());
        Ok(offset)
    }

    /// Reserves `len` zeroed bytes for the other side to write to.
    #[inline]
    pub fn output(&mut self, len: usize) -> Result<usize> {
        self.reserve(len)
    }

    /// Returns the number of bytes still available in the data section.
    #[inline]
    pub fn remaining(&self) -> usize {
        MAX_DATA_SIZE.saturating_sub(self.data.len().next_multiple_of(align_of::<usize>()))
    }

    /// Returns the finished data section.
    #[inline]
    pub fn finish(self) -> Box<[u8]> {
        self.data.into_boxed_slice()
    }
}
