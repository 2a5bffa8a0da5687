// SPDX-License-Identifier: Apache-2.0

//! Content fingerprints.
//!
//! A fingerprint is the size of a byte stream and its SHA-256 digest. Its persisted form is
//! [`SIZE`] bytes: the size as a little-endian `u64` followed by the digest.

use portcullis::Result;

use std::io::{self, Read};

use libc::{EINVAL, EIO};
use sha2::{Digest, Sha256};

/// Number of bytes hashed per read.
pub const CHUNK_SIZE: usize = 4096;

/// Size of a persisted fingerprint.
pub const SIZE: usize = 8 + 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub size: u64,
    pub hash: [u8; 32],
}

impl Fingerprint {
    /// Fingerprints the stream produced by `read`, which fills the buffer it is given and
    /// returns `0` at the end of the stream.
    pub fn compute(mut read: impl FnMut(&mut [u8]) -> Result<usize>) -> Result<Self> {
        let mut hasher = Sha256::new();
        let mut chunk = [0u8; CHUNK_SIZE];
        let mut size = 0u64;
        loop {
            let n = read(&mut chunk)?;
            if n == 0 {
                break;
            }
            let bytes = chunk.get(..n).ok_or(EIO)?;
            hasher.update(bytes);
            size += n as u64;
        }
        Ok(Self {
            size,
            hash: hasher.finalize().into(),
        })
    }

    /// Fingerprints everything `reader` yields.
    pub fn from_reader(mut reader: impl Read) -> io::Result<Self> {
        let mut hasher = Sha256::new();
        let size = io::copy(&mut reader, &mut hasher)?;
        Ok(Self {
            size,
            hash: hasher.finalize().into(),
        })
    }

    pub fn to_bytes(&self) -> [u8; SIZE] {
        let mut bytes = [0u8; SIZE];
        bytes[..8].copy_from_slice(&self.size.to_le_bytes());
        bytes[8..].copy_from_slice(&self.hash);
        bytes
    }

    /// Parses a persisted fingerprint, failing with [`EINVAL`] if `bytes` has the wrong size.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SIZE {
            return Err(EINVAL);
        }
        let mut size = [0u8; 8];
        size.copy_from_slice(&bytes[..8]);
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes[8..]);
        Ok(Self {
            size: u64::from_le_bytes(size),
            hash,
        })
    }
}
