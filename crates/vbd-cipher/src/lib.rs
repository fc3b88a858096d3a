#![forbid(unsafe_code)]
//! Block-cipher capability and the per-block transform pipeline.
//!
//! The device never owns key material. A collaborator builds a
//! [`BlockCipher`] (usually [`AesCipher`]) and hands the device a shared
//! handle to it. The [`TransformPipeline`] walks a span in block-size steps
//! and runs the cipher on each block independently: there is no IV and no
//! chaining between blocks, so equal plaintext blocks produce equal
//! ciphertext blocks. That keeps every sector independently addressable but
//! is not a confidentiality guarantee.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256};
use std::fmt;
use std::sync::Arc;
use tracing::trace;
use vbd_error::{Result, VbdError};
use vbd_types::{ByteOffset, Direction};

/// AES block size in bytes, independent of key length.
pub const AES_BLOCK_SIZE: usize = 16;

/// A symmetric block cipher operating on exactly one block at a time.
///
/// Both transforms work in place. `block.len()` MUST equal `block_size()`;
/// implementations reject anything else with `UnalignedTransform`.
pub trait BlockCipher: Send + Sync {
    /// Block size in bytes. Never zero.
    fn block_size(&self) -> usize;

    /// Replace one plaintext block with its ciphertext.
    fn encrypt_block(&self, block: &mut [u8]) -> Result<()>;

    /// Replace one ciphertext block with its plaintext.
    fn decrypt_block(&self, block: &mut [u8]) -> Result<()>;

    /// Algorithm name for diagnostics.
    fn name(&self) -> &'static str;
}

// ── AES ────────────────────────────────────────────────────────────────────

/// AES with the key length chosen by the supplied key: 16, 24 or 32 bytes.
#[derive(Clone)]
pub enum AesCipher {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

impl AesCipher {
    pub fn new(key: &[u8]) -> Result<Self> {
        let invalid = |_| VbdError::InvalidKey(format!("AES key length {} bytes", key.len()));
        match key.len() {
            16 => Aes128::new_from_slice(key).map(Self::Aes128).map_err(invalid),
            24 => Aes192::new_from_slice(key).map(Self::Aes192).map_err(invalid),
            32 => Aes256::new_from_slice(key).map(Self::Aes256).map_err(invalid),
            other => Err(VbdError::InvalidKey(format!(
                "AES key length {other} bytes (expected 16, 24 or 32)"
            ))),
        }
    }

    fn check_block(block: &[u8]) -> Result<()> {
        if block.len() != AES_BLOCK_SIZE {
            return Err(VbdError::UnalignedTransform {
                len: block.len(),
                block_size: AES_BLOCK_SIZE,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for AesCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesCipher")
            .field("algorithm", &self.name())
            .finish_non_exhaustive()
    }
}

impl BlockCipher for AesCipher {
    fn block_size(&self) -> usize {
        AES_BLOCK_SIZE
    }

    fn encrypt_block(&self, block: &mut [u8]) -> Result<()> {
        Self::check_block(block)?;
        let block = GenericArray::from_mut_slice(block);
        match self {
            Self::Aes128(c) => c.encrypt_block(block),
            Self::Aes192(c) => c.encrypt_block(block),
            Self::Aes256(c) => c.encrypt_block(block),
        }
        Ok(())
    }

    fn decrypt_block(&self, block: &mut [u8]) -> Result<()> {
        Self::check_block(block)?;
        let block = GenericArray::from_mut_slice(block);
        match self {
            Self::Aes128(c) => c.decrypt_block(block),
            Self::Aes192(c) => c.decrypt_block(block),
            Self::Aes256(c) => c.decrypt_block(block),
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Aes128(_) => "aes-128",
            Self::Aes192(_) => "aes-192",
            Self::Aes256(_) => "aes-256",
        }
    }
}

// ── Transform pipeline ─────────────────────────────────────────────────────

/// Applies an optional block cipher across a byte span.
///
/// Without a cipher the pipeline is the identity. The pipeline holds no
/// per-call state; cloning it shares the same cipher handle.
#[derive(Clone, Default)]
pub struct TransformPipeline {
    cipher: Option<Arc<dyn BlockCipher>>,
}

impl TransformPipeline {
    /// Pass-through pipeline for a plain storage device.
    #[must_use]
    pub fn identity() -> Self {
        Self { cipher: None }
    }

    /// Pipeline backed by `cipher`.
    pub fn with_cipher(cipher: Arc<dyn BlockCipher>) -> Result<Self> {
        if cipher.block_size() == 0 {
            return Err(VbdError::InvalidKey(format!(
                "cipher {} reports a zero block size",
                cipher.name()
            )));
        }
        Ok(Self {
            cipher: Some(cipher),
        })
    }

    #[must_use]
    pub fn cipher(&self) -> Option<&Arc<dyn BlockCipher>> {
        self.cipher.as_ref()
    }

    /// Cipher block size, or `None` for the identity pipeline.
    #[must_use]
    pub fn block_size(&self) -> Option<usize> {
        self.cipher.as_ref().map(|c| c.block_size())
    }

    /// Fail with `UnalignedTransform` unless `len` is a whole number of
    /// cipher blocks. Always succeeds for the identity pipeline.
    pub fn check_aligned(&self, len: usize) -> Result<()> {
        match self.block_size() {
            Some(block_size) if len % block_size != 0 => {
                Err(VbdError::UnalignedTransform { len, block_size })
            }
            _ => Ok(()),
        }
    }

    /// Transform `data` in place: encrypt for writes, decrypt for reads.
    ///
    /// `offset` is the span's position in the backing store and is only used
    /// for diagnostics. Alignment is checked before any block is touched, so
    /// a rejected span is returned unmodified.
    pub fn apply(&self, direction: Direction, offset: ByteOffset, data: &mut [u8]) -> Result<()> {
        let Some(cipher) = self.cipher.as_deref() else {
            return Ok(());
        };
        self.check_aligned(data.len())?;

        let block_size = cipher.block_size();
        for (index, block) in data.chunks_exact_mut(block_size).enumerate() {
            trace!(
                cipher = cipher.name(),
                %direction,
                offset = offset.0,
                block = index,
                "transform block"
            );
            match direction {
                Direction::Write => cipher.encrypt_block(block)?,
                Direction::Read => cipher.decrypt_block(block)?,
            }
        }
        Ok(())
    }
}

impl fmt::Debug for TransformPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformPipeline")
            .field("cipher", &self.cipher.as_ref().map(|c| c.name()))
            .field("block_size", &self.block_size())
            .finish()
    }
}
