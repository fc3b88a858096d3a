#![forbid(unsafe_code)]
//! RAM-backed virtual block device.
//!
//! A [`Device`] owns a fixed-size in-memory [`BackingStore`] and exposes it
//! through sector-addressed transfers, optionally encrypting data on write
//! and decrypting on read with an injected block cipher. Hosts drive it
//! through [`Device::open`]/[`Device::close`] and by submitting
//! [`Request`]s, either directly with [`Device::submit`] or through a
//! [`RequestQueue`] drained by [`Device::dispatch`].
//!
//! Closing the last opener arms a media-invalidation timer; a media change
//! flagged while the device is closed wipes the store on the next first
//! open.

pub mod config;
pub mod device;
pub mod dispatch;
pub mod host;
pub mod request;
pub mod store;
pub mod timer;

pub use config::{CipherConfig, DeviceConfig, DispatchMode, HostConfig};
pub use device::{Device, DeviceStats};
pub use dispatch::{Direct, DispatchStrategy, MultiSegment, WholeRequest};
pub use host::DeviceSet;
pub use request::{Completion, CompletionStatus, Request, RequestId, RequestKind, RequestQueue, Segment};
pub use store::BackingStore;
pub use timer::InvalidationTimer;

pub use vbd_cipher::{AES_BLOCK_SIZE, AesCipher, BlockCipher, TransformPipeline};
pub use vbd_error::{Result, VbdError};
pub use vbd_types::{ByteOffset, Direction, Geometry, SectorNumber, SectorSize};
