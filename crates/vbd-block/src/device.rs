//! The RAM-backed device: transfer engine, lifecycle, and geometry.
//!
//! # Locking
//!
//! Each device has one state lock covering the backing store, the open
//! count, and the media flags. It is held for exactly one transfer or one
//! lifecycle transition. Request dispatch uses a separate gate (see
//! [`crate::dispatch`]) so that lifecycle calls can interleave between the
//! segments of a long request.
//!
//! The invalidation timer's callback takes the state lock. `open()`
//! therefore cancels the timer, waiting out a running callback, *before*
//! taking the state lock; the reverse order could deadlock against the
//! callback.

use crate::config::{DeviceConfig, DispatchMode};
use crate::store::BackingStore;
use crate::timer::InvalidationTimer;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};
use vbd_cipher::{AesCipher, BlockCipher, TransformPipeline};
use vbd_error::{Result, VbdError};
use vbd_types::{ByteOffset, Direction, Geometry, SectorNumber, SectorSize};

/// Per-device I/O counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStats {
    pub reads: u64,
    pub writes: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    /// Transfers that were attempted and failed.
    pub failed: u64,
    /// Requests refused without a transfer.
    pub rejected: u64,
    /// Revalidations that wiped the store.
    pub revalidations: u64,
}

#[derive(Debug)]
struct DeviceState {
    store: BackingStore,
    open_count: u32,
    media_changed: bool,
    /// Set by the invalidation timer, consumed by the next revalidation.
    revalidate_eligible: bool,
    stats: DeviceStats,
}

impl DeviceState {
    fn revalidate(&mut self, name: &str) -> bool {
        if !self.media_changed {
            return false;
        }
        self.media_changed = false;
        self.revalidate_eligible = false;
        self.store.reset();
        self.stats.revalidations += 1;
        info!(device = name, "media changed: backing store reset");
        true
    }
}

/// A virtual block device backed by an owned in-memory buffer.
pub struct Device {
    name: String,
    sector_size: SectorSize,
    capacity_bytes: u64,
    dispatch_mode: DispatchMode,
    invalidate_delay: Duration,
    pipeline: TransformPipeline,
    state: Arc<Mutex<DeviceState>>,
    pub(crate) dispatch_gate: Mutex<()>,
    timer: InvalidationTimer,
}

impl Device {
    /// Build a device from `config`, deriving the cipher from its key.
    pub fn new(name: impl Into<String>, config: &DeviceConfig) -> Result<Self> {
        let cipher = match &config.cipher {
            Some(cipher) => Some(Arc::new(AesCipher::new(&cipher.key)?) as Arc<dyn BlockCipher>),
            None => None,
        };
        Self::with_cipher(name, config, cipher)
    }

    /// Build a device with a caller-supplied cipher, ignoring any key in
    /// `config`. `None` gives a plain storage device.
    pub fn with_cipher(
        name: impl Into<String>,
        config: &DeviceConfig,
        cipher: Option<Arc<dyn BlockCipher>>,
    ) -> Result<Self> {
        let name = name.into();
        let capacity_bytes = config.capacity_bytes()?;
        let pipeline = match cipher {
            Some(cipher) => TransformPipeline::with_cipher(cipher)?,
            None => TransformPipeline::identity(),
        };
        let store = BackingStore::new(capacity_bytes)?;

        let state = Arc::new(Mutex::new(DeviceState {
            store,
            open_count: 0,
            media_changed: false,
            revalidate_eligible: false,
            stats: DeviceStats::default(),
        }));

        let weak: Weak<Mutex<DeviceState>> = Arc::downgrade(&state);
        let timer_name = name.clone();
        let timer = InvalidationTimer::spawn(&name, move || {
            if let Some(state) = weak.upgrade() {
                let mut state = state.lock();
                // An opener may have won the race against an elapsed deadline.
                if state.open_count == 0 {
                    state.revalidate_eligible = true;
                    debug!(device = %timer_name, "invalidation timer fired");
                }
            }
        })?;

        info!(
            device = %name,
            capacity_bytes,
            sector_size = config.sector_size.get(),
            dispatch = ?config.dispatch_mode,
            cipher = pipeline.cipher().map_or("none", |c| c.name()),
            "device created"
        );

        Ok(Self {
            name,
            sector_size: config.sector_size,
            capacity_bytes,
            dispatch_mode: config.dispatch_mode,
            invalidate_delay: config.invalidate_delay(),
            pipeline,
            state,
            dispatch_gate: Mutex::new(()),
            timer,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn sector_size(&self) -> SectorSize {
        self.sector_size
    }

    #[must_use]
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    /// Capacity in device sectors.
    #[must_use]
    pub fn capacity_sectors(&self) -> u64 {
        self.capacity_bytes / u64::from(self.sector_size.get())
    }

    #[must_use]
    pub fn dispatch_mode(&self) -> DispatchMode {
        self.dispatch_mode
    }

    #[must_use]
    pub fn pipeline(&self) -> &TransformPipeline {
        &self.pipeline
    }

    #[must_use]
    pub fn geometry(&self) -> Geometry {
        Geometry::from_capacity(self.capacity_bytes)
    }

    #[must_use]
    pub fn stats(&self) -> DeviceStats {
        self.state.lock().stats.clone()
    }

    // ── Transfer engine ────────────────────────────────────────────────────

    /// Move `sector_count` sectors between `buf` and the device.
    ///
    /// Every check (sector count, bounds, buffer length, cipher alignment)
    /// runs before any byte moves, so a failed transfer has no effect on
    /// the store. Writes never modify `buf`; reads overwrite
    /// `buf[..nbytes]` with plaintext.
    pub fn transfer(
        &self,
        direction: Direction,
        start: SectorNumber,
        sector_count: u32,
        buf: &mut [u8],
    ) -> Result<()> {
        let result = self.transfer_inner(direction, start, sector_count, buf);
        if let Err(err) = &result {
            warn!(
                device = %self.name,
                %direction,
                sector = start.0,
                sector_count,
                error = %err,
                "transfer failed"
            );
            self.state.lock().stats.failed += 1;
        }
        result
    }

    fn transfer_inner(
        &self,
        direction: Direction,
        start: SectorNumber,
        sector_count: u32,
        buf: &mut [u8],
    ) -> Result<()> {
        if sector_count == 0 {
            return Err(VbdError::InvalidRequest(
                "transfer of zero sectors".to_owned(),
            ));
        }
        let (offset, nbytes) = self.span(start, sector_count)?;
        if buf.len() < nbytes {
            return Err(VbdError::ShortBuffer {
                needed: nbytes,
                got: buf.len(),
            });
        }
        self.pipeline.check_aligned(nbytes)?;
        let data = &mut buf[..nbytes];

        debug!(
            device = %self.name,
            %direction,
            sector = start.0,
            sector_count,
            offset = offset.0,
            nbytes,
            "transfer"
        );

        match direction {
            Direction::Write => {
                let stored: Cow<'_, [u8]> = if self.pipeline.cipher().is_some() {
                    let mut staged = data.to_vec();
                    self.pipeline.apply(Direction::Write, offset, &mut staged)?;
                    Cow::Owned(staged)
                } else {
                    Cow::Borrowed(&*data)
                };
                let mut state = self.state.lock();
                state.store.write_span(offset, &stored)?;
                state.stats.writes += 1;
                state.stats.bytes_written += nbytes as u64;
            }
            Direction::Read => {
                // Decrypt into a staging copy so a failed read leaves `buf`
                // untouched.
                let mut staged = vec![0_u8; nbytes];
                self.state.lock().store.read_span(offset, &mut staged)?;
                self.pipeline.apply(Direction::Read, offset, &mut staged)?;
                data.copy_from_slice(&staged);

                let mut state = self.state.lock();
                state.stats.reads += 1;
                state.stats.bytes_read += nbytes as u64;
            }
        }
        Ok(())
    }

    /// Byte offset and length of a sector range, rejecting anything past
    /// the end of the device.
    fn span(&self, start: SectorNumber, sector_count: u32) -> Result<(ByteOffset, usize)> {
        let capacity = self.capacity_bytes;
        let offset = self.sector_size.sector_to_byte(start);
        let len = self.sector_size.sectors_to_bytes(u64::from(sector_count));
        let (Some(offset), Some(len)) = (offset, len) else {
            return Err(VbdError::OutOfRange {
                offset: start.0.saturating_mul(u64::from(self.sector_size.get())),
                len: u64::from(sector_count) * u64::from(self.sector_size.get()),
                capacity,
            });
        };
        match offset.checked_add(len) {
            Some(end) if end.0 <= capacity => {}
            _ => {
                return Err(VbdError::OutOfRange {
                    offset: offset.0,
                    len,
                    capacity,
                });
            }
        }
        // len <= capacity, and capacity was allocated as a usize.
        let len = usize::try_from(len).map_err(|_| VbdError::OutOfRange {
            offset: offset.0,
            len,
            capacity,
        })?;
        Ok((offset, len))
    }

    /// Copy raw stored bytes, bypassing the transform pipeline.
    ///
    /// With a cipher configured this returns ciphertext.
    pub fn read_raw(&self, offset: ByteOffset, len: usize) -> Result<Vec<u8>> {
        Ok(self.state.lock().store.span(offset, len)?.to_vec())
    }

    pub(crate) fn note_rejected(&self) {
        self.state.lock().stats.rejected += 1;
    }

    // ── Lifecycle ──────────────────────────────────────────────────────────

    /// Register an opener and return the new open count.
    ///
    /// Cancels a pending invalidation. The first opener triggers
    /// revalidation if the media changed while the device was closed.
    ///
    /// A concurrent last `close()` may re-arm the timer between the
    /// synchronous cancel and taking the state lock, so the deadline is
    /// cleared again under the lock: the timer is armed only while
    /// `open_count == 0`.
    pub fn open(&self) -> u32 {
        let mut cancelled = self.timer.cancel_sync();

        let mut state = self.state.lock();
        if state.open_count == 0 {
            state.revalidate(&self.name);
        }
        state.open_count += 1;
        cancelled |= self.timer.disarm();
        let open_count = state.open_count;
        drop(state);

        debug!(
            device = %self.name,
            open_count,
            cancelled_invalidation = cancelled,
            "open"
        );
        open_count
    }

    /// Drop an opener and return the new open count. The last close arms
    /// the invalidation timer.
    pub fn close(&self) -> Result<u32> {
        let mut state = self.state.lock();
        if state.open_count == 0 {
            return Err(VbdError::NotOpen);
        }
        state.open_count -= 1;
        let open_count = state.open_count;
        if open_count == 0 {
            self.timer.arm(self.invalidate_delay);
        }
        drop(state);

        debug!(device = %self.name, open_count, "close");
        Ok(open_count)
    }

    #[must_use]
    pub fn open_count(&self) -> u32 {
        self.state.lock().open_count
    }

    /// Whether an invalidation deadline is pending.
    #[must_use]
    pub fn invalidation_pending(&self) -> bool {
        self.timer.is_armed()
    }

    /// Whether the invalidation timer has fired since the last revalidation.
    #[must_use]
    pub fn revalidate_eligible(&self) -> bool {
        self.state.lock().revalidate_eligible
    }

    /// Host-side media-change check.
    #[must_use]
    pub fn media_changed(&self) -> bool {
        self.state.lock().media_changed
    }

    /// Simulate removal and reinsertion of the medium.
    pub fn simulate_media_change(&self) {
        self.state.lock().media_changed = true;
        debug!(device = %self.name, "media change flagged");
    }

    /// Reset the store if the media changed. Returns whether it did.
    ///
    /// This is the only path that wipes data other than an explicit write.
    pub fn revalidate(&self) -> bool {
        self.state.lock().revalidate(&self.name)
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("capacity_bytes", &self.capacity_bytes)
            .field("sector_size", &self.sector_size.get())
            .field("dispatch_mode", &self.dispatch_mode)
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}
