#![forbid(unsafe_code)]
//! vbd public API facade.
//!
//! Re-exports the device, dispatch, and configuration API from `vbd-block`.
//! Hosts depend on this crate rather than on the individual layers.

pub use vbd_block::*;
