//! Request dispatch.
//!
//! All three strategies share one contract: take requests in arrival order,
//! refuse anything that is not a storage operation, push each segment
//! through [`Device::transfer`], and produce completions. They differ only
//! in how a request is split into units of work and how those units are
//! acknowledged:
//!
//! - [`WholeRequest`]: the request is exactly one segment, one completion.
//! - [`MultiSegment`]: segments in ascending order, one completion for the
//!   request; the first failing segment ends it and the rest are abandoned.
//! - [`Direct`]: every segment is an independent unit and is acknowledged
//!   as soon as it is transferred.
//!
//! The per-device dispatch gate is held for one whole request, so at most
//! one request is in flight per device and concurrent submitters queue.
//! The device state lock is only held per transfer.

use crate::config::DispatchMode;
use crate::device::Device;
use crate::request::{Completion, CompletionStatus, Request, RequestId, RequestQueue, Segment};
use tracing::{debug, warn};
use vbd_error::{Result, VbdError};
use vbd_types::Direction;

/// Decomposition and completion policy for storage requests.
///
/// Implementations only see requests whose kind has a storage direction.
pub trait DispatchStrategy: Send + Sync {
    fn service(
        &self,
        device: &Device,
        id: RequestId,
        direction: Direction,
        segments: Vec<Segment<'_>>,
    ) -> Vec<Completion>;

    /// Strategy name for diagnostics.
    fn name(&self) -> &'static str;
}

/// One segment per request.
#[derive(Debug, Clone, Copy, Default)]
pub struct WholeRequest;

/// Ordered multi-segment requests with all-or-abandon completion.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiSegment;

/// Segment-at-a-time completion without request grouping.
#[derive(Debug, Clone, Copy, Default)]
pub struct Direct;

impl DispatchMode {
    #[must_use]
    pub fn strategy(self) -> &'static dyn DispatchStrategy {
        match self {
            Self::WholeRequest => &WholeRequest,
            Self::MultiSegment => &MultiSegment,
            Self::Direct => &Direct,
        }
    }
}

fn completion(
    id: RequestId,
    segment: Option<usize>,
    status: CompletionStatus,
    sectors: u64,
) -> Completion {
    Completion {
        request: id,
        segment,
        status,
        sectors,
    }
}

/// Refuse a malformed request before any transfer is attempted.
fn refuse(device: &Device, id: RequestId, err: VbdError) -> Completion {
    warn!(device = device.name(), request = %id, error = %err, "refusing request");
    device.note_rejected();
    completion(id, None, CompletionStatus::Rejected(err), 0)
}

fn transfer_segment(device: &Device, direction: Direction, segment: Segment<'_>) -> Result<u64> {
    device.transfer(direction, segment.sector, segment.sector_count, segment.buf)?;
    Ok(u64::from(segment.sector_count))
}

impl DispatchStrategy for WholeRequest {
    fn service(
        &self,
        device: &Device,
        id: RequestId,
        direction: Direction,
        segments: Vec<Segment<'_>>,
    ) -> Vec<Completion> {
        let segment = match <[Segment<'_>; 1]>::try_from(segments) {
            Ok([segment]) => segment,
            Err(segments) => {
                let err = VbdError::InvalidRequest(format!(
                    "whole-request dispatch needs exactly one segment, got {}",
                    segments.len()
                ));
                return vec![refuse(device, id, err)];
            }
        };
        match transfer_segment(device, direction, segment) {
            Ok(sectors) => vec![completion(id, None, CompletionStatus::Ok, sectors)],
            Err(err) => vec![completion(id, None, CompletionStatus::Failed(err), 0)],
        }
    }

    fn name(&self) -> &'static str {
        "whole-request"
    }
}

impl DispatchStrategy for MultiSegment {
    fn service(
        &self,
        device: &Device,
        id: RequestId,
        direction: Direction,
        segments: Vec<Segment<'_>>,
    ) -> Vec<Completion> {
        if segments.is_empty() {
            let err = VbdError::InvalidRequest("request has no segments".to_owned());
            return vec![refuse(device, id, err)];
        }

        let total = segments.len();
        let mut transferred = 0_u64;
        for (index, segment) in segments.into_iter().enumerate() {
            match transfer_segment(device, direction, segment) {
                Ok(sectors) => transferred += sectors,
                Err(err) => {
                    warn!(
                        device = device.name(),
                        request = %id,
                        segment = index,
                        abandoned = total - index - 1,
                        error = %err,
                        "segment failed, ending request"
                    );
                    return vec![completion(
                        id,
                        None,
                        CompletionStatus::Failed(err),
                        transferred,
                    )];
                }
            }
        }
        vec![completion(id, None, CompletionStatus::Ok, transferred)]
    }

    fn name(&self) -> &'static str {
        "multi-segment"
    }
}

impl DispatchStrategy for Direct {
    fn service(
        &self,
        device: &Device,
        id: RequestId,
        direction: Direction,
        segments: Vec<Segment<'_>>,
    ) -> Vec<Completion> {
        if segments.is_empty() {
            let err = VbdError::InvalidRequest("request has no segments".to_owned());
            return vec![refuse(device, id, err)];
        }
        segments
            .into_iter()
            .enumerate()
            .map(
                |(index, segment)| match transfer_segment(device, direction, segment) {
                    Ok(sectors) => completion(id, Some(index), CompletionStatus::Ok, sectors),
                    Err(err) => completion(id, Some(index), CompletionStatus::Failed(err), 0),
                },
            )
            .collect()
    }

    fn name(&self) -> &'static str {
        "direct"
    }
}

impl Device {
    /// Service one request immediately, without a queue, using the
    /// device's configured strategy.
    pub fn submit(&self, request: Request<'_>) -> Vec<Completion> {
        let _gate = self.dispatch_gate.lock();
        self.service(request, self.dispatch_mode().strategy())
    }

    /// Queue-less entry point: every segment is transferred and acknowledged
    /// on its own, whatever the configured dispatch mode.
    pub fn make_request(&self, request: Request<'_>) -> Vec<Completion> {
        let _gate = self.dispatch_gate.lock();
        self.service(request, &Direct)
    }

    /// Drain `queue` in FIFO order, returning completions in the order they
    /// were signalled.
    ///
    /// Requests submitted to the queue while it is being drained are
    /// serviced by the same call.
    pub fn dispatch(&self, queue: &RequestQueue<'_>) -> Vec<Completion> {
        let mut completions = Vec::new();
        loop {
            let _gate = self.dispatch_gate.lock();
            let Some(request) = queue.pop() else {
                break;
            };
            completions.extend(self.service(request, self.dispatch_mode().strategy()));
        }
        completions
    }

    fn service(&self, request: Request<'_>, strategy: &dyn DispatchStrategy) -> Vec<Completion> {
        let id = request.id();
        let kind = request.kind();
        let Some(direction) = kind.direction() else {
            warn!(device = self.name(), request = %id, kind = kind.name(), "skipping non-storage request");
            self.note_rejected();
            let err = VbdError::UnsupportedRequestKind(kind.name().to_owned());
            return vec![completion(id, None, CompletionStatus::Rejected(err), 0)];
        };

        debug!(
            device = self.name(),
            request = %id,
            %direction,
            start = request.start().0,
            sectors = request.total_sectors(),
            segments = request.segments().len(),
            strategy = strategy.name(),
            "dispatch request"
        );
        strategy.service(self, id, direction, request.into_segments())
    }
}
