//! Requests, segments, completions, and the submission queue.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use vbd_error::VbdError;
use vbd_types::{Direction, SectorNumber};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Declared kind of a request. Only `Read` and `Write` reach storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Read,
    Write,
    Flush,
    /// Driver-private or packet command with no storage payload.
    Control,
}

impl RequestKind {
    /// Storage direction, or `None` for kinds the device rejects.
    #[must_use]
    pub fn direction(self) -> Option<Direction> {
        match self {
            Self::Read => Some(Direction::Read),
            Self::Write => Some(Direction::Write),
            Self::Flush | Self::Control => None,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Flush => "flush",
            Self::Control => "control",
        }
    }
}

/// Contiguous run of sectors backed by one caller buffer.
#[derive(Debug)]
pub struct Segment<'a> {
    pub sector: SectorNumber,
    pub sector_count: u32,
    pub buf: &'a mut [u8],
}

/// A host I/O request. The caller keeps ownership of every buffer; the
/// request only borrows them until it is completed.
///
/// Segments are laid out back to back from `start`, so they are always in
/// ascending sector order.
#[derive(Debug)]
pub struct Request<'a> {
    id: RequestId,
    kind: RequestKind,
    start: SectorNumber,
    segments: Vec<Segment<'a>>,
}

impl<'a> Request<'a> {
    /// Request with no segments yet; add them with [`Request::segment`].
    #[must_use]
    pub fn new(id: RequestId, kind: RequestKind, start: SectorNumber) -> Self {
        Self {
            id,
            kind,
            start,
            segments: Vec::new(),
        }
    }

    /// Single-segment read of `sector_count` sectors into `buf`.
    #[must_use]
    pub fn read(id: RequestId, start: SectorNumber, sector_count: u32, buf: &'a mut [u8]) -> Self {
        Self::new(id, RequestKind::Read, start).segment(sector_count, buf)
    }

    /// Single-segment write of `sector_count` sectors from `buf`.
    #[must_use]
    pub fn write(id: RequestId, start: SectorNumber, sector_count: u32, buf: &'a mut [u8]) -> Self {
        Self::new(id, RequestKind::Write, start).segment(sector_count, buf)
    }

    /// Payload-free request of a kind that never reaches storage.
    #[must_use]
    pub fn control(id: RequestId) -> Self {
        Self::new(id, RequestKind::Control, SectorNumber(0))
    }

    /// Append a segment starting right after the previous one.
    #[must_use]
    pub fn segment(mut self, sector_count: u32, buf: &'a mut [u8]) -> Self {
        let sector = SectorNumber(self.start.0.saturating_add(self.total_sectors()));
        self.segments.push(Segment {
            sector,
            sector_count,
            buf,
        });
        self
    }

    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    #[must_use]
    pub fn start(&self) -> SectorNumber {
        self.start
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment<'a>] {
        &self.segments
    }

    #[must_use]
    pub fn total_sectors(&self) -> u64 {
        self.segments
            .iter()
            .map(|s| u64::from(s.sector_count))
            .sum()
    }

    pub(crate) fn into_segments(self) -> Vec<Segment<'a>> {
        self.segments
    }
}

/// Outcome of one completed unit of work.
#[derive(Debug)]
pub enum CompletionStatus {
    Ok,
    /// A transfer was attempted and failed.
    Failed(VbdError),
    /// The request was refused without attempting a transfer.
    Rejected(VbdError),
}

/// Completion signal for a request (or, in direct mode, one segment of it).
#[derive(Debug)]
pub struct Completion {
    pub request: RequestId,
    /// Segment index for per-segment completions.
    pub segment: Option<usize>,
    pub status: CompletionStatus,
    /// Sectors actually transferred before completion.
    pub sectors: u64,
}

impl Completion {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self.status, CompletionStatus::Ok)
    }

    #[must_use]
    pub fn error(&self) -> Option<&VbdError> {
        match &self.status {
            CompletionStatus::Ok => None,
            CompletionStatus::Failed(err) | CompletionStatus::Rejected(err) => Some(err),
        }
    }

    /// `0` on success, otherwise the negated errno a host would report.
    #[must_use]
    pub fn status_code(&self) -> i32 {
        self.error().map_or(0, |err| -err.to_errno())
    }
}

/// FIFO submission queue shared by any number of submitters.
#[derive(Debug, Default)]
pub struct RequestQueue<'a> {
    pending: Mutex<VecDeque<Request<'a>>>,
}

impl<'a> RequestQueue<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
        }
    }

    pub fn submit(&self, request: Request<'a>) {
        self.pending.lock().push_back(request);
    }

    /// Take the oldest pending request.
    pub fn pop(&self) -> Option<Request<'a>> {
        self.pending.lock().pop_front()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_are_laid_out_back_to_back() {
        let mut a = [0_u8; 1024];
        let mut b = [0_u8; 512];
        let mut c = [0_u8; 2048];
        let req = Request::new(RequestId(1), RequestKind::Write, SectorNumber(10))
            .segment(2, &mut a)
            .segment(1, &mut b)
            .segment(4, &mut c);

        let sectors: Vec<u64> = req.segments().iter().map(|s| s.sector.0).collect();
        assert_eq!(sectors, vec![10, 12, 13]);
        assert_eq!(req.total_sectors(), 7);
    }

    #[test]
    fn only_read_and_write_have_a_direction() {
        assert_eq!(RequestKind::Read.direction(), Some(Direction::Read));
        assert_eq!(RequestKind::Write.direction(), Some(Direction::Write));
        assert_eq!(RequestKind::Flush.direction(), None);
        assert_eq!(RequestKind::Control.direction(), None);
    }

    #[test]
    fn queue_is_fifo() {
        let queue = RequestQueue::new();
        queue.submit(Request::control(RequestId(1)));
        queue.submit(Request::control(RequestId(2)));
        queue.submit(Request::control(RequestId(3)));
        assert_eq!(queue.len(), 3);

        let order: Vec<u64> = std::iter::from_fn(|| queue.pop())
            .map(|r| r.id().0)
            .collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn completion_status_code_is_negated_errno() {
        let ok = Completion {
            request: RequestId(1),
            segment: None,
            status: CompletionStatus::Ok,
            sectors: 2,
        };
        assert_eq!(ok.status_code(), 0);

        let rejected = Completion {
            request: RequestId(2),
            segment: None,
            status: CompletionStatus::Rejected(VbdError::UnsupportedRequestKind(
                "control".into(),
            )),
            sectors: 0,
        };
        assert!(!rejected.is_ok());
        assert!(rejected.status_code() < 0);
    }
}
