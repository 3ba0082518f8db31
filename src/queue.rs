//! Register queue.
//!
//! Register writes are buffered as `(address, value)` pairs and submitted to
//! the device in one request per flush. A flush of a completely full queue
//! sends the whole shadow hardware state instead of the pairs, unless a
//! buffered write targets a register the snapshot does not carry.

use crate::backend::{SubmitKind, SubmitRequest};
use crate::device::DeviceHandle;
use crate::error::{DriverError, Result};

/// Words per buffered pair.
const PAIR_WORDS: usize = 2;

/// Outcome of a flush that submitted something.
#[derive(Debug)]
pub struct FlushReport {
    pub kind: SubmitKind,
    /// Payload length in bytes.
    pub bytes: usize,
    /// Pairs that were buffered when the flush started.
    pub pairs: usize,
    /// Submission failure, if any. The queue is reset either way.
    pub error: Option<DriverError>,
}

impl FlushReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Combine the reports of consecutive flushes, keeping the first failure.
    pub fn merge(earlier: Option<Self>, later: Option<Self>) -> Option<Self> {
        match (earlier, later) {
            (Some(earlier), _) if !earlier.is_ok() => Some(earlier),
            (_, Some(later)) if !later.is_ok() => Some(later),
            (earlier, later) => earlier.or(later),
        }
    }
}

/// Submission counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub incremental_submissions: u64,
    pub full_state_submissions: u64,
    pub failed_submissions: u64,
    pub pairs_submitted: u64,
}

/// Fixed-capacity batch of register writes.
#[derive(Debug)]
pub struct CommandQueue {
    /// `capacity` pairs plus a terminator slot.
    words: Vec<u32>,
    len: usize,
    capacity: usize,
    cursor: usize,
    /// A buffered write is missing from the state snapshot.
    unshadowed: bool,
    stats: QueueStats,
}

impl CommandQueue {
    /// Allocate a queue for `capacity` pairs. Fails with `OutOfMemory`
    /// instead of aborting when the storage cannot be reserved.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(DriverError::InvalidParameter(
                "queue capacity must be at least one pair".to_string(),
            ));
        }
        let word_count = capacity
            .checked_add(1)
            .and_then(|slots| slots.checked_mul(PAIR_WORDS))
            .ok_or(DriverError::OutOfMemory)?;

        let mut words = Vec::new();
        words.try_reserve_exact(word_count).map_err(|e| {
            log::error!("Couldn't allocate register queue of {} pairs: {}", capacity, e);
            DriverError::OutOfMemory
        })?;
        words.resize(word_count, 0);

        Ok(Self {
            words,
            len: 0,
            capacity,
            cursor: 0,
            unshadowed: false,
            stats: QueueStats::default(),
        })
    }

    /// Number of buffered pairs.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    /// Buffered words, two per pair, oldest first.
    pub fn pending(&self) -> &[u32] {
        &self.words[..self.cursor]
    }

    /// Buffer one register write. A full queue is left untouched and reported
    /// as `QueueFull`; the caller flushes and retries.
    pub fn append(&mut self, address: u32, value: u32) -> Result<()> {
        if self.is_full() {
            return Err(DriverError::QueueFull(self.capacity));
        }
        self.words[self.cursor] = address;
        self.words[self.cursor + 1] = value;
        self.cursor += PAIR_WORDS;
        self.len += 1;
        // Terminator
        self.words[self.cursor] = 0;
        Ok(())
    }

    /// Record that a buffered write is not part of the state snapshot. The
    /// next flush then sends the pairs even when the queue is full.
    pub fn mark_unshadowed(&mut self) {
        if !self.is_empty() {
            self.unshadowed = true;
        }
    }

    /// Whether the next flush must send the pairs themselves.
    pub fn has_unshadowed(&self) -> bool {
        self.unshadowed
    }

    /// Submit the buffered writes and reset the queue.
    ///
    /// `snapshot` is the complete hardware state, sent instead of the pairs
    /// when the queue is full and every buffered write is shadowed. Returns `None` when nothing was buffered.
    /// Submission errors are logged and returned in the report; the queue is
    /// reset regardless and nothing is retried.
    pub fn flush(&mut self, device: &DeviceHandle, snapshot: &[u8]) -> Option<FlushReport> {
        if self.is_empty() {
            return None;
        }

        let pairs = self.len;
        let request = if self.is_full() && !self.unshadowed {
            SubmitRequest::StateInit(snapshot)
        } else {
            SubmitRequest::StateBuffer(&self.words[..pairs * PAIR_WORDS])
        };
        let kind = request.kind();
        let bytes = request.byte_len();
        let result = device.submit(&request);

        match kind {
            SubmitKind::StateInit => self.stats.full_state_submissions += 1,
            SubmitKind::StateBuffer => self.stats.incremental_submissions += 1,
        }
        let error = match result {
            Ok(()) => {
                self.stats.pairs_submitted += pairs as u64;
                None
            }
            Err(e) => {
                log::error!("Register queue flush ({:?}, {} bytes) failed: {}", kind, bytes, e);
                self.stats.failed_submissions += 1;
                Some(e)
            }
        };

        self.reset();
        Some(FlushReport {
            kind,
            bytes,
            pairs,
            error,
        })
    }

    /// Drop everything buffered without submitting.
    pub fn reset(&mut self) {
        self.len = 0;
        self.cursor = 0;
        self.unshadowed = false;
        self.words[0] = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, DummyFault};
    use std::sync::Arc;

    fn device() -> (Arc<DummyBackend>, DeviceHandle) {
        let backend = Arc::new(DummyBackend::new());
        let device = DeviceHandle::with_backend(backend.clone());
        (backend, device)
    }

    #[test]
    fn test_storage_has_terminator_slot() {
        let queue = CommandQueue::new(4).unwrap();
        assert_eq!(queue.words.len(), 10);
        assert_eq!(queue.capacity(), 4);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_append_until_full() {
        let mut queue = CommandQueue::new(2).unwrap();
        queue.append(0x10, 1).unwrap();
        queue.append(0x14, 2).unwrap();
        assert!(queue.is_full());
        assert!(matches!(queue.append(0x18, 3), Err(DriverError::QueueFull(2))));
        assert_eq!(queue.pending(), &[0x10, 1, 0x14, 2]);
    }

    #[test]
    fn test_empty_flush_submits_nothing() {
        let (backend, device) = device();
        let mut queue = CommandQueue::new(8).unwrap();
        assert!(queue.flush(&device, &[0u8; 16]).is_none());
        assert_eq!(backend.submission_count(), 0);
        assert_eq!(queue.stats(), QueueStats::default());
    }

    #[test]
    fn test_partial_flush_sends_pairs() {
        let (backend, device) = device();
        let mut queue = CommandQueue::new(8).unwrap();
        queue.append(0x10, 1).unwrap();
        queue.append(0x14, 2).unwrap();

        let report = queue.flush(&device, &[0u8; 16]).unwrap();
        assert!(report.is_ok());
        assert_eq!(report.kind, SubmitKind::StateBuffer);
        assert_eq!(report.bytes, 16);

        let journal = backend.submissions();
        assert_eq!(journal[0].words(), vec![0x10, 1, 0x14, 2]);
        assert!(queue.is_empty());
        assert!(queue.pending().is_empty());
        assert_eq!(queue.words[0], 0);
    }

    #[test]
    fn test_full_flush_sends_snapshot() {
        let (backend, device) = device();
        let mut queue = CommandQueue::new(2).unwrap();
        queue.append(0x10, 1).unwrap();
        queue.append(0x14, 2).unwrap();

        let snapshot = [0xabu8; 24];
        let report = queue.flush(&device, &snapshot).unwrap();
        assert_eq!(report.kind, SubmitKind::StateInit);
        assert_eq!(report.bytes, 24);
        assert_eq!(backend.submissions()[0].data, snapshot.to_vec());
        assert_eq!(queue.stats().full_state_submissions, 1);
    }

    #[test]
    fn test_full_queue_with_unshadowed_write_sends_pairs() {
        let (backend, device) = device();
        let mut queue = CommandQueue::new(2).unwrap();
        queue.append(0x4_0000, 1).unwrap();
        queue.mark_unshadowed();
        queue.append(0x4_0004, 2).unwrap();

        let report = queue.flush(&device, &[0xabu8; 24]).unwrap();
        assert_eq!(report.kind, SubmitKind::StateBuffer);
        assert_eq!(backend.submissions()[0].words(), vec![0x4_0000, 1, 0x4_0004, 2]);
        assert!(!queue.has_unshadowed());
    }

    #[test]
    fn test_merge_keeps_first_failure() {
        let report = |error: Option<DriverError>| FlushReport {
            kind: SubmitKind::StateBuffer,
            bytes: 8,
            pairs: 1,
            error,
        };
        let failed = || Some(report(Some(DriverError::SubmissionFailed("rejected".into()))));

        assert!(FlushReport::merge(None, None).is_none());
        assert!(FlushReport::merge(Some(report(None)), None).unwrap().is_ok());
        assert!(!FlushReport::merge(Some(report(None)), failed()).unwrap().is_ok());
        assert!(!FlushReport::merge(failed(), Some(report(None))).unwrap().is_ok());
    }

    #[test]
    fn test_failed_flush_still_resets() {
        let (backend, device) = device();
        backend.inject_fault(DummyFault::Submit, 1);
        let mut queue = CommandQueue::new(8).unwrap();
        queue.append(0x10, 1).unwrap();

        let report = queue.flush(&device, &[]).unwrap();
        assert!(matches!(report.error, Some(DriverError::SubmissionFailed(_))));
        assert!(queue.is_empty());
        assert_eq!(queue.stats().failed_submissions, 1);
        assert_eq!(queue.stats().pairs_submitted, 0);

        // Nothing is resubmitted
        assert!(queue.flush(&device, &[]).is_none());
        assert_eq!(backend.submission_count(), 1);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            CommandQueue::new(0),
            Err(DriverError::InvalidParameter(_))
        ));
    }
}
