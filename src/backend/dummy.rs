//! Dummy device backend for testing and development.
//!
//! This backend doesn't talk to hardware. It keeps an in-process model of the
//! kernel objects (GEM objects, channel handles, shareable handles), records
//! every submission in a journal and can be told to fail specific operations,
//! so the driver's ownership rules can be checked without a device.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::error::{DriverError, Result};

use super::{
    DeviceBackend, MappedRegion, ObjectHandle, PipelineStages, SharedHandle, SubmitKind,
    SubmitRequest,
};

/// A recorded submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRecord {
    pub kind: SubmitKind,
    pub data: Vec<u8>,
    /// Whether the device accepted it.
    pub accepted: bool,
}

impl SubmitRecord {
    /// Payload length in bytes.
    pub fn length(&self) -> usize {
        self.data.len()
    }

    /// Payload as register words.
    pub fn words(&self) -> Vec<u32> {
        self.data
            .chunks_exact(4)
            .map(|w| u32::from_ne_bytes([w[0], w[1], w[2], w[3]]))
            .collect()
    }
}

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DummyFault {
    Submit,
    Create,
    Export,
    Import,
    Map,
    Status,
}

#[derive(Debug, Default)]
struct DummyState {
    journal: Vec<SubmitRecord>,
    /// Object id -> size. Objects live while a handle or shared handle refers to them.
    objects: HashMap<u32, u64>,
    handles: HashMap<u32, u32>,
    shared: HashMap<i32, u32>,
    next_object: u32,
    next_handle: u32,
    next_shared: i32,
    faults: HashMap<DummyFault, u32>,
    busy_polls: VecDeque<PipelineStages>,
    status_polls: usize,
    stalled: bool,
    destroyed_handles: Vec<u32>,
}

impl DummyState {
    fn take_fault(&mut self, fault: DummyFault) -> bool {
        match self.faults.get_mut(&fault) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn collect_object(&mut self, object: u32) {
        let referenced = self.handles.values().any(|&o| o == object)
            || self.shared.values().any(|&o| o == object);
        if !referenced {
            self.objects.remove(&object);
        }
    }
}

/// Dummy device backend.
#[derive(Debug, Default)]
pub struct DummyBackend {
    state: Mutex<DummyState>,
}

impl DummyBackend {
    /// Create a new dummy backend.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DummyState {
                next_object: 1,
                next_handle: 1,
                next_shared: 100,
                ..Default::default()
            }),
        }
    }

    /// Make the next `count` calls of `fault` fail.
    pub fn inject_fault(&self, fault: DummyFault, count: u32) {
        self.state.lock().faults.insert(fault, count);
    }

    /// Report the given busy stages on the next status polls, in order. Once
    /// the sequence is exhausted the pipeline reports idle.
    pub fn queue_busy_status(&self, polls: impl IntoIterator<Item = PipelineStages>) {
        self.state.lock().busy_polls.extend(polls);
    }

    /// Keep the pipeline busy for every future poll.
    pub fn stall(&self) {
        self.state.lock().stalled = true;
    }

    /// All recorded submissions, oldest first.
    pub fn submissions(&self) -> Vec<SubmitRecord> {
        self.state.lock().journal.clone()
    }

    /// Number of recorded submissions.
    pub fn submission_count(&self) -> usize {
        self.state.lock().journal.len()
    }

    /// Number of status polls served.
    pub fn status_polls(&self) -> usize {
        self.state.lock().status_polls
    }

    /// Number of GPU memory objects still alive.
    pub fn live_objects(&self) -> usize {
        self.state.lock().objects.len()
    }

    /// Number of channel-local handles still open.
    pub fn live_handles(&self) -> usize {
        self.state.lock().handles.len()
    }

    /// Number of shareable handles exported and not yet released.
    pub fn live_shared_handles(&self) -> usize {
        self.state.lock().shared.len()
    }

    /// Handles destroyed so far, in order.
    pub fn destroyed_handles(&self) -> Vec<ObjectHandle> {
        self.state
            .lock()
            .destroyed_handles
            .iter()
            .map(|&h| ObjectHandle(h))
            .collect()
    }

    /// Size of the object behind a live shareable handle.
    pub fn shared_object_size(&self, shared: SharedHandle) -> Option<u64> {
        let state = self.state.lock();
        let object = state.shared.get(&shared.0)?;
        state.objects.get(object).copied()
    }

    /// Register an externally allocated object and return its shareable
    /// handle, as another process or the display server would hand it over.
    pub fn adopt_external(&self, size: u64) -> SharedHandle {
        let mut state = self.state.lock();
        let object = state.next_object;
        state.next_object += 1;
        state.objects.insert(object, size);
        let fd = state.next_shared;
        state.next_shared += 1;
        state.shared.insert(fd, object);
        SharedHandle(fd)
    }
}

impl DeviceBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy"
    }

    fn submit(&self, request: &SubmitRequest<'_>) -> Result<()> {
        let mut state = self.state.lock();
        let accepted = !state.take_fault(DummyFault::Submit);
        log::trace!(
            "DummyBackend: {:?} submission, {} bytes{}",
            request.kind(),
            request.byte_len(),
            if accepted { "" } else { " (rejected)" }
        );
        state.journal.push(SubmitRecord {
            kind: request.kind(),
            data: request.bytes().to_vec(),
            accepted,
        });

        if accepted {
            Ok(())
        } else {
            Err(DriverError::SubmissionFailed(format!(
                "{:?} request rejected",
                request.kind()
            )))
        }
    }

    fn pipeline_status(&self) -> Result<PipelineStages> {
        let mut state = self.state.lock();
        if state.take_fault(DummyFault::Status) {
            return Err(DriverError::Io(std::io::Error::other("status query failed")));
        }
        state.status_polls += 1;
        if state.stalled {
            return Ok(PipelineStages::ALL);
        }
        Ok(state.busy_polls.pop_front().unwrap_or(PipelineStages::empty()))
    }

    fn create_object(&self, size: u64) -> Result<ObjectHandle> {
        let mut state = self.state.lock();
        if size == 0 || state.take_fault(DummyFault::Create) {
            return Err(DriverError::AllocationFailed(format!(
                "GEM create ({size} bytes) refused"
            )));
        }
        let object = state.next_object;
        state.next_object += 1;
        state.objects.insert(object, size);

        let handle = state.next_handle;
        state.next_handle += 1;
        state.handles.insert(handle, object);

        log::trace!("DummyBackend: created gem:{} ({} bytes)", handle, size);
        Ok(ObjectHandle(handle))
    }

    fn export_object(&self, handle: ObjectHandle) -> Result<SharedHandle> {
        let mut state = self.state.lock();
        if state.take_fault(DummyFault::Export) {
            return Err(DriverError::AllocationFailed(format!(
                "PRIME export of {handle} refused"
            )));
        }
        let object = *state.handles.get(&handle.0).ok_or_else(|| {
            DriverError::InvalidParameter(format!("export of unknown {handle}"))
        })?;
        let fd = state.next_shared;
        state.next_shared += 1;
        state.shared.insert(fd, object);
        Ok(SharedHandle(fd))
    }

    fn import_object(&self, shared: SharedHandle) -> Result<ObjectHandle> {
        let mut state = self.state.lock();
        if state.take_fault(DummyFault::Import) {
            return Err(DriverError::AllocationFailed(format!(
                "PRIME import of {shared} refused"
            )));
        }
        let object = *state.shared.get(&shared.0).ok_or_else(|| {
            DriverError::AllocationFailed(format!("import of unknown {shared}"))
        })?;
        let handle = state.next_handle;
        state.next_handle += 1;
        state.handles.insert(handle, object);
        Ok(ObjectHandle(handle))
    }

    fn map_object(&self, handle: ObjectHandle, offset: u64, size: u64) -> Result<MappedRegion> {
        let mut state = self.state.lock();
        if state.take_fault(DummyFault::Map) {
            return Err(DriverError::AllocationFailed(format!("mmap of {handle} refused")));
        }
        let object = *state.handles.get(&handle.0).ok_or_else(|| {
            DriverError::InvalidParameter(format!("map of unknown {handle}"))
        })?;
        let object_size = state.objects.get(&object).copied().unwrap_or(0);
        if size == 0 || offset.checked_add(size).map_or(true, |end| end > object_size) {
            return Err(DriverError::InvalidParameter(format!(
                "mapping {offset}+{size} exceeds object of {object_size} bytes"
            )));
        }
        let len = usize::try_from(size)
            .map_err(|_| DriverError::AllocationFailed(format!("mmap of {handle}: {size} bytes")))?;
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|e| DriverError::AllocationFailed(format!("mmap of {handle}: {e}")))?;
        bytes.resize(len, 0);
        Ok(MappedRegion::Host(bytes.into_boxed_slice()))
    }

    fn destroy_object(&self, handle: ObjectHandle) {
        let mut state = self.state.lock();
        match state.handles.remove(&handle.0) {
            Some(object) => {
                state.destroyed_handles.push(handle.0);
                state.collect_object(object);
            }
            None => log::error!("DummyBackend: destroy of unknown {}", handle),
        }
    }

    fn release_shared(&self, shared: SharedHandle) {
        let mut state = self.state.lock();
        match state.shared.remove(&shared.0) {
            Some(object) => state.collect_object(object),
            None => log::warn!("DummyBackend: {} was not exported here, ignoring release", shared),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_lifetime_follows_references() {
        let backend = DummyBackend::new();
        let handle = backend.create_object(4096).unwrap();
        let shared = backend.export_object(handle).unwrap();
        backend.destroy_object(handle);
        // Still referenced by the shareable handle
        assert_eq!(backend.live_objects(), 1);

        let imported = backend.import_object(shared).unwrap();
        backend.release_shared(shared);
        assert_eq!(backend.live_objects(), 1);

        backend.destroy_object(imported);
        assert_eq!(backend.live_objects(), 0);
        assert_eq!(backend.live_handles(), 0);
        assert_eq!(backend.live_shared_handles(), 0);
    }

    #[test]
    fn test_fault_injection_is_counted() {
        let backend = DummyBackend::new();
        backend.inject_fault(DummyFault::Create, 1);
        assert!(backend.create_object(16).is_err());
        assert!(backend.create_object(16).is_ok());
    }

    #[test]
    fn test_journal_records_rejected_submissions() {
        let backend = DummyBackend::new();
        backend.inject_fault(DummyFault::Submit, 1);
        let words = [1u32, 2];
        assert!(backend.submit(&SubmitRequest::StateBuffer(&words)).is_err());
        assert!(backend.submit(&SubmitRequest::StateBuffer(&words)).is_ok());

        let journal = backend.submissions();
        assert_eq!(journal.len(), 2);
        assert!(!journal[0].accepted);
        assert!(journal[1].accepted);
        assert_eq!(journal[1].words(), vec![1, 2]);
    }

    #[test]
    fn test_busy_status_sequence() {
        let backend = DummyBackend::new();
        backend.queue_busy_status([PipelineStages::PIXEL_SHADER, PipelineStages::COLOR_CACHE]);
        assert_eq!(backend.pipeline_status().unwrap(), PipelineStages::PIXEL_SHADER);
        assert_eq!(backend.pipeline_status().unwrap(), PipelineStages::COLOR_CACHE);
        assert!(backend.pipeline_status().unwrap().is_empty());
        assert_eq!(backend.status_polls(), 3);
    }

    #[test]
    fn test_oversized_map_fails_without_abort() {
        let backend = DummyBackend::new();
        let handle = backend.create_object(u64::MAX).unwrap();
        assert!(matches!(
            backend.map_object(handle, 0, u64::MAX),
            Err(DriverError::AllocationFailed(_))
        ));
    }

    #[test]
    fn test_map_bounds() {
        let backend = DummyBackend::new();
        let handle = backend.create_object(64).unwrap();
        assert_eq!(backend.map_object(handle, 0, 64).unwrap().len(), 64);
        assert!(backend.map_object(handle, 32, 64).is_err());
    }
}
