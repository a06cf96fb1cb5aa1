//! Fence synchronization.
//!
//! A single monotonically increasing counter orders CPU reuse of memory
//! against GPU completion. Each submission is followed by a signal of the
//! next value; a frame slot remembers the value signaled after its work and
//! is only touched again once the queue reports that value complete.
//!
//! ```text
//! frame k   : record slot 0 ─ execute ─ signal 5 ─┐
//! frame k+1 : wait(slot 1 target = 4) ─ record ... │
//! frame k+2 : wait(slot 0 target = 5) <───────────┘
//! ```

use std::time::Duration;

use kiln_rhi::{CommandRecorder, GpuQueue, RhiError};
use tracing::{error, trace};

use crate::error::RenderResult;
use crate::frame_ring::FrameRing;

/// Monotonic fence counter plus the blocking wait on it.
#[derive(Debug)]
pub struct FenceSynchronizer {
    last_signaled: u64,
    timeout: Duration,
}

impl FenceSynchronizer {
    /// Creates a synchronizer whose waits give up after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            last_signaled: 0,
            timeout,
        }
    }

    /// Highest value signaled so far. Zero before the first signal.
    pub fn last_signaled(&self) -> u64 {
        self.last_signaled
    }

    /// Advances the counter and signals the new value on `queue`.
    ///
    /// The value completes once every submission made before it finished.
    pub fn signal<Q>(&mut self, queue: &Q) -> RenderResult<u64>
    where
        Q: GpuQueue + ?Sized,
    {
        let value = self.last_signaled + 1;
        queue.signal(value)?;
        self.last_signaled = value;
        trace!("Signaled fence value {}", value);
        Ok(value)
    }

    /// Returns true if `value` already completed.
    pub fn is_complete<Q>(&self, queue: &Q, value: u64) -> RenderResult<bool>
    where
        Q: GpuQueue + ?Sized,
    {
        Ok(value == 0 || queue.completed_value()? >= value)
    }

    /// Blocks until the queue completed `value`.
    ///
    /// Returns immediately when it already has. A wait that outlasts the
    /// configured timeout is reported as
    /// [`RhiError::SynchronizationTimeout`] and must be treated as device loss.
    pub fn wait_until<Q>(&self, queue: &Q, value: u64) -> RenderResult<()>
    where
        Q: GpuQueue + ?Sized,
    {
        if self.is_complete(queue, value)? {
            return Ok(());
        }
        trace!("Waiting for fence value {}", value);
        queue.wait_for_value(value, self.timeout).map_err(|e| {
            if let RhiError::SynchronizationTimeout { value, completed } = &e {
                error!(
                    "Fence wait for {} timed out after {:?} (completed {})",
                    value, self.timeout, completed
                );
            }
            e.into()
        })
    }

    /// Ends the active slot's use and makes `next_slot` safe to record into.
    ///
    /// Signals, stores the value as the target of the slot just submitted,
    /// activates `next_slot` and waits for that slot's previous target.
    pub fn flush<L, Q>(
        &mut self,
        queue: &Q,
        ring: &mut FrameRing<L>,
        next_slot: usize,
    ) -> RenderResult<u64>
    where
        L: CommandRecorder,
        Q: GpuQueue + ?Sized,
    {
        let value = self.signal(queue)?;
        ring.active_mut().set_fence_target(value);
        ring.set_active(next_slot)?;
        self.wait_until(queue, ring.active().fence_target())?;
        Ok(value)
    }

    /// Signals and waits for that value: every submitted list has finished.
    pub fn drain<Q>(&mut self, queue: &Q) -> RenderResult<u64>
    where
        Q: GpuQueue + ?Sized,
    {
        let value = self.signal(queue)?;
        self.wait_until(queue, value)?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use kiln_rhi::RenderDevice;
    use kiln_rhi::headless::{Completion, HeadlessDevice, RenderCall};

    use super::*;
    use crate::error::RenderError;

    const TIMEOUT: Duration = Duration::from_millis(10);

    #[test]
    fn test_values_are_monotonic() {
        let device = HeadlessDevice::new();
        let queue = device.create_queue().unwrap();
        let mut fence = FenceSynchronizer::new(TIMEOUT);

        assert_eq!(fence.signal(&queue).unwrap(), 1);
        assert_eq!(fence.signal(&queue).unwrap(), 2);
        assert_eq!(fence.last_signaled(), 2);
        assert_eq!(device.last_signaled(), 2);
    }

    #[test]
    fn test_wait_on_completed_value_is_noop() {
        let device = HeadlessDevice::new();
        let queue = device.create_queue().unwrap();
        let mut fence = FenceSynchronizer::new(TIMEOUT);

        let value = fence.signal(&queue).unwrap();
        fence.wait_until(&queue, value).unwrap();
        fence.wait_until(&queue, 0).unwrap();
        assert_eq!(device.count_calls(|c| matches!(c, RenderCall::Wait { .. })), 0);
    }

    #[test]
    fn test_wait_blocks_on_pending_value() {
        let device = HeadlessDevice::with_completion(Completion::Deferred);
        let queue = device.create_queue().unwrap();
        let mut fence = FenceSynchronizer::new(TIMEOUT);

        let value = fence.signal(&queue).unwrap();
        assert!(!fence.is_complete(&queue, value).unwrap());
        fence.wait_until(&queue, value).unwrap();
        assert!(fence.is_complete(&queue, value).unwrap());
        assert_eq!(device.count_calls(|c| *c == RenderCall::Wait { value }), 1);
    }

    #[test]
    fn test_timeout_is_fatal() {
        let device = HeadlessDevice::with_completion(Completion::Stalled);
        let queue = device.create_queue().unwrap();
        let mut fence = FenceSynchronizer::new(TIMEOUT);

        let err = fence.drain(&queue).unwrap_err();
        assert!(matches!(
            err,
            RenderError::Rhi(RhiError::SynchronizationTimeout { value: 1, .. })
        ));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_flush_records_target_and_waits_for_next_slot() {
        let device = HeadlessDevice::with_completion(Completion::Deferred);
        let queue = device.create_queue().unwrap();
        let mut ring = FrameRing::new(&device, 2).unwrap();
        let mut fence = FenceSynchronizer::new(TIMEOUT);

        // Frame on slot 0, then slot 1: nothing to wait for yet.
        let first = fence.flush(&queue, &mut ring, 1).unwrap();
        assert_eq!(ring.slot(0).unwrap().fence_target(), first);
        assert_eq!(ring.active_index(), 1);
        assert_eq!(device.count_calls(|c| matches!(c, RenderCall::Wait { .. })), 0);

        // Back to slot 0: its target must be waited on.
        let second = fence.flush(&queue, &mut ring, 0).unwrap();
        assert_eq!(ring.slot(1).unwrap().fence_target(), second);
        assert_eq!(
            device.count_calls(|c| *c == RenderCall::Wait { value: first }),
            1
        );
        assert!(fence.is_complete(&queue, first).unwrap());
    }

    #[test]
    fn test_flush_rejects_unknown_slot() {
        let device = HeadlessDevice::new();
        let queue = device.create_queue().unwrap();
        let mut ring = FrameRing::new(&device, 2).unwrap();
        let mut fence = FenceSynchronizer::new(TIMEOUT);

        assert!(matches!(
            fence.flush(&queue, &mut ring, 7),
            Err(RenderError::UnknownHandle(_))
        ));
    }
}
