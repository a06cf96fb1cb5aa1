//! Frame slots in flight.
//!
//! The ring holds one slot per presentation buffer plus a reserved upload
//! slot for work outside the frame loop (texture initialization). A slot owns
//! its command list, the fence value signaled after its last submission, and
//! its own vertex and index buffers, so nothing it owns is shared with a
//! frame the GPU may still be executing.

use kiln_rhi::{CommandRecorder, GpuQueue, RenderDevice};
use tracing::debug;

use crate::error::{RenderError, RenderResult};
use crate::fence::FenceSynchronizer;
use crate::resource::ResourceHandle;

/// Grow-only upload buffer owned by one slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GeometryBuffer {
    pub resource: ResourceHandle,
    pub capacity: u64,
}

/// Per-slot recording resources.
pub struct FrameSlot<L> {
    index: usize,
    command_list: L,
    fence_target: u64,
    pub(crate) vertex_buffer: Option<GeometryBuffer>,
    pub(crate) index_buffer: Option<GeometryBuffer>,
}

impl<L: CommandRecorder> FrameSlot<L> {
    fn new(index: usize, command_list: L) -> Self {
        Self {
            index,
            command_list,
            fence_target: 0,
            vertex_buffer: None,
            index_buffer: None,
        }
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Fence value that completes once the slot's last submission finished.
    #[inline]
    pub fn fence_target(&self) -> u64 {
        self.fence_target
    }

    pub(crate) fn set_fence_target(&mut self, value: u64) {
        debug_assert!(value >= self.fence_target, "fence targets never move back");
        self.fence_target = value;
    }

    #[inline]
    pub fn command_list(&self) -> &L {
        &self.command_list
    }

    #[inline]
    pub fn command_list_mut(&mut self) -> &mut L {
        &mut self.command_list
    }
}

/// Round-robin frame slots plus the upload slot.
pub struct FrameRing<L> {
    slots: Vec<FrameSlot<L>>,
    upload: FrameSlot<L>,
    active: usize,
}

impl<L: CommandRecorder> FrameRing<L> {
    /// Creates `count` frame slots and the upload slot.
    pub fn new<D>(device: &D, count: usize) -> RenderResult<Self>
    where
        D: RenderDevice<CommandList = L> + ?Sized,
    {
        let slots = (0..count)
            .map(|index| Ok(FrameSlot::new(index, device.create_command_list()?)))
            .collect::<RenderResult<Vec<_>>>()?;
        let upload = FrameSlot::new(count, device.create_command_list()?);
        debug!("Frame ring created with {} slot(s) + upload slot", count);

        Ok(Self {
            slots,
            upload,
            active: 0,
        })
    }

    /// Number of frame slots, excluding the upload slot.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn active(&self) -> &FrameSlot<L> {
        &self.slots[self.active]
    }

    pub fn active_mut(&mut self) -> &mut FrameSlot<L> {
        &mut self.slots[self.active]
    }

    pub fn slot(&self, index: usize) -> Option<&FrameSlot<L>> {
        self.slots.get(index)
    }

    pub fn upload(&self) -> &FrameSlot<L> {
        &self.upload
    }

    pub fn upload_mut(&mut self) -> &mut FrameSlot<L> {
        &mut self.upload
    }

    pub(crate) fn set_active(&mut self, index: usize) -> RenderResult<()> {
        if index >= self.slots.len() {
            return Err(RenderError::UnknownHandle(format!(
                "frame slot {index} of {}",
                self.slots.len()
            )));
        }
        self.active = index;
        Ok(())
    }

    /// Waits for the active slot's previous use, then reopens its list.
    pub fn begin_recording<Q>(&mut self, fence: &FenceSynchronizer, queue: &Q) -> RenderResult<()>
    where
        Q: GpuQueue + ?Sized,
    {
        let slot = &mut self.slots[self.active];
        fence.wait_until(queue, slot.fence_target)?;
        slot.command_list.reset()?;
        Ok(())
    }

    /// Same as [`begin_recording`](Self::begin_recording) for the upload slot.
    pub fn begin_upload<Q>(&mut self, fence: &FenceSynchronizer, queue: &Q) -> RenderResult<()>
    where
        Q: GpuQueue + ?Sized,
    {
        fence.wait_until(queue, self.upload.fence_target)?;
        self.upload.command_list.reset()?;
        Ok(())
    }
}
