//! Resource table and state tracking.
//!
//! Every GPU resource the renderer touches is referred to by a
//! [`ResourceHandle`]: a generational index into a [`ResourceTable`]. The
//! table owns the only copy of each resource's current state, so the one
//! place that emits barriers ([`ResourceTable::transition_to`]) is also the
//! one place that can skip redundant ones.
//!
//! Back buffers are adopted as *external* entries: they are tracked like any
//! other resource but never destroyed by the table.
//!
//! The cached state runs ahead of the GPU: it reflects barriers that were
//! recorded, not barriers that were executed. Every transition is therefore
//! logged until the list that carries it is submitted. A list that is
//! abandoned instead is undone with [`ResourceTable::rollback`].

use kiln_rhi::{
    BindFlags, BufferDesc, BufferUsage, CommandRecorder, ResourceDevice, ResourceId,
    ResourceState, TextureDesc, TextureFormat, ViewKind,
};
use tracing::{debug, warn};

use crate::error::{RenderError, RenderResult};

/// Opaque reference to a tracked resource.
///
/// Handles stay valid until the resource's last reference is released; a
/// stale handle resolves to [`RenderError::UnknownHandle`] rather than to a
/// newer resource reusing the slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle {
    index: u32,
    generation: u32,
}

/// What a tracked resource is.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ResourceKind {
    Buffer {
        size: u64,
        usage: BufferUsage,
    },
    Texture {
        width: u32,
        height: u32,
        format: TextureFormat,
        bind_flags: BindFlags,
    },
}

impl ResourceKind {
    /// Returns true if a view of `kind` can be created for this resource.
    pub fn supports(&self, kind: ViewKind) -> bool {
        match self {
            ResourceKind::Buffer { usage, .. } => {
                kind == ViewKind::Constant && usage.contains(BufferUsage::CONSTANT)
            }
            ResourceKind::Texture { bind_flags, .. } => bind_flags.allows(kind),
        }
    }
}

#[derive(Debug)]
struct Entry {
    raw: ResourceId,
    state: ResourceState,
    ref_count: u32,
    external: bool,
    kind: ResourceKind,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// Position in the transition log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransitionCheckpoint(usize);

/// Table of live resources with their cached states.
#[derive(Debug, Default)]
pub struct ResourceTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    barriers: u64,
    // (resource, state before the barrier) for every unsubmitted transition.
    log: Vec<(ResourceHandle, ResourceState)>,
}

impl ResourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, entry: Entry) -> ResourceHandle {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.entry = Some(entry);
        ResourceHandle {
            index,
            generation: slot.generation,
        }
    }

    fn entry(&self, handle: ResourceHandle) -> RenderResult<&Entry> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_ref())
            .ok_or_else(|| RenderError::UnknownHandle(format!("{handle:?}")))
    }

    fn entry_mut(&mut self, handle: ResourceHandle) -> RenderResult<&mut Entry> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_mut())
            .ok_or_else(|| RenderError::UnknownHandle(format!("{handle:?}")))
    }

    /// Creates a buffer on `device` and starts tracking it.
    pub fn create_buffer<D>(
        &mut self,
        device: &D,
        desc: &BufferDesc,
    ) -> RenderResult<ResourceHandle>
    where
        D: ResourceDevice + ?Sized,
    {
        let raw = device.create_buffer(desc)?;
        debug!("Tracking buffer '{}' ({} bytes)", desc.name, desc.size);
        Ok(self.insert(Entry {
            raw,
            state: desc.initial_state,
            ref_count: 1,
            external: false,
            kind: ResourceKind::Buffer {
                size: desc.size,
                usage: desc.usage,
            },
        }))
    }

    /// Creates a texture on `device` and starts tracking it.
    pub fn create_texture<D>(
        &mut self,
        device: &D,
        desc: &TextureDesc,
    ) -> RenderResult<ResourceHandle>
    where
        D: ResourceDevice + ?Sized,
    {
        let raw = device.create_texture(desc)?;
        debug!(
            "Tracking texture '{}' ({}x{} {:?})",
            desc.name, desc.width, desc.height, desc.format
        );
        Ok(self.insert(Entry {
            raw,
            state: desc.initial_state,
            ref_count: 1,
            external: false,
            kind: ResourceKind::Texture {
                width: desc.width,
                height: desc.height,
                format: desc.format,
                bind_flags: desc.bind_flags,
            },
        }))
    }

    /// Tracks a resource owned by someone else, such as a back buffer.
    pub fn adopt_external(
        &mut self,
        raw: ResourceId,
        state: ResourceState,
        kind: ResourceKind,
    ) -> ResourceHandle {
        self.insert(Entry {
            raw,
            state,
            ref_count: 1,
            external: true,
            kind,
        })
    }

    /// Backend id of the resource.
    pub fn raw(&self, handle: ResourceHandle) -> RenderResult<ResourceId> {
        Ok(self.entry(handle)?.raw)
    }

    /// Cached current state.
    pub fn state(&self, handle: ResourceHandle) -> RenderResult<ResourceState> {
        Ok(self.entry(handle)?.state)
    }

    pub fn kind(&self, handle: ResourceHandle) -> RenderResult<ResourceKind> {
        Ok(self.entry(handle)?.kind)
    }

    /// Returns true if a view of `kind` may be created for the resource.
    pub fn supports(&self, handle: ResourceHandle, kind: ViewKind) -> RenderResult<bool> {
        Ok(self.entry(handle)?.kind.supports(kind))
    }

    /// Moves the resource into `new_state`.
    ///
    /// Emits exactly one barrier when the cached state differs and nothing
    /// otherwise. The cache is only updated once the barrier was recorded.
    /// Returns whether a barrier was emitted.
    pub fn transition_to<R>(
        &mut self,
        handle: ResourceHandle,
        new_state: ResourceState,
        recorder: &mut R,
    ) -> RenderResult<bool>
    where
        R: CommandRecorder + ?Sized,
    {
        let entry = self.entry_mut(handle)?;
        if entry.state == new_state {
            return Ok(false);
        }
        recorder.resource_barrier(entry.raw, entry.state, new_state)?;
        let previous = std::mem::replace(&mut entry.state, new_state);
        self.log.push((handle, previous));
        self.barriers += 1;
        Ok(true)
    }

    /// Marks the current end of the transition log.
    pub fn checkpoint(&self) -> TransitionCheckpoint {
        TransitionCheckpoint(self.log.len())
    }

    /// Forgets the transitions recorded since `checkpoint`.
    ///
    /// Call once the list carrying them was handed to the queue.
    pub fn commit(&mut self, checkpoint: TransitionCheckpoint) {
        self.log.truncate(checkpoint.0);
    }

    /// Restores the states cached before every transition recorded since
    /// `checkpoint`. Returns how many entries were restored.
    pub fn rollback(&mut self, checkpoint: TransitionCheckpoint) -> usize {
        let mut restored = 0;
        while self.log.len() > checkpoint.0 {
            let Some((handle, previous)) = self.log.pop() else {
                break;
            };
            // Released in the meantime.
            if let Ok(entry) = self.entry_mut(handle) {
                entry.state = previous;
                restored += 1;
            }
        }
        if restored > 0 {
            debug!("Rolled back {} cached transition(s)", restored);
        }
        restored
    }

    pub fn ref_count(&self, handle: ResourceHandle) -> RenderResult<u32> {
        Ok(self.entry(handle)?.ref_count)
    }

    /// Returns true for resources the table tracks but does not own.
    pub fn is_external(&self, handle: ResourceHandle) -> RenderResult<bool> {
        Ok(self.entry(handle)?.external)
    }

    /// Adds a reference.
    pub fn retain(&mut self, handle: ResourceHandle) -> RenderResult<()> {
        self.entry_mut(handle)?.ref_count += 1;
        Ok(())
    }

    /// Drops a reference and destroys the resource on the last one.
    ///
    /// External resources leave the table but are not destroyed. Returns
    /// true when the handle became invalid.
    pub fn release<D>(&mut self, handle: ResourceHandle, device: &D) -> RenderResult<bool>
    where
        D: ResourceDevice + ?Sized,
    {
        let entry = self.entry_mut(handle)?;
        entry.ref_count -= 1;
        if entry.ref_count > 0 {
            return Ok(false);
        }

        let slot = &mut self.slots[handle.index as usize];
        if let Some(entry) = slot.entry.take() {
            if !entry.external {
                device.release_resource(entry.raw);
            }
        }
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        Ok(true)
    }

    /// Destroys every owned resource regardless of reference counts.
    pub fn release_all<D>(&mut self, device: &D)
    where
        D: ResourceDevice + ?Sized,
    {
        let mut released = 0;
        for slot in &mut self.slots {
            if let Some(entry) = slot.entry.take() {
                if !entry.external {
                    if entry.ref_count > 1 {
                        warn!(
                            "Releasing {:?} with {} outstanding references",
                            entry.raw, entry.ref_count
                        );
                    }
                    device.release_resource(entry.raw);
                    released += 1;
                }
                slot.generation = slot.generation.wrapping_add(1);
            }
        }
        self.free = (0..self.slots.len() as u32).rev().collect();
        self.log.clear();
        debug!("Released {} tracked resource(s)", released);
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Barriers emitted since the last call.
    pub fn take_barrier_count(&mut self) -> u64 {
        std::mem::take(&mut self.barriers)
    }
}

#[cfg(test)]
mod tests {
    use kiln_rhi::headless::{Hazard, HeadlessDevice};
    use kiln_rhi::{GpuQueue, MemoryLocation, RenderDevice};

    use super::*;

    fn texture_desc(bind_flags: BindFlags) -> TextureDesc {
        TextureDesc {
            name: "test".into(),
            width: 4,
            height: 4,
            format: TextureFormat::Rgba8Unorm,
            bind_flags,
            initial_state: ResourceState::Common,
        }
    }

    #[test]
    fn test_transition_is_idempotent() {
        let device = HeadlessDevice::new();
        let mut list = device.create_command_list().unwrap();
        list.reset().unwrap();

        let mut table = ResourceTable::new();
        let texture = table
            .create_texture(&device, &texture_desc(BindFlags::SHADER_RESOURCE))
            .unwrap();

        assert!(table
            .transition_to(texture, ResourceState::PixelShaderResource, &mut list)
            .unwrap());
        assert!(!table
            .transition_to(texture, ResourceState::PixelShaderResource, &mut list)
            .unwrap());

        assert_eq!(device.count_barriers(), 1);
        assert_eq!(table.state(texture).unwrap(), ResourceState::PixelShaderResource);
        assert_eq!(table.take_barrier_count(), 1);
        assert!(device.hazards().is_empty());
    }

    #[test]
    fn test_cached_state_matches_device() {
        let device = HeadlessDevice::new();
        let queue = device.create_queue().unwrap();
        let mut list = device.create_command_list().unwrap();

        let mut table = ResourceTable::new();
        let texture = table
            .create_texture(&device, &texture_desc(BindFlags::RENDER_TARGET))
            .unwrap();
        for state in [
            ResourceState::RenderTarget,
            ResourceState::CopySource,
            ResourceState::RenderTarget,
        ] {
            list.reset().unwrap();
            let checkpoint = table.checkpoint();
            table.transition_to(texture, state, &mut list).unwrap();
            list.close().unwrap();
            queue.execute(&list).unwrap();
            table.commit(checkpoint);

            let raw = table.raw(texture).unwrap();
            assert_eq!(device.resource_state(raw), Some(state));
        }
        assert!(!device
            .hazards()
            .iter()
            .any(|h| matches!(h, Hazard::StateMismatch { .. })));
    }

    #[test]
    fn test_failed_barrier_keeps_state() {
        let device = HeadlessDevice::new();
        // Never reset, so recording fails.
        let mut list = device.create_command_list().unwrap();

        let mut table = ResourceTable::new();
        let texture = table
            .create_texture(&device, &texture_desc(BindFlags::SHADER_RESOURCE))
            .unwrap();
        assert!(table
            .transition_to(texture, ResourceState::CopyDest, &mut list)
            .is_err());
        assert_eq!(table.state(texture).unwrap(), ResourceState::Common);
    }

    #[test]
    fn test_rollback_restores_abandoned_transitions() {
        let device = HeadlessDevice::new();
        let queue = device.create_queue().unwrap();
        let mut list = device.create_command_list().unwrap();

        let mut table = ResourceTable::new();
        let target = table
            .create_texture(&device, &texture_desc(BindFlags::RENDER_TARGET))
            .unwrap();
        let sampled = table
            .create_texture(&device, &texture_desc(BindFlags::SHADER_RESOURCE))
            .unwrap();

        list.reset().unwrap();
        let checkpoint = table.checkpoint();
        table
            .transition_to(target, ResourceState::RenderTarget, &mut list)
            .unwrap();
        table
            .transition_to(target, ResourceState::CopySource, &mut list)
            .unwrap();
        table
            .transition_to(sampled, ResourceState::PixelShaderResource, &mut list)
            .unwrap();
        list.close().unwrap();

        // The list never reaches the queue.
        assert_eq!(table.rollback(checkpoint), 3);
        assert_eq!(table.state(target).unwrap(), ResourceState::Common);
        assert_eq!(table.state(sampled).unwrap(), ResourceState::Common);

        // The next list repeats the barriers from the true state.
        list.reset().unwrap();
        let checkpoint = table.checkpoint();
        assert!(table
            .transition_to(target, ResourceState::RenderTarget, &mut list)
            .unwrap());
        list.close().unwrap();
        queue.execute(&list).unwrap();
        table.commit(checkpoint);
        assert_eq!(table.rollback(checkpoint), 0);
        assert_eq!(table.state(target).unwrap(), ResourceState::RenderTarget);
        assert!(device.hazards().is_empty());
    }

    #[test]
    fn test_rollback_skips_released_resources() {
        let device = HeadlessDevice::new();
        let mut list = device.create_command_list().unwrap();
        list.reset().unwrap();

        let mut table = ResourceTable::new();
        let texture = table
            .create_texture(&device, &texture_desc(BindFlags::SHADER_RESOURCE))
            .unwrap();
        let checkpoint = table.checkpoint();
        table
            .transition_to(texture, ResourceState::CopyDest, &mut list)
            .unwrap();
        table.release(texture, &device).unwrap();

        assert_eq!(table.rollback(checkpoint), 0);
        assert_eq!(table.checkpoint(), checkpoint);
    }

    #[test]
    fn test_release_on_last_reference() {
        let device = HeadlessDevice::new();
        let mut table = ResourceTable::new();
        let buffer = table
            .create_buffer(
                &device,
                &BufferDesc {
                    name: "constants".into(),
                    size: 256,
                    usage: BufferUsage::CONSTANT,
                    location: MemoryLocation::Upload,
                    initial_state: ResourceState::Common,
                },
            )
            .unwrap();
        table.retain(buffer).unwrap();
        assert_eq!(table.ref_count(buffer).unwrap(), 2);
        assert!(!table.is_external(buffer).unwrap());

        assert!(!table.release(buffer, &device).unwrap());
        assert_eq!(device.live_resources(), 1);
        assert!(table.release(buffer, &device).unwrap());
        assert_eq!(device.live_resources(), 0);

        assert!(matches!(table.state(buffer), Err(RenderError::UnknownHandle(_))));
    }

    #[test]
    fn test_stale_handle_does_not_alias() {
        let device = HeadlessDevice::new();
        let mut table = ResourceTable::new();
        let first = table
            .create_texture(&device, &texture_desc(BindFlags::SHADER_RESOURCE))
            .unwrap();
        table.release(first, &device).unwrap();

        let second = table
            .create_texture(&device, &texture_desc(BindFlags::RENDER_TARGET))
            .unwrap();
        assert_ne!(first, second);
        assert!(table.raw(first).is_err());
        assert!(table.supports(second, ViewKind::RenderTarget).unwrap());
    }

    #[test]
    fn test_external_resources_are_not_destroyed() {
        let device = HeadlessDevice::new();
        let raw = device
            .create_texture(&texture_desc(BindFlags::RENDER_TARGET))
            .unwrap();

        let mut table = ResourceTable::new();
        let handle = table.adopt_external(
            raw,
            ResourceState::Present,
            ResourceKind::Texture {
                width: 4,
                height: 4,
                format: TextureFormat::Rgba8Unorm,
                bind_flags: BindFlags::RENDER_TARGET,
            },
        );
        table.release_all(&device);
        assert!(table.is_empty());
        assert!(table.raw(handle).is_err());
        assert_eq!(device.live_resources(), 1);
    }

    #[test]
    fn test_view_support() {
        let buffer = ResourceKind::Buffer {
            size: 256,
            usage: BufferUsage::CONSTANT,
        };
        assert!(buffer.supports(ViewKind::Constant));
        assert!(!buffer.supports(ViewKind::ShaderResource));

        let vertices = ResourceKind::Buffer {
            size: 256,
            usage: BufferUsage::VERTEX,
        };
        assert!(!vertices.supports(ViewKind::Constant));
    }
}
