//! Renderer configuration.
//!
//! Every capacity the renderer preallocates at startup lives here. Nothing
//! grows at runtime: descriptor heaps, constant rings and frame slots are
//! sized once from a [`RendererConfig`] and exhausting one of them is reported
//! as a recoverable error by the renderer.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use kiln_core::RendererConfig;
//!
//! let config = RendererConfig::default()
//!     .with_back_buffer_count(3)
//!     .with_fence_timeout(Duration::from_secs(2));
//! config.validate().unwrap();
//! ```

use std::time::Duration;

use crate::error::{Error, Result};

/// Descriptor heap capacities.
///
/// Staging heaps hold one permanent view per resource and view kind. The
/// per-frame table sizes describe one frame slot's partition of the
/// shader-visible heaps; the renderer multiplies them by the back buffer count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorBudget {
    /// Staging heap for constant and shader-resource views.
    pub staging_views: u32,
    /// Staging heap for samplers.
    pub staging_samplers: u32,
    /// Render-target view heap.
    pub render_target_views: u32,
    /// Depth-stencil view heap.
    pub depth_stencil_views: u32,
    /// Constant table entries per frame slot.
    pub constant_table_per_frame: u32,
    /// Shader-resource table entries per frame slot.
    pub shader_resource_table_per_frame: u32,
    /// Sampler table entries per frame slot.
    pub sampler_table_per_frame: u32,
}

impl Default for DescriptorBudget {
    fn default() -> Self {
        Self {
            staging_views: 4096,
            staging_samplers: 16,
            render_target_views: 64,
            depth_stencil_views: 16,
            constant_table_per_frame: 2048,
            shader_resource_table_per_frame: 2048,
            sampler_table_per_frame: 256,
        }
    }
}

/// Constant data ring capacities, per frame slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConstantBudget {
    /// Camera-pass slots per frame.
    pub camera_slots: u32,
    /// Per-draw model slots per frame.
    pub model_slots: u32,
}

impl Default for ConstantBudget {
    fn default() -> Self {
        Self {
            camera_slots: 16,
            model_slots: 512,
        }
    }
}

/// Top-level renderer configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct RendererConfig {
    /// Presentation buffers, and therefore frame slots in flight.
    pub back_buffer_count: usize,
    /// Descriptor heap sizes.
    pub descriptors: DescriptorBudget,
    /// Constant ring sizes.
    pub constants: ConstantBudget,
    /// Highest texture slot index + 1 a draw may bind.
    pub max_texture_slots: u32,
    /// Highest constant-buffer slot index + 1 a draw may bind.
    pub max_constant_slots: u32,
    /// Highest sampler slot index + 1 a draw may bind.
    pub max_sampler_slots: u32,
    /// How long a fence wait may block before the device is considered lost.
    pub fence_timeout: Duration,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            back_buffer_count: 2,
            descriptors: DescriptorBudget::default(),
            constants: ConstantBudget::default(),
            max_texture_slots: 8,
            max_constant_slots: 4,
            max_sampler_slots: 4,
            fence_timeout: Duration::from_secs(5),
        }
    }
}

impl RendererConfig {
    /// Smallest supported back buffer count.
    pub const MIN_BACK_BUFFERS: usize = 2;
    /// Largest supported back buffer count.
    pub const MAX_BACK_BUFFERS: usize = 4;

    /// Sets the back buffer count.
    pub fn with_back_buffer_count(mut self, count: usize) -> Self {
        self.back_buffer_count = count;
        self
    }

    /// Sets the descriptor budget.
    pub fn with_descriptors(mut self, descriptors: DescriptorBudget) -> Self {
        self.descriptors = descriptors;
        self
    }

    /// Sets the constant ring budget.
    pub fn with_constants(mut self, constants: ConstantBudget) -> Self {
        self.constants = constants;
        self
    }

    /// Sets the fence wait timeout.
    pub fn with_fence_timeout(mut self, timeout: Duration) -> Self {
        self.fence_timeout = timeout;
        self
    }

    /// Number of frame slots including the reserved upload slot.
    pub fn frame_slot_count(&self) -> usize {
        self.back_buffer_count + 1
    }

    /// Checks that every capacity is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if !(Self::MIN_BACK_BUFFERS..=Self::MAX_BACK_BUFFERS).contains(&self.back_buffer_count) {
            return Err(Error::Config(format!(
                "back_buffer_count must be in {}..={}, got {}",
                Self::MIN_BACK_BUFFERS,
                Self::MAX_BACK_BUFFERS,
                self.back_buffer_count
            )));
        }

        let d = &self.descriptors;
        let named = [
            ("descriptors.staging_views", d.staging_views),
            ("descriptors.staging_samplers", d.staging_samplers),
            ("descriptors.render_target_views", d.render_target_views),
            ("descriptors.depth_stencil_views", d.depth_stencil_views),
            ("descriptors.constant_table_per_frame", d.constant_table_per_frame),
            ("descriptors.shader_resource_table_per_frame", d.shader_resource_table_per_frame),
            ("descriptors.sampler_table_per_frame", d.sampler_table_per_frame),
            ("constants.camera_slots", self.constants.camera_slots),
            ("constants.model_slots", self.constants.model_slots),
            ("max_texture_slots", self.max_texture_slots),
            ("max_constant_slots", self.max_constant_slots),
            ("max_sampler_slots", self.max_sampler_slots),
        ];
        if let Some((name, _)) = named.iter().find(|(_, value)| *value == 0) {
            return Err(Error::Config(format!("{name} must be greater than 0")));
        }

        if d.render_target_views < self.back_buffer_count as u32 {
            return Err(Error::Config(format!(
                "descriptors.render_target_views ({}) cannot hold {} back buffers",
                d.render_target_views, self.back_buffer_count
            )));
        }

        // Every constant slot owns a staging view.
        let constant_views = (self.constants.camera_slots + self.constants.model_slots) as u64
            * self.back_buffer_count as u64;
        if constant_views >= d.staging_views as u64 {
            return Err(Error::Config(format!(
                "descriptors.staging_views ({}) cannot hold {} constant slot views",
                d.staging_views, constant_views
            )));
        }

        if self.max_constant_slots < 2 {
            return Err(Error::Config(
                "max_constant_slots must leave room for camera and model constants".to_string(),
            ));
        }

        // A single draw binding every slot must fit one frame's table.
        let tables = [
            (
                "descriptors.constant_table_per_frame",
                d.constant_table_per_frame,
                "max_constant_slots",
                self.max_constant_slots,
            ),
            (
                "descriptors.shader_resource_table_per_frame",
                d.shader_resource_table_per_frame,
                "max_texture_slots",
                self.max_texture_slots,
            ),
            (
                "descriptors.sampler_table_per_frame",
                d.sampler_table_per_frame,
                "max_sampler_slots",
                self.max_sampler_slots,
            ),
        ];
        for (table, capacity, slots, max) in tables {
            if capacity < max {
                return Err(Error::Config(format!(
                    "{table} ({capacity}) is smaller than {slots} ({max})"
                )));
            }
        }

        if self.fence_timeout.is_zero() {
            return Err(Error::Config("fence_timeout must be non-zero".to_string()));
        }

        Ok(())
    }
}
