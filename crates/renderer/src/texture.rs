//! Texture creation parameters and handles.

use kiln_rhi::{BindFlags, ResourceState, TextureDesc, TextureFormat};

use crate::error::{RenderError, RenderResult};
use crate::resource::ResourceHandle;

/// Opaque handle to a texture created by the renderer.
///
/// Views are created lazily, the first time the texture is bound or used as
/// a target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) ResourceHandle);

impl TextureHandle {
    /// Entry in the renderer's resource table.
    pub fn resource(&self) -> ResourceHandle {
        self.0
    }
}

/// Everything needed to create a texture.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureCreateInfo {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub bind_flags: BindFlags,
    /// Tightly packed pixels for mip 0, uploaded synchronously.
    pub initial_data: Option<Vec<u8>>,
}

impl TextureCreateInfo {
    /// Shader-readable texture initialized from `pixels`.
    pub fn with_data(
        name: impl Into<String>,
        width: u32,
        height: u32,
        format: TextureFormat,
        pixels: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            format,
            bind_flags: BindFlags::SHADER_RESOURCE,
            initial_data: Some(pixels),
        }
    }

    /// Uninitialized render target that can also be sampled.
    pub fn render_target(
        name: impl Into<String>,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            format,
            bind_flags: BindFlags::RENDER_TARGET | BindFlags::SHADER_RESOURCE,
            initial_data: None,
        }
    }

    /// Uninitialized depth-stencil target.
    pub fn depth_target(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            format: TextureFormat::D24UnormS8Uint,
            bind_flags: BindFlags::DEPTH_STENCIL,
            initial_data: None,
        }
    }

    /// Byte length `initial_data` must have.
    pub fn expected_data_len(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.format.bytes_per_pixel() as u64
    }

    /// Checks the request before anything is allocated.
    pub fn validate(&self) -> RenderResult<()> {
        if self.bind_flags.is_empty() {
            return Err(RenderError::InvalidBindingState(format!(
                "texture '{}' has no bind flags",
                self.name
            )));
        }
        if let Some(data) = &self.initial_data {
            let expected = self.expected_data_len();
            if data.len() as u64 != expected {
                return Err(RenderError::InvalidBindingState(format!(
                    "texture '{}' initial data is {} bytes, expected {}",
                    self.name,
                    data.len(),
                    expected
                )));
            }
            if self.format.is_depth() {
                return Err(RenderError::InvalidBindingState(format!(
                    "depth texture '{}' cannot be initialized from CPU data",
                    self.name
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn desc(&self) -> TextureDesc {
        TextureDesc {
            name: self.name.clone(),
            width: self.width,
            height: self.height,
            format: self.format,
            bind_flags: self.bind_flags,
            initial_state: ResourceState::Common,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_length_is_checked() {
        let ok =
            TextureCreateInfo::with_data("white", 2, 2, TextureFormat::Rgba8Unorm, vec![255; 16]);
        assert!(ok.validate().is_ok());
        assert_eq!(ok.expected_data_len(), 16);

        let short =
            TextureCreateInfo::with_data("white", 2, 2, TextureFormat::Rgba8Unorm, vec![255; 15]);
        assert!(matches!(short.validate(), Err(RenderError::InvalidBindingState(_))));
    }

    #[test]
    fn test_presets() {
        let target = TextureCreateInfo::render_target("scene", 64, 64, TextureFormat::Rgba8Unorm);
        assert!(target.bind_flags.contains(BindFlags::RENDER_TARGET));
        assert!(target.validate().is_ok());

        let depth = TextureCreateInfo::depth_target("depth", 64, 64);
        assert!(depth.format.is_depth());
        assert_eq!(depth.desc().initial_state, ResourceState::Common);
    }

    #[test]
    fn test_depth_cannot_take_pixels() {
        let mut depth = TextureCreateInfo::depth_target("depth", 1, 1);
        depth.initial_data = Some(vec![0; 4]);
        assert!(depth.validate().is_err());
    }
}
