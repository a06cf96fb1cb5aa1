//! Constant buffer layouts shared with shaders.
//!
//! Both structures use `#[repr(C)]` and implement `Pod` so they can be written
//! into a constant slot as raw bytes. Shaders read the camera constants from
//! constant table slot 0 and the model constants from slot 1.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

/// Constant table slot of the camera constants.
pub const CAMERA_CONSTANT_SLOT: u32 = 0;
/// Constant table slot of the model constants.
pub const MODEL_CONSTANT_SLOT: u32 = 1;

/// Per-camera constants.
///
/// # Memory Layout
///
/// - Offset 0: projection matrix (64 bytes)
/// - Offset 64: view matrix (64 bytes)
/// - Total size: 128 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct CameraConstants {
    /// View to clip space.
    pub projection: Mat4,
    /// World to view space.
    pub view: Mat4,
}

impl CameraConstants {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(projection: Mat4, view: Mat4) -> Self {
        Self { projection, view }
    }
}

impl Default for CameraConstants {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, Mat4::IDENTITY)
    }
}

/// Per-draw constants.
///
/// # Memory Layout
///
/// - Offset 0: model matrix (64 bytes)
/// - Offset 64: tint color, linear RGBA (16 bytes)
/// - Total size: 80 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ModelConstants {
    /// Object to world space.
    pub model: Mat4,
    pub color: Vec4,
}

impl ModelConstants {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(model: Mat4, color: Vec4) -> Self {
        Self { model, color }
    }
}

impl Default for ModelConstants {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, Vec4::ONE)
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;

    #[test]
    fn test_camera_constants_size() {
        assert_eq!(CameraConstants::SIZE, 128);
        assert_eq!(std::mem::align_of::<CameraConstants>(), 16);
    }

    #[test]
    fn test_model_constants_size() {
        assert_eq!(ModelConstants::SIZE, 80);
        assert_eq!(std::mem::align_of::<ModelConstants>(), 16);
    }

    #[test]
    fn test_defaults_are_identity() {
        let camera = CameraConstants::default();
        assert_eq!(camera.projection, Mat4::IDENTITY);
        assert_eq!(camera.view, Mat4::IDENTITY);

        let model = ModelConstants::default();
        assert_eq!(model.model, Mat4::IDENTITY);
        assert_eq!(model.color, Vec4::ONE);
    }

    #[test]
    fn test_bytes_follow_field_order() {
        let model = ModelConstants::new(
            Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)),
            Vec4::new(0.5, 0.25, 0.125, 1.0),
        );
        let floats: &[f32] = bytemuck::cast_slice(bytemuck::bytes_of(&model));
        assert_eq!(&floats[12..15], &[1.0, 2.0, 3.0]);
        assert_eq!(&floats[16..20], &[0.5, 0.25, 0.125, 1.0]);
    }
}
