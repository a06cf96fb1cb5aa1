//! Cameras bracket groups of draws.
//!
//! A camera supplies the projection and view matrices written once per
//! [`begin_camera`](crate::Renderer::begin_camera), picks the default material
//! by its projection kind and optionally redirects the draws into its own
//! color and depth targets.

use glam::{Mat4, Quat, Vec2, Vec3};

use crate::texture::TextureHandle;
use crate::ubo::CameraConstants;

/// Projection type for the camera.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Projection {
    Perspective {
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    },
    Orthographic {
        left: f32,
        right: f32,
        bottom: f32,
        top: f32,
        near: f32,
        far: f32,
    },
}

/// Projection kind, used to pick a default material.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProjectionKind {
    Orthographic,
    Perspective,
}

impl Projection {
    pub fn kind(&self) -> ProjectionKind {
        match self {
            Projection::Perspective { .. } => ProjectionKind::Perspective,
            Projection::Orthographic { .. } => ProjectionKind::Orthographic,
        }
    }
}

/// A camera for a group of draws.
#[derive(Clone, Debug, PartialEq)]
pub struct Camera {
    /// Camera position in world space
    pub position: Vec3,
    pub rotation: Quat,
    pub projection: Projection,
    /// Color target; `None` renders into the active back buffer.
    pub color_target: Option<TextureHandle>,
    /// Depth target; `None` disables depth for the camera's draws.
    pub depth_target: Option<TextureHandle>,
}

impl Camera {
    /// 2D camera mapping `bottom_left..top_right` onto the target.
    pub fn orthographic(bottom_left: Vec2, top_right: Vec2) -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            projection: Projection::Orthographic {
                left: bottom_left.x,
                right: top_right.x,
                bottom: bottom_left.y,
                top: top_right.y,
                near: 0.0,
                far: 1.0,
            },
            color_target: None,
            depth_target: None,
        }
    }

    /// Perspective camera at `position` looking down -Z.
    pub fn perspective(position: Vec3, fov_y: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
            projection: Projection::Perspective {
                fov_y,
                aspect,
                near,
                far,
            },
            color_target: None,
            depth_target: None,
        }
    }

    pub fn with_color_target(mut self, target: TextureHandle) -> Self {
        self.color_target = Some(target);
        self
    }

    pub fn with_depth_target(mut self, target: TextureHandle) -> Self {
        self.depth_target = Some(target);
        self
    }

    pub fn kind(&self) -> ProjectionKind {
        self.projection.kind()
    }

    /// Look at a target position.
    pub fn look_at(&mut self, target: Vec3) {
        let forward = (target - self.position).normalize_or_zero();
        if forward.length_squared() > 0.0 {
            self.rotation = Quat::from_rotation_arc(Vec3::NEG_Z, forward);
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        let forward = self.rotation * Vec3::NEG_Z;
        Mat4::look_at_rh(self.position, self.position + forward, self.rotation * Vec3::Y)
    }

    /// Get the projection matrix (with Vulkan Y-flip).
    pub fn projection_matrix(&self) -> Mat4 {
        let mut proj = match self.projection {
            Projection::Perspective {
                fov_y,
                aspect,
                near,
                far,
            } => Mat4::perspective_rh(fov_y, aspect, near, far),
            Projection::Orthographic {
                left,
                right,
                bottom,
                top,
                near,
                far,
            } => Mat4::orthographic_rh(left, right, bottom, top, near, far),
        };
        proj.y_axis.y *= -1.0;
        proj
    }

    /// Constants written into the camera slot.
    pub fn constants(&self) -> CameraConstants {
        CameraConstants::new(self.projection_matrix(), self.view_matrix())
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec4;

    use super::*;

    #[test]
    fn test_projection_kind() {
        let ortho = Camera::orthographic(Vec2::ZERO, Vec2::new(1600.0, 800.0));
        assert_eq!(ortho.kind(), ProjectionKind::Orthographic);

        let persp = Camera::perspective(Vec3::Z * 5.0, 60f32.to_radians(), 2.0, 0.1, 100.0);
        assert_eq!(persp.kind(), ProjectionKind::Perspective);
    }

    #[test]
    fn test_orthographic_maps_corners() {
        let camera = Camera::orthographic(Vec2::ZERO, Vec2::new(200.0, 100.0));
        let clip = camera.projection_matrix() * camera.view_matrix();

        let corner = clip * Vec4::new(200.0, 100.0, 0.0, 1.0);
        assert!((corner.x - 1.0).abs() < 1e-5);
        // Y is flipped for Vulkan clip space.
        assert!((corner.y + 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_look_at() {
        let mut camera = Camera::perspective(Vec3::new(0.0, 0.0, 5.0), 1.0, 1.0, 0.1, 10.0);
        camera.look_at(Vec3::new(5.0, 0.0, 5.0));
        let forward = camera.rotation * Vec3::NEG_Z;
        assert!((forward - Vec3::X).length() < 1e-5);
    }

    #[test]
    fn test_constants_carry_both_matrices() {
        let camera = Camera::orthographic(Vec2::ZERO, Vec2::ONE);
        let constants = camera.constants();
        assert_eq!(constants.projection, camera.projection_matrix());
        assert_eq!(constants.view, camera.view_matrix());
    }
}
