//! Vertex formats accepted by the immediate draw calls.
//!
//! # Vertex Types
//!
//! - [`VertexPcu`] - position, color, uv; sprites, text and debug geometry
//! - [`VertexPcutbn`] - adds the tangent frame for lit meshes

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use kiln_rhi::VertexLayout;

/// A vertex type the batcher can upload.
///
/// The byte size must equal the layout's stride.
pub trait Vertex: Pod {
    const LAYOUT: VertexLayout;
}

/// Position, color, uv.
///
/// # Memory Layout
///
/// - Offset 0: position (12 bytes)
/// - Offset 12: color, RGBA8 unorm (4 bytes)
/// - Offset 16: uv (8 bytes)
/// - Total size: 24 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct VertexPcu {
    pub position: Vec3,
    pub color: [u8; 4],
    pub uv: Vec2,
}

impl VertexPcu {
    #[inline]
    pub const fn new(position: Vec3, color: [u8; 4], uv: Vec2) -> Self {
        Self {
            position,
            color,
            uv,
        }
    }
}

impl Vertex for VertexPcu {
    const LAYOUT: VertexLayout = VertexLayout::Pcu;
}

/// Position, color, uv, tangent, bitangent, normal.
///
/// # Memory Layout
///
/// - Offset 0: position (12 bytes)
/// - Offset 12: color (4 bytes)
/// - Offset 16: uv (8 bytes)
/// - Offset 24: tangent (12 bytes)
/// - Offset 36: bitangent (12 bytes)
/// - Offset 48: normal (12 bytes)
/// - Total size: 60 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct VertexPcutbn {
    pub position: Vec3,
    pub color: [u8; 4],
    pub uv: Vec2,
    pub tangent: Vec3,
    pub bitangent: Vec3,
    pub normal: Vec3,
}

impl Vertex for VertexPcutbn {
    const LAYOUT: VertexLayout = VertexLayout::Pcutbn;
}
