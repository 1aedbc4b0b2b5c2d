use std::rc::Rc;

use prism_gfx::{device::GfxDevice, error::GfxResult};

use crate::mesh::GpuMesh;

/// 位于 XY 平面上的正方形，法线 +Z
///
/// ```text
///    D-----------C
///    |           |
///    |           |
///    A-----------B
/// ```
pub struct Quad {}
impl Quad {
    pub const POSITIONS: [glam::Vec3; 4] = [
        glam::vec3(-1.0, -1.0, 0.0), // A
        glam::vec3(1.0, -1.0, 0.0),  // B
        glam::vec3(1.0, 1.0, 0.0),   // C
        glam::vec3(-1.0, 1.0, 0.0),  // D
    ];

    pub const INDICES: [u32; 6] = [
        0, 1, 2, // ABC
        0, 2, 3, // ACD
    ];

    pub fn create_mesh<D: GfxDevice>(device: &Rc<D>) -> GfxResult<GpuMesh<D>> {
        GpuMesh::new(device, &Self::POSITIONS, Some(&Self::INDICES), "quad")
    }
}
