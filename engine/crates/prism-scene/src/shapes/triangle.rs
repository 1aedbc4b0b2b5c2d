use std::rc::Rc;

use prism_gfx::{device::GfxDevice, error::GfxResult};

use crate::mesh::GpuMesh;

/// 坐标系：RightHand, X-Right, Y-Up
///
/// 位于 XY 平面上的正立三角形，没有 index buffer
pub struct Triangle {}

impl Triangle {
    pub const POSITIONS: [glam::Vec3; 3] = [
        glam::vec3(-1.0, -1.0, 0.0), // A (左下)
        glam::vec3(1.0, -1.0, 0.0),  // B (右下)
        glam::vec3(0.0, 1.0, 0.0),   // C (顶部)
    ];

    pub fn create_mesh<D: GfxDevice>(device: &Rc<D>) -> GfxResult<GpuMesh<D>> {
        GpuMesh::new(device, &Self::POSITIONS, None, "triangle")
    }
}
