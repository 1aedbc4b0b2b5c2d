use std::rc::Rc;

use prism_gfx::{device::GfxDevice, error::GfxResult};

use crate::mesh::GpuMesh;

/// 坐标系：Right-Hand, X-Right, Y-Up
///
/// 三角形绕序: CCW
///
/// cube 尺寸：1
pub struct Cube {}
impl Cube {
    // 24 个顶点（每个面 4 个顶点，6 个面）
    pub const POSITIONS: [glam::Vec3; 24] = [
        // Top face (Y+)
        glam::vec3(0.5, 0.5, -0.5),
        glam::vec3(-0.5, 0.5, -0.5),
        glam::vec3(-0.5, 0.5, 0.5),
        glam::vec3(0.5, 0.5, 0.5),
        // Bottom face (Y-)
        glam::vec3(0.5, -0.5, -0.5),
        glam::vec3(-0.5, -0.5, -0.5),
        glam::vec3(-0.5, -0.5, 0.5),
        glam::vec3(0.5, -0.5, 0.5),
        // Near face (Z+)
        glam::vec3(0.5, 0.5, 0.5),
        glam::vec3(-0.5, 0.5, 0.5),
        glam::vec3(-0.5, -0.5, 0.5),
        glam::vec3(0.5, -0.5, 0.5),
        // Far face (Z-)
        glam::vec3(0.5, 0.5, -0.5),
        glam::vec3(-0.5, 0.5, -0.5),
        glam::vec3(-0.5, -0.5, -0.5),
        glam::vec3(0.5, -0.5, -0.5),
        // Left face (X-)
        glam::vec3(-0.5, 0.5, 0.5),
        glam::vec3(-0.5, 0.5, -0.5),
        glam::vec3(-0.5, -0.5, -0.5),
        glam::vec3(-0.5, -0.5, 0.5),
        // Right face (X+)
        glam::vec3(0.5, 0.5, 0.5),
        glam::vec3(0.5, 0.5, -0.5),
        glam::vec3(0.5, -0.5, -0.5),
        glam::vec3(0.5, -0.5, 0.5),
    ];

    pub const INDICES: [u32; 36] = [
        0, 1, 2, 0, 2, 3, // top
        4, 6, 5, 4, 7, 6, // bottom
        8, 9, 10, 8, 10, 11, // near
        12, 14, 13, 12, 15, 14, // far
        16, 17, 18, 16, 18, 19, // left
        20, 22, 21, 20, 23, 22, // right
    ];

    pub fn create_mesh<D: GfxDevice>(device: &Rc<D>) -> GfxResult<GpuMesh<D>> {
        GpuMesh::new(device, &Self::POSITIONS, Some(&Self::INDICES), "cube")
    }
}
