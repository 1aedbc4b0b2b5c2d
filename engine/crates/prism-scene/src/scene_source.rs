use crate::{guid_new_type::MaterialHandle, mesh::RtMesh};

/// 一个可以进入 TLAS 的实体：transform，mesh 以及 material 缺一不可
pub struct RtRenderable<'a, M: RtMesh + ?Sized> {
    /// 列主序的 model 矩阵
    pub transform: glam::Mat4,
    pub mesh: &'a M,
    pub material: MaterialHandle,
}

/// TLAS 构建时遍历的场景
pub trait RtSceneSource {
    type Mesh: RtMesh + ?Sized;

    /// 所有同时拥有 transform，mesh 以及 material 的实体
    fn renderables(&self) -> Vec<RtRenderable<'_, Self::Mesh>>;
}
