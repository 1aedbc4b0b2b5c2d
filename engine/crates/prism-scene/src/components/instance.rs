use crate::guid_new_type::{MaterialHandle, MeshHandle};

/// 场景中的一个实体
///
/// 只有同时拥有 transform，mesh 以及 material 的 instance 才会进入 TLAS
#[derive(Clone, Debug)]
pub struct Instance {
    pub transform: glam::Mat4,
    pub mesh: MeshHandle,
    pub material: Option<MaterialHandle>,
}

impl Instance {
    #[inline]
    pub fn new(transform: glam::Mat4, mesh: MeshHandle, material: Option<MaterialHandle>) -> Self {
        Self {
            transform,
            mesh,
            material,
        }
    }
}
