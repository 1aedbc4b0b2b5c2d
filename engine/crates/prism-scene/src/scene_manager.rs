use slotmap::SlotMap;

use crate::{
    components::{instance::Instance, material::Material},
    guid_new_type::{InstanceHandle, MaterialHandle, MeshHandle},
    mesh::RtMesh,
    scene_source::{RtRenderable, RtSceneSource},
};

/// 在 CPU 侧管理场景数据
pub struct SceneManager<M: RtMesh> {
    all_mats: SlotMap<MaterialHandle, Material>,
    all_instances: SlotMap<InstanceHandle, Instance>,
    all_meshes: SlotMap<MeshHandle, M>,
}
// new & init
impl<M: RtMesh> SceneManager<M> {
    pub fn new() -> Self {
        Self {
            all_mats: SlotMap::with_key(),
            all_instances: SlotMap::with_key(),
            all_meshes: SlotMap::with_key(),
        }
    }
}
impl<M: RtMesh> Default for SceneManager<M> {
    fn default() -> Self {
        Self::new()
    }
}
// getter
impl<M: RtMesh> SceneManager<M> {
    #[inline]
    pub fn instance_map(&self) -> &SlotMap<InstanceHandle, Instance> {
        &self.all_instances
    }
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.all_instances.is_empty() && self.all_meshes.is_empty() && self.all_mats.is_empty()
    }
}
// tools
impl<M: RtMesh> SceneManager<M> {
    #[inline]
    pub fn get_instance(&self, handle: InstanceHandle) -> Option<&Instance> {
        self.all_instances.get(handle)
    }

    #[inline]
    pub fn get_instance_mut(&mut self, handle: InstanceHandle) -> Option<&mut Instance> {
        self.all_instances.get_mut(handle)
    }

    #[inline]
    pub fn get_mesh(&self, handle: MeshHandle) -> Option<&M> {
        self.all_meshes.get(handle)
    }

    /// 向场景中添加材质
    pub fn register_mat(&mut self, mat: Material) -> MaterialHandle {
        self.all_mats.insert(mat)
    }

    /// 向场景中添加 mesh
    pub fn register_mesh(&mut self, mesh: M) -> MeshHandle {
        self.all_meshes.insert(mesh)
    }

    /// 向场景中添加 instance
    pub fn register_instance(&mut self, instance: Instance) -> InstanceHandle {
        self.all_instances.insert(instance)
    }

    pub fn remove_instance(&mut self, handle: InstanceHandle) -> Option<Instance> {
        self.all_instances.remove(handle)
    }
}
impl<M: RtMesh> RtSceneSource for SceneManager<M> {
    type Mesh = M;

    /// 缺少 material，或者引用的 mesh / material 已经不存在的 instance 会被跳过
    fn renderables(&self) -> Vec<RtRenderable<'_, M>> {
        self.all_instances
            .values()
            .filter_map(|instance| {
                let material = instance.material.filter(|mat| self.all_mats.contains_key(*mat))?;
                let mesh = self.all_meshes.get(instance.mesh)?;
                Some(RtRenderable {
                    transform: instance.transform,
                    mesh,
                    material,
                })
            })
            .collect()
    }
}
impl<M: RtMesh> Drop for SceneManager<M> {
    fn drop(&mut self) {
        log::info!("SceneManager dropped.");
    }
}
