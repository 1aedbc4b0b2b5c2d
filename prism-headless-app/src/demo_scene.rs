use std::rc::Rc;

use prism_gfx::{device::GfxDevice, error::GfxResult};
use prism_scene::{
    components::{instance::Instance, material::Material},
    guid_new_type::InstanceHandle,
    mesh::GpuMesh,
    scene_manager::SceneManager,
    shapes::{cube::Cube, quad::Quad},
};

/// 由 cube 和 quad 组成的网格状场景
pub struct DemoScene {
    /// instance 以及它在网格中的位置
    grid: Vec<(InstanceHandle, glam::Vec3)>,
}

impl DemoScene {
    const SPACING: f32 = 3.0;

    pub fn build<D: GfxDevice>(
        device: &Rc<D>,
        scene: &mut SceneManager<GpuMesh<D>>,
        grid_size: u32,
    ) -> GfxResult<Self> {
        let cube = scene.register_mesh(Cube::create_mesh(device)?);
        let quad = scene.register_mesh(Quad::create_mesh(device)?);

        let white = scene.register_mat(Material {
            name: "white".to_string(),
            base_color: glam::vec4(0.8, 0.8, 0.8, 1.0),
            roughness: 0.5,
            opaque: 1.0,
            ..Default::default()
        });
        let light = scene.register_mat(Material {
            name: "light".to_string(),
            base_color: glam::Vec4::ONE,
            emissive: glam::vec4(4.0, 4.0, 4.0, 1.0),
            opaque: 1.0,
            ..Default::default()
        });

        let half = (grid_size as f32 - 1.0) * 0.5;
        let mut grid = Vec::with_capacity((grid_size * grid_size) as usize);
        for x in 0..grid_size {
            for z in 0..grid_size {
                let position = glam::vec3((x as f32 - half) * Self::SPACING, 0.0, (z as f32 - half) * Self::SPACING);
                let (mesh, mat) = if (x + z) % 2 == 0 { (cube, white) } else { (quad, light) };
                let handle =
                    scene.register_instance(Instance::new(glam::Mat4::from_translation(position), mesh, Some(mat)));
                grid.push((handle, position));
            }
        }

        // 没有材质，不会进入 TLAS
        scene.register_instance(Instance::new(glam::Mat4::IDENTITY, cube, None));

        log::info!("demo scene: {} instances in a {}x{} grid", grid.len(), grid_size, grid_size);
        Ok(Self { grid })
    }

    /// 每个 instance 绕自身的 Y 轴旋转，并上下浮动
    pub fn animate<D: GfxDevice>(&self, scene: &mut SceneManager<GpuMesh<D>>, frame_id: u64) {
        let _span = tracy_client::span!("DemoScene::animate");

        let t = frame_id as f32 * 0.05;
        for (idx, (handle, position)) in self.grid.iter().enumerate() {
            let Some(instance) = scene.get_instance_mut(*handle) else {
                continue;
            };
            let phase = t + idx as f32 * 0.3;
            instance.transform = glam::Mat4::from_scale_rotation_translation(
                glam::Vec3::ONE,
                glam::Quat::from_rotation_y(phase),
                *position + glam::vec3(0.0, phase.sin() * 0.5, 0.0),
            );
        }
    }

    #[inline]
    pub fn instance_count(&self) -> usize {
        self.grid.len()
    }
}

#[cfg(test)]
mod tests {
    use prism_gfx::mock::MockDevice;
    use prism_scene::scene_source::RtSceneSource;

    use super::*;

    #[test]
    fn test_build_and_animate() {
        let device = Rc::new(MockDevice::new());
        let mut scene = SceneManager::new();
        let demo = DemoScene::build(&device, &mut scene, 3).unwrap();

        assert_eq!(demo.instance_count(), 9);
        assert_eq!(scene.instance_map().len(), 10);
        assert_eq!(scene.renderables().len(), 9);

        let (handle, position) = demo.grid[0];
        assert_eq!(scene.get_instance(handle).unwrap().transform.w_axis.truncate(), position);

        demo.animate(&mut scene, 10);
        let moved = scene.get_instance(handle).unwrap().transform;
        assert_ne!(moved.w_axis.truncate(), position);
        assert!((moved.w_axis.x - position.x).abs() < 1e-6);
        assert!((moved.w_axis.z - position.z).abs() < 1e-6);
    }
}
