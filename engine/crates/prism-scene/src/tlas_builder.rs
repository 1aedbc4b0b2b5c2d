//! 每帧重建整个场景的 TLAS，并通过 descriptor 发布出去

use std::rc::Rc;

use ash::vk;
use prism_gfx::{
    descriptors::descriptor_allocator::DescriptorAllocator,
    device::GfxDevice,
    error::{GfxError, GfxResult},
    raytracing::{acceleration::GfxAcceleration, build_info::GfxAccelKind, instance::GfxInstanceRecord},
};
use serde::{Deserialize, Serialize};

use crate::{blas_cache::BlasCache, frame_counter::FrameCounter, scene_source::RtSceneSource};

/// TLAS 中所有 instance 共用的参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlasBuilderConfig {
    /// 默认 0xFF，对所有 ray 可见
    pub visibility_mask: u8,
    /// 暂时所有 instance 使用同一个 hit group
    pub sbt_record_offset: u32,
    /// TRIANGLE_FACING_CULL_DISABLE
    pub cull_disable: bool,
    /// false 时使用 PREFER_FAST_BUILD
    pub prefer_fast_trace: bool,
}

impl Default for TlasBuilderConfig {
    fn default() -> Self {
        Self {
            visibility_mask: 0xFF,
            sbt_record_offset: 0,
            cull_disable: true,
            prefer_fast_trace: true,
        }
    }
}

impl TlasBuilderConfig {
    pub fn validate(&self) -> GfxResult<()> {
        if self.sbt_record_offset > GfxInstanceRecord::MAX_24BIT {
            return Err(GfxError::InvalidConfig(format!(
                "sbt_record_offset {} does not fit in 24 bits",
                self.sbt_record_offset
            )));
        }
        Ok(())
    }

    #[inline]
    fn instance_flags(&self) -> vk::GeometryInstanceFlagsKHR {
        if self.cull_disable {
            vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE
        } else {
            vk::GeometryInstanceFlagsKHR::empty()
        }
    }

    #[inline]
    fn build_flags(&self) -> vk::BuildAccelerationStructureFlagsKHR {
        if self.prefer_fast_trace {
            vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE
        } else {
            vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_BUILD
        }
    }
}

/// 一次 TLAS 构建的统计信息
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TlasBuildStats {
    pub frame_id: u64,
    pub instance_count: u32,
    /// 本次构建中新建的 BLAS 数量
    pub new_blas_count: usize,
    pub acceleration_structure_size: vk::DeviceSize,
    pub build_scratch_size: vk::DeviceSize,
}

/// 场景的加速结构
///
/// 持有所有 mesh 的 BLAS，当前发布的 TLAS，以及引用 TLAS 的 descriptor set（binding 0）
pub struct SceneAccelBuilder<D: GfxDevice> {
    config: TlasBuilderConfig,

    /// 同一时刻只有一个 TLAS，在新的 TLAS 发布之后才会被销毁
    tlas: Option<GfxAcceleration<D>>,
    blas_cache: BlasCache<D>,

    descriptor_set_layout: vk::DescriptorSetLayout,
    /// 由外部的 DescriptorAllocator 分配，随 pool 一起回收
    descriptor_set: vk::DescriptorSet,

    last_build_stats: Option<TlasBuildStats>,

    device: Rc<D>,
}
// new & init
impl<D: GfxDevice> SceneAccelBuilder<D> {
    pub const TLAS_BINDING: u32 = 0;

    /// descriptor set 从 `descriptor_allocator` 中分配，需要保证 allocator 不会被 reset
    pub fn new(
        device: &Rc<D>,
        descriptor_allocator: &mut DescriptorAllocator<D>,
        config: &TlasBuilderConfig,
    ) -> GfxResult<Self> {
        config.validate()?;

        let bindings = [vk::DescriptorSetLayoutBinding::default()
            .binding(Self::TLAS_BINDING)
            .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::RAYGEN_KHR | vk::ShaderStageFlags::CLOSEST_HIT_KHR)];
        let descriptor_set_layout = device.create_descriptor_set_layout(&bindings, "scene-tlas-layout")?;

        let descriptor_set = match descriptor_allocator.allocate(descriptor_set_layout) {
            Ok(set) => set,
            Err(e) => {
                device.destroy_descriptor_set_layout(descriptor_set_layout);
                return Err(e);
            }
        };

        Ok(Self {
            config: config.clone(),
            tlas: None,
            blas_cache: BlasCache::new(device),
            descriptor_set_layout,
            descriptor_set,
            last_build_stats: None,
            device: device.clone(),
        })
    }
}
// getters
impl<D: GfxDevice> SceneAccelBuilder<D> {
    /// 当前发布的 TLAS，第一次 `create_tlas` 成功之前为 None
    #[inline]
    pub fn tlas(&self) -> Option<&GfxAcceleration<D>> {
        self.tlas.as_ref()
    }

    #[inline]
    pub fn descriptor_set(&self) -> vk::DescriptorSet {
        self.descriptor_set
    }

    #[inline]
    pub fn descriptor_set_layout(&self) -> vk::DescriptorSetLayout {
        self.descriptor_set_layout
    }

    #[inline]
    pub fn last_build_stats(&self) -> Option<&TlasBuildStats> {
        self.last_build_stats.as_ref()
    }

    #[inline]
    pub fn blas_cache(&self) -> &BlasCache<D> {
        &self.blas_cache
    }

    #[inline]
    pub fn config(&self) -> &TlasBuilderConfig {
        &self.config
    }
}
// update
impl<D: GfxDevice> SceneAccelBuilder<D> {
    /// 重新构建整个场景的 TLAS
    ///
    /// 1. 收集场景中所有可渲染的实体，按需构建 BLAS
    /// 2. 上传 instance 数据，同步构建新的 TLAS
    /// 3. 将 descriptor 指向新的 TLAS，之后再销毁旧的 TLAS
    ///
    /// 任何一步失败时，旧的 TLAS 保持发布状态
    pub fn create_tlas<S: RtSceneSource + ?Sized>(
        &mut self,
        scene: &S,
        frame_counter: &FrameCounter,
    ) -> GfxResult<TlasBuildStats> {
        let _span = tracy_client::span!("SceneAccelBuilder::create_tlas");

        let renderables = scene.renderables();
        let debug_name = format!("scene-tlas-{}", frame_counter.frame_id());

        // custom index 只有 24 位
        let instance_count = u32::try_from(renderables.len())
            .ok()
            .filter(|count| *count <= GfxInstanceRecord::MAX_24BIT + 1)
            .ok_or_else(|| GfxError::BuildFailure {
                kind: GfxAccelKind::TopLevel,
                context: format!("{}, {} instances", debug_name, renderables.len()),
                reason: format!("instance count exceeds {}", GfxInstanceRecord::MAX_24BIT + 1),
            })?;

        let blas_count_before = self.blas_cache.build_count();
        let instance_flags = self.config.instance_flags();
        let mut instances = Vec::with_capacity(renderables.len());
        for (custom_index, renderable) in renderables.iter().enumerate() {
            let blas = self.blas_cache.get_or_create(renderable.mesh)?;
            instances.push(GfxInstanceRecord::new(
                &renderable.transform,
                custom_index as u32,
                self.config.visibility_mask,
                self.config.sbt_record_offset,
                instance_flags,
                blas.device_address(),
            ));
        }

        let tlas = GfxAcceleration::build_tlas_sync(&self.device, &instances, self.config.build_flags(), &debug_name)?;

        let sizes = tlas.sizes();
        let stats = TlasBuildStats {
            frame_id: frame_counter.frame_id(),
            instance_count,
            new_blas_count: self.blas_cache.build_count() - blas_count_before,
            acceleration_structure_size: sizes.acceleration_structure_size,
            build_scratch_size: sizes.build_scratch_size,
        };

        // 先发布新的 TLAS，再销毁旧的
        self.device
            .write_acceleration_structure_descriptor(self.descriptor_set, Self::TLAS_BINDING, tlas.handle());
        if let Some(old_tlas) = self.tlas.replace(tlas) {
            log::info!(
                "{} replace tlas {:?} with {} instances",
                frame_counter.frame_name(),
                old_tlas.handle(),
                instance_count
            );
            old_tlas.destroy();
        } else {
            log::info!("{} publish first tlas with {} instances", frame_counter.frame_name(), instance_count);
        }

        self.last_build_stats = Some(stats);
        Ok(stats)
    }
}
impl<D: GfxDevice> Drop for SceneAccelBuilder<D> {
    fn drop(&mut self) {
        // TLAS 引用了 BLAS，需要先于 BLAS 销毁
        self.tlas.take();
        self.device.destroy_descriptor_set_layout(self.descriptor_set_layout);
    }
}

#[cfg(test)]
mod tests {
    use prism_gfx::{
        descriptors::descriptor_config::DescriptorAllocatorConfig,
        mock::{MockCall, MockDevice},
    };
    use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

    use super::*;
    use crate::{
        components::{instance::Instance, material::Material},
        mesh::{GpuMesh, RtMesh},
        scene_manager::SceneManager,
        shapes::{cube::Cube, quad::Quad},
    };

    struct TestContext {
        // 声明顺序即 drop 顺序
        builder: SceneAccelBuilder<MockDevice>,
        scene: SceneManager<GpuMesh<MockDevice>>,
        allocator: DescriptorAllocator<MockDevice>,
        device: Rc<MockDevice>,
    }

    fn setup() -> TestContext {
        let device = Rc::new(MockDevice::new());
        let mut allocator =
            DescriptorAllocator::new(&device, &DescriptorAllocatorConfig::default(), "persistent").unwrap();
        let builder = SceneAccelBuilder::new(&device, &mut allocator, &TlasBuilderConfig::default()).unwrap();
        TestContext {
            builder,
            scene: SceneManager::new(),
            allocator,
            device,
        }
    }

    fn tlas_builds(device: &MockDevice) -> Vec<Vec<GfxInstanceRecord>> {
        device
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                MockCall::BuildAcceleration {
                    kind: GfxAccelKind::TopLevel,
                    instances,
                    ..
                } => Some(instances),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_instance_array_completeness() {
        let mut ctx = setup();
        let cube = ctx.scene.register_mesh(Cube::create_mesh(&ctx.device).unwrap());
        let quad = ctx.scene.register_mesh(Quad::create_mesh(&ctx.device).unwrap());
        let mat = ctx.scene.register_mat(Material::default());

        let mut offsets = (0..37).map(|i| i as f32).collect::<Vec<_>>();
        offsets.shuffle(&mut StdRng::seed_from_u64(7));
        for (i, x) in offsets.iter().enumerate() {
            let mesh = if i % 2 == 0 { cube } else { quad };
            ctx.scene.register_instance(Instance::new(
                glam::Mat4::from_translation(glam::vec3(*x, 0.0, 0.0)),
                mesh,
                Some(mat),
            ));
        }

        let stats = ctx.builder.create_tlas(&ctx.scene, &FrameCounter::new(3)).unwrap();
        assert_eq!(stats.frame_id, 3);
        assert_eq!(stats.instance_count, 37);
        assert_eq!(stats.new_blas_count, 2);

        let builds = tlas_builds(&ctx.device);
        assert_eq!(builds.len(), 1);
        let records = &builds[0];
        assert_eq!(records.len(), 37);

        let mut custom_indices = records.iter().map(GfxInstanceRecord::custom_index).collect::<Vec<_>>();
        custom_indices.sort_unstable();
        assert_eq!(custom_indices, (0..37).collect::<Vec<_>>());

        // 每个实体恰好出现一次
        let mut translations = records.iter().map(|record| record.transform[3] as i32).collect::<Vec<_>>();
        translations.sort_unstable();
        assert_eq!(translations, (0..37).collect::<Vec<_>>());

        let cube_blas = ctx.builder.blas_cache().get(ctx.scene.get_mesh(cube).unwrap().mesh_id()).unwrap();
        let quad_blas = ctx.builder.blas_cache().get(ctx.scene.get_mesh(quad).unwrap().mesh_id()).unwrap();
        for record in records {
            assert!(record.blas_address == cube_blas.device_address() || record.blas_address == quad_blas.device_address());
            assert_eq!(record.mask(), 0xFF);
            assert_eq!(record.sbt_record_offset(), 0);
            assert_eq!(record.flags(), vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE);
        }
    }

    #[test]
    fn test_publish_before_destroy() {
        let mut ctx = setup();
        let quad = ctx.scene.register_mesh(Quad::create_mesh(&ctx.device).unwrap());
        let mat = ctx.scene.register_mat(Material::default());
        ctx.scene.register_instance(Instance::new(glam::Mat4::IDENTITY, quad, Some(mat)));

        let mut frame_counter = FrameCounter::default();
        ctx.builder.create_tlas(&ctx.scene, &frame_counter).unwrap();
        let old_tlas = ctx.builder.tlas().unwrap().handle();

        frame_counter.next_frame();
        ctx.device.clear_calls();
        ctx.builder.create_tlas(&ctx.scene, &frame_counter).unwrap();
        let new_tlas = ctx.builder.tlas().unwrap().handle();
        assert_ne!(old_tlas, new_tlas);

        let calls = ctx.device.calls();
        let publish = calls
            .iter()
            .position(|call| {
                matches!(call, MockCall::WriteAccelerationDescriptor { acceleration, binding: 0, .. } if *acceleration == new_tlas)
            })
            .unwrap();
        let destroy = calls
            .iter()
            .position(|call| matches!(call, MockCall::DestroyAcceleration(handle) if *handle == old_tlas))
            .unwrap();
        assert!(publish < destroy);

        assert!(!ctx.device.is_acceleration_alive(old_tlas));
        assert_eq!(ctx.device.acceleration_descriptor(ctx.builder.descriptor_set(), 0), Some(new_tlas));
        // 1 个 BLAS + 1 个 TLAS
        assert_eq!(ctx.device.live_acceleration_count(), 2);
    }

    #[test]
    fn test_failed_rebuild_keeps_previous_tlas() {
        let mut ctx = setup();
        let cube = ctx.scene.register_mesh(Cube::create_mesh(&ctx.device).unwrap());
        let mat = ctx.scene.register_mat(Material::default());
        ctx.scene.register_instance(Instance::new(glam::Mat4::IDENTITY, cube, Some(mat)));

        ctx.builder.create_tlas(&ctx.scene, &FrameCounter::new(0)).unwrap();
        let published = ctx.builder.tlas().unwrap().handle();
        let live_buffers = ctx.device.live_buffer_count();

        ctx.device.fail_next_submit(vk::Result::ERROR_DEVICE_LOST);
        let err = ctx.builder.create_tlas(&ctx.scene, &FrameCounter::new(1)).unwrap_err();
        assert!(matches!(err, GfxError::BuildFailure { kind: GfxAccelKind::TopLevel, .. }));

        assert_eq!(ctx.builder.tlas().unwrap().handle(), published);
        assert!(ctx.device.is_acceleration_alive(published));
        assert_eq!(ctx.device.acceleration_descriptor(ctx.builder.descriptor_set(), 0), Some(published));
        assert_eq!(ctx.device.live_buffer_count(), live_buffers);
        assert_eq!(ctx.builder.last_build_stats().unwrap().frame_id, 0);

        ctx.device.set_zero_build_sizes(true);
        assert!(ctx.builder.create_tlas(&ctx.scene, &FrameCounter::new(2)).is_err());
        assert_eq!(ctx.builder.tlas().unwrap().handle(), published);
        ctx.device.set_zero_build_sizes(false);

        ctx.builder.create_tlas(&ctx.scene, &FrameCounter::new(3)).unwrap();
        assert!(!ctx.device.is_acceleration_alive(published));
    }

    #[test]
    fn test_empty_scene_publishes_valid_tlas() {
        let mut ctx = setup();

        let stats = ctx.builder.create_tlas(&ctx.scene, &FrameCounter::default()).unwrap();
        assert_eq!(stats.instance_count, 0);
        assert_eq!(stats.new_blas_count, 0);

        let tlas = ctx.builder.tlas().unwrap().handle();
        assert_eq!(ctx.device.acceleration_descriptor(ctx.builder.descriptor_set(), 0), Some(tlas));
        assert!(ctx.device.calls().iter().any(|call| matches!(
            call,
            MockCall::BuildAcceleration { kind: GfxAccelKind::TopLevel, primitive_counts, .. } if *primitive_counts == vec![0]
        )));
        assert!(ctx.builder.blas_cache().is_empty());
    }

    #[test]
    fn test_instances_without_material_are_excluded() {
        let mut ctx = setup();
        let quad = ctx.scene.register_mesh(Quad::create_mesh(&ctx.device).unwrap());
        let cube = ctx.scene.register_mesh(Cube::create_mesh(&ctx.device).unwrap());
        let mat = ctx.scene.register_mat(Material::default());
        ctx.scene.register_instance(Instance::new(glam::Mat4::IDENTITY, quad, Some(mat)));
        ctx.scene.register_instance(Instance::new(glam::Mat4::IDENTITY, cube, None));

        let stats = ctx.builder.create_tlas(&ctx.scene, &FrameCounter::default()).unwrap();
        assert_eq!(stats.instance_count, 1);
        assert_eq!(ctx.builder.blas_cache().len(), 1);
        assert!(!ctx.builder.blas_cache().contains(ctx.scene.get_mesh(cube).unwrap().mesh_id()));
    }

    #[test]
    fn test_blas_reused_across_frames() {
        let mut ctx = setup();
        let cube = ctx.scene.register_mesh(Cube::create_mesh(&ctx.device).unwrap());
        let mat = ctx.scene.register_mat(Material::default());
        let instance = ctx.scene.register_instance(Instance::new(glam::Mat4::IDENTITY, cube, Some(mat)));

        let mut frame_counter = FrameCounter::default();
        assert_eq!(ctx.builder.create_tlas(&ctx.scene, &frame_counter).unwrap().new_blas_count, 1);

        for _ in 0..3 {
            frame_counter.next_frame();
            ctx.scene.get_instance_mut(instance).unwrap().transform =
                glam::Mat4::from_rotation_y(frame_counter.frame_id() as f32);
            assert_eq!(ctx.builder.create_tlas(&ctx.scene, &frame_counter).unwrap().new_blas_count, 0);
        }

        assert_eq!(ctx.device.build_count(GfxAccelKind::BottomLevel), 1);
        assert_eq!(ctx.device.build_count(GfxAccelKind::TopLevel), 4);
        assert_eq!(ctx.builder.blas_cache().build_count(), 1);
    }

    #[test]
    fn test_custom_config() {
        let mut ctx = setup();
        let config = TlasBuilderConfig {
            visibility_mask: 0x0F,
            sbt_record_offset: 2,
            cull_disable: false,
            prefer_fast_trace: false,
        };
        let mut builder = SceneAccelBuilder::new(&ctx.device, &mut ctx.allocator, &config).unwrap();
        let quad = ctx.scene.register_mesh(Quad::create_mesh(&ctx.device).unwrap());
        let mat = ctx.scene.register_mat(Material::default());
        ctx.scene.register_instance(Instance::new(glam::Mat4::IDENTITY, quad, Some(mat)));

        ctx.device.clear_calls();
        builder.create_tlas(&ctx.scene, &FrameCounter::default()).unwrap();
        let record = tlas_builds(&ctx.device)[0][0];
        assert_eq!(record.mask(), 0x0F);
        assert_eq!(record.sbt_record_offset(), 2);
        assert_eq!(record.flags(), vk::GeometryInstanceFlagsKHR::empty());

        let invalid = TlasBuilderConfig {
            sbt_record_offset: 1 << 24,
            ..Default::default()
        };
        assert!(matches!(invalid.validate(), Err(GfxError::InvalidConfig(_))));
    }

    #[test]
    fn test_config_from_toml() {
        let config: TlasBuilderConfig = toml::from_str("visibility_mask = 3\nprefer_fast_trace = false").unwrap();
        assert_eq!(config.visibility_mask, 3);
        assert!(!config.prefer_fast_trace);
        assert!(config.cull_disable);
        assert_eq!(config.build_flags(), vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_BUILD);
    }

    #[test]
    fn test_drop_releases_layout_and_structures() {
        let ctx = setup();
        let layout = ctx.builder.descriptor_set_layout();
        let TestContext {
            mut builder,
            mut scene,
            allocator,
            device,
        } = ctx;
        let quad = scene.register_mesh(Quad::create_mesh(&device).unwrap());
        let mat = scene.register_mat(Material::default());
        scene.register_instance(Instance::new(glam::Mat4::IDENTITY, quad, Some(mat)));
        builder.create_tlas(&scene, &FrameCounter::default()).unwrap();

        drop(builder);
        assert_eq!(device.live_acceleration_count(), 0);
        assert!(device.calls().contains(&MockCall::DestroyDescriptorSetLayout(layout)));

        drop(scene);
        drop(allocator);
        assert_eq!(device.live_buffer_count(), 0);
        assert_eq!(device.live_descriptor_pool_count(), 0);
    }
}
