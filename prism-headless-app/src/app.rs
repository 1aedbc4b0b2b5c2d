use std::rc::Rc;

use anyhow::Context;
use ash::vk;
use prism_gfx::{descriptors::descriptor_allocator::DescriptorAllocator, device::GfxDevice};
use prism_scene::{
    frame_counter::FrameCounter,
    mesh::GpuMesh,
    scene_manager::SceneManager,
    tlas_builder::{SceneAccelBuilder, TlasBuildStats},
};

use crate::{config::PrismConfig, demo_scene::DemoScene};

pub fn panic_handler(info: &std::panic::PanicHookInfo) {
    log::error!("{}", info);
}

/// 在 logger 初始化之后调用
pub fn init_env() {
    std::panic::set_hook(Box::new(panic_handler));

    tracy_client::Client::start();
    tracy_client::set_thread_name!("RenderThread");
}

/// 没有窗口的渲染循环
///
/// 每一帧：更新场景，重建 TLAS，分配当帧的 descriptor set，最后整体回收
pub struct HeadlessApp<D: GfxDevice> {
    // 字段的声明顺序就是销毁顺序
    scene_accel: SceneAccelBuilder<D>,
    scene: SceneManager<GpuMesh<D>>,
    demo: DemoScene,

    frame_set_layout: vk::DescriptorSetLayout,
    frame_allocator: DescriptorAllocator<D>,
    persistent_allocator: DescriptorAllocator<D>,

    frame_counter: FrameCounter,
    config: PrismConfig,
    device: Rc<D>,
}
// new & init
impl<D: GfxDevice> HeadlessApp<D> {
    pub fn new(device: &Rc<D>, config: PrismConfig) -> anyhow::Result<Self> {
        let mut persistent_allocator =
            DescriptorAllocator::new(device, &config.descriptor_allocator, "persistent-descriptor")
                .context("failed to create persistent descriptor allocator")?;
        let frame_allocator = DescriptorAllocator::new(device, &config.frame_descriptor_allocator, "frame-descriptor")
            .context("failed to create frame descriptor allocator")?;

        let scene_accel = SceneAccelBuilder::new(device, &mut persistent_allocator, &config.tlas)
            .context("failed to create scene acceleration builder")?;

        let mut scene = SceneManager::new();
        let demo = DemoScene::build(device, &mut scene, config.demo.grid_size).context("failed to build demo scene")?;

        // 模拟每个 pass 每帧使用的 descriptor set：instance 数据以及 per-frame 的 uniform
        let bindings = [
            vk::DescriptorSetLayoutBinding::default()
                .binding(0)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::ALL),
            vk::DescriptorSetLayoutBinding::default()
                .binding(1)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::ALL),
        ];
        let frame_set_layout = device.create_descriptor_set_layout(&bindings, "frame-set-layout")?;

        Ok(Self {
            scene_accel,
            scene,
            demo,
            frame_set_layout,
            frame_allocator,
            persistent_allocator,
            frame_counter: FrameCounter::default(),
            config,
            device: device.clone(),
        })
    }
}
// update
impl<D: GfxDevice> HeadlessApp<D> {
    /// 运行配置中指定的帧数
    pub fn run(&mut self) -> anyhow::Result<Vec<TlasBuildStats>> {
        let frame_count = self.config.demo.frame_count;
        let mut all_stats = Vec::with_capacity(frame_count as usize);
        for _ in 0..frame_count {
            all_stats.push(self.tick()?);
        }

        log::info!(
            "finish {} frames, persistent pools: {}, frame pools: {} (sets per pool: {})",
            frame_count,
            self.persistent_allocator.total_pool_count(),
            self.frame_allocator.total_pool_count(),
            self.frame_allocator.sets_per_pool()
        );
        Ok(all_stats)
    }

    fn tick(&mut self) -> anyhow::Result<TlasBuildStats> {
        let _span = tracy_client::span!("HeadlessApp::tick");
        let frame_name = self.frame_counter.frame_name();

        self.demo.animate(&mut self.scene, self.frame_counter.frame_id());

        let stats = self
            .scene_accel
            .create_tlas(&self.scene, &self.frame_counter)
            .with_context(|| format!("{frame_name} failed to build scene tlas"))?;

        for _ in 0..self.config.demo.sets_per_frame {
            self.frame_allocator
                .allocate(self.frame_set_layout)
                .with_context(|| format!("{frame_name} failed to allocate frame descriptor set"))?;
        }

        log::info!(
            "{} tlas: {} instances, {} new blas, {} bytes (scratch {} bytes); frame pools: {} full, {} ready",
            frame_name,
            stats.instance_count,
            stats.new_blas_count,
            stats.acceleration_structure_size,
            stats.build_scratch_size,
            self.frame_allocator.full_pool_count(),
            self.frame_allocator.ready_pool_count()
        );

        self.frame_allocator.reset_pools().with_context(|| format!("{frame_name} failed to reset frame pools"))?;
        self.frame_counter.next_frame();

        tracy_client::frame_mark();
        Ok(stats)
    }
}
// getters
impl<D: GfxDevice> HeadlessApp<D> {
    #[inline]
    pub fn scene_accel(&self) -> &SceneAccelBuilder<D> {
        &self.scene_accel
    }

    #[inline]
    pub fn frame_allocator(&self) -> &DescriptorAllocator<D> {
        &self.frame_allocator
    }

    #[inline]
    pub fn instance_count(&self) -> usize {
        self.demo.instance_count()
    }
}
impl<D: GfxDevice> Drop for HeadlessApp<D> {
    fn drop(&mut self) {
        self.device.destroy_descriptor_set_layout(self.frame_set_layout);
        log::info!("HeadlessApp dropped.");
    }
}

#[cfg(test)]
mod tests {
    use prism_gfx::{descriptors::descriptor_config::DescriptorAllocatorConfig, mock::MockDevice};

    use super::*;
    use crate::config::DemoConfig;

    fn test_config() -> PrismConfig {
        PrismConfig {
            frame_descriptor_allocator: DescriptorAllocatorConfig {
                max_sets_per_pool: 4,
                sets_per_pool_ceiling: 16,
                ..Default::default()
            },
            demo: DemoConfig {
                grid_size: 3,
                frame_count: 4,
                sets_per_frame: 20,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_run_frames() {
        let device = Rc::new(MockDevice::new());
        let mut app = HeadlessApp::new(&device, test_config()).unwrap();

        let stats = app.run().unwrap();
        assert_eq!(stats.len(), 4);
        assert_eq!(stats.iter().map(|s| s.frame_id).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert!(stats.iter().all(|s| s.instance_count == 9));
        assert_eq!(stats[0].new_blas_count, 2);
        assert!(stats[1..].iter().all(|s| s.new_blas_count == 0));

        // 第一帧之后 pool 的数量不再增长：4 + 6 + 9 + 13 >= 20
        let pools_after_run = app.frame_allocator().total_pool_count();
        assert_eq!(pools_after_run, 4);
        assert_eq!(app.frame_allocator().full_pool_count(), 0);

        // 1 个发布中的 TLAS + 2 个 BLAS
        assert_eq!(device.live_acceleration_count(), 3);
        let tlas = app.scene_accel().tlas().unwrap().handle();
        assert_eq!(device.acceleration_descriptor(app.scene_accel().descriptor_set(), 0), Some(tlas));

        drop(app);
        assert_eq!(device.live_acceleration_count(), 0);
        assert_eq!(device.live_buffer_count(), 0);
        assert_eq!(device.live_descriptor_pool_count(), 0);
    }
}
