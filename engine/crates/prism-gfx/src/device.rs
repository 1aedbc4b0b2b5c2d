//! GPU 设备抽象
//!
//! 描述符分配器、加速结构缓存以及场景 TLAS 构建只通过这里的两个 trait 访问设备。
//! - [`GfxDevice`]：资源的创建与销毁、尺寸查询、描述符更新、同步的 one-time 提交
//! - [`GfxCommands`]：在 one-time command buffer 中录制命令
//!
//! 所有的句柄都直接使用 `ash::vk` 中的类型。

use ash::vk;

use crate::{
    commands::barrier::GfxBarrierMask,
    error::GfxResult,
    raytracing::build_info::{GfxAccelBuildDesc, GfxAccelBuildSizes, GfxAccelKind},
};

/// buffer 的内存位置
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GfxMemoryLocation {
    /// 只有 GPU 可以访问
    DeviceLocal,
    /// CPU 可以顺序写入，常驻 map，用作 stage buffer
    HostVisible,
}

#[derive(Copy, Clone, Debug)]
pub struct GfxBufferCreateInfo {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub location: GfxMemoryLocation,
    /// buffer 起始地址的对齐，默认 8 字节
    pub alignment: Option<vk::DeviceSize>,
}

/// 设备创建出来的 buffer 原始数据，由 [`crate::resources::buffer::GfxBuffer`] 负责管理生命周期
pub struct GfxRawBuffer<A> {
    pub handle: vk::Buffer,
    pub allocation: A,
    /// 只有在 buffer usage 包含 SHADER_DEVICE_ADDRESS 时才有值
    pub device_address: Option<vk::DeviceAddress>,
}

/// one-time command buffer 中可以录制的命令
pub trait GfxCommands {
    /// - command type: action
    /// - 支持的 queue：transfer，graphics，compute
    fn cmd_copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]);

    /// 构建单个加速结构，`build` 中的地址必须在命令执行时有效
    fn cmd_build_acceleration_structure(
        &self,
        build: &GfxAccelBuildDesc,
        dst: vk::AccelerationStructureKHR,
        scratch_address: vk::DeviceAddress,
    );

    /// - command type: synchronize
    fn cmd_memory_barrier(&self, mask: GfxBarrierMask);
}

/// 资源生命周期核心所依赖的设备接口
///
/// 实现方只需要保证单线程使用：所有对象都通过 `Rc<D>` 共享同一个设备。
pub trait GfxDevice {
    /// 后端私有的内存分配信息
    type Allocation;
    type Commands: GfxCommands;

    // buffer
    fn create_buffer(
        &self,
        info: &GfxBufferCreateInfo,
        debug_name: &str,
    ) -> GfxResult<GfxRawBuffer<Self::Allocation>>;

    fn destroy_buffer(&self, buffer: vk::Buffer, allocation: Self::Allocation);

    /// 通过 mem map 写入 host visible 的 buffer，并 flush
    fn write_buffer(
        &self,
        buffer: vk::Buffer,
        allocation: &mut Self::Allocation,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> GfxResult<()>;

    /// scratch buffer 的地址必须是这个值的整数倍
    fn min_scratch_alignment(&self) -> vk::DeviceSize;

    // descriptor
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
        debug_name: &str,
    ) -> GfxResult<vk::DescriptorPool>;

    /// 返回原始的 `vk::Result`，由调用方决定是否属于可以重试的 pool 耗尽
    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet, vk::Result>;

    /// 回收 pool 中所有的 descriptor set
    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> GfxResult<()>;

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
        debug_name: &str,
    ) -> GfxResult<vk::DescriptorSetLayout>;

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);

    fn write_acceleration_structure_descriptor(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        acceleration: vk::AccelerationStructureKHR,
    );

    // acceleration structure
    fn get_acceleration_structure_build_sizes(&self, build: &GfxAccelBuildDesc) -> GfxAccelBuildSizes;

    /// 在 `buffer` 的 offset 0 处创建加速结构
    fn create_acceleration_structure(
        &self,
        kind: GfxAccelKind,
        buffer: vk::Buffer,
        size: vk::DeviceSize,
        debug_name: &str,
    ) -> GfxResult<vk::AccelerationStructureKHR>;

    fn acceleration_structure_device_address(&self, acceleration: vk::AccelerationStructureKHR) -> vk::DeviceAddress;

    fn destroy_acceleration_structure(&self, acceleration: vk::AccelerationStructureKHR);

    // commands
    /// 立即执行某个 command，并同步等待执行结果
    fn one_time_exec<R, F>(&self, name: &str, func: F) -> GfxResult<R>
    where
        F: FnOnce(&Self::Commands) -> R;
}
