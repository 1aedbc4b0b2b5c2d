//! Vulkan GFX 层
//!
//! 光追渲染器中最核心的 GPU 资源生命周期部分：
//! - [`descriptors::descriptor_allocator::DescriptorAllocator`]：可增长的描述符池分配器
//! - [`raytracing::acceleration::GfxAcceleration`]：加速结构及其同步构建
//! - [`resources::buffer::GfxBuffer`]：RAII 的 GPU buffer
//!
//! 所有设备访问都通过 [`device::GfxDevice`] 完成：
//! 运行时使用 [`foundation::vulkan_device::VulkanDevice`]，测试时使用 `mock::MockDevice`。

pub mod commands;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod foundation;
pub mod raytracing;
pub mod resources;

#[cfg(any(test, feature = "mock"))]
pub mod mock;
