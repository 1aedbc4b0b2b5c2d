//! 可增长的描述符分配器
//!
//! 单个 descriptor pool 的容量在创建时就固定了，分配器维护一组 pool：
//! - `ready_pools`：还有剩余空间的 pool，按照 LIFO 的顺序使用，优先复用最近使用过的 pool
//! - `full_pools`：已经分配满的 pool，直到 [`DescriptorAllocator::reset_pools`] 之前都不会再使用
//!
//! 每次新建 pool 之后，下一个 pool 的容量按照 `growth_factor` 增长，并且不超过 `sets_per_pool_ceiling`。

use std::rc::Rc;

use ash::vk;

use crate::{
    descriptors::descriptor_config::DescriptorAllocatorConfig,
    device::GfxDevice,
    error::{GfxError, GfxResult},
};

#[derive(Copy, Clone, Debug)]
struct DescriptorPoolSlot {
    handle: vk::DescriptorPool,
    /// 创建时的 set 容量
    capacity: u32,
}

pub struct DescriptorAllocator<D: GfxDevice> {
    config: DescriptorAllocatorConfig,

    ready_pools: Vec<DescriptorPoolSlot>,
    full_pools: Vec<DescriptorPoolSlot>,

    /// 下一个新建 pool 的 set 容量，只增不减
    sets_per_pool: u32,
    /// 已经创建过的 pool 数量，用于 debug name
    created_pools: usize,

    name: String,
    device: Rc<D>,
}

// init & destroy
impl<D: GfxDevice> DescriptorAllocator<D> {
    /// 创建分配器，同时创建第一个容量为 `max_sets_per_pool` 的 pool
    pub fn new(device: &Rc<D>, config: &DescriptorAllocatorConfig, name: impl AsRef<str>) -> GfxResult<Self> {
        config.validate()?;

        let mut allocator = Self {
            config: config.clone(),
            ready_pools: Vec::new(),
            full_pools: Vec::new(),
            sets_per_pool: config.max_sets_per_pool,
            created_pools: 0,
            name: name.as_ref().to_string(),
            device: device.clone(),
        };

        let first_pool = allocator.create_pool(config.max_sets_per_pool)?;
        allocator.ready_pools.push(first_pool);
        allocator.sets_per_pool = config.grow(config.max_sets_per_pool);

        Ok(allocator)
    }

    /// 销毁所有的 pool，之后依然可以继续分配，会以当前的 `sets_per_pool` 创建新的 pool
    pub fn clear_pools(&mut self) {
        let pool_count = self.total_pool_count();
        for pool in self.ready_pools.drain(..).chain(self.full_pools.drain(..)) {
            self.device.destroy_descriptor_pool(pool.handle);
        }
        if pool_count > 0 {
            log::info!("DescriptorAllocator '{}': destroyed {} pools", self.name, pool_count);
        }
    }
}
impl<D: GfxDevice> Drop for DescriptorAllocator<D> {
    fn drop(&mut self) {
        self.clear_pools();
    }
}
// tools
impl<D: GfxDevice> DescriptorAllocator<D> {
    /// 分配一个 descriptor set
    ///
    /// 当前 pool 耗尽或者碎片化时，会将其标记为 full，换一个 pool 再尝试一次；
    /// 第二次依然失败则返回 [`GfxError::ResourceExhaustion`]
    pub fn allocate(&mut self, layout: vk::DescriptorSetLayout) -> GfxResult<vk::DescriptorSet> {
        let _span = tracy_client::span!("DescriptorAllocator::allocate");

        let pool = self.get_pool()?;
        let result = match self.device.allocate_descriptor_set(pool.handle, layout) {
            Ok(set) => {
                self.ready_pools.push(pool);
                return Ok(set);
            }
            Err(result) if GfxError::is_pool_exhausted(result) => result,
            Err(result) => {
                self.ready_pools.push(pool);
                return Err(Self::map_device_error(result));
            }
        };

        let exhausted = GfxError::PoolExhausted {
            pool: pool.handle,
            capacity: pool.capacity,
            result,
        };
        log::debug!("DescriptorAllocator '{}': {}, retry with another pool", self.name, exhausted);
        self.full_pools.push(pool);

        let retry_pool = self.get_pool()?;
        match self.device.allocate_descriptor_set(retry_pool.handle, layout) {
            Ok(set) => {
                self.ready_pools.push(retry_pool);
                Ok(set)
            }
            Err(result) => {
                if GfxError::is_pool_exhausted(result) {
                    self.full_pools.push(retry_pool);
                } else {
                    self.ready_pools.push(retry_pool);
                }
                let err = GfxError::ResourceExhaustion {
                    layout,
                    sets_per_pool: self.sets_per_pool,
                    full_pools: self.full_pools.len(),
                    result,
                };
                log::error!("DescriptorAllocator '{}': {}", self.name, err);
                Err(err)
            }
        }
    }

    /// 回收所有 pool 中的 descriptor set，full pool 重新变为可用
    ///
    /// full pool 追加在 ready pool 之后，因此下一次分配会优先使用之前已满的 pool
    pub fn reset_pools(&mut self) -> GfxResult<()> {
        let _span = tracy_client::span!("DescriptorAllocator::reset_pools");

        for pool in self.ready_pools.iter().chain(self.full_pools.iter()) {
            self.device.reset_descriptor_pool(pool.handle)?;
        }
        self.ready_pools.append(&mut self.full_pools);
        Ok(())
    }

    /// ready pool 中弹出一个，没有的话创建一个新的 pool 并增长下一次的容量
    fn get_pool(&mut self) -> GfxResult<DescriptorPoolSlot> {
        if let Some(pool) = self.ready_pools.pop() {
            return Ok(pool);
        }

        let pool = self.create_pool(self.sets_per_pool)?;
        self.sets_per_pool = self.config.grow(self.sets_per_pool);
        Ok(pool)
    }

    fn create_pool(&mut self, sets: u32) -> GfxResult<DescriptorPoolSlot> {
        let pool_sizes = self.config.pool_sizes(sets);
        let debug_name = format!("{}-pool-{}", self.name, self.created_pools);
        let handle = self.device.create_descriptor_pool(sets, &pool_sizes, &debug_name)?;
        self.created_pools += 1;

        log::info!("DescriptorAllocator '{}': created pool {} with {} sets", self.name, debug_name, sets);
        Ok(DescriptorPoolSlot { handle, capacity: sets })
    }

    fn map_device_error(result: vk::Result) -> GfxError {
        if GfxError::is_out_of_memory(result) {
            GfxError::DeviceMemoryExhaustion {
                name: "descriptor set".to_string(),
                size: 0,
                usage: vk::BufferUsageFlags::empty(),
                result,
            }
        } else {
            GfxError::Vulkan {
                call: "vkAllocateDescriptorSets",
                result,
            }
        }
    }
}
// getter
impl<D: GfxDevice> DescriptorAllocator<D> {
    #[inline]
    pub fn sets_per_pool(&self) -> u32 {
        self.sets_per_pool
    }

    #[inline]
    pub fn ready_pool_count(&self) -> usize {
        self.ready_pools.len()
    }

    #[inline]
    pub fn full_pool_count(&self) -> usize {
        self.full_pools.len()
    }

    #[inline]
    pub fn total_pool_count(&self) -> usize {
        self.ready_pools.len() + self.full_pools.len()
    }

    #[inline]
    pub fn config(&self) -> &DescriptorAllocatorConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        descriptors::descriptor_config::{GfxDescriptorKind, PoolSizeRatio},
        mock::{MockCall, MockDevice},
    };

    fn small_config() -> DescriptorAllocatorConfig {
        DescriptorAllocatorConfig {
            max_sets_per_pool: 4,
            growth_factor: 1.5,
            sets_per_pool_ceiling: 10,
            pool_ratios: vec![PoolSizeRatio::new(GfxDescriptorKind::AccelerationStructure, 1.0)],
        }
    }

    fn tlas_layout(device: &MockDevice) -> vk::DescriptorSetLayout {
        let binding = vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::RAYGEN_KHR);
        device.create_descriptor_set_layout(std::slice::from_ref(&binding), "tlas-layout").unwrap()
    }

    fn created_pool_capacities(device: &MockDevice) -> Vec<u32> {
        device
            .calls()
            .iter()
            .filter_map(|call| match call {
                MockCall::CreateDescriptorPool { max_sets, .. } => Some(*max_sets),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_pool_growth_is_monotonic_and_clamped() {
        let device = Rc::new(MockDevice::new());
        let layout = tlas_layout(&device);
        let mut allocator = DescriptorAllocator::new(&device, &small_config(), "test").unwrap();

        // 4 + 6 + 9 + 10 + 10 个 set 正好填满 5 个 pool
        for _ in 0..39 {
            allocator.allocate(layout).unwrap();
        }
        assert_eq!(created_pool_capacities(&device), vec![4, 6, 9, 10, 10]);
        assert_eq!(allocator.sets_per_pool(), 10);
        assert_eq!(allocator.total_pool_count(), 5);
    }

    #[test]
    fn test_exhausted_pool_moves_to_full() {
        let device = Rc::new(MockDevice::new());
        let layout = tlas_layout(&device);
        let mut allocator = DescriptorAllocator::new(&device, &small_config(), "test").unwrap();

        for _ in 0..5 {
            allocator.allocate(layout).unwrap();
        }
        assert_eq!(allocator.full_pool_count(), 1);
        assert_eq!(allocator.ready_pool_count(), 1);
    }

    #[test]
    fn test_reset_then_reuse() {
        let device = Rc::new(MockDevice::new());
        let layout = tlas_layout(&device);
        let mut allocator = DescriptorAllocator::new(&device, &small_config(), "test").unwrap();

        for _ in 0..5 {
            allocator.allocate(layout).unwrap();
        }
        let pools = device.descriptor_pools();
        let (first_pool, second_pool) = (pools[0], pools[1]);

        allocator.reset_pools().unwrap();
        assert_eq!(allocator.full_pool_count(), 0);
        assert_eq!(allocator.ready_pool_count(), 2);
        assert_eq!(device.live_descriptor_sets(first_pool), 0);
        assert_eq!(device.live_descriptor_sets(second_pool), 0);

        device.clear_calls();
        allocator.allocate(layout).unwrap();

        // 优先从之前已满的 pool 中分配，没有创建新的 pool
        assert!(created_pool_capacities(&device).is_empty());
        assert_eq!(device.live_descriptor_sets(first_pool), 1);
        assert_eq!(device.live_descriptor_sets(second_pool), 0);
    }

    #[test]
    fn test_retry_exhaustion_is_fatal() {
        let device = Rc::new(MockDevice::new());
        let layout = tlas_layout(&device);
        let mut allocator = DescriptorAllocator::new(&device, &small_config(), "test").unwrap();

        device.fail_descriptor_allocations(2, vk::Result::ERROR_FRAGMENTED_POOL);
        let err = allocator.allocate(layout).unwrap_err();
        match err {
            GfxError::ResourceExhaustion {
                layout: failed_layout,
                result,
                ..
            } => {
                assert_eq!(failed_layout, layout);
                assert_eq!(result, vk::Result::ERROR_FRAGMENTED_POOL);
            }
            other => panic!("unexpected error: {other}"),
        }

        let attempts = device
            .calls()
            .iter()
            .filter(|call| matches!(call, MockCall::AllocateDescriptorSet { .. }))
            .count();
        assert_eq!(attempts, 2);
        assert_eq!(allocator.full_pool_count(), 2);
    }

    #[test]
    fn test_single_failure_is_recovered() {
        let device = Rc::new(MockDevice::new());
        let layout = tlas_layout(&device);
        let mut allocator = DescriptorAllocator::new(&device, &small_config(), "test").unwrap();

        device.fail_descriptor_allocations(1, vk::Result::ERROR_OUT_OF_POOL_MEMORY);
        allocator.allocate(layout).unwrap();
        assert_eq!(allocator.full_pool_count(), 1);
        assert_eq!(created_pool_capacities(&device), vec![4, 6]);
    }

    #[test]
    fn test_other_device_error_is_not_retried() {
        let device = Rc::new(MockDevice::new());
        let layout = tlas_layout(&device);
        let mut allocator = DescriptorAllocator::new(&device, &small_config(), "test").unwrap();

        device.fail_descriptor_allocations(1, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let err = allocator.allocate(layout).unwrap_err();
        assert!(matches!(err, GfxError::DeviceMemoryExhaustion { .. }));
        assert_eq!(allocator.full_pool_count(), 0);
        assert_eq!(allocator.ready_pool_count(), 1);
    }

    #[test]
    fn test_clear_pools_and_drop() {
        let device = Rc::new(MockDevice::new());
        let layout = tlas_layout(&device);
        {
            let mut allocator = DescriptorAllocator::new(&device, &small_config(), "test").unwrap();
            for _ in 0..5 {
                allocator.allocate(layout).unwrap();
            }
            allocator.clear_pools();
            assert_eq!(allocator.total_pool_count(), 0);
            assert_eq!(device.live_descriptor_pool_count(), 0);

            // 清空之后依然可以分配，新 pool 使用当前的容量
            device.clear_calls();
            allocator.allocate(layout).unwrap();
            assert_eq!(created_pool_capacities(&device), vec![9]);
        }
        assert_eq!(device.live_descriptor_pool_count(), 0);
    }

    #[test]
    fn test_invalid_config() {
        let device = Rc::new(MockDevice::new());
        let config = DescriptorAllocatorConfig {
            growth_factor: 0.9,
            ..small_config()
        };
        assert!(matches!(DescriptorAllocator::new(&device, &config, "test"), Err(GfxError::InvalidConfig(_))));
        assert_eq!(device.live_descriptor_pool_count(), 0);
    }
}
