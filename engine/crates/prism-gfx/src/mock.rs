//! 用于测试的 [`GfxDevice`] 实现
//!
//! 不访问任何 GPU，只伪造句柄和 device address，并且按照顺序记录所有的调用。
//! - descriptor pool 的 set 数量以及各类型 descriptor 的数量都会被检查
//! - buffer 的内容会被模拟，copy 命令会真正复制数据，TLAS 构建时可以读回 instance 数组
//! - 支持注入错误：descriptor 分配失败、按 usage 的 buffer 分配失败、提交失败、尺寸查询为 0

use std::{
    cell::RefCell,
    collections::HashMap,
    rc::Rc,
};

use ash::vk::{self, Handle};

use crate::{
    commands::barrier::GfxBarrierMask,
    device::{GfxBufferCreateInfo, GfxCommands, GfxDevice, GfxMemoryLocation, GfxRawBuffer},
    error::{GfxError, GfxResult},
    raytracing::{
        build_info::{GfxAccelBuildDesc, GfxAccelBuildSizes, GfxAccelGeometry, GfxAccelKind},
        instance::GfxInstanceRecord,
    },
};

/// MockDevice 记录下来的调用
#[derive(Clone, Debug, PartialEq)]
pub enum MockCall {
    CreateBuffer {
        buffer: vk::Buffer,
        name: String,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    },
    DestroyBuffer {
        buffer: vk::Buffer,
        name: String,
    },
    WriteBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    },
    CreateDescriptorPool {
        pool: vk::DescriptorPool,
        max_sets: u32,
        name: String,
    },
    AllocateDescriptorSet {
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        result: Result<vk::DescriptorSet, vk::Result>,
    },
    ResetDescriptorPool(vk::DescriptorPool),
    DestroyDescriptorPool(vk::DescriptorPool),
    CreateDescriptorSetLayout {
        layout: vk::DescriptorSetLayout,
        name: String,
    },
    DestroyDescriptorSetLayout(vk::DescriptorSetLayout),
    WriteAccelerationDescriptor {
        set: vk::DescriptorSet,
        binding: u32,
        acceleration: vk::AccelerationStructureKHR,
    },
    GetBuildSizes {
        kind: GfxAccelKind,
        primitive_counts: Vec<u32>,
    },
    CreateAcceleration {
        acceleration: vk::AccelerationStructureKHR,
        kind: GfxAccelKind,
        buffer: vk::Buffer,
        size: vk::DeviceSize,
        name: String,
    },
    DestroyAcceleration(vk::AccelerationStructureKHR),

    // 以下为 command buffer 中的命令，只有在提交成功后才会被记录
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    },
    BuildAcceleration {
        kind: GfxAccelKind,
        dst: vk::AccelerationStructureKHR,
        primitive_counts: Vec<u32>,
        scratch_address: vk::DeviceAddress,
        /// TLAS 构建时 instance buffer 中的内容
        instances: Vec<GfxInstanceRecord>,
    },
    MemoryBarrier(GfxBarrierMask),
    Submit {
        name: String,
    },
}

pub struct MockAllocation {
    buffer: vk::Buffer,
}

struct MockBuffer {
    name: String,
    usage: vk::BufferUsageFlags,
    location: GfxMemoryLocation,
    device_address: Option<vk::DeviceAddress>,
    contents: Vec<u8>,
}

struct MockDescriptorPool {
    max_sets: u32,
    capacity: HashMap<vk::DescriptorType, u32>,
    used: HashMap<vk::DescriptorType, u32>,
    live_sets: u32,
}

#[derive(Default)]
struct MockState {
    next_handle: u64,
    next_address: vk::DeviceAddress,

    calls: Vec<MockCall>,

    buffers: HashMap<vk::Buffer, MockBuffer>,
    accelerations: HashMap<vk::AccelerationStructureKHR, vk::DeviceAddress>,
    pools: HashMap<vk::DescriptorPool, MockDescriptorPool>,
    /// 按照创建顺序
    pool_order: Vec<vk::DescriptorPool>,
    layouts: HashMap<vk::DescriptorSetLayout, Vec<(vk::DescriptorType, u32)>>,
    descriptor_writes: HashMap<(vk::DescriptorSet, u32), vk::AccelerationStructureKHR>,

    // 错误注入
    descriptor_failures: Vec<vk::Result>,
    buffer_failure: Option<(vk::BufferUsageFlags, vk::Result)>,
    submit_failure: Option<vk::Result>,
    zero_build_sizes: bool,
}

impl MockState {
    fn new_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn new_address(&mut self, size: vk::DeviceSize, align: vk::DeviceSize) -> vk::DeviceAddress {
        let align = align.max(MockDevice::ADDRESS_ALIGNMENT);
        let address = self.next_address.div_ceil(align) * align;
        self.next_address = address + size.max(1);
        address
    }

    /// 包含 `address` 的 buffer
    fn buffer_at(&self, address: vk::DeviceAddress) -> Option<&MockBuffer> {
        self.buffers.values().find(|buffer| {
            buffer
                .device_address
                .is_some_and(|start| start <= address && address < start + buffer.contents.len() as u64)
        })
    }

    fn execute(&mut self, command: MockCall) {
        match &command {
            MockCall::CopyBuffer { src, dst, size } => {
                let data = self.buffers.get(src).map(|buffer| buffer.contents[..*size as usize].to_vec());
                if let (Some(data), Some(dst)) = (data, self.buffers.get_mut(dst)) {
                    dst.contents[..data.len()].copy_from_slice(&data);
                }
            }
            MockCall::BuildAcceleration { .. } | MockCall::MemoryBarrier(_) => {}
            _ => unreachable!("not a command: {command:?}"),
        }
        self.calls.push(command);
    }

    fn read_instances(&self, data_address: vk::DeviceAddress, count: u32) -> Vec<GfxInstanceRecord> {
        let Some(buffer) = self.buffer_at(data_address) else {
            return Vec::new();
        };
        let offset = (data_address - buffer.device_address.unwrap_or_default()) as usize;
        let record_size = size_of::<GfxInstanceRecord>();
        (0..count as usize)
            .filter_map(|i| buffer.contents.get(offset + i * record_size..offset + (i + 1) * record_size))
            .map(bytemuck::pod_read_unaligned)
            .collect()
    }
}

/// 用于测试的设备
#[derive(Default)]
pub struct MockDevice {
    state: Rc<RefCell<MockState>>,
}

impl MockDevice {
    pub const SCRATCH_ALIGNMENT: vk::DeviceSize = 128;
    pub const ADDRESS_ALIGNMENT: vk::DeviceSize = 256;

    pub fn new() -> Self {
        let device = Self::default();
        device.state.borrow_mut().next_address = 0x1000_0000;
        device
    }
}
// 错误注入
impl MockDevice {
    /// 接下来的 `count` 次 descriptor set 分配都以 `result` 失败
    pub fn fail_descriptor_allocations(&self, count: usize, result: vk::Result) {
        self.state.borrow_mut().descriptor_failures.extend(std::iter::repeat_n(result, count));
    }

    /// 下一次 usage 包含 `usage` 的 buffer 创建以 `result` 失败
    pub fn fail_next_buffer_with_usage(&self, usage: vk::BufferUsageFlags, result: vk::Result) {
        self.state.borrow_mut().buffer_failure = Some((usage, result));
    }

    /// 下一次 one-time 提交失败，录制的命令不会执行
    pub fn fail_next_submit(&self, result: vk::Result) {
        self.state.borrow_mut().submit_failure = Some(result);
    }

    /// 尺寸查询返回 0，模拟设备不支持该几何
    pub fn set_zero_build_sizes(&self, zero: bool) {
        self.state.borrow_mut().zero_build_sizes = zero;
    }
}
// 查询
impl MockDevice {
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    pub fn live_buffer_count(&self) -> usize {
        self.state.borrow().buffers.len()
    }

    /// 所有存活 buffer 的 debug name
    pub fn live_buffer_names(&self) -> Vec<String> {
        let mut names = self.state.borrow().buffers.values().map(|buffer| buffer.name.clone()).collect::<Vec<_>>();
        names.sort();
        names
    }

    pub fn live_acceleration_count(&self) -> usize {
        self.state.borrow().accelerations.len()
    }

    pub fn is_acceleration_alive(&self, acceleration: vk::AccelerationStructureKHR) -> bool {
        self.state.borrow().accelerations.contains_key(&acceleration)
    }

    pub fn live_descriptor_pool_count(&self) -> usize {
        self.state.borrow().pools.len()
    }

    /// 存活的 descriptor pool，按照创建顺序
    pub fn descriptor_pools(&self) -> Vec<vk::DescriptorPool> {
        let state = self.state.borrow();
        state.pool_order.iter().copied().filter(|pool| state.pools.contains_key(pool)).collect()
    }

    pub fn live_descriptor_sets(&self, pool: vk::DescriptorPool) -> u32 {
        self.state.borrow().pools.get(&pool).map_or(0, |pool| pool.live_sets)
    }

    /// 最近一次写入到 (set, binding) 的加速结构
    pub fn acceleration_descriptor(&self, set: vk::DescriptorSet, binding: u32) -> Option<vk::AccelerationStructureKHR> {
        self.state.borrow().descriptor_writes.get(&(set, binding)).copied()
    }

    /// 指定类型的加速结构构建次数
    pub fn build_count(&self, kind: GfxAccelKind) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|call| matches!(call, MockCall::BuildAcceleration { kind: k, .. } if *k == kind))
            .count()
    }
}

impl GfxDevice for MockDevice {
    type Allocation = MockAllocation;
    type Commands = MockCommands;

    fn create_buffer(
        &self,
        info: &GfxBufferCreateInfo,
        debug_name: &str,
    ) -> GfxResult<GfxRawBuffer<Self::Allocation>> {
        let mut state = self.state.borrow_mut();

        if let Some((usage, result)) = state.buffer_failure {
            if info.usage.contains(usage) {
                state.buffer_failure = None;
                return Err(GfxError::buffer_allocation(debug_name, info.size, info.usage, result));
            }
        }

        let handle = vk::Buffer::from_raw(state.new_handle());
        let device_address = info
            .usage
            .contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS)
            .then(|| state.new_address(info.size, info.alignment.unwrap_or(8)));

        state.buffers.insert(
            handle,
            MockBuffer {
                name: debug_name.to_string(),
                usage: info.usage,
                location: info.location,
                device_address,
                contents: vec![0; info.size as usize],
            },
        );
        state.calls.push(MockCall::CreateBuffer {
            buffer: handle,
            name: debug_name.to_string(),
            size: info.size,
            usage: info.usage,
        });

        Ok(GfxRawBuffer {
            handle,
            allocation: MockAllocation { buffer: handle },
            device_address,
        })
    }

    fn destroy_buffer(&self, buffer: vk::Buffer, allocation: Self::Allocation) {
        let mut state = self.state.borrow_mut();
        assert_eq!(buffer, allocation.buffer, "allocation does not belong to buffer");
        let removed = state.buffers.remove(&buffer);
        let name = removed.map(|buffer| buffer.name).unwrap_or_default();
        state.calls.push(MockCall::DestroyBuffer { buffer, name });
    }

    fn write_buffer(
        &self,
        buffer: vk::Buffer,
        allocation: &mut Self::Allocation,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> GfxResult<()> {
        let mut state = self.state.borrow_mut();
        assert_eq!(buffer, allocation.buffer, "allocation does not belong to buffer");

        let target = state.buffers.get_mut(&buffer).ok_or(GfxError::Vulkan {
            call: "vmaMapMemory",
            result: vk::Result::ERROR_MEMORY_MAP_FAILED,
        })?;
        let start = offset as usize;
        let end = start + data.len();
        if target.location != GfxMemoryLocation::HostVisible || end > target.contents.len() {
            return Err(GfxError::Vulkan {
                call: "vmaMapMemory",
                result: vk::Result::ERROR_MEMORY_MAP_FAILED,
            });
        }
        target.contents[start..end].copy_from_slice(data);

        state.calls.push(MockCall::WriteBuffer {
            buffer,
            offset,
            size: data.len() as vk::DeviceSize,
        });
        Ok(())
    }

    fn min_scratch_alignment(&self) -> vk::DeviceSize {
        Self::SCRATCH_ALIGNMENT
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
        debug_name: &str,
    ) -> GfxResult<vk::DescriptorPool> {
        let mut state = self.state.borrow_mut();
        let pool = vk::DescriptorPool::from_raw(state.new_handle());

        let mut capacity = HashMap::new();
        for size in pool_sizes {
            *capacity.entry(size.ty).or_insert(0) += size.descriptor_count;
        }
        state.pools.insert(
            pool,
            MockDescriptorPool {
                max_sets,
                capacity,
                used: HashMap::new(),
                live_sets: 0,
            },
        );
        state.pool_order.push(pool);
        state.calls.push(MockCall::CreateDescriptorPool {
            pool,
            max_sets,
            name: debug_name.to_string(),
        });
        Ok(pool)
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet, vk::Result> {
        let mut state = self.state.borrow_mut();

        let result = if !state.descriptor_failures.is_empty() {
            Err(state.descriptor_failures.remove(0))
        } else {
            let bindings = state.layouts.get(&layout).cloned().unwrap_or_default();
            let set = vk::DescriptorSet::from_raw(state.next_handle + 1);
            match state.pools.get_mut(&pool) {
                None => Err(vk::Result::ERROR_UNKNOWN),
                Some(target) => {
                    let fits = target.live_sets < target.max_sets
                        && bindings.iter().all(|(ty, count)| {
                            let used = target.used.get(ty).copied().unwrap_or(0);
                            used + count <= target.capacity.get(ty).copied().unwrap_or(0)
                        });
                    if fits {
                        target.live_sets += 1;
                        for (ty, count) in &bindings {
                            *target.used.entry(*ty).or_insert(0) += count;
                        }
                        Ok(set)
                    } else {
                        Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY)
                    }
                }
            }
        };
        if result.is_ok() {
            state.next_handle += 1;
        }

        state.calls.push(MockCall::AllocateDescriptorSet { pool, layout, result });
        result
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> GfxResult<()> {
        let mut state = self.state.borrow_mut();
        if let Some(target) = state.pools.get_mut(&pool) {
            target.live_sets = 0;
            target.used.clear();
        }
        state.calls.push(MockCall::ResetDescriptorPool(pool));
        Ok(())
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut state = self.state.borrow_mut();
        state.pools.remove(&pool);
        state.calls.push(MockCall::DestroyDescriptorPool(pool));
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
        debug_name: &str,
    ) -> GfxResult<vk::DescriptorSetLayout> {
        let mut state = self.state.borrow_mut();
        let layout = vk::DescriptorSetLayout::from_raw(state.new_handle());
        let counts = bindings.iter().map(|binding| (binding.descriptor_type, binding.descriptor_count)).collect();
        state.layouts.insert(layout, counts);
        state.calls.push(MockCall::CreateDescriptorSetLayout {
            layout,
            name: debug_name.to_string(),
        });
        Ok(layout)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        let mut state = self.state.borrow_mut();
        state.layouts.remove(&layout);
        state.calls.push(MockCall::DestroyDescriptorSetLayout(layout));
    }

    fn write_acceleration_structure_descriptor(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        acceleration: vk::AccelerationStructureKHR,
    ) {
        let mut state = self.state.borrow_mut();
        state.descriptor_writes.insert((set, binding), acceleration);
        state.calls.push(MockCall::WriteAccelerationDescriptor {
            set,
            binding,
            acceleration,
        });
    }

    fn get_acceleration_structure_build_sizes(&self, build: &GfxAccelBuildDesc) -> GfxAccelBuildSizes {
        let mut state = self.state.borrow_mut();
        let primitive_counts = build.max_primitive_counts();
        state.calls.push(MockCall::GetBuildSizes {
            kind: build.kind,
            primitive_counts: primitive_counts.clone(),
        });

        if state.zero_build_sizes {
            return GfxAccelBuildSizes::default();
        }
        let primitives: u64 = primitive_counts.iter().map(|count| *count as u64).sum();
        GfxAccelBuildSizes {
            acceleration_structure_size: 256 + 64 * primitives,
            build_scratch_size: 128 + 32 * primitives,
            update_scratch_size: 0,
        }
    }

    fn create_acceleration_structure(
        &self,
        kind: GfxAccelKind,
        buffer: vk::Buffer,
        size: vk::DeviceSize,
        debug_name: &str,
    ) -> GfxResult<vk::AccelerationStructureKHR> {
        let mut state = self.state.borrow_mut();
        let address = state
            .buffers
            .get(&buffer)
            .filter(|buffer| buffer.usage.contains(vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR))
            .and_then(|buffer| buffer.device_address)
            .ok_or(GfxError::Vulkan {
                call: "vkCreateAccelerationStructureKHR",
                result: vk::Result::ERROR_INITIALIZATION_FAILED,
            })?;

        let acceleration = vk::AccelerationStructureKHR::from_raw(state.new_handle());
        state.accelerations.insert(acceleration, address);
        state.calls.push(MockCall::CreateAcceleration {
            acceleration,
            kind,
            buffer,
            size,
            name: debug_name.to_string(),
        });
        Ok(acceleration)
    }

    fn acceleration_structure_device_address(&self, acceleration: vk::AccelerationStructureKHR) -> vk::DeviceAddress {
        self.state.borrow().accelerations.get(&acceleration).copied().unwrap_or_default()
    }

    fn destroy_acceleration_structure(&self, acceleration: vk::AccelerationStructureKHR) {
        let mut state = self.state.borrow_mut();
        state.accelerations.remove(&acceleration);
        state.calls.push(MockCall::DestroyAcceleration(acceleration));
    }

    fn one_time_exec<R, F>(&self, name: &str, func: F) -> GfxResult<R>
    where
        F: FnOnce(&Self::Commands) -> R,
    {
        let commands = MockCommands {
            recorded: RefCell::new(Vec::new()),
        };
        let ret = func(&commands);

        let mut state = self.state.borrow_mut();
        if let Some(result) = state.submit_failure.take() {
            return Err(GfxError::Vulkan {
                call: "vkQueueSubmit",
                result,
            });
        }

        for command in commands.recorded.into_inner() {
            let command = match command {
                MockCommand::Call(call) => call,
                MockCommand::Build {
                    build,
                    dst,
                    scratch_address,
                } => {
                    let instances = build
                        .geometries
                        .iter()
                        .map(|geometry| match geometry {
                            GfxAccelGeometry::Instances {
                                data_address,
                                instance_count,
                            } => state.read_instances(*data_address, *instance_count),
                            GfxAccelGeometry::Triangles(_) => Vec::new(),
                        })
                        .collect::<Vec<_>>()
                        .concat();
                    MockCall::BuildAcceleration {
                        kind: build.kind,
                        dst,
                        primitive_counts: build.max_primitive_counts(),
                        scratch_address,
                        instances,
                    }
                }
            };
            state.execute(command);
        }
        state.calls.push(MockCall::Submit { name: name.to_string() });

        Ok(ret)
    }
}

enum MockCommand {
    Call(MockCall),
    Build {
        build: GfxAccelBuildDesc,
        dst: vk::AccelerationStructureKHR,
        scratch_address: vk::DeviceAddress,
    },
}

/// 录制的命令在提交成功之后才会执行
pub struct MockCommands {
    recorded: RefCell<Vec<MockCommand>>,
}

impl GfxCommands for MockCommands {
    fn cmd_copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        let mut recorded = self.recorded.borrow_mut();
        for region in regions {
            assert_eq!(region.src_offset, 0, "mock only supports copies from offset 0");
            assert_eq!(region.dst_offset, 0, "mock only supports copies to offset 0");
            recorded.push(MockCommand::Call(MockCall::CopyBuffer {
                src,
                dst,
                size: region.size,
            }));
        }
    }

    fn cmd_build_acceleration_structure(
        &self,
        build: &GfxAccelBuildDesc,
        dst: vk::AccelerationStructureKHR,
        scratch_address: vk::DeviceAddress,
    ) {
        self.recorded.borrow_mut().push(MockCommand::Build {
            build: build.clone(),
            dst,
            scratch_address,
        });
    }

    fn cmd_memory_barrier(&self, mask: GfxBarrierMask) {
        self.recorded.borrow_mut().push(MockCommand::Call(MockCall::MemoryBarrier(mask)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_address_only_with_usage() {
        let device = MockDevice::new();
        let info = GfxBufferCreateInfo {
            size: 64,
            usage: vk::BufferUsageFlags::TRANSFER_SRC,
            location: GfxMemoryLocation::HostVisible,
            alignment: None,
        };
        let stage = device.create_buffer(&info, "stage").unwrap();
        assert_eq!(stage.device_address, None);

        let info = GfxBufferCreateInfo {
            usage: vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            location: GfxMemoryLocation::DeviceLocal,
            alignment: Some(1024),
            ..info
        };
        let storage = device.create_buffer(&info, "storage").unwrap();
        assert_eq!(storage.device_address.unwrap() % 1024, 0);

        device.destroy_buffer(stage.handle, stage.allocation);
        device.destroy_buffer(storage.handle, storage.allocation);
        assert_eq!(device.live_buffer_count(), 0);
    }

    #[test]
    fn test_buffer_failure_by_usage() {
        let device = MockDevice::new();
        device.fail_next_buffer_with_usage(
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
        );
        let stage_info = GfxBufferCreateInfo {
            size: 16,
            usage: vk::BufferUsageFlags::TRANSFER_SRC,
            location: GfxMemoryLocation::HostVisible,
            alignment: None,
        };
        // usage 不匹配，不会失败
        let stage = device.create_buffer(&stage_info, "stage").unwrap();
        device.destroy_buffer(stage.handle, stage.allocation);

        let storage_info = GfxBufferCreateInfo {
            usage: vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR,
            location: GfxMemoryLocation::DeviceLocal,
            ..stage_info
        };
        let err = device.create_buffer(&storage_info, "blas").err().unwrap();
        assert!(matches!(err, GfxError::DeviceMemoryExhaustion { size: 16, .. }));
        assert!(device.create_buffer(&storage_info, "blas").is_ok());
    }

    #[test]
    fn test_failed_submit_discards_commands() {
        let device = MockDevice::new();
        device.fail_next_submit(vk::Result::ERROR_DEVICE_LOST);
        let result = device.one_time_exec("barrier", |cmd| {
            cmd.cmd_memory_barrier(GfxBarrierMask::acceleration_build_to_read());
        });
        assert!(matches!(result, Err(GfxError::Vulkan { call: "vkQueueSubmit", .. })));
        assert!(device.calls().is_empty());

        device.one_time_exec("barrier", |cmd| {
            cmd.cmd_memory_barrier(GfxBarrierMask::acceleration_build_to_read());
        })
        .unwrap();
        assert_eq!(device.calls().len(), 2);
    }
}
