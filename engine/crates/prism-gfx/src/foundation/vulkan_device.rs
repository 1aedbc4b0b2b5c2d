//! [`GfxDevice`] 的 Vulkan 实现
//!
//! - buffer 通过 vk-mem 分配
//! - one-time command 使用独立的 transient command pool，提交后通过 fence 同步等待

use std::{mem::ManuallyDrop, ptr, rc::Rc};

use ash::vk;
use itertools::Itertools;
use vk_mem::Alloc;

use crate::{
    commands::barrier::GfxBarrierMask,
    device::{GfxBufferCreateInfo, GfxCommands, GfxDevice, GfxMemoryLocation, GfxRawBuffer},
    error::{GfxError, GfxResult},
    foundation::vulkan_core::{DeviceFunctions, GfxCore, GfxCoreCreateInfo},
    raytracing::build_info::{GfxAccelBuildDesc, GfxAccelBuildSizes, GfxAccelGeometry, GfxAccelKind},
};

pub struct VulkanDevice {
    /// 由于 vma 的生命周期设定：需要引用 Instance 以及 Device，
    /// 因此必须在 core 之前手动销毁
    allocator: ManuallyDrop<vk_mem::Allocator>,

    /// 临时的 graphics command pool，用于 one-time command buffer
    temp_command_pool: vk::CommandPool,
    /// one-time 提交使用的 fence
    submit_fence: vk::Fence,

    core: GfxCore,
}

// 创建与销毁
impl VulkanDevice {
    pub fn new(create_info: &GfxCoreCreateInfo) -> GfxResult<Self> {
        let core = GfxCore::new(create_info)?;
        let functions = core.device_functions.clone();
        let device = &functions.device;

        let mut vma_ci =
            vk_mem::AllocatorCreateInfo::new(&core.instance, device, core.physical_device.vk_handle);
        vma_ci.vulkan_api_version = vk::API_VERSION_1_3;
        vma_ci.flags = vk_mem::AllocatorCreateFlags::BUFFER_DEVICE_ADDRESS;
        let allocator = unsafe { vk_mem::Allocator::new(vma_ci) }.map_err(GfxError::vk_call("vmaCreateAllocator"))?;

        let temp_command_pool = unsafe {
            device.create_command_pool(
                &vk::CommandPoolCreateInfo::default()
                    .queue_family_index(core.physical_device.gfx_queue_family_index)
                    .flags(vk::CommandPoolCreateFlags::TRANSIENT),
                None,
            )
        }
        .map_err(GfxError::vk_call("vkCreateCommandPool"))?;
        functions.set_object_debug_name(temp_command_pool, "CommandPool::one-time");

        let submit_fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) }
            .map_err(GfxError::vk_call("vkCreateFence"));
        let submit_fence = match submit_fence {
            Ok(fence) => fence,
            Err(e) => {
                unsafe { device.destroy_command_pool(temp_command_pool, None) };
                return Err(e);
            }
        };
        functions.set_object_debug_name(submit_fence, "Fence::one-time");

        Ok(Self {
            allocator: ManuallyDrop::new(allocator),
            temp_command_pool,
            submit_fence,
            core,
        })
    }
}
impl Drop for VulkanDevice {
    fn drop(&mut self) {
        let device = &self.core.device_functions.device;
        unsafe {
            if let Err(e) = device.device_wait_idle() {
                log::error!("vkDeviceWaitIdle failed while destroying device: {}", e);
            }
            device.destroy_fence(self.submit_fence, None);
            device.destroy_command_pool(self.temp_command_pool, None);
            ManuallyDrop::drop(&mut self.allocator);
        }
        // core 在之后 drop，负责销毁 device 以及 instance
    }
}
// getter
impl VulkanDevice {
    #[inline]
    fn device(&self) -> &ash::Device {
        &self.core.device_functions.device
    }

    #[inline]
    fn functions(&self) -> &Rc<DeviceFunctions> {
        &self.core.device_functions
    }
}

/// 将自有的构建描述转换为 vk 结构体
fn to_vk_geometry(geometry: &GfxAccelGeometry) -> vk::AccelerationStructureGeometryKHR<'static> {
    match geometry {
        GfxAccelGeometry::Triangles(triangles) => {
            let mut data = vk::AccelerationStructureGeometryTrianglesDataKHR::default()
                .vertex_format(triangles.vertex_format)
                .vertex_data(vk::DeviceOrHostAddressConstKHR {
                    device_address: triangles.vertex_address,
                })
                .vertex_stride(triangles.vertex_stride)
                .max_vertex(triangles.max_vertex());
            data = match triangles.index {
                Some(index) => data.index_type(index.index_type).index_data(vk::DeviceOrHostAddressConstKHR {
                    device_address: index.address,
                }),
                None => data.index_type(vk::IndexType::NONE_KHR),
            };

            vk::AccelerationStructureGeometryKHR::default()
                .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
                .geometry(vk::AccelerationStructureGeometryDataKHR { triangles: data })
                .flags(triangles.flags)
        }
        GfxAccelGeometry::Instances { data_address, .. } => vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::INSTANCES)
            .geometry(vk::AccelerationStructureGeometryDataKHR {
                instances: vk::AccelerationStructureGeometryInstancesDataKHR::default()
                    // true: data 是 &[vk::AccelerationStructureInstanceKHR]
                    // false: data 是 &[&vk::AccelerationStructureInstanceKHR]
                    .array_of_pointers(false)
                    .data(vk::DeviceOrHostAddressConstKHR {
                        device_address: *data_address,
                    }),
            }),
    }
}

impl GfxDevice for VulkanDevice {
    type Allocation = vk_mem::Allocation;
    type Commands = VulkanCommands;

    fn create_buffer(
        &self,
        info: &GfxBufferCreateInfo,
        debug_name: &str,
    ) -> GfxResult<GfxRawBuffer<Self::Allocation>> {
        let buffer_ci = vk::BufferCreateInfo::default().size(info.size).usage(info.usage);
        let alloc_ci = match info.location {
            GfxMemoryLocation::DeviceLocal => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                ..Default::default()
            },
            GfxMemoryLocation::HostVisible => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferHost,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
                ..Default::default()
            },
        };

        let align = info.alignment.unwrap_or(8);
        let (handle, allocation) =
            unsafe { self.allocator.create_buffer_with_alignment(&buffer_ci, &alloc_ci, align) }
                .map_err(|result| GfxError::buffer_allocation(debug_name, info.size, info.usage, result))?;

        let device_address = info.usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS).then(|| unsafe {
            self.device().get_buffer_device_address(&vk::BufferDeviceAddressInfo::default().buffer(handle))
        });

        self.functions().set_object_debug_name(handle, format!("Buffer::{}", debug_name));
        Ok(GfxRawBuffer {
            handle,
            allocation,
            device_address,
        })
    }

    fn destroy_buffer(&self, buffer: vk::Buffer, mut allocation: Self::Allocation) {
        unsafe {
            self.allocator.destroy_buffer(buffer, &mut allocation);
        }
    }

    fn write_buffer(
        &self,
        _buffer: vk::Buffer,
        allocation: &mut Self::Allocation,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> GfxResult<()> {
        unsafe {
            let mapped_ptr = self.allocator.map_memory(allocation).map_err(GfxError::vk_call("vmaMapMemory"))?;
            ptr::copy_nonoverlapping(data.as_ptr(), mapped_ptr.add(offset as usize), data.len());
            self.allocator.unmap_memory(allocation);
        }
        self.allocator
            .flush_allocation(allocation, offset, data.len() as vk::DeviceSize)
            .map_err(GfxError::vk_call("vmaFlushAllocation"))
    }

    fn min_scratch_alignment(&self) -> vk::DeviceSize {
        self.core.physical_device.min_scratch_alignment()
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
        debug_name: &str,
    ) -> GfxResult<vk::DescriptorPool> {
        let pool_ci = vk::DescriptorPoolCreateInfo::default().max_sets(max_sets).pool_sizes(pool_sizes);
        let pool = unsafe { self.device().create_descriptor_pool(&pool_ci, None) }.map_err(|result| {
            if GfxError::is_out_of_memory(result) {
                GfxError::DeviceMemoryExhaustion {
                    name: debug_name.to_string(),
                    size: 0,
                    usage: vk::BufferUsageFlags::empty(),
                    result,
                }
            } else {
                GfxError::Vulkan {
                    call: "vkCreateDescriptorPool",
                    result,
                }
            }
        })?;
        self.functions().set_object_debug_name(pool, format!("DescriptorPool::{}", debug_name));
        Ok(pool)
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet, vk::Result> {
        let alloc_info =
            vk::DescriptorSetAllocateInfo::default().descriptor_pool(pool).set_layouts(std::slice::from_ref(&layout));
        let sets = unsafe { self.device().allocate_descriptor_sets(&alloc_info) }?;
        sets.into_iter().next().ok_or(vk::Result::ERROR_UNKNOWN)
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> GfxResult<()> {
        unsafe { self.device().reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty()) }
            .map_err(GfxError::vk_call("vkResetDescriptorPool"))
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device().destroy_descriptor_pool(pool, None) };
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
        debug_name: &str,
    ) -> GfxResult<vk::DescriptorSetLayout> {
        let layout_ci = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
        let layout = unsafe { self.device().create_descriptor_set_layout(&layout_ci, None) }
            .map_err(GfxError::vk_call("vkCreateDescriptorSetLayout"))?;
        self.functions().set_object_debug_name(layout, format!("DescriptorSetLayout::{}", debug_name));
        Ok(layout)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device().destroy_descriptor_set_layout(layout, None) };
    }

    fn write_acceleration_structure_descriptor(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        acceleration: vk::AccelerationStructureKHR,
    ) {
        let mut acc_write_info = vk::WriteDescriptorSetAccelerationStructureKHR::default()
            .acceleration_structures(std::slice::from_ref(&acceleration));
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(binding)
            .dst_array_element(0)
            .descriptor_count(1)
            .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
            .push_next(&mut acc_write_info);
        unsafe { self.device().update_descriptor_sets(std::slice::from_ref(&write), &[]) };
    }

    fn get_acceleration_structure_build_sizes(&self, build: &GfxAccelBuildDesc) -> GfxAccelBuildSizes {
        let geometries = build.geometries.iter().map(to_vk_geometry).collect_vec();
        // 使用部分完整的 AccelerationStructureBuildGeometryInfo 来查询所需的资源大小
        let build_geometry_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(build.kind.vk_type())
            .flags(build.flags)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(&geometries);

        let size_info = unsafe {
            let mut size_info = vk::AccelerationStructureBuildSizesInfoKHR::default();
            self.functions().acceleration_structure.get_acceleration_structure_build_sizes(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                &build_geometry_info,
                &build.max_primitive_counts(), // 每一个 geometry 里面的最大 primitive 数量
                &mut size_info,
            );
            size_info
        };

        GfxAccelBuildSizes {
            acceleration_structure_size: size_info.acceleration_structure_size,
            build_scratch_size: size_info.build_scratch_size,
            update_scratch_size: size_info.update_scratch_size,
        }
    }

    fn create_acceleration_structure(
        &self,
        kind: GfxAccelKind,
        buffer: vk::Buffer,
        size: vk::DeviceSize,
        debug_name: &str,
    ) -> GfxResult<vk::AccelerationStructureKHR> {
        let create_info = vk::AccelerationStructureCreateInfoKHR::default() //
            .ty(kind.vk_type())
            .size(size)
            .buffer(buffer);

        let acceleration =
            unsafe { self.functions().acceleration_structure.create_acceleration_structure(&create_info, None) }
                .map_err(GfxError::vk_call("vkCreateAccelerationStructureKHR"))?;
        self.functions().set_object_debug_name(acceleration, format!("Acceleration::{}", debug_name));
        Ok(acceleration)
    }

    fn acceleration_structure_device_address(&self, acceleration: vk::AccelerationStructureKHR) -> vk::DeviceAddress {
        unsafe {
            self.functions().acceleration_structure.get_acceleration_structure_device_address(
                &vk::AccelerationStructureDeviceAddressInfoKHR::default().acceleration_structure(acceleration),
            )
        }
    }

    fn destroy_acceleration_structure(&self, acceleration: vk::AccelerationStructureKHR) {
        unsafe {
            self.functions().acceleration_structure.destroy_acceleration_structure(acceleration, None);
        }
    }

    fn one_time_exec<R, F>(&self, name: &str, func: F) -> GfxResult<R>
    where
        F: FnOnce(&Self::Commands) -> R,
    {
        let _span = tracy_client::span!("VulkanDevice::one_time_exec");
        let device = self.device();

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.temp_command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { device.allocate_command_buffers(&alloc_info) }
            .map_err(GfxError::vk_call("vkAllocateCommandBuffers"))?[0];
        // 任何路径上都需要释放 command buffer
        let command_buffer = scopeguard::guard(command_buffer, |command_buffer| unsafe {
            device.free_command_buffers(self.temp_command_pool, &[command_buffer]);
        });
        self.functions().set_object_debug_name(*command_buffer, format!("CommandBuffer::one-time-{}", name));

        unsafe {
            device.begin_command_buffer(
                *command_buffer,
                &vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )
        }
        .map_err(GfxError::vk_call("vkBeginCommandBuffer"))?;

        let commands = VulkanCommands {
            command_buffer: *command_buffer,
            device_functions: self.functions().clone(),
        };
        let result = func(&commands);

        unsafe {
            device.end_command_buffer(*command_buffer).map_err(GfxError::vk_call("vkEndCommandBuffer"))?;
            device.reset_fences(&[self.submit_fence]).map_err(GfxError::vk_call("vkResetFences"))?;

            let command_buffer_info = vk::CommandBufferSubmitInfo::default().command_buffer(*command_buffer);
            let submit_info =
                vk::SubmitInfo2::default().command_buffer_infos(std::slice::from_ref(&command_buffer_info));
            device
                .queue_submit2(self.core.gfx_queue, std::slice::from_ref(&submit_info), self.submit_fence)
                .map_err(GfxError::vk_call("vkQueueSubmit2"))?;
            device
                .wait_for_fences(&[self.submit_fence], true, u64::MAX)
                .map_err(GfxError::vk_call("vkWaitForFences"))?;
        }

        Ok(result)
    }
}

/// one-time command buffer 的命令录制
pub struct VulkanCommands {
    command_buffer: vk::CommandBuffer,
    device_functions: Rc<DeviceFunctions>,
}

impl GfxCommands for VulkanCommands {
    #[inline]
    fn cmd_copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe {
            self.device_functions.device.cmd_copy_buffer(self.command_buffer, src, dst, regions);
        }
    }

    fn cmd_build_acceleration_structure(
        &self,
        build: &GfxAccelBuildDesc,
        dst: vk::AccelerationStructureKHR,
        scratch_address: vk::DeviceAddress,
    ) {
        let geometries = build.geometries.iter().map(to_vk_geometry).collect_vec();
        let range_infos = build
            .max_primitive_counts()
            .into_iter()
            .map(|count| vk::AccelerationStructureBuildRangeInfoKHR::default().primitive_count(count))
            .collect_vec();

        let build_geometry_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(build.kind.vk_type())
            .flags(build.flags)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(&geometries)
            .dst_acceleration_structure(dst)
            .scratch_data(vk::DeviceOrHostAddressKHR {
                device_address: scratch_address,
            });

        unsafe {
            // 该函数可以一次构建多个 AccelerationStructure，这里只构建了 1 个
            self.device_functions.acceleration_structure.cmd_build_acceleration_structures(
                self.command_buffer,
                std::slice::from_ref(&build_geometry_info),
                &[range_infos.as_slice()],
            )
        }
    }

    #[inline]
    fn cmd_memory_barrier(&self, mask: GfxBarrierMask) {
        let barrier = mask.to_memory_barrier2();
        let dependency_info = vk::DependencyInfo::default().memory_barriers(std::slice::from_ref(&barrier));
        unsafe {
            self.device_functions.device.cmd_pipeline_barrier2(self.command_buffer, &dependency_info);
        }
    }
}
