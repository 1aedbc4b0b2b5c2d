use std::ffi::CStr;

use ash::vk;
use itertools::Itertools;

use crate::error::{GfxError, GfxResult};

/// 表示一张支持加速结构的物理显卡
pub struct GfxPhysicalDevice {
    pub(crate) vk_handle: vk::PhysicalDevice,

    /// 当前 gpu 的基础属性
    pub(crate) basic_props: vk::PhysicalDeviceProperties,

    /// 当前 gpu 的加速结构属性
    pub(crate) acc_struct_props: vk::PhysicalDeviceAccelerationStructurePropertiesKHR<'static>,

    /// 同时支持 graphics，compute，transfer 的 queue family
    pub(crate) gfx_queue_family_index: u32,
}

impl GfxPhysicalDevice {
    /// 加速结构所需的 device extensions
    pub fn required_device_exts() -> Vec<&'static CStr> {
        vec![
            ash::khr::acceleration_structure::NAME,
            ash::khr::deferred_host_operations::NAME,
        ]
    }

    /// 在所有满足条件的 gpu 中优先选择独立显卡，如果没有则选择第一个
    pub fn new_descrete_physical_device(instance: &ash::Instance) -> GfxResult<Self> {
        let pdevices =
            unsafe { instance.enumerate_physical_devices() }.map_err(GfxError::vk_call("vkEnumeratePhysicalDevices"))?;

        pdevices
            .iter()
            .filter_map(|pdevice| GfxPhysicalDevice::new(*pdevice, instance))
            // 优先使用独立显卡
            .find_or_first(GfxPhysicalDevice::is_descrete_gpu)
            .ok_or(GfxError::NoSuitableDevice)
    }

    /// 不满足加速结构要求的 gpu 返回 None
    fn new(pdevice: vk::PhysicalDevice, instance: &ash::Instance) -> Option<Self> {
        unsafe {
            let mut acc_props = vk::PhysicalDeviceAccelerationStructurePropertiesKHR::default();
            let mut props2 = vk::PhysicalDeviceProperties2::default().push_next(&mut acc_props);
            instance.get_physical_device_properties2(pdevice, &mut props2);
            let basic_props = props2.properties;
            acc_props.p_next = std::ptr::null_mut();

            let device_name = CStr::from_ptr(basic_props.device_name.as_ptr());
            log::info!("found gpu: {:?}", device_name);

            let device_exts = instance.enumerate_device_extension_properties(pdevice).ok()?;
            let missing_exts = Self::required_device_exts()
                .into_iter()
                .filter(|required| {
                    !device_exts.iter().any(|ext| CStr::from_ptr(ext.extension_name.as_ptr()) == *required)
                })
                .collect_vec();
            if !missing_exts.is_empty() {
                log::warn!("gpu {:?} is skipped, missing extensions: {:?}", device_name, missing_exts);
                return None;
            }

            // 全能的 Queue：graphics, compute, transfer
            let required_flags = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER;
            let queue_family_props = instance.get_physical_device_queue_family_properties(pdevice);
            let Some((gfx_queue_family_index, _)) =
                queue_family_props.iter().find_position(|props| props.queue_flags.contains(required_flags))
            else {
                log::warn!("gpu {:?} is skipped, no graphics queue family", device_name);
                return None;
            };

            log::info!("physical device acceleration structure props:\n{:#?}", acc_props);

            Some(Self {
                vk_handle: pdevice,
                basic_props,
                acc_struct_props: acc_props,
                gfx_queue_family_index: gfx_queue_family_index as u32,
            })
        }
    }

    #[inline]
    /// 当前 gpu 是否是独立显卡
    pub fn is_descrete_gpu(&self) -> bool {
        self.basic_props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
    }

    #[inline]
    pub fn device_name(&self) -> String {
        unsafe { CStr::from_ptr(self.basic_props.device_name.as_ptr()) }.to_string_lossy().into_owned()
    }

    /// scratch buffer 的地址必须是这个值的整数倍
    #[inline]
    pub fn min_scratch_alignment(&self) -> vk::DeviceSize {
        self.acc_struct_props.min_acceleration_structure_scratch_offset_alignment as vk::DeviceSize
    }
}
