use std::{
    ffi::{CStr, CString, c_char},
    rc::Rc,
};

use ash::vk;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    error::{GfxError, GfxResult},
    foundation::{debug_messenger::DebugMsger, physical_device::GfxPhysicalDevice},
};

/// 创建 [`GfxCore`] 所需的参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GfxCoreCreateInfo {
    pub app_name: String,
    /// 开启 VK_LAYER_KHRONOS_validation，不支持时只输出警告
    pub enable_validation: bool,
    /// 开启 debug messenger 以及 debug name
    pub enable_debug_utils: bool,
}

impl Default for GfxCoreCreateInfo {
    fn default() -> Self {
        Self {
            app_name: "prism".to_string(),
            enable_validation: cfg!(debug_assertions),
            enable_debug_utils: true,
        }
    }
}

/// 逻辑设备以及扩展的函数指针，在各个对象之间通过 Rc 共享
pub struct DeviceFunctions {
    pub(crate) device: ash::Device,
    pub(crate) acceleration_structure: ash::khr::acceleration_structure::Device,
    pub(crate) debug_utils: Option<ash::ext::debug_utils::Device>,
}

impl DeviceFunctions {
    #[inline]
    pub fn set_object_debug_name<T: vk::Handle + Copy>(&self, handle: T, name: impl AsRef<str>) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        // 名字中包含 \0 时直接放弃设置
        let Ok(name) = CString::new(name.as_ref()) else {
            return;
        };
        let result = unsafe {
            debug_utils.set_debug_utils_object_name(
                &vk::DebugUtilsObjectNameInfoEXT::default().object_name(name.as_c_str()).object_handle(handle),
            )
        };
        if let Err(e) = result {
            log::warn!("failed to set debug name {:?}: {}", name, e);
        }
    }
}

/// Vulkan 的基础对象：instance，physical device，device 以及 queue
pub struct GfxCore {
    pub(crate) instance: ash::Instance,
    pub(crate) debug_msger: Option<DebugMsger>,
    pub(crate) physical_device: GfxPhysicalDevice,

    pub(crate) device_functions: Rc<DeviceFunctions>,
    pub(crate) gfx_queue: vk::Queue,

    /// vk 基础函数的接口
    ///
    /// 在 drop 之后，会卸载 dll，因此需要确保该字段最后 drop
    pub(crate) _vk_entry: ash::Entry,
}

// 创建与销毁
impl GfxCore {
    const ENGINE_NAME: &'static str = "Prism";
    const VALIDATION_LAYER: &'static CStr = c"VK_LAYER_KHRONOS_validation";

    pub fn new(create_info: &GfxCoreCreateInfo) -> GfxResult<Self> {
        let _span = tracy_client::span!("GfxCore::new");

        let vk_entry = unsafe { ash::Entry::load() }.map_err(|e| GfxError::Loader(e.to_string()))?;
        let instance = Self::create_instance(&vk_entry, create_info)?;

        // instance 创建之后的所有失败都需要销毁 instance
        let guard = scopeguard::guard(instance, |instance| unsafe { instance.destroy_instance(None) });

        let debug_msger =
            if create_info.enable_debug_utils { Some(DebugMsger::new(&vk_entry, &guard)?) } else { None };
        let physical_device = GfxPhysicalDevice::new_descrete_physical_device(&guard)?;
        log::info!("use gpu: {}", physical_device.device_name());

        let device = Self::create_device(&guard, &physical_device)?;
        let gfx_queue = unsafe { device.get_device_queue(physical_device.gfx_queue_family_index, 0) };

        let instance = scopeguard::ScopeGuard::into_inner(guard);
        let device_functions = Rc::new(DeviceFunctions {
            acceleration_structure: ash::khr::acceleration_structure::Device::new(&instance, &device),
            debug_utils: create_info
                .enable_debug_utils
                .then(|| ash::ext::debug_utils::Device::new(&instance, &device)),
            device,
        });

        device_functions.set_object_debug_name(physical_device.vk_handle, "GfxPhysicalDevice");
        device_functions.set_object_debug_name(device_functions.device.handle(), "GfxDevice");
        device_functions.set_object_debug_name(gfx_queue, "CommandQueue-gfx");

        Ok(Self {
            instance,
            debug_msger,
            physical_device,
            device_functions,
            gfx_queue,
            _vk_entry: vk_entry,
        })
    }

    fn create_instance(vk_entry: &ash::Entry, create_info: &GfxCoreCreateInfo) -> GfxResult<ash::Instance> {
        let app_name = CString::new(create_info.app_name.as_str())
            .map_err(|_| GfxError::InvalidConfig(format!("invalid app name: {:?}", create_info.app_name)))?;
        let engine_name = CString::new(Self::ENGINE_NAME).map_err(|e| GfxError::InvalidConfig(e.to_string()))?;
        let app_info = vk::ApplicationInfo::default()
            .api_version(vk::API_VERSION_1_3) // 版本过低时，有些函数无法正确加载
            .application_name(app_name.as_ref())
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(engine_name.as_ref())
            .engine_version(vk::make_api_version(0, 1, 0, 0));

        let mut enabled_extensions: Vec<*const c_char> = Vec::new();
        if create_info.enable_debug_utils {
            let all_ext_props = unsafe { vk_entry.enumerate_instance_extension_properties(None) }
                .map_err(GfxError::vk_call("vkEnumerateInstanceExtensionProperties"))?;
            let supported = all_ext_props
                .iter()
                .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == vk::EXT_DEBUG_UTILS_NAME);
            if !supported {
                return Err(GfxError::Loader("VK_EXT_debug_utils is not supported".to_string()));
            }
            enabled_extensions.push(vk::EXT_DEBUG_UTILS_NAME.as_ptr());
        }

        let mut enabled_layers: Vec<*const c_char> = Vec::new();
        if create_info.enable_validation {
            let all_layer_props = unsafe { vk_entry.enumerate_instance_layer_properties() }
                .map_err(GfxError::vk_call("vkEnumerateInstanceLayerProperties"))?;
            let supported = all_layer_props
                .iter()
                .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == Self::VALIDATION_LAYER);
            if supported {
                enabled_layers.push(Self::VALIDATION_LAYER.as_ptr());
            } else {
                log::warn!("validation layer is not available, continue without it");
            }
        }
        log::info!(
            "instance extensions: {:?}, layers: {:?}",
            enabled_extensions.iter().map(|ext| unsafe { CStr::from_ptr(*ext) }).collect_vec(),
            enabled_layers.iter().map(|layer| unsafe { CStr::from_ptr(*layer) }).collect_vec()
        );

        let mut instance_ci = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&enabled_extensions)
            .enabled_layer_names(&enabled_layers);

        // 为 instance info 添加 debug messenger，用于捕获 instance 创建过程中的消息
        let mut debug_utils_messenger_ci = DebugMsger::debug_utils_messenger_ci();
        if create_info.enable_debug_utils {
            instance_ci = instance_ci.push_next(&mut debug_utils_messenger_ci);
        }

        unsafe { vk_entry.create_instance(&instance_ci, None) }.map_err(GfxError::vk_call("vkCreateInstance"))
    }

    fn create_device(instance: &ash::Instance, physical_device: &GfxPhysicalDevice) -> GfxResult<ash::Device> {
        let device_exts = GfxPhysicalDevice::required_device_exts().iter().map(|ext| ext.as_ptr()).collect_vec();

        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(physical_device.gfx_queue_family_index)
            .queue_priorities(&[1.0])];

        let mut features_12 = vk::PhysicalDeviceVulkan12Features::default().buffer_device_address(true);
        let mut features_13 = vk::PhysicalDeviceVulkan13Features::default().synchronization2(true);
        let mut acc_features =
            vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default().acceleration_structure(true);
        let mut all_features = vk::PhysicalDeviceFeatures2::default()
            .push_next(&mut features_12)
            .push_next(&mut features_13)
            .push_next(&mut acc_features);

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&device_exts)
            .push_next(&mut all_features);

        unsafe { instance.create_device(physical_device.vk_handle, &device_create_info, None) }
            .map_err(GfxError::vk_call("vkCreateDevice"))
    }
}
impl Drop for GfxCore {
    fn drop(&mut self) {
        log::info!("destroying gfx core");
        unsafe {
            self.device_functions.device.destroy_device(None);
        }
        // messenger 必须在 instance 之前销毁
        self.debug_msger.take();
        unsafe {
            self.instance.destroy_instance(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_info_from_toml() {
        let info: GfxCoreCreateInfo = toml::from_str(
            r#"
            app_name = "headless"
            enable_validation = false
            "#,
        )
        .unwrap();
        assert_eq!(info.app_name, "headless");
        assert!(!info.enable_validation);
        assert!(info.enable_debug_utils);
    }
}
