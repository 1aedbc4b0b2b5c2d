use ash::vk;

use crate::raytracing::build_info::GfxAccelKind;

pub type GfxResult<T> = Result<T, GfxError>;

/// GFX 层的所有错误
///
/// 除了 [`GfxError::PoolExhausted`] 会在描述符分配器内部重试一次之外，
/// 其余错误都会直接向上传递，终止当前的渲染操作。
#[derive(Debug, thiserror::Error)]
pub enum GfxError {
    /// 单个 descriptor pool 空间不足或碎片化
    #[error("descriptor pool {pool:?} (capacity {capacity} sets) is exhausted: {result}")]
    PoolExhausted {
        pool: vk::DescriptorPool,
        capacity: u32,
        result: vk::Result,
    },

    /// 换了一个 pool 重试之后依然无法分配
    #[error(
        "descriptor set allocation for layout {layout:?} failed after retry \
         (sets per pool: {sets_per_pool}, full pools: {full_pools}): {result}"
    )]
    ResourceExhaustion {
        layout: vk::DescriptorSetLayout,
        sets_per_pool: u32,
        full_pools: usize,
        result: vk::Result,
    },

    /// mesh 无法转换为加速结构所需的几何描述
    #[error("mesh {mesh} cannot be used to build an acceleration structure: {reason}")]
    UnsupportedGeometry { mesh: String, reason: String },

    /// 加速结构的尺寸查询、创建或者构建命令失败
    #[error("{kind} acceleration structure build failed ({context}): {reason}")]
    BuildFailure {
        kind: GfxAccelKind,
        context: String,
        reason: String,
    },

    #[error("out of memory while allocating {size} bytes for '{name}' (usage {usage:?}): {result}")]
    DeviceMemoryExhaustion {
        name: String,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        result: vk::Result,
    },

    #[error("{call} failed: {result}")]
    Vulkan { call: &'static str, result: vk::Result },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("buffer '{0}' has no device address, usage must contain SHADER_DEVICE_ADDRESS")]
    MissingDeviceAddress(String),

    #[error("failed to load vulkan: {0}")]
    Loader(String),

    #[error("no physical device supports acceleration structures")]
    NoSuitableDevice,
}

impl GfxError {
    /// 用于 `map_err`，记录失败的 vk 函数名
    #[inline]
    pub fn vk_call(call: &'static str) -> impl FnOnce(vk::Result) -> GfxError {
        move |result| GfxError::Vulkan { call, result }
    }

    #[inline]
    pub fn is_out_of_memory(result: vk::Result) -> bool {
        matches!(result, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY)
    }

    #[inline]
    pub fn is_pool_exhausted(result: vk::Result) -> bool {
        matches!(result, vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL)
    }

    /// buffer 分配失败时，内存不足归为 DeviceMemoryExhaustion
    pub fn buffer_allocation(
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        result: vk::Result,
    ) -> GfxError {
        if Self::is_out_of_memory(result) {
            GfxError::DeviceMemoryExhaustion {
                name: name.to_string(),
                size,
                usage,
                result,
            }
        } else {
            GfxError::Vulkan {
                call: "vmaCreateBuffer",
                result,
            }
        }
    }

    /// 构建加速结构过程中的设备错误统一归为 BuildFailure
    ///
    /// 内存耗尽、几何错误等本身已经携带足够信息的错误保持原样
    pub fn into_build_failure(self, kind: GfxAccelKind, context: impl Into<String>) -> GfxError {
        match self {
            GfxError::Vulkan { call, result } => GfxError::BuildFailure {
                kind,
                context: context.into(),
                reason: format!("{call}: {result}"),
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_build_failure_keeps_memory_errors() {
        let err = GfxError::DeviceMemoryExhaustion {
            name: "scratch".to_string(),
            size: 1024,
            usage: vk::BufferUsageFlags::STORAGE_BUFFER,
            result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
        };
        let err = err.into_build_failure(GfxAccelKind::BottomLevel, "mesh cube");
        assert!(matches!(err, GfxError::DeviceMemoryExhaustion { size: 1024, .. }));
    }

    #[test]
    fn test_into_build_failure_wraps_vulkan_errors() {
        let err = GfxError::vk_call("vkQueueSubmit")(vk::Result::ERROR_DEVICE_LOST);
        let err = err.into_build_failure(GfxAccelKind::TopLevel, "frame 3");
        match err {
            GfxError::BuildFailure { kind, context, reason } => {
                assert_eq!(kind, GfxAccelKind::TopLevel);
                assert_eq!(context, "frame 3");
                assert!(reason.contains("vkQueueSubmit"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_pool_exhausted_results() {
        assert!(GfxError::is_pool_exhausted(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        assert!(GfxError::is_pool_exhausted(vk::Result::ERROR_FRAGMENTED_POOL));
        assert!(!GfxError::is_pool_exhausted(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
    }
}
