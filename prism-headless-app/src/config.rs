use std::path::Path;

use anyhow::Context;
use prism_gfx::{descriptors::descriptor_config::DescriptorAllocatorConfig, foundation::vulkan_core::GfxCoreCreateInfo};
use prism_scene::tlas_builder::TlasBuilderConfig;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// 可以被环境变量 RUST_LOG 覆盖
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// 场景中放置 grid_size x grid_size 个 instance
    pub grid_size: u32,
    pub frame_count: u64,
    /// 每帧从 frame allocator 中分配的 descriptor set 数量
    pub sets_per_frame: u32,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            grid_size: 8,
            frame_count: 16,
            sets_per_frame: 48,
        }
    }
}

/// prism.toml 的内容，所有 section 都可以省略
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrismConfig {
    pub log: LogConfig,
    pub gfx: GfxCoreCreateInfo,
    /// 长期存在的 descriptor set，例如 TLAS
    pub descriptor_allocator: DescriptorAllocatorConfig,
    /// 每帧结束时整体 reset
    pub frame_descriptor_allocator: DescriptorAllocatorConfig,
    pub tlas: TlasBuilderConfig,
    pub demo: DemoConfig,
}

impl PrismConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 文件不存在时使用默认配置
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            log::warn!("config file {} not found, use default config", path.display());
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.descriptor_allocator.validate().context("[descriptor_allocator]")?;
        self.frame_descriptor_allocator.validate().context("[frame_descriptor_allocator]")?;
        self.tlas.validate().context("[tlas]")?;
        Ok(())
    }
}
