use ash::vk;
use serde::{Deserialize, Serialize};

use crate::error::{GfxError, GfxResult};

/// 配置文件中可以使用的 descriptor 类型
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GfxDescriptorKind {
    Sampler,
    CombinedImageSampler,
    SampledImage,
    StorageImage,
    UniformBuffer,
    StorageBuffer,
    UniformBufferDynamic,
    StorageBufferDynamic,
    InputAttachment,
    AccelerationStructure,
}

impl GfxDescriptorKind {
    pub fn vk_type(self) -> vk::DescriptorType {
        match self {
            GfxDescriptorKind::Sampler => vk::DescriptorType::SAMPLER,
            GfxDescriptorKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            GfxDescriptorKind::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
            GfxDescriptorKind::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
            GfxDescriptorKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            GfxDescriptorKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            GfxDescriptorKind::UniformBufferDynamic => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            GfxDescriptorKind::StorageBufferDynamic => vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
            GfxDescriptorKind::InputAttachment => vk::DescriptorType::INPUT_ATTACHMENT,
            GfxDescriptorKind::AccelerationStructure => vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
        }
    }
}

/// 每个 descriptor set 平均需要多少个该类型的 descriptor
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoolSizeRatio {
    pub descriptor: GfxDescriptorKind,
    pub ratio: f32,
}

impl PoolSizeRatio {
    #[inline]
    pub fn new(descriptor: GfxDescriptorKind, ratio: f32) -> Self {
        Self { descriptor, ratio }
    }

    /// 容量为 `sets` 的 pool 中该类型 descriptor 的数量，至少为 1
    #[inline]
    pub fn descriptor_count(&self, sets: u32) -> u32 {
        ((self.ratio as f64 * sets as f64).ceil() as u32).max(1)
    }
}

/// 可增长描述符分配器的配置
///
/// `sets_per_pool_ceiling` 限制的是单个 pool 的 set 容量，而不是 pool 的数量
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorAllocatorConfig {
    /// 第一个 pool 的 set 容量
    pub max_sets_per_pool: u32,
    pub growth_factor: f32,
    pub sets_per_pool_ceiling: u32,
    pub pool_ratios: Vec<PoolSizeRatio>,
}

impl Default for DescriptorAllocatorConfig {
    fn default() -> Self {
        Self {
            max_sets_per_pool: 32,
            growth_factor: 1.5,
            sets_per_pool_ceiling: 4092,
            pool_ratios: vec![
                PoolSizeRatio::new(GfxDescriptorKind::AccelerationStructure, 1.0),
                PoolSizeRatio::new(GfxDescriptorKind::StorageImage, 1.0),
                PoolSizeRatio::new(GfxDescriptorKind::StorageBuffer, 3.0),
                PoolSizeRatio::new(GfxDescriptorKind::UniformBuffer, 1.0),
                PoolSizeRatio::new(GfxDescriptorKind::CombinedImageSampler, 4.0),
            ],
        }
    }
}

impl DescriptorAllocatorConfig {
    pub fn validate(&self) -> GfxResult<()> {
        if self.max_sets_per_pool == 0 {
            return Err(GfxError::InvalidConfig("max_sets_per_pool must be at least 1".to_string()));
        }
        if !self.growth_factor.is_finite() || self.growth_factor < 1.0 {
            return Err(GfxError::InvalidConfig(format!(
                "growth_factor must be a finite number >= 1.0, got {}",
                self.growth_factor
            )));
        }
        if self.sets_per_pool_ceiling < self.max_sets_per_pool {
            return Err(GfxError::InvalidConfig(format!(
                "sets_per_pool_ceiling ({}) must not be smaller than max_sets_per_pool ({})",
                self.sets_per_pool_ceiling, self.max_sets_per_pool
            )));
        }
        if self.pool_ratios.is_empty() {
            return Err(GfxError::InvalidConfig("pool_ratios must not be empty".to_string()));
        }
        if let Some(bad) = self.pool_ratios.iter().find(|r| !(r.ratio.is_finite() && r.ratio > 0.0)) {
            return Err(GfxError::InvalidConfig(format!(
                "ratio of {:?} must be a positive number, got {}",
                bad.descriptor, bad.ratio
            )));
        }
        Ok(())
    }

    /// `grow(n) = min(max(floor(n * growth_factor), n), ceiling)`
    #[inline]
    pub fn grow(&self, sets: u32) -> u32 {
        let grown = (sets as f64 * self.growth_factor as f64).floor();
        let grown = if grown >= u32::MAX as f64 { u32::MAX } else { grown as u32 };
        grown.max(sets).min(self.sets_per_pool_ceiling)
    }

    /// 容量为 `sets` 的 pool 的 pool sizes
    pub fn pool_sizes(&self, sets: u32) -> Vec<vk::DescriptorPoolSize> {
        self.pool_ratios
            .iter()
            .map(|ratio| vk::DescriptorPoolSize {
                ty: ratio.descriptor.vk_type(),
                descriptor_count: ratio.descriptor_count(sets),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grow_is_clamped() {
        let config = DescriptorAllocatorConfig {
            max_sets_per_pool: 4,
            growth_factor: 1.5,
            sets_per_pool_ceiling: 10,
            ..Default::default()
        };
        assert_eq!(config.grow(4), 6);
        assert_eq!(config.grow(6), 9);
        assert_eq!(config.grow(9), 10);
        assert_eq!(config.grow(10), 10);
    }

    #[test]
    fn test_grow_factor_one_keeps_size() {
        let config = DescriptorAllocatorConfig {
            max_sets_per_pool: 1,
            growth_factor: 1.0,
            ..Default::default()
        };
        assert_eq!(config.grow(1), 1);
        // 1 * 1.2 向下取整依然是 1，不会减小
        let config = DescriptorAllocatorConfig {
            growth_factor: 1.2,
            ..config
        };
        assert_eq!(config.grow(1), 1);
    }

    #[test]
    fn test_pool_sizes_round_up() {
        let config = DescriptorAllocatorConfig {
            pool_ratios: vec![
                PoolSizeRatio::new(GfxDescriptorKind::StorageBuffer, 1.5),
                PoolSizeRatio::new(GfxDescriptorKind::AccelerationStructure, 0.1),
            ],
            ..Default::default()
        };
        let sizes = config.pool_sizes(3);
        assert_eq!(sizes[0].ty, vk::DescriptorType::STORAGE_BUFFER);
        assert_eq!(sizes[0].descriptor_count, 5);
        assert_eq!(sizes[1].ty, vk::DescriptorType::ACCELERATION_STRUCTURE_KHR);
        assert_eq!(sizes[1].descriptor_count, 1);
    }

    #[test]
    fn test_validate() {
        assert!(DescriptorAllocatorConfig::default().validate().is_ok());

        let invalid = [
            DescriptorAllocatorConfig {
                max_sets_per_pool: 0,
                ..Default::default()
            },
            DescriptorAllocatorConfig {
                growth_factor: 0.5,
                ..Default::default()
            },
            DescriptorAllocatorConfig {
                growth_factor: f32::NAN,
                ..Default::default()
            },
            DescriptorAllocatorConfig {
                max_sets_per_pool: 16,
                sets_per_pool_ceiling: 8,
                ..Default::default()
            },
            DescriptorAllocatorConfig {
                pool_ratios: vec![],
                ..Default::default()
            },
            DescriptorAllocatorConfig {
                pool_ratios: vec![PoolSizeRatio::new(GfxDescriptorKind::StorageBuffer, 0.0)],
                ..Default::default()
            },
        ];
        for config in invalid {
            assert!(matches!(config.validate(), Err(GfxError::InvalidConfig(_))), "{config:?}");
        }
    }

    #[test]
    fn test_from_toml() {
        let config: DescriptorAllocatorConfig = toml::from_str(
            r#"
            max_sets_per_pool = 8
            sets_per_pool_ceiling = 64
            pool_ratios = [
                { descriptor = "acceleration_structure", ratio = 1.0 },
                { descriptor = "storage_buffer", ratio = 2.5 },
            ]
            "#,
        )
        .unwrap();
        assert_eq!(config.max_sets_per_pool, 8);
        assert_eq!(config.growth_factor, 1.5);
        assert_eq!(config.sets_per_pool_ceiling, 64);
        assert_eq!(config.pool_ratios[1], PoolSizeRatio::new(GfxDescriptorKind::StorageBuffer, 2.5));
    }
}
