//! 加速结构的构建描述
//!
//! `vk::AccelerationStructureGeometryKHR` 带有生命周期并且持有裸指针，
//! 这里使用自有的描述结构，由后端在录制命令时转换为 vk 结构体。

use std::fmt::{Display, Formatter};

use ash::vk;
use itertools::Itertools;

use crate::error::{GfxError, GfxResult};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum GfxAccelKind {
    BottomLevel,
    TopLevel,
}

impl GfxAccelKind {
    #[inline]
    pub fn vk_type(self) -> vk::AccelerationStructureTypeKHR {
        match self {
            GfxAccelKind::BottomLevel => vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            GfxAccelKind::TopLevel => vk::AccelerationStructureTypeKHR::TOP_LEVEL,
        }
    }
}

impl Display for GfxAccelKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            GfxAccelKind::BottomLevel => write!(f, "bottom-level"),
            GfxAccelKind::TopLevel => write!(f, "top-level"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GfxIndexData {
    pub address: vk::DeviceAddress,
    pub index_type: vk::IndexType,
    pub index_count: u32,
}

/// BLAS 的三角形几何数据
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GfxTriangleGeometry {
    pub vertex_format: vk::Format,
    pub vertex_address: vk::DeviceAddress,
    pub vertex_stride: vk::DeviceSize,
    pub vertex_count: u32,
    pub index: Option<GfxIndexData>,
    pub primitive_count: u32,
    pub flags: vk::GeometryFlagsKHR,
}

impl GfxTriangleGeometry {
    /// 最大的顶点 index，等于顶点数量减 1
    #[inline]
    pub fn max_vertex(&self) -> u32 {
        self.vertex_count.saturating_sub(1)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GfxAccelGeometry {
    Triangles(GfxTriangleGeometry),
    /// instance buffer 中紧密排列的 `VkAccelerationStructureInstanceKHR`
    Instances {
        data_address: vk::DeviceAddress,
        instance_count: u32,
    },
}

impl GfxAccelGeometry {
    #[inline]
    pub fn primitive_count(&self) -> u32 {
        match self {
            GfxAccelGeometry::Triangles(triangles) => triangles.primitive_count,
            GfxAccelGeometry::Instances { instance_count, .. } => *instance_count,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GfxAccelBuildDesc {
    pub kind: GfxAccelKind,
    pub flags: vk::BuildAccelerationStructureFlagsKHR,
    pub geometries: Vec<GfxAccelGeometry>,
}

impl GfxAccelBuildDesc {
    pub fn bottom_level(geometries: Vec<GfxTriangleGeometry>, flags: vk::BuildAccelerationStructureFlagsKHR) -> Self {
        Self {
            kind: GfxAccelKind::BottomLevel,
            flags,
            geometries: geometries.into_iter().map(GfxAccelGeometry::Triangles).collect(),
        }
    }

    pub fn top_level(
        data_address: vk::DeviceAddress,
        instance_count: u32,
        flags: vk::BuildAccelerationStructureFlagsKHR,
    ) -> Self {
        Self {
            kind: GfxAccelKind::TopLevel,
            flags,
            geometries: vec![GfxAccelGeometry::Instances {
                data_address,
                instance_count,
            }],
        }
    }

    /// 每个 geometry 的最大 primitive 数量，用于尺寸查询以及 build range
    #[inline]
    pub fn max_primitive_counts(&self) -> Vec<u32> {
        self.geometries.iter().map(GfxAccelGeometry::primitive_count).collect_vec()
    }
}

/// 设备查询得到的加速结构尺寸
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct GfxAccelBuildSizes {
    pub acceleration_structure_size: vk::DeviceSize,
    pub build_scratch_size: vk::DeviceSize,
    pub update_scratch_size: vk::DeviceSize,
}

impl GfxAccelBuildSizes {
    /// 尺寸为 0 表示设备无法构建该加速结构
    pub fn validate(&self, kind: GfxAccelKind, context: &str) -> GfxResult<()> {
        if self.acceleration_structure_size == 0 {
            return Err(GfxError::BuildFailure {
                kind,
                context: context.to_string(),
                reason: "device reported zero acceleration structure size".to_string(),
            });
        }
        Ok(())
    }
}

impl Display for GfxAccelBuildSizes {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "storage: {} bytes, build scratch: {} bytes",
            self.acceleration_structure_size, self.build_scratch_size
        )
    }
}
