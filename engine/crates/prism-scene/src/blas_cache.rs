//! 以 mesh 为单位的 BLAS 缓存
//!
//! 每个 [`MeshId`] 只会构建一次 BLAS，之后一直复用，直到缓存被销毁。

use std::rc::Rc;

use ash::vk;
use indexmap::{IndexMap, map::Entry};
use prism_gfx::{
    device::GfxDevice,
    error::{GfxError, GfxResult},
    raytracing::{
        acceleration::GfxAcceleration,
        build_info::{GfxAccelBuildSizes, GfxIndexData, GfxTriangleGeometry},
    },
};

use crate::mesh::{MeshId, RtMesh};

/// 缓存中的一个 BLAS，以及构建它时使用的几何信息
pub struct BlasEntry<D: GfxDevice> {
    acceleration: GfxAcceleration<D>,
    geometry: GfxTriangleGeometry,
    mesh_name: String,
}
impl<D: GfxDevice> BlasEntry<D> {
    #[inline]
    pub fn handle(&self) -> vk::AccelerationStructureKHR {
        self.acceleration.handle()
    }

    #[inline]
    pub fn device_address(&self) -> vk::DeviceAddress {
        self.acceleration.device_address()
    }

    #[inline]
    pub fn geometry(&self) -> &GfxTriangleGeometry {
        &self.geometry
    }

    #[inline]
    pub fn sizes(&self) -> GfxAccelBuildSizes {
        self.acceleration.sizes()
    }

    #[inline]
    pub fn mesh_name(&self) -> &str {
        &self.mesh_name
    }
}

pub struct BlasCache<D: GfxDevice> {
    entries: IndexMap<MeshId, BlasEntry<D>>,
    /// 实际发生的设备构建次数
    build_count: usize,
    device: Rc<D>,
}
// new & init
impl<D: GfxDevice> BlasCache<D> {
    pub fn new(device: &Rc<D>) -> Self {
        Self {
            entries: IndexMap::new(),
            build_count: 0,
            device: device.clone(),
        }
    }
}
// getters
impl<D: GfxDevice> BlasCache<D> {
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn contains(&self, mesh_id: MeshId) -> bool {
        self.entries.contains_key(&mesh_id)
    }

    #[inline]
    pub fn get(&self, mesh_id: MeshId) -> Option<&BlasEntry<D>> {
        self.entries.get(&mesh_id)
    }

    #[inline]
    pub fn build_count(&self) -> usize {
        self.build_count
    }
}
// tools
impl<D: GfxDevice> BlasCache<D> {
    /// 获取 mesh 对应的 BLAS，如果还没有构建过，就同步构建一个
    ///
    /// 构建失败时缓存保持不变，构建过程中创建的 buffer 都会被释放
    pub fn get_or_create<M: RtMesh + ?Sized>(&mut self, mesh: &M) -> GfxResult<&BlasEntry<D>> {
        let _span = tracy_client::span!("BlasCache::get_or_create");

        match self.entries.entry(mesh.mesh_id()) {
            Entry::Occupied(entry) => Ok(&*entry.into_mut()),
            Entry::Vacant(entry) => {
                let geometry = adapt_geometry(mesh)?;
                let acceleration = GfxAcceleration::build_blas_sync(
                    &self.device,
                    std::slice::from_ref(&geometry),
                    vk::BuildAccelerationStructureFlagsKHR::empty(),
                    format!("blas-{}", mesh.name()),
                )?;
                self.build_count += 1;

                log::info!(
                    "build blas for mesh {} ({}): {} triangles, {} bytes",
                    mesh.name(),
                    mesh.mesh_id(),
                    geometry.primitive_count,
                    acceleration.sizes().acceleration_structure_size
                );

                let entry = entry.insert(BlasEntry {
                    acceleration,
                    geometry,
                    mesh_name: mesh.name().to_string(),
                });
                Ok(&*entry)
            }
        }
    }
}
impl<D: GfxDevice> Drop for BlasCache<D> {
    fn drop(&mut self) {
        log::info!("destroy blas cache with {} entries", self.entries.len());
        // 按照插入顺序依次销毁
        self.entries.clear();
    }
}

/// 一个顶点位置所占的字节数，None 表示不支持的格式
fn vertex_format_size(format: vk::Format) -> Option<vk::DeviceSize> {
    match format {
        vk::Format::R32G32B32_SFLOAT => Some(12),
        vk::Format::R32G32_SFLOAT => Some(8),
        vk::Format::R16G16B16A16_SFLOAT | vk::Format::R16G16B16A16_SNORM => Some(8),
        vk::Format::R16G16_SFLOAT | vk::Format::R16G16_SNORM => Some(4),
        _ => None,
    }
}

/// 将 mesh 转换为构建 BLAS 所需的三角形几何描述
pub fn adapt_geometry<M: RtMesh + ?Sized>(mesh: &M) -> GfxResult<GfxTriangleGeometry> {
    let unsupported = |reason: String| GfxError::UnsupportedGeometry {
        mesh: format!("{} ({})", mesh.name(), mesh.mesh_id()),
        reason,
    };

    let vertex_format = mesh.vertex_format();
    let position_size =
        vertex_format_size(vertex_format).ok_or_else(|| unsupported(format!("vertex format {vertex_format:?}")))?;

    let vertex_address = mesh
        .vertex_device_address()
        .filter(|address| *address != 0)
        .ok_or_else(|| unsupported("vertex buffer has no device address".to_string()))?;

    let vertex_stride = mesh.vertex_stride();
    if vertex_stride < position_size {
        return Err(unsupported(format!(
            "vertex stride {vertex_stride} is smaller than one position ({position_size} bytes)"
        )));
    }

    let counts = mesh.counts();
    if counts.vertex_count < 3 {
        return Err(unsupported(format!("only {} vertices", counts.vertex_count)));
    }

    let (index, primitive_count) = match counts.index_count {
        Some(index_count) => {
            let address = mesh
                .index_device_address()
                .filter(|address| *address != 0)
                .ok_or_else(|| unsupported("index buffer has no device address".to_string()))?;
            if index_count == 0 || index_count % 3 != 0 {
                return Err(unsupported(format!("index count {index_count} is not a non-zero multiple of 3")));
            }
            let index = GfxIndexData {
                address,
                index_type: mesh.index_type(),
                index_count,
            };
            (Some(index), index_count / 3)
        }
        None => {
            if counts.vertex_count % 3 != 0 {
                log::warn!(
                    "mesh {} ({}) has {} vertices without index buffer, trailing vertices are ignored",
                    mesh.name(),
                    mesh.mesh_id(),
                    counts.vertex_count
                );
            }
            (None, counts.vertex_count / 3)
        }
    };
    if primitive_count == 0 {
        return Err(unsupported("mesh has no triangles".to_string()));
    }

    Ok(GfxTriangleGeometry {
        vertex_format,
        vertex_address,
        vertex_stride,
        vertex_count: counts.vertex_count,
        index,
        primitive_count,
        flags: vk::GeometryFlagsKHR::NO_DUPLICATE_ANY_HIT_INVOCATION,
    })
}
