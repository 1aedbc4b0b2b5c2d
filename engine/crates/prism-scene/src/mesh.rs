use std::{
    fmt::{Display, Formatter},
    rc::Rc,
};

use ash::vk;
use prism_gfx::{
    device::{GfxDevice, GfxMemoryLocation},
    error::{GfxError, GfxResult},
    resources::buffer::GfxBuffer,
};

/// mesh 的稳定标识，BLAS 缓存以此作为 key
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(uuid::Uuid);

impl MeshId {
    #[inline]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for MeshId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for MeshId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MeshCounts {
    pub vertex_count: u32,
    /// 没有 index buffer 时为 None
    pub index_count: Option<u32>,
}

/// 构建 BLAS 所需的 mesh 信息
pub trait RtMesh {
    fn mesh_id(&self) -> MeshId;

    fn name(&self) -> &str;

    fn vertex_device_address(&self) -> Option<vk::DeviceAddress>;

    fn index_device_address(&self) -> Option<vk::DeviceAddress>;

    /// 相邻两个顶点位置之间的字节数
    fn vertex_stride(&self) -> vk::DeviceSize;

    fn counts(&self) -> MeshCounts;

    fn vertex_format(&self) -> vk::Format {
        vk::Format::R32G32B32_SFLOAT
    }

    fn index_type(&self) -> vk::IndexType {
        vk::IndexType::UINT32
    }
}

/// 位于 GPU 上的 mesh，只包含位置以及可选的 u32 index
pub struct GpuMesh<D: GfxDevice> {
    id: MeshId,
    name: String,

    vertex_buffer: GfxBuffer<D>,
    vertex_count: u32,

    index_buffer: Option<GfxBuffer<D>>,
    index_count: u32,
}

impl<D: GfxDevice> GpuMesh<D> {
    const POSITION_STRIDE: vk::DeviceSize = size_of::<glam::Vec3>() as vk::DeviceSize;

    /// 通过 stage buffer 上传顶点位置以及 index
    pub fn new(
        device: &Rc<D>,
        positions: &[glam::Vec3],
        indices: Option<&[u32]>,
        name: impl AsRef<str>,
    ) -> GfxResult<Self> {
        let _span = tracy_client::span!("GpuMesh::new");
        let name = name.as_ref();
        let id = MeshId::new();

        if positions.is_empty() {
            return Err(GfxError::UnsupportedGeometry {
                mesh: format!("{} ({})", name, id),
                reason: "mesh has no vertices".to_string(),
            });
        }

        let vertex_buffer = Self::upload(
            device,
            positions,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            format!("{}-vertex-buffer", name),
        )?;

        let index_buffer = match indices {
            Some(indices) if !indices.is_empty() => Some(Self::upload(
                device,
                indices,
                vk::BufferUsageFlags::INDEX_BUFFER,
                format!("{}-index-buffer", name),
            )?),
            _ => None,
        };

        Ok(Self {
            id,
            name: name.to_string(),
            vertex_buffer,
            vertex_count: positions.len() as u32,
            index_buffer,
            index_count: indices.map_or(0, |indices| indices.len() as u32),
        })
    }

    fn upload<T: bytemuck::Pod>(
        device: &Rc<D>,
        data: &[T],
        usage: vk::BufferUsageFlags,
        name: String,
    ) -> GfxResult<GfxBuffer<D>> {
        let buffer = GfxBuffer::new(
            device,
            size_of_val(data) as vk::DeviceSize,
            usage
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
                | vk::BufferUsageFlags::TRANSFER_DST,
            None,
            GfxMemoryLocation::DeviceLocal,
            name,
        )?;
        buffer.transfer_data_sync(data)?;
        Ok(buffer)
    }

    #[inline]
    pub fn vertex_buffer(&self) -> &GfxBuffer<D> {
        &self.vertex_buffer
    }

    #[inline]
    pub fn index_buffer(&self) -> Option<&GfxBuffer<D>> {
        self.index_buffer.as_ref()
    }
}

impl<D: GfxDevice> RtMesh for GpuMesh<D> {
    #[inline]
    fn mesh_id(&self) -> MeshId {
        self.id
    }

    #[inline]
    fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    fn vertex_device_address(&self) -> Option<vk::DeviceAddress> {
        self.vertex_buffer.device_address()
    }

    #[inline]
    fn index_device_address(&self) -> Option<vk::DeviceAddress> {
        self.index_buffer.as_ref().and_then(|buffer| buffer.device_address())
    }

    #[inline]
    fn vertex_stride(&self) -> vk::DeviceSize {
        Self::POSITION_STRIDE
    }

    #[inline]
    fn counts(&self) -> MeshCounts {
        MeshCounts {
            vertex_count: self.vertex_count,
            index_count: self.index_buffer.as_ref().map(|_| self.index_count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::cube::Cube;
    use prism_gfx::mock::MockDevice;

    #[test]
    fn test_upload_cube() {
        let device = Rc::new(MockDevice::new());
        let cube = GpuMesh::new(&device, &Cube::POSITIONS, Some(&Cube::INDICES), "cube").unwrap();

        assert_eq!(
            cube.counts(),
            MeshCounts {
                vertex_count: 24,
                index_count: Some(36)
            }
        );
        assert_eq!(cube.vertex_stride(), 12);
        assert!(cube.vertex_device_address().is_some());
        assert!(cube.index_device_address().is_some());
        // 只剩下 vertex buffer 和 index buffer，stage buffer 已经释放
        assert_eq!(device.live_buffer_count(), 2);

        drop(cube);
        assert_eq!(device.live_buffer_count(), 0);
    }

    #[test]
    fn test_mesh_ids_are_unique() {
        let device = Rc::new(MockDevice::new());
        let a = GpuMesh::new(&device, &Cube::POSITIONS, None, "a").unwrap();
        let b = GpuMesh::new(&device, &Cube::POSITIONS, None, "b").unwrap();
        assert_ne!(a.mesh_id(), b.mesh_id());
        assert_eq!(a.counts().index_count, None);
        assert_eq!(a.index_device_address(), None);
    }

    #[test]
    fn test_empty_mesh_is_rejected() {
        let device = Rc::new(MockDevice::new());
        let result = GpuMesh::new(&device, &[], None, "empty");
        assert!(matches!(result, Err(GfxError::UnsupportedGeometry { .. })));
        assert_eq!(device.live_buffer_count(), 0);
    }
}
