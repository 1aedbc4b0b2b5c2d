//! Ray Tracing 所需的加速结构

use std::rc::Rc;

use ash::vk;

use crate::{
    commands::barrier::GfxBarrierMask,
    device::{GfxCommands, GfxDevice},
    error::{GfxError, GfxResult},
    raytracing::{
        build_info::{GfxAccelBuildDesc, GfxAccelBuildSizes, GfxAccelKind, GfxTriangleGeometry},
        instance::GfxInstanceRecord,
    },
    resources::buffer::GfxBuffer,
};

/// 加速结构以及其独占的 backing buffer
///
/// drop 时先销毁加速结构，再释放 buffer
pub struct GfxAcceleration<D: GfxDevice> {
    handle: vk::AccelerationStructureKHR,
    device_address: vk::DeviceAddress,
    kind: GfxAccelKind,
    sizes: GfxAccelBuildSizes,
    _buffer: GfxBuffer<D>,
    device: Rc<D>,
}
impl<D: GfxDevice> GfxAcceleration<D> {
    /// 同步构建 blas
    ///
    /// 需要指定每个 geometry 的信息，primitive 数量已经包含在 geometry 中
    ///
    /// # 构建过程
    ///
    /// 1. 查询构建 blas 所需的尺寸
    /// 2. 创建 backing buffer 和 scratch buffer
    /// 3. 构建 blas，并等待构建完成
    pub fn build_blas_sync(
        device: &Rc<D>,
        geometries: &[GfxTriangleGeometry],
        build_flags: vk::BuildAccelerationStructureFlagsKHR,
        debug_name: impl AsRef<str>,
    ) -> GfxResult<Self> {
        let _span = tracy_client::span!("GfxAcceleration::build_blas_sync");

        let build = GfxAccelBuildDesc::bottom_level(
            geometries.to_vec(),
            build_flags | vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE,
        );
        let triangle_count: u64 = geometries.iter().map(|geometry| geometry.primitive_count as u64).sum();
        let context = format!("{}, {} triangles", debug_name.as_ref(), triangle_count);

        Self::build_sync(device, &build, &context, debug_name.as_ref())
            .map_err(|e| e.into_build_failure(GfxAccelKind::BottomLevel, context))
    }

    /// 同步构建 tlas
    ///
    /// # 构建过程
    /// 1. 将 instance 数据通过 stage buffer 上传到 instance buffer
    /// 2. 查询构建 tlas 所需的尺寸
    /// 3. 构建 tlas
    ///
    /// instances 为空时依然会构建一个合法的空 tlas
    pub fn build_tlas_sync(
        device: &Rc<D>,
        instances: &[GfxInstanceRecord],
        build_flags: vk::BuildAccelerationStructureFlagsKHR,
        debug_name: impl AsRef<str>,
    ) -> GfxResult<Self> {
        let _span = tracy_client::span!("GfxAcceleration::build_tlas_sync");

        let context = format!("{}, {} instances", debug_name.as_ref(), instances.len());
        let instance_count = u32::try_from(instances.len())
            .ok()
            .filter(|count| *count <= GfxInstanceRecord::MAX_24BIT + 1)
            .ok_or_else(|| GfxError::BuildFailure {
                kind: GfxAccelKind::TopLevel,
                context: context.clone(),
                reason: format!("instance count exceeds {}", GfxInstanceRecord::MAX_24BIT + 1),
            })?;

        let result = (|| -> GfxResult<Self> {
            // 空场景时 buffer 也至少要有一个 record 的大小，保证拥有合法的地址
            let buffer_size = size_of::<GfxInstanceRecord>().max(size_of_val(instances)) as vk::DeviceSize;
            let instance_buffer = GfxBuffer::new_acceleration_instance_buffer(
                device,
                buffer_size,
                format!("{}-acceleration-instance-buffer", debug_name.as_ref()),
            )?;
            instance_buffer.transfer_data_sync(instances)?;

            let build = GfxAccelBuildDesc::top_level(
                instance_buffer.require_device_address()?,
                instance_count,
                build_flags,
            );
            Self::build_sync(device, &build, &context, debug_name.as_ref())
        })();

        result.map_err(|e| e.into_build_failure(GfxAccelKind::TopLevel, context))
    }

    /// 查询尺寸，创建加速结构，并在一次 one-time command 中完成构建
    fn build_sync(device: &Rc<D>, build: &GfxAccelBuildDesc, context: &str, debug_name: &str) -> GfxResult<Self> {
        let sizes = device.get_acceleration_structure_build_sizes(build);
        sizes.validate(build.kind, context)?;
        log::debug!("{} acceleration structure '{}' sizes: {}", build.kind, debug_name, sizes);

        let build_inner = || -> GfxResult<Self> {
            let mut acceleration = Self::new(device, build.kind, sizes.acceleration_structure_size, debug_name)?;
            acceleration.sizes = sizes;

            let scratch_buffer = GfxBuffer::new_acceleration_scratch_buffer(
                device,
                sizes.build_scratch_size.max(1),
                format!("{}-scratch-buffer", debug_name),
            )?;
            let scratch_address = scratch_buffer.require_device_address()?;

            let barrier = match build.kind {
                GfxAccelKind::BottomLevel => GfxBarrierMask::acceleration_build_to_read(),
                GfxAccelKind::TopLevel => GfxBarrierMask::instance_upload_and_build_to_read(),
            };
            device.one_time_exec(&format!("build-{}", debug_name), |cmd| {
                cmd.cmd_build_acceleration_structure(build, acceleration.handle, scratch_address);
                cmd.cmd_memory_barrier(barrier);
            })?;

            Ok(acceleration)
        };

        // 尺寸查询之后的失败都附带请求的尺寸
        build_inner().map_err(|e| e.into_build_failure(build.kind, format!("{context}, {sizes}")))
    }

    /// 创建 AccelerationStructure 以及 buffer
    fn new(device: &Rc<D>, kind: GfxAccelKind, size: vk::DeviceSize, debug_name: &str) -> GfxResult<Self> {
        let buffer = GfxBuffer::new_acceleration_buffer(device, size, format!("{}-buffer", debug_name))?;
        let handle = device.create_acceleration_structure(kind, buffer.vk_buffer(), size, debug_name)?;
        let device_address = device.acceleration_structure_device_address(handle);

        Ok(Self {
            handle,
            device_address,
            kind,
            sizes: GfxAccelBuildSizes {
                acceleration_structure_size: size,
                ..Default::default()
            },
            _buffer: buffer,
            device: device.clone(),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::AccelerationStructureKHR {
        self.handle
    }

    #[inline]
    pub fn device_address(&self) -> vk::DeviceAddress {
        self.device_address
    }

    #[inline]
    pub fn kind(&self) -> GfxAccelKind {
        self.kind
    }

    #[inline]
    pub fn sizes(&self) -> GfxAccelBuildSizes {
        self.sizes
    }

    #[inline]
    pub fn destroy(self) {
        drop(self)
    }
}
impl<D: GfxDevice> Drop for GfxAcceleration<D> {
    fn drop(&mut self) {
        self.device.destroy_acceleration_structure(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mock::{MockCall, MockDevice},
        raytracing::build_info::GfxIndexData,
    };

    fn triangle_geometry() -> GfxTriangleGeometry {
        GfxTriangleGeometry {
            vertex_format: vk::Format::R32G32B32_SFLOAT,
            vertex_address: 0x1_0000,
            vertex_stride: 12,
            vertex_count: 4,
            index: Some(GfxIndexData {
                address: 0x2_0000,
                index_type: vk::IndexType::UINT32,
                index_count: 6,
            }),
            primitive_count: 2,
            flags: vk::GeometryFlagsKHR::NO_DUPLICATE_ANY_HIT_INVOCATION,
        }
    }

    #[test]
    fn test_build_blas_releases_scratch() {
        let device = Rc::new(MockDevice::new());
        let blas = GfxAcceleration::build_blas_sync(
            &device,
            &[triangle_geometry()],
            vk::BuildAccelerationStructureFlagsKHR::empty(),
            "quad",
        )
        .unwrap();

        assert_eq!(blas.kind(), GfxAccelKind::BottomLevel);
        assert_ne!(blas.device_address(), 0);
        // 只剩下 backing buffer
        assert_eq!(device.live_buffer_count(), 1);
        assert_eq!(device.live_acceleration_count(), 1);

        // 构建之后紧跟 barrier
        let calls = device.calls();
        let build_pos = calls.iter().position(|call| matches!(call, MockCall::BuildAcceleration { .. })).unwrap();
        assert_eq!(calls[build_pos + 1], MockCall::MemoryBarrier(GfxBarrierMask::acceleration_build_to_read()));

        drop(blas);
        assert_eq!(device.live_buffer_count(), 0);
        assert_eq!(device.live_acceleration_count(), 0);
    }

    #[test]
    fn test_build_tlas_empty() {
        let device = Rc::new(MockDevice::new());
        let tlas =
            GfxAcceleration::build_tlas_sync(&device, &[], vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE, "tlas")
                .unwrap();
        assert_eq!(tlas.kind(), GfxAccelKind::TopLevel);
        assert_eq!(device.live_buffer_count(), 1);
        assert!(device.calls().iter().any(|call| matches!(
            call,
            MockCall::BuildAcceleration {
                kind: GfxAccelKind::TopLevel,
                primitive_counts,
                ..
            } if primitive_counts == &vec![0]
        )));
    }

    #[test]
    fn test_build_tlas_upload_and_barrier() {
        let device = Rc::new(MockDevice::new());
        let instances: Vec<_> = (0..3)
            .map(|i| {
                GfxInstanceRecord::new(
                    &glam::Mat4::from_translation(glam::vec3(i as f32, 0.0, 0.0)),
                    i,
                    0xFF,
                    0,
                    vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE,
                    0x4_0000,
                )
            })
            .collect();
        let tlas = GfxAcceleration::build_tlas_sync(
            &device,
            &instances,
            vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE,
            "tlas",
        )
        .unwrap();

        let calls = device.calls();
        let find_buffer = |name: &str| {
            calls
                .iter()
                .find_map(|call| match call {
                    MockCall::CreateBuffer { buffer, name: n, size, .. } if n == name => Some((*buffer, *size)),
                    _ => None,
                })
                .unwrap()
        };
        let (instance_buffer, _) = find_buffer("tlas-acceleration-instance-buffer");
        let (_, scratch_size) = find_buffer("tlas-scratch-buffer");
        assert_eq!(scratch_size, tlas.sizes().build_scratch_size);

        // instance 数据先拷贝到 instance buffer，再构建
        let copy_pos = calls
            .iter()
            .position(|call| matches!(call, MockCall::CopyBuffer { dst, .. } if *dst == instance_buffer))
            .unwrap();
        let build_pos = calls
            .iter()
            .position(|call| matches!(call, MockCall::BuildAcceleration { kind: GfxAccelKind::TopLevel, .. }))
            .unwrap();
        assert!(copy_pos < build_pos);
        match &calls[build_pos] {
            MockCall::BuildAcceleration { instances: built, .. } => assert_eq!(built, &instances),
            other => panic!("unexpected call: {other:?}"),
        }
        assert_eq!(calls[build_pos + 1], MockCall::MemoryBarrier(GfxBarrierMask::instance_upload_and_build_to_read()));

        // stage, instance 以及 scratch buffer 都已经释放
        assert_eq!(device.live_buffer_names(), vec!["tlas-buffer".to_string()]);
        drop(tlas);
        assert!(device.live_buffer_names().is_empty());
    }

    #[test]
    fn test_build_failure_leaks_nothing() {
        let device = Rc::new(MockDevice::new());
        device.fail_next_submit(vk::Result::ERROR_DEVICE_LOST);

        let result = GfxAcceleration::build_blas_sync(
            &device,
            &[triangle_geometry()],
            vk::BuildAccelerationStructureFlagsKHR::empty(),
            "quad",
        );
        match result {
            Err(GfxError::BuildFailure { kind, context, .. }) => {
                assert_eq!(kind, GfxAccelKind::BottomLevel);
                assert!(context.contains("quad"));
                assert!(context.contains("2 triangles"));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("build should fail"),
        }
        assert_eq!(device.live_buffer_count(), 0);
        assert_eq!(device.live_acceleration_count(), 0);
    }

    #[test]
    fn test_zero_size_query_is_build_failure() {
        let device = Rc::new(MockDevice::new());
        device.set_zero_build_sizes(true);
        let result = GfxAcceleration::build_tlas_sync(&device, &[], vk::BuildAccelerationStructureFlagsKHR::empty(), "tlas");
        assert!(matches!(result, Err(GfxError::BuildFailure { kind: GfxAccelKind::TopLevel, .. })));
        assert_eq!(device.live_buffer_count(), 0);
    }
}
