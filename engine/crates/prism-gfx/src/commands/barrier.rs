use ash::vk;

/// barrier 使用的 src 和 dst 访问 mask
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GfxBarrierMask {
    pub src_stage: vk::PipelineStageFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_access: vk::AccessFlags2,
}

impl GfxBarrierMask {
    /// BLAS 构建完成之后，后续的构建（TLAS）或者光追 shader 才能读取
    pub fn acceleration_build_to_read() -> Self {
        Self {
            src_stage: vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR,
            dst_stage: vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR
                | vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
            src_access: vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR,
            dst_access: vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR,
        }
    }

    /// instance buffer 的传输以及 TLAS 的构建都需要在读取之前完成
    pub fn instance_upload_and_build_to_read() -> Self {
        Self {
            src_stage: vk::PipelineStageFlags2::TRANSFER | vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR,
            dst_stage: vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR
                | vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
            src_access: vk::AccessFlags2::TRANSFER_WRITE | vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR,
            dst_access: vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR,
        }
    }

    #[inline]
    pub fn to_memory_barrier2(&self) -> vk::MemoryBarrier2<'static> {
        vk::MemoryBarrier2::default()
            .src_stage_mask(self.src_stage)
            .src_access_mask(self.src_access)
            .dst_stage_mask(self.dst_stage)
            .dst_access_mask(self.dst_access)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_upload_barrier_covers_transfer_write() {
        let mask = GfxBarrierMask::instance_upload_and_build_to_read();
        assert!(mask.src_access.contains(vk::AccessFlags2::TRANSFER_WRITE));
        assert!(mask.src_access.contains(vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR));
        assert_eq!(mask.dst_access, vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR);
    }

    #[test]
    fn test_to_memory_barrier2() {
        let barrier = GfxBarrierMask::acceleration_build_to_read().to_memory_barrier2();
        assert_eq!(barrier.src_access_mask, vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR);
    }
}
