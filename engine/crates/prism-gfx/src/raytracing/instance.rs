use ash::vk;
use bytemuck::{Pod, Zeroable};

/// TLAS 中的单个 instance
///
/// 内存布局与 `VkAccelerationStructureInstanceKHR` 完全一致，可以直接上传到 instance buffer。
/// `ash` 中对应的结构体包含 union，无法 `Pod`，因此这里单独定义。
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GfxInstanceRecord {
    /// 3x4 row-major matrix
    pub transform: [f32; 12],
    /// 低 24 位：custom index，高 8 位：visibility mask
    pub instance_custom_index_and_mask: u32,
    /// 低 24 位：shader binding table record offset，高 8 位：instance flags
    pub sbt_offset_and_flags: u32,
    pub blas_address: vk::DeviceAddress,
}

const _: () = assert!(size_of::<GfxInstanceRecord>() == size_of::<vk::AccelerationStructureInstanceKHR>());
const _: () = assert!(size_of::<GfxInstanceRecord>() == 64);

impl GfxInstanceRecord {
    /// custom index 以及 sbt offset 都只有 24 位
    pub const MAX_24BIT: u32 = (1 << 24) - 1;

    pub fn new(
        transform: &glam::Mat4,
        custom_index: u32,
        mask: u8,
        sbt_record_offset: u32,
        flags: vk::GeometryInstanceFlagsKHR,
        blas_address: vk::DeviceAddress,
    ) -> Self {
        Self {
            transform: instance_transform(transform),
            instance_custom_index_and_mask: pack_24_8(custom_index, mask),
            sbt_offset_and_flags: pack_24_8(sbt_record_offset, flags.as_raw() as u8),
            blas_address,
        }
    }

    #[inline]
    pub fn custom_index(&self) -> u32 {
        self.instance_custom_index_and_mask & Self::MAX_24BIT
    }

    #[inline]
    pub fn mask(&self) -> u8 {
        (self.instance_custom_index_and_mask >> 24) as u8
    }

    #[inline]
    pub fn sbt_record_offset(&self) -> u32 {
        self.sbt_offset_and_flags & Self::MAX_24BIT
    }

    #[inline]
    pub fn flags(&self) -> vk::GeometryInstanceFlagsKHR {
        vk::GeometryInstanceFlagsKHR::from_raw((self.sbt_offset_and_flags >> 24) as u32)
    }
}

/// 与 `vk::Packed24_8` 相同的打包方式
#[inline]
fn pack_24_8(low_24: u32, high_8: u8) -> u32 {
    (low_24 & GfxInstanceRecord::MAX_24BIT) | ((high_8 as u32) << 24)
}

/// glam 的列主序 4x4 矩阵转换为加速结构使用的 3x4 行主序矩阵
///
/// 相当于转置之后丢弃最后一行 (0, 0, 0, 1)
pub fn instance_transform(trans: &glam::Mat4) -> [f32; 12] {
    let c1 = &trans.x_axis;
    let c2 = &trans.y_axis;
    let c3 = &trans.z_axis;
    let c4 = &trans.w_axis;

    [
        c1.x, c2.x, c3.x, c4.x, // row 1
        c1.y, c2.y, c3.y, c4.y, // row 2
        c1.z, c2.z, c3.z, c4.z, // row 3
    ]
}
