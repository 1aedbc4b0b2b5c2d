use std::rc::Rc;

use ash::vk;

use crate::{
    device::{GfxBufferCreateInfo, GfxCommands, GfxDevice, GfxMemoryLocation},
    error::{GfxError, GfxResult},
};

/// 独占一块 GPU 内存的 buffer，drop 时释放
pub struct GfxBuffer<D: GfxDevice> {
    handle: vk::Buffer,
    /// 只有在 drop 时才会被取走
    allocation: Option<D::Allocation>,

    size: vk::DeviceSize,
    location: GfxMemoryLocation,

    /// 只有在 buffer usage 包含 SHADER_DEVICE_ADDRESS 时才有值
    device_addr: Option<vk::DeviceAddress>,

    debug_name: String,

    device: Rc<D>,
}
impl<D: GfxDevice> Drop for GfxBuffer<D> {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            self.device.destroy_buffer(self.handle, allocation);
        }
    }
}
// init & destroy
impl<D: GfxDevice> GfxBuffer<D> {
    /// - align: 当 buffer 处于一个大的 memory block 中时，align 用来指定 buffer 的起始 offset,
    ///   其实地址的内存对齐，默认对齐到 8 字节
    pub fn new(
        device: &Rc<D>,
        buffer_size: vk::DeviceSize,
        buffer_usage: vk::BufferUsageFlags,
        align: Option<vk::DeviceSize>,
        location: GfxMemoryLocation,
        name: impl AsRef<str>,
    ) -> GfxResult<Self> {
        // 不允许 UNIFORM + DBA 的组合，会有隐患
        if buffer_usage.contains(vk::BufferUsageFlags::UNIFORM_BUFFER)
            && buffer_usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS)
        {
            return Err(GfxError::InvalidConfig(format!(
                "buffer '{}': UNIFORM_BUFFER + SHADER_DEVICE_ADDRESS is not allowed",
                name.as_ref()
            )));
        }

        let raw = device.create_buffer(
            &GfxBufferCreateInfo {
                size: buffer_size,
                usage: buffer_usage,
                location,
                alignment: align,
            },
            name.as_ref(),
        )?;

        Ok(Self {
            handle: raw.handle,
            allocation: Some(raw.allocation),
            size: buffer_size,
            location,
            device_addr: raw.device_address,
            debug_name: name.as_ref().to_string(),
            device: device.clone(),
        })
    }

    #[inline]
    pub fn new_stage_buffer(device: &Rc<D>, size: vk::DeviceSize, debug_name: impl AsRef<str>) -> GfxResult<Self> {
        Self::new(device, size, vk::BufferUsageFlags::TRANSFER_SRC, None, GfxMemoryLocation::HostVisible, debug_name)
    }

    /// 加速结构的存储空间
    #[inline]
    pub fn new_acceleration_buffer(
        device: &Rc<D>,
        size: vk::DeviceSize,
        debug_name: impl AsRef<str>,
    ) -> GfxResult<Self> {
        Self::new(
            device,
            size,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            None,
            GfxMemoryLocation::DeviceLocal,
            debug_name,
        )
    }

    /// 构建加速结构时使用的临时空间，起始地址需要满足设备的 scratch 对齐要求
    #[inline]
    pub fn new_acceleration_scratch_buffer(
        device: &Rc<D>,
        size: vk::DeviceSize,
        debug_name: impl AsRef<str>,
    ) -> GfxResult<Self> {
        let align = device.min_scratch_alignment();
        Self::new(
            device,
            size,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            Some(align),
            GfxMemoryLocation::DeviceLocal,
            debug_name,
        )
    }

    /// TLAS 的 instance 数据，通过 stage buffer 写入
    #[inline]
    pub fn new_acceleration_instance_buffer(
        device: &Rc<D>,
        size: vk::DeviceSize,
        debug_name: impl AsRef<str>,
    ) -> GfxResult<Self> {
        Self::new(
            device,
            size,
            vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
                | vk::BufferUsageFlags::TRANSFER_DST,
            Some(16),
            GfxMemoryLocation::DeviceLocal,
            debug_name,
        )
    }

    #[inline]
    pub fn destroy(self) {
        drop(self)
    }
}
// getter
impl<D: GfxDevice> GfxBuffer<D> {
    #[inline]
    pub fn vk_buffer(&self) -> vk::Buffer {
        self.handle
    }

    #[inline]
    pub fn device_address(&self) -> Option<vk::DeviceAddress> {
        self.device_addr
    }

    /// 用于必须拿到 device address 的场合，例如加速结构的构建输入
    #[inline]
    pub fn require_device_address(&self) -> GfxResult<vk::DeviceAddress> {
        self.device_addr.ok_or_else(|| GfxError::MissingDeviceAddress(self.debug_name.clone()))
    }
}
// tools
impl<D: GfxDevice> GfxBuffer<D> {
    /// 通过 mem map 的方式将 data 传入到 buffer 中
    pub fn transfer_data_by_mmap<T: bytemuck::Pod>(&mut self, data: &[T]) -> GfxResult<()> {
        if self.location != GfxMemoryLocation::HostVisible {
            return Err(GfxError::InvalidConfig(format!("buffer '{}' is not host visible", self.debug_name)));
        }
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.len() as vk::DeviceSize > self.size {
            return Err(GfxError::InvalidConfig(format!(
                "buffer '{}': {} bytes do not fit into {} bytes",
                self.debug_name,
                bytes.len(),
                self.size
            )));
        }
        match self.allocation.as_mut() {
            Some(allocation) => self.device.write_buffer(self.handle, allocation, 0, bytes),
            None => Ok(()),
        }
    }

    /// 创建一个临时的 stage buffer，先将数据放入 stage buffer，再 transfer 到
    /// self
    ///
    /// sync 表示这个函数是同步等待的，会阻塞运行
    pub fn transfer_data_sync<T: bytemuck::Pod>(&self, data: &[T]) -> GfxResult<()> {
        let _span = tracy_client::span!("GfxBuffer::transfer_data_sync");

        let data_size = size_of_val(data) as vk::DeviceSize;
        if data_size > self.size {
            return Err(GfxError::InvalidConfig(format!(
                "buffer '{}': {} bytes do not fit into {} bytes",
                self.debug_name, data_size, self.size
            )));
        }
        if data_size == 0 {
            return Ok(());
        }

        let mut stage_buffer =
            Self::new_stage_buffer(&self.device, data_size, format!("{}-stage-buffer", self.debug_name))?;
        stage_buffer.transfer_data_by_mmap(data)?;

        let cmd_name = format!("{}-transfer-data", &self.debug_name);
        self.device.one_time_exec(&cmd_name, |cmd| {
            cmd.cmd_copy_buffer(
                stage_buffer.vk_buffer(),
                self.handle,
                &[vk::BufferCopy {
                    size: data_size,
                    ..Default::default()
                }],
            );
        })
    }
}
