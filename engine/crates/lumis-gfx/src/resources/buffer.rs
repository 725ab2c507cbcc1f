use std::{ptr, rc::Rc};

use ash::vk;

use crate::foundation::{
    debug_type::DebugType,
    device_api::{GfxAllocationHandle, GfxDeviceApi, GfxMemoryUsage},
};

/// # Destroy
/// 不应该实现 Drop，因为可以 Clone，需要手动 destroy
#[derive(Clone)]
pub struct GfxBuffer {
    handle: vk::Buffer,
    allocation: GfxAllocationHandle,
    device: Rc<dyn GfxDeviceApi>,

    size: vk::DeviceSize,
    memory_usage: GfxMemoryUsage,

    debug_name: String,
}
impl DebugType for GfxBuffer {
    fn debug_type_name() -> &'static str {
        "GfxBuffer"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
// new & init
impl GfxBuffer {
    pub fn new(
        device: Rc<dyn GfxDeviceApi>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_usage: GfxMemoryUsage,
        debug_name: impl AsRef<str>,
    ) -> Self {
        let buffer_ci = vk::BufferCreateInfo::default().size(size).usage(usage);
        let (handle, allocation) = device.create_buffer(&buffer_ci, memory_usage);

        let buffer = Self {
            handle,
            allocation,
            device,
            size,
            memory_usage,
            debug_name: debug_name.as_ref().to_string(),
        };
        buffer.device.set_debug_name(&buffer, debug_name);
        buffer
    }

    /// 每帧由 CPU 写入，GPU 读取
    #[inline]
    pub fn new_host_write(
        device: Rc<dyn GfxDeviceApi>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        debug_name: impl AsRef<str>,
    ) -> Self {
        Self::new(device, size, usage, GfxMemoryUsage::HostWrite, debug_name)
    }

    /// GPU copy 进来，CPU 读取
    #[inline]
    pub fn new_readback(device: Rc<dyn GfxDeviceApi>, size: vk::DeviceSize, debug_name: impl AsRef<str>) -> Self {
        Self::new(device, size, vk::BufferUsageFlags::TRANSFER_DST, GfxMemoryUsage::HostRead, debug_name)
    }
}
// destroy
impl GfxBuffer {
    #[inline]
    pub fn destroy(self) {
        log::debug!("destroy buffer: {}", self.debug_name);
        self.device.destroy_buffer(self.handle, self.allocation);
    }
}
// getters
impl GfxBuffer {
    #[inline]
    pub fn vk_buffer(&self) -> vk::Buffer {
        self.handle
    }

    #[inline]
    pub fn allocation(&self) -> GfxAllocationHandle {
        self.allocation
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn memory_usage(&self) -> GfxMemoryUsage {
        self.memory_usage
    }

    #[inline]
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    /// 整个 buffer 作为 descriptor
    #[inline]
    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo::default().buffer(self.handle).offset(0).range(self.size)
    }
}
// tools
impl GfxBuffer {
    #[inline]
    fn mapped_ptr(&self) -> *mut u8 {
        match self.device.mapped_ptr(self.allocation) {
            Some(ptr) => ptr,
            None => panic!("buffer <{}> is not host visible", self.debug_name),
        }
    }

    /// 通过 mem map 的方式将 data 写入到 buffer 的起始位置，然后 flush
    pub fn transfer_data_by_mmap<T: bytemuck::Pod>(&self, data: &[T]) {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        assert!(
            bytes.len() as vk::DeviceSize <= self.size,
            "buffer <{}> overflow: {} > {}",
            self.debug_name,
            bytes.len(),
            self.size
        );
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.mapped_ptr(), bytes.len());
        }
        self.device.flush_allocation(self.allocation, 0, bytes.len() as vk::DeviceSize);
    }

    #[inline]
    pub fn write_pod<T: bytemuck::Pod>(&self, value: &T) {
        self.transfer_data_by_mmap(std::slice::from_ref(value));
    }

    /// invalidate 之后从 buffer 起始位置读出一个 T
    pub fn read_pod<T: bytemuck::Pod>(&self) -> T {
        let size = size_of::<T>();
        assert!(size as vk::DeviceSize <= self.size, "buffer <{}> is smaller than {}", self.debug_name, size);

        self.device.invalidate_allocation(self.allocation, 0, size as vk::DeviceSize);
        let mut value = T::zeroed();
        unsafe {
            ptr::copy_nonoverlapping(self.mapped_ptr(), bytemuck::bytes_of_mut(&mut value).as_mut_ptr(), size);
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingDevice;

    #[test]
    fn test_host_write_then_read() {
        let recording = Rc::new(RecordingDevice::new());
        let buffer = GfxBuffer::new_host_write(recording.clone(), 64, vk::BufferUsageFlags::UNIFORM_BUFFER, "camera");

        buffer.write_pod(&[1.0f32, 2.0, 3.0, 4.0]);
        let read: [f32; 4] = buffer.read_pod();
        assert_eq!(read, [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(recording.live_count("buffer"), 1);

        buffer.destroy();
        assert_eq!(recording.live_count("buffer"), 0);
    }

    #[test]
    #[should_panic(expected = "not host visible")]
    fn test_device_local_is_not_mappable() {
        let recording = Rc::new(RecordingDevice::new());
        let buffer = GfxBuffer::new(
            recording,
            16,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            GfxMemoryUsage::DeviceLocal,
            "device-local",
        );
        buffer.write_pod(&0u32);
    }

    #[test]
    #[should_panic(expected = "overflow")]
    fn test_write_past_end_panics() {
        let recording = Rc::new(RecordingDevice::new());
        let buffer = GfxBuffer::new_host_write(recording, 4, vk::BufferUsageFlags::UNIFORM_BUFFER, "tiny");
        buffer.transfer_data_by_mmap(&[0u32, 1]);
    }
}
