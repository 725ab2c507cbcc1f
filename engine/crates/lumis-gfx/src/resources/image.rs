use std::rc::Rc;

use ash::vk;

use crate::foundation::{
    debug_type::DebugType,
    device_api::{GfxAllocationHandle, GfxDeviceApi},
};

#[derive(Clone, Debug)]
pub struct GfxImageCreateInfo {
    inner: vk::ImageCreateInfo<'static>,
}
impl GfxImageCreateInfo {
    /// 2D、单层、`OPTIMAL` tiling、初始 layout 为 `UNDEFINED`
    pub fn new_image_2d_info(extent: vk::Extent2D, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            inner: vk::ImageCreateInfo {
                image_type: vk::ImageType::TYPE_2D,
                format,
                extent: vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                },
                mip_levels: 1,
                array_layers: 1,
                samples: vk::SampleCountFlags::TYPE_1,
                tiling: vk::ImageTiling::OPTIMAL,
                usage,
                sharing_mode: vk::SharingMode::EXCLUSIVE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                ..Default::default()
            },
        }
    }

    /// builder
    #[inline]
    pub fn mip_levels(mut self, mip_levels: u32) -> Self {
        self.inner.mip_levels = mip_levels;
        self
    }

    #[inline]
    pub fn as_info(&self) -> &vk::ImageCreateInfo<'_> {
        &self.inner
    }
}

/// 由设备分配内存的 2D image
///
/// # Destroy
/// 不应该实现 Drop，因为可以 Clone，需要手动 destroy
#[derive(Clone)]
pub struct GfxImage {
    handle: vk::Image,
    allocation: GfxAllocationHandle,
    device: Rc<dyn GfxDeviceApi>,

    extent: vk::Extent2D,
    format: vk::Format,
    mip_levels: u32,

    name: String,
}
// new & init
impl GfxImage {
    pub fn new(device: Rc<dyn GfxDeviceApi>, image_info: &GfxImageCreateInfo, debug_name: &str) -> Self {
        let (handle, allocation) = device.create_image(image_info.as_info());
        let info = image_info.as_info();
        let image = Self {
            handle,
            allocation,
            device,
            extent: vk::Extent2D {
                width: info.extent.width,
                height: info.extent.height,
            },
            format: info.format,
            mip_levels: info.mip_levels,
            name: debug_name.to_string(),
        };
        image.device.set_debug_name(&image, debug_name);
        image
    }
}
impl DebugType for GfxImage {
    fn debug_type_name() -> &'static str {
        "GfxImage2D"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
// getters
impl GfxImage {
    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.extent.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.extent.height
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}
// destroy
impl GfxImage {
    pub fn destroy(self) {
        log::debug!("destroy image: {}", self.name);
        self.device.destroy_image(self.handle, self.allocation);
    }
}
