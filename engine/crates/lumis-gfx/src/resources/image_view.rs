use std::rc::Rc;

use ash::vk;

use crate::foundation::{debug_type::DebugType, device_api::GfxDeviceApi};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxImageViewDesc {
    /// format 可以基于 vk::Image 重解释
    pub format: vk::Format,
    pub aspect_mask: vk::ImageAspectFlags,
    /// base mip level 和 mip level count
    pub mip: (u32, u32),
}
impl GfxImageViewDesc {
    pub fn new_2d(format: vk::Format, aspect: vk::ImageAspectFlags) -> Self {
        Self {
            format,
            aspect_mask: aspect,
            mip: (0, 1),
        }
    }

    /// builder
    #[inline]
    pub fn mip(mut self, base_level: u32, level_count: u32) -> Self {
        self.mip = (base_level, level_count);
        self
    }
}

/// # Destroy
/// 不应该实现 Drop，因为可以 Clone，需要手动 destroy
#[derive(Clone)]
pub struct GfxImageView {
    handle: vk::ImageView,
    device: Rc<dyn GfxDeviceApi>,

    desc: GfxImageViewDesc,

    name: String,
}
impl DebugType for GfxImageView {
    fn debug_type_name() -> &'static str {
        "GfxImage2DView"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
// new & init
impl GfxImageView {
    pub fn new(device: Rc<dyn GfxDeviceApi>, image: vk::Image, desc: GfxImageViewDesc, name: impl AsRef<str>) -> Self {
        let info = vk::ImageViewCreateInfo {
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format: desc.format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: desc.aspect_mask,
                base_mip_level: desc.mip.0,
                level_count: desc.mip.1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };

        let image_view = Self {
            handle: device.create_image_view(&info),
            device,
            desc,
            name: name.as_ref().to_string(),
        };
        image_view.device.set_debug_name(&image_view, &name);
        image_view
    }
}
// destroy
impl GfxImageView {
    pub fn destroy(self) {
        self.device.destroy_image_view(self.handle);
    }
}
// getters
impl GfxImageView {
    #[inline]
    pub fn handle(&self) -> vk::ImageView {
        self.handle
    }

    #[inline]
    pub fn desc(&self) -> &GfxImageViewDesc {
        &self.desc
    }
}
impl std::fmt::Display for GfxImageView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Image2DView({}, {:?})", self.name, self.handle)
    }
}
