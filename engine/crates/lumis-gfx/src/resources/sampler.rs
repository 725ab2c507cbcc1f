use std::rc::Rc;

use ash::vk;

use crate::foundation::{debug_type::DebugType, device_api::GfxDeviceApi};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GfxSamplerDesc {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub address_mode: vk::SamplerAddressMode,
    pub mipmap_mode: vk::SamplerMipmapMode,
}
impl Default for GfxSamplerDesc {
    fn default() -> Self {
        Self::linear_clamp()
    }
}
impl GfxSamplerDesc {
    /// 金字塔的上下采样使用：双线性过滤，越界时 clamp 到边缘
    pub fn linear_clamp() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            address_mode: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            mipmap_mode: vk::SamplerMipmapMode::NEAREST,
        }
    }
}

/// # Destroy
/// 可以 Clone，需要手动 destroy
#[derive(Clone)]
pub struct GfxSampler {
    handle: vk::Sampler,
    device: Rc<dyn GfxDeviceApi>,
}
impl DebugType for GfxSampler {
    fn debug_type_name() -> &'static str {
        "GfxSampler"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
// new & init
impl GfxSampler {
    pub fn new(device: Rc<dyn GfxDeviceApi>, desc: &GfxSamplerDesc, name: impl AsRef<str>) -> Self {
        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(desc.mag_filter)
            .min_filter(desc.min_filter)
            .address_mode_u(desc.address_mode)
            .address_mode_v(desc.address_mode)
            .address_mode_w(desc.address_mode)
            .mipmap_mode(desc.mipmap_mode)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE)
            .anisotropy_enable(false)
            .compare_enable(false)
            .border_color(vk::BorderColor::FLOAT_TRANSPARENT_BLACK);

        let sampler = Self {
            handle: device.create_sampler(&create_info),
            device,
        };
        sampler.device.set_debug_name(&sampler, name);
        sampler
    }
}
// getters
impl GfxSampler {
    #[inline]
    pub fn handle(&self) -> vk::Sampler {
        self.handle
    }
}
// destroy
impl GfxSampler {
    pub fn destroy(self) {
        self.device.destroy_sampler(self.handle);
    }
}
