use std::rc::Rc;

use ash::vk;
use itertools::Itertools;
use lumis_gfx::{
    foundation::device_api::GfxDeviceApi,
    resources::{
        image::{GfxImage, GfxImageCreateInfo},
        image_view::{GfxImageView, GfxImageViewDesc},
    },
};

use crate::stage::MAX_PYRAMID_LEVELS;

/// 后处理 attachment 一直保持 `GENERAL` layout，可以作为 storage、sampled 以及 blit 的两端
pub const ATTACHMENT_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::STORAGE.as_raw()
        | vk::ImageUsageFlags::SAMPLED.as_raw()
        | vk::ImageUsageFlags::TRANSFER_SRC.as_raw()
        | vk::ImageUsageFlags::TRANSFER_DST.as_raw(),
);

/// 第 `level` 层的尺寸，每层减半，最小为 1
pub fn pyramid_level_extent(base: vk::Extent2D, level: u32) -> vk::Extent2D {
    let shrink = |v: u32| v.checked_shr(level).unwrap_or(0).max(1);
    vk::Extent2D {
        width: shrink(base.width),
        height: shrink(base.height),
    }
}

/// 一直减半直到 1x1 的完整层数
pub fn full_pyramid_depth(base: vk::Extent2D) -> u32 {
    let longest = base.width.max(base.height).max(1);
    u32::BITS - longest.leading_zeros()
}

/// 实际使用的层数：至少 1 层，不超过完整层数以及 descriptor 数组的容量
pub fn clamp_pyramid_depth(base: vk::Extent2D, requested: u32) -> u32 {
    requested.clamp(1, full_pyramid_depth(base).min(MAX_PYRAMID_LEVELS))
}

/// 一张 image 与覆盖它全部内容的 view
///
/// # Destroy
/// 可以 Clone，需要手动 destroy
#[derive(Clone)]
pub struct Attachment {
    image: GfxImage,
    view: GfxImageView,
}
// new & init
impl Attachment {
    pub fn new(device: Rc<dyn GfxDeviceApi>, extent: vk::Extent2D, format: vk::Format, name: &str) -> Self {
        let image_info = GfxImageCreateInfo::new_image_2d_info(extent, format, ATTACHMENT_USAGE);
        let image = GfxImage::new(device.clone(), &image_info, name);
        let view = GfxImageView::new(
            device,
            image.handle(),
            GfxImageViewDesc::new_2d(format, vk::ImageAspectFlags::COLOR),
            name,
        );
        Self { image, view }
    }
}
// getters
impl Attachment {
    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image.handle()
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view.handle()
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.image.extent()
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.image.format()
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.image.name()
    }
}
// destroy
impl Attachment {
    pub fn destroy(self) {
        self.view.destroy();
        self.image.destroy();
    }
}

/// 逐层减半的一组 attachment，第 0 层是全分辨率
///
/// 每层是独立的 image，shader 里通过 descriptor 数组按层索引。
#[derive(Clone)]
pub struct AttachmentPyramid {
    levels: Vec<Attachment>,
}
// new & init
impl AttachmentPyramid {
    /// `requested_levels` 会经过 [`clamp_pyramid_depth`]
    pub fn new(
        device: Rc<dyn GfxDeviceApi>,
        base: vk::Extent2D,
        format: vk::Format,
        requested_levels: u32,
        name: &str,
    ) -> Self {
        let depth = clamp_pyramid_depth(base, requested_levels);
        if depth != requested_levels {
            log::info!(
                "pyramid <{}>: {} levels requested, {} created for {}x{}",
                name,
                requested_levels,
                depth,
                base.width,
                base.height
            );
        }

        let levels = (0..depth)
            .map(|level| {
                Attachment::new(
                    device.clone(),
                    pyramid_level_extent(base, level),
                    format,
                    &format!("{name}-mip{level}"),
                )
            })
            .collect_vec();
        Self { levels }
    }
}
// getters
impl AttachmentPyramid {
    #[inline]
    pub fn level_count(&self) -> u32 {
        self.levels.len() as u32
    }

    #[inline]
    pub fn level(&self, level: u32) -> &Attachment {
        &self.levels[level as usize]
    }

    pub fn views(&self) -> Vec<vk::ImageView> {
        self.levels.iter().map(Attachment::view).collect()
    }

    pub fn images(&self) -> impl Iterator<Item = vk::Image> + '_ {
        self.levels.iter().map(Attachment::image)
    }
}
// destroy
impl AttachmentPyramid {
    pub fn destroy(self) {
        for level in self.levels {
            level.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use lumis_gfx::testing::RecordingDevice;

    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_level_extent_halves_and_floors_at_one() {
        let base = extent(1920, 1080);
        assert_eq!(pyramid_level_extent(base, 0), base);
        assert_eq!(pyramid_level_extent(base, 1), extent(960, 540));
        assert_eq!(pyramid_level_extent(base, 4), extent(120, 67));
        assert_eq!(pyramid_level_extent(base, 11), extent(1, 1));
        assert_eq!(pyramid_level_extent(base, 40), extent(1, 1));
    }

    #[test]
    fn test_depth_is_clamped() {
        assert_eq!(full_pyramid_depth(extent(1, 1)), 1);
        assert_eq!(full_pyramid_depth(extent(8, 3)), 4);

        assert_eq!(clamp_pyramid_depth(extent(8, 8), 10), 4);
        assert_eq!(clamp_pyramid_depth(extent(8, 8), 0), 1);
        assert_eq!(clamp_pyramid_depth(extent(1 << 15, 4), 32), MAX_PYRAMID_LEVELS);
    }

    #[test]
    fn test_pyramid_creates_one_image_per_level() {
        let recording = Rc::new(RecordingDevice::new());
        let pyramid =
            AttachmentPyramid::new(recording.clone(), extent(64, 16), vk::Format::R32_SFLOAT, 3, "bloom-down");

        assert_eq!(pyramid.level_count(), 3);
        assert_eq!(pyramid.level(2).extent(), extent(16, 4));
        assert_eq!(recording.live_count("image"), 3);
        assert_eq!(recording.live_count("image_view"), 3);

        let info = recording.image_info(pyramid.level(1).image()).unwrap();
        assert_eq!((info.extent.width, info.extent.height), (32, 8));
        assert!(info.usage.contains(vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::TRANSFER_SRC));

        pyramid.destroy();
        assert_eq!(recording.live_count("image"), 0);
        assert_eq!(recording.live_count("image_view"), 0);
    }
}
