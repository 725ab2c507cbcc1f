//! 效果、stage、attachment 以及金字塔的静态目录
//!
//! 这里只描述“有哪些”以及“谁拥有谁”，不持有任何 GPU 资源。

use ash::vk;
use glam::UVec2;
use lumis_crate_tools::indexed_enum;

use crate::{params::*, stage::StageBinding};

indexed_enum! {
    /// 后处理效果，声明顺序就是每帧的执行顺序
    pub enum Effect {
        ExposureAdaptation,
        LocalToneMapDurand,
        LocalToneMapFusion,
        Bloom,
        GlobalToneMap,
        Gamma,
    }
}

indexed_enum! {
    pub enum StageKind {
        Histogram,
        AverageLuminance,

        DurandLumChroma,
        DurandBilateral,
        DurandReconstruct,

        FusionExposures,
        FusionDownsample,
        FusionLaplacian,
        FusionBlend,
        FusionUpsample,
        FusionAccumulate,
        FusionApply,

        BloomThreshold,
        BloomDownsample,
        BloomUpsample,
        BloomComposite,

        GlobalToneMap,
        Gamma,
    }
}

indexed_enum! {
    /// 全分辨率的单张 attachment
    pub enum AttachmentKind {
        /// 颜色 ping-pong，所有修改颜色的 stage 共享
        ColorPing,
        ColorPong,
        /// 场景颜色不是 [`HDR_COLOR_FORMAT`] 时，先 blit 到这里再交给各个 stage
        ColorSource,

        DurandLum,
        DurandChroma,
        DurandBase,

        BloomThreshold,
    }
}

indexed_enum! {
    pub enum PyramidKind {
        FusionLum,
        FusionWeight,
        FusionLaplacian,
        FusionBlended,
        FusionUpsampleA,
        FusionUpsampleB,

        BloomDown,
        BloomUp,
    }
}

pub const HDR_COLOR_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
/// 场景颜色可以使用的格式，shader 中 storage image 的格式固定为 rgba16f
pub const SOURCE_COLOR_FORMATS: &[vk::Format] = &[HDR_COLOR_FORMAT, vk::Format::R32G32B32A32_SFLOAT];
pub const SCALAR_FORMAT: vk::Format = vk::Format::R32_SFLOAT;

// Effect
impl Effect {
    pub fn stages(self) -> &'static [StageKind] {
        use StageKind::*;
        match self {
            Self::ExposureAdaptation => &[Histogram, AverageLuminance],
            Self::LocalToneMapDurand => &[DurandLumChroma, DurandBilateral, DurandReconstruct],
            Self::LocalToneMapFusion => &[
                FusionExposures,
                FusionDownsample,
                FusionLaplacian,
                FusionBlend,
                FusionUpsample,
                FusionAccumulate,
                FusionApply,
            ],
            Self::Bloom => &[BloomThreshold, BloomDownsample, BloomUpsample, BloomComposite],
            Self::GlobalToneMap => &[StageKind::GlobalToneMap],
            Self::Gamma => &[StageKind::Gamma],
        }
    }

    /// 效果独占的 attachment，不包含共享的 ping-pong
    pub fn attachments(self) -> &'static [AttachmentKind] {
        AttachmentKind::owned_by(self)
    }

    pub fn pyramids(self) -> &'static [PyramidKind] {
        use PyramidKind::*;
        match self {
            Self::LocalToneMapFusion => {
                &[FusionLum, FusionWeight, FusionLaplacian, FusionBlended, FusionUpsampleA, FusionUpsampleB]
            }
            Self::Bloom => &[BloomDown, BloomUp],
            _ => &[],
        }
    }

    /// 是否会写出新的颜色，写出到下一个 ping-pong attachment
    pub fn modifies_color(self) -> bool {
        !matches!(self, Self::ExposureAdaptation)
    }
}

// StageKind
impl StageKind {
    pub fn effect(self) -> Effect {
        use StageKind::*;
        match self {
            Histogram | AverageLuminance => Effect::ExposureAdaptation,
            DurandLumChroma | DurandBilateral | DurandReconstruct => Effect::LocalToneMapDurand,
            FusionExposures | FusionDownsample | FusionLaplacian | FusionBlend | FusionUpsample | FusionAccumulate
            | FusionApply => Effect::LocalToneMapFusion,
            BloomThreshold | BloomDownsample | BloomUpsample | BloomComposite => Effect::Bloom,
            GlobalToneMap => Effect::GlobalToneMap,
            Gamma => Effect::Gamma,
        }
    }

    /// 编译后的 SPIR-V 文件名
    pub fn shader_name(self) -> &'static str {
        use StageKind::*;
        match self {
            Histogram => "histogram.comp.spv",
            AverageLuminance => "average_luminance.comp.spv",
            DurandLumChroma => "durand_lum_chroma.comp.spv",
            DurandBilateral => "durand_bilateral.comp.spv",
            DurandReconstruct => "durand_reconstruct.comp.spv",
            FusionExposures => "fusion_exposures.comp.spv",
            FusionDownsample => "fusion_downsample.comp.spv",
            FusionLaplacian => "fusion_laplacian.comp.spv",
            FusionBlend => "fusion_blend.comp.spv",
            FusionUpsample => "fusion_upsample.comp.spv",
            FusionAccumulate => "fusion_accumulate.comp.spv",
            FusionApply => "fusion_apply.comp.spv",
            BloomThreshold => "bloom_threshold.comp.spv",
            BloomDownsample => "bloom_downsample.comp.spv",
            BloomUpsample => "bloom_upsample.comp.spv",
            BloomComposite => "bloom_composite.comp.spv",
            GlobalToneMap => "tone_map.comp.spv",
            Gamma => "gamma.comp.spv",
        }
    }

    /// workgroup 大小，与 shader 中的 `local_size_x/y` 一致
    pub fn local_size(self) -> UVec2 {
        match self {
            // 单个 workgroup 归约整个直方图
            Self::AverageLuminance => UVec2::new(256, 1),
            _ => UVec2::new(16, 16),
        }
    }

    /// descriptor set 的布局，binding 编号就是下标
    pub fn schema(self) -> &'static [StageBinding] {
        use StageBinding::*;
        use StageKind::*;
        match self {
            // src, luminance buffer
            Histogram => &[StorageImage, StorageBuffer],
            // luminance buffer
            AverageLuminance => &[StorageBuffer],
            // src, lum, chroma
            DurandLumChroma => &[StorageImage, StorageImage, StorageImage],
            // lum, base
            DurandBilateral => &[StorageImage, StorageImage],
            // lum, base, chroma, dst
            DurandReconstruct => &[StorageImage, StorageImage, StorageImage, StorageImage],
            // src, lum[0], weight[0]
            FusionExposures => &[StorageImage, StorageImage, StorageImage],
            // lum (sampled), weight (sampled), lum (storage), weight (storage)
            FusionDownsample => &[SampledImagePyramid, SampledImagePyramid, StorageImagePyramid, StorageImagePyramid],
            // lum (sampled), laplacian
            FusionLaplacian => &[SampledImagePyramid, StorageImagePyramid],
            // laplacian, weight, blended
            FusionBlend => &[StorageImagePyramid, StorageImagePyramid, StorageImagePyramid],
            // blended (sampled), upsample_b (sampled), upsample_a
            FusionUpsample => &[SampledImagePyramid, SampledImagePyramid, StorageImagePyramid],
            // upsample_a, blended, upsample_b
            FusionAccumulate => &[StorageImagePyramid, StorageImagePyramid, StorageImagePyramid],
            // src, fused, dst
            FusionApply => &[StorageImage, StorageImage, StorageImage],
            // src, threshold
            BloomThreshold => &[StorageImage, StorageImage],
            // threshold (sampled), down (sampled), down
            BloomDownsample => &[SampledImage, SampledImagePyramid, StorageImagePyramid],
            // down (sampled), up (sampled), up
            BloomUpsample => &[SampledImagePyramid, SampledImagePyramid, StorageImagePyramid],
            // src, bloom, dst
            BloomComposite => &[StorageImage, StorageImage, StorageImage],
            // src, dst, luminance buffer
            GlobalToneMap => &[StorageImage, StorageImage, StorageBuffer],
            // src, dst
            Gamma => &[StorageImage, StorageImage],
        }
    }

    pub fn push_constant_size(self) -> u32 {
        use StageKind::*;
        let size = match self {
            Histogram => size_of::<HistogramParams>(),
            AverageLuminance => size_of::<AverageLuminanceParams>(),
            DurandLumChroma | FusionApply => 0,
            DurandBilateral => size_of::<DurandBilateralParams>(),
            DurandReconstruct => size_of::<DurandReconstructParams>(),
            FusionExposures => size_of::<FusionExposureParams>(),
            FusionDownsample | FusionLaplacian | FusionBlend | FusionUpsample | FusionAccumulate | BloomDownsample => {
                size_of::<LevelParams>()
            }
            BloomThreshold => size_of::<BloomThresholdParams>(),
            BloomUpsample => size_of::<BloomUpsampleParams>(),
            BloomComposite => size_of::<BloomCompositeParams>(),
            GlobalToneMap => size_of::<ToneMapParams>(),
            Gamma => size_of::<GammaParams>(),
        };
        size as u32
    }

    /// 会读取亮度 buffer 的 stage，buffer binding 在创建时写好
    pub fn luminance_buffer_binding(self) -> Option<u32> {
        match self {
            Self::Histogram => Some(1),
            Self::AverageLuminance => Some(0),
            Self::GlobalToneMap => Some(2),
            _ => None,
        }
    }
}

// AttachmentKind
impl AttachmentKind {
    /// `None` 表示所有修改颜色的效果共享
    pub fn owner(self) -> Option<Effect> {
        match self {
            Self::ColorPing | Self::ColorPong | Self::ColorSource => None,
            Self::DurandLum | Self::DurandChroma | Self::DurandBase => Some(Effect::LocalToneMapDurand),
            Self::BloomThreshold => Some(Effect::Bloom),
        }
    }

    pub fn format(self) -> vk::Format {
        match self {
            Self::DurandLum | Self::DurandBase => SCALAR_FORMAT,
            _ => HDR_COLOR_FORMAT,
        }
    }

    fn owned_by(effect: Effect) -> &'static [Self] {
        match effect {
            Effect::LocalToneMapDurand => &[Self::DurandLum, Self::DurandChroma, Self::DurandBase],
            Effect::Bloom => &[Self::BloomThreshold],
            _ => &[],
        }
    }
}

// PyramidKind
impl PyramidKind {
    pub fn owner(self) -> Effect {
        match self {
            Self::BloomDown | Self::BloomUp => Effect::Bloom,
            _ => Effect::LocalToneMapFusion,
        }
    }

    pub fn format(self) -> vk::Format {
        match self {
            // rgb 三个通道分别对应三张合成曝光
            Self::FusionLum | Self::FusionWeight | Self::FusionLaplacian => HDR_COLOR_FORMAT,
            // 按权重合并之后只剩下亮度
            Self::FusionBlended | Self::FusionUpsampleA | Self::FusionUpsampleB => SCALAR_FORMAT,
            Self::BloomDown | Self::BloomUp => HDR_COLOR_FORMAT,
        }
    }
}
