//! 每帧的后处理调度
//!
//! 先由 [`FrameOrchestrator::plan`] 按照效果顺序展开出所有 dispatch，
//! 再逐个录制；录制的顺序与计划完全一致，每个 dispatch 之后都有一个 compute -> compute barrier。
//!
//! 颜色在两张全分辨率 attachment 之间 ping-pong：每个修改颜色的 stage 读取当前颜色，
//! 写入另一张，然后交换。场景颜色本身只读。

use ash::vk;
use itertools::Itertools;
use lumis_crate_tools::enum_table::{EnumTable, IndexedEnum};
use lumis_gfx::{
    commands::{
        barrier::{GfxBarrierMask, GfxBufferBarrier, GfxImageBarrier, GfxMemoryBarrier},
        command_buffer::GfxCommandBuffer,
    },
    foundation::color::LabelColor,
};

use crate::{
    attachment::{Attachment, pyramid_level_extent},
    effect::{AttachmentKind, Effect, HDR_COLOR_FORMAT, PyramidKind, SOURCE_COLOR_FORMATS, StageKind},
    frame_counter::FrameLabel,
    histogram::{self, LuminanceBufferData},
    params::*,
    postfx::PostFx,
    render_context::RenderContext,
    stage::StageImage,
};

/// 场景渲染的 HDR 颜色，调用者保证处于 `GENERAL` layout
///
/// `format` 必须是 [`SOURCE_COLOR_FORMATS`] 之一，不是 [`HDR_COLOR_FORMAT`] 时每帧先转换一次
#[derive(Debug, Clone, Copy)]
pub struct SourceImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
}
impl SourceImage {
    pub fn from_attachment(attachment: &Attachment) -> Self {
        Self {
            image: attachment.image(),
            view: attachment.view(),
            extent: attachment.extent(),
            format: attachment.format(),
        }
    }

    #[inline]
    fn needs_conversion(&self) -> bool {
        self.format != HDR_COLOR_FORMAT
    }
}

/// 后处理结果 blit 的目标，一般是 swapchain image
#[derive(Debug, Clone, Copy)]
pub struct CompositeTarget {
    pub image: vk::Image,
    pub extent: vk::Extent2D,
    pub old_layout: vk::ImageLayout,
    /// blit 完成之后转换到的 layout
    pub final_layout: vk::ImageLayout,
}

/// 帧相关的输入
#[derive(Debug, Clone, Copy)]
pub struct PostFxFrame {
    pub label: FrameLabel,
    pub frame_id: u64,
    /// 帧槽位的回读 buffer，亮度统计会被拷贝进去
    pub readback: Option<vk::Buffer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedStep {
    pub stage: StageKind,
    /// 金字塔上逐层执行的 stage 所在的层
    pub level: Option<u32>,
    pub barrier_after: bool,
}
impl PlannedStep {
    #[inline]
    fn new(stage: StageKind, level: Option<u32>) -> Self {
        Self {
            stage,
            level,
            barrier_after: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FrameOutput {
    /// blit 到目标之前的最终颜色
    pub final_image: vk::Image,
    pub final_view: vk::ImageView,
    pub steps: Vec<PlannedStep>,
    /// 打开了但是存在无效 stage 的效果
    pub skipped: Vec<Effect>,
    pub luminance_copied: bool,
}

#[derive(Default)]
pub struct FrameOrchestrator {
    /// 已经输出过警告的效果
    warned: EnumTable<Effect, ()>,
}
// new & init
impl FrameOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }
}
// plan
impl FrameOrchestrator {
    /// 打开并且有效的效果展开之后的 dispatch 序列
    ///
    /// 还没有创建的效果视为有效，金字塔层数使用设置中的值
    pub fn plan(postfx: &PostFx) -> Vec<PlannedStep> {
        Effect::ALL
            .iter()
            .filter(|&&effect| postfx.is_enabled(effect) && postfx.is_effect_valid(effect))
            .flat_map(|&effect| Self::effect_steps(postfx, effect))
            .collect_vec()
    }

    /// 打开了但是无法执行的效果
    pub fn skipped_effects(postfx: &PostFx) -> Vec<Effect> {
        Effect::ALL
            .iter()
            .copied()
            .filter(|&effect| postfx.is_enabled(effect) && !postfx.is_effect_valid(effect))
            .collect_vec()
    }

    fn effect_steps(postfx: &PostFx, effect: Effect) -> Vec<PlannedStep> {
        use StageKind::*;
        let step = PlannedStep::new;
        match effect {
            Effect::ExposureAdaptation => vec![step(Histogram, None), step(AverageLuminance, None)],
            Effect::LocalToneMapDurand => {
                vec![step(DurandLumChroma, None), step(DurandBilateral, None), step(DurandReconstruct, None)]
            }
            Effect::LocalToneMapFusion => {
                let levels = postfx.pyramid_depth(PyramidKind::FusionLum);
                let mut steps = vec![step(FusionExposures, None)];
                steps.extend((1..levels).map(|k| step(FusionDownsample, Some(k))));
                for k in 0..levels {
                    steps.push(step(FusionLaplacian, Some(k)));
                    steps.push(step(FusionBlend, Some(k)));
                }
                // 从最粗的一层开始逐层向上合并
                for k in (0..levels.saturating_sub(1)).rev() {
                    steps.push(step(FusionUpsample, Some(k)));
                    steps.push(step(FusionAccumulate, Some(k)));
                }
                steps.push(step(FusionApply, None));
                steps
            }
            Effect::Bloom => {
                let levels = postfx.pyramid_depth(PyramidKind::BloomDown);
                let mut steps = vec![step(BloomThreshold, None)];
                steps.extend((0..levels).map(|k| step(BloomDownsample, Some(k))));
                steps.extend((0..levels.saturating_sub(1)).rev().map(|k| step(BloomUpsample, Some(k))));
                steps.push(step(BloomComposite, None));
                steps
            }
            Effect::GlobalToneMap => vec![step(StageKind::GlobalToneMap, None)],
            Effect::Gamma => vec![step(StageKind::Gamma, None)],
        }
    }
}
// record
impl FrameOrchestrator {
    /// 录制一帧的后处理，并将结果 blit 到 `target`
    ///
    /// `source` 的尺寸必须与 `postfx` 一致，分辨率变化之后需要先 [`PostFx::rebuild`]
    pub fn run_frame(
        &mut self,
        ctx: &mut RenderContext,
        postfx: &mut PostFx,
        cmd: &GfxCommandBuffer,
        frame: &PostFxFrame,
        source: &SourceImage,
        target: &CompositeTarget,
    ) -> FrameOutput {
        let _span = tracy_client::span!("FrameOrchestrator::run_frame");
        assert_eq!(
            source.extent,
            postfx.extent(),
            "source extent differs from postfx, rebuild postfx first"
        );
        assert!(
            SOURCE_COLOR_FORMATS.contains(&source.format),
            "unsupported scene color format {:?}",
            source.format
        );

        let fixed = postfx.settings_mut().sanitize();
        if !fixed.is_empty() {
            log::warn!("invalid postfx parameters reset to defaults: {}", fixed.join(", "));
        }

        for &effect in Effect::ALL {
            if postfx.is_enabled(effect) {
                postfx.ensure_effect(ctx, effect);
            }
        }
        postfx.begin_frame(frame.label);

        let skipped = Self::skipped_effects(postfx);
        for &effect in &skipped {
            if self.warned.insert(effect, ()).is_none() {
                log::warn!("postfx effect <{}> has an invalid stage and is skipped", effect);
            }
        }
        let steps = Self::plan(postfx);
        let convert = source.needs_conversion() && !steps.is_empty();
        if convert {
            postfx.ensure_source_conversion();
        }

        cmd.begin_label("postfx", LabelColor::COLOR_PASS);
        // 上一次提交对亮度 buffer 以及 attachment 的写入，对本帧的清空与读取可见
        cmd.memory_barrier(&[GfxMemoryBarrier::new(GfxBarrierMask::FRAME_START)]);
        Self::init_layouts(cmd, postfx.take_pending_layout_init());
        let color = if convert {
            let converted = postfx.expect_attachment(AttachmentKind::ColorSource);
            Self::convert_source(cmd, source, converted);
            ColorChain::new(converted.image(), converted.view())
        } else {
            ColorChain::new(source.image, source.view)
        };

        let mut recorder = StepRecorder {
            ctx,
            postfx,
            cmd,
            frame,
            color,
            exposure_ran: false,
        };
        for (effect, group) in &steps.iter().group_by(|step| step.stage.effect()) {
            cmd.begin_label(effect.name(), LabelColor::COLOR_STAGE);
            for step in group {
                recorder.record(step);
            }
            cmd.end_label();
        }

        let color = recorder.color;
        let exposure_ran = recorder.exposure_ran;
        let postfx = recorder.postfx;

        Self::composite(cmd, &color, source.extent, target);
        let luminance_copied = match frame.readback {
            Some(readback) if exposure_ran => {
                Self::copy_luminance(cmd, postfx, readback);
                true
            }
            _ => false,
        };
        cmd.end_label();

        FrameOutput {
            final_image: color.image,
            final_view: color.view,
            steps,
            skipped,
            luminance_copied,
        }
    }

    /// 新创建的 attachment 从 `UNDEFINED` 转换到 `GENERAL`，之后一直保持
    fn init_layouts(cmd: &GfxCommandBuffer, images: Vec<vk::Image>) {
        if images.is_empty() {
            return;
        }
        log::debug!("init layout of {} postfx images", images.len());
        let barriers = images
            .into_iter()
            .map(|image| {
                GfxImageBarrier::new()
                    .image(image)
                    .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::GENERAL)
                    .src_mask(vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE)
                    .dst_mask(
                        vk::PipelineStageFlags2::COMPUTE_SHADER | vk::PipelineStageFlags2::TRANSFER,
                        vk::AccessFlags2::SHADER_READ | vk::AccessFlags2::SHADER_WRITE,
                    )
            })
            .collect_vec();
        cmd.image_memory_barrier(vk::DependencyFlags::empty(), &barriers);
    }

    /// stage 中的 storage image 都是 rgba16f，其他格式的场景颜色先 blit 成 [`HDR_COLOR_FORMAT`]
    fn convert_source(cmd: &GfxCommandBuffer, source: &SourceImage, converted: &Attachment) {
        cmd.begin_label("convert-source", LabelColor::COLOR_CMD);
        let subresource = vk::ImageSubresourceLayers::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .layer_count(1);
        let far_corner = vk::Offset3D {
            x: source.extent.width as i32,
            y: source.extent.height as i32,
            z: 1,
        };
        let region = vk::ImageBlit2::default()
            .src_subresource(subresource)
            .src_offsets([vk::Offset3D::default(), far_corner])
            .dst_subresource(subresource)
            .dst_offsets([vk::Offset3D::default(), far_corner]);
        let blit_info = vk::BlitImageInfo2::default()
            .src_image(source.image)
            .src_image_layout(vk::ImageLayout::GENERAL)
            .dst_image(converted.image())
            .dst_image_layout(vk::ImageLayout::GENERAL)
            .regions(std::slice::from_ref(&region))
            .filter(vk::Filter::NEAREST);
        cmd.cmd_blit_image(&blit_info);
        cmd.memory_barrier(&[GfxMemoryBarrier::new(GfxBarrierMask::TRANSFER_WRITE_TO_COMPUTE)]);
        cmd.end_label();
    }

    fn composite(cmd: &GfxCommandBuffer, color: &ColorChain, src_extent: vk::Extent2D, target: &CompositeTarget) {
        cmd.begin_label("composite", LabelColor::COLOR_CMD);
        cmd.memory_barrier(&[GfxMemoryBarrier::new(GfxBarrierMask::COMPUTE_WRITE_TO_TRANSFER)]);
        cmd.image_memory_barrier(
            vk::DependencyFlags::empty(),
            &[GfxImageBarrier::new()
                .image(target.image)
                .layout_transfer(target.old_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_mask(vk::PipelineStageFlags2::ALL_COMMANDS, vk::AccessFlags2::NONE)
                .dst_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)],
        );

        let subresource = vk::ImageSubresourceLayers::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .mip_level(0)
            .base_array_layer(0)
            .layer_count(1);
        let far_corner = |extent: vk::Extent2D| vk::Offset3D {
            x: extent.width as i32,
            y: extent.height as i32,
            z: 1,
        };
        let region = vk::ImageBlit2::default()
            .src_subresource(subresource)
            .src_offsets([vk::Offset3D::default(), far_corner(src_extent)])
            .dst_subresource(subresource)
            .dst_offsets([vk::Offset3D::default(), far_corner(target.extent)]);
        let blit_info = vk::BlitImageInfo2::default()
            .src_image(color.image)
            .src_image_layout(vk::ImageLayout::GENERAL)
            .dst_image(target.image)
            .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .regions(std::slice::from_ref(&region))
            .filter(vk::Filter::LINEAR);
        cmd.cmd_blit_image(&blit_info);

        cmd.image_memory_barrier(
            vk::DependencyFlags::empty(),
            &[GfxImageBarrier::new()
                .image(target.image)
                .layout_transfer(vk::ImageLayout::TRANSFER_DST_OPTIMAL, target.final_layout)
                .src_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
                .dst_mask(
                    vk::PipelineStageFlags2::ALL_COMMANDS,
                    vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE,
                )],
        );
        cmd.end_label();
    }

    /// 拷贝之后对 host 可见，等待帧槽位的 fence 之后即可读取
    fn copy_luminance(cmd: &GfxCommandBuffer, postfx: &PostFx, readback: vk::Buffer) {
        let size = size_of::<LuminanceBufferData>() as vk::DeviceSize;
        cmd.cmd_copy_buffer(
            postfx.luminance_buffer().vk_buffer(),
            readback,
            &[vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            }],
        );
        cmd.buffer_memory_barrier(
            vk::DependencyFlags::empty(),
            &[GfxBufferBarrier::new().mask(GfxBarrierMask::TRANSFER_WRITE_TO_HOST_READ).buffer(readback, 0, size)],
        );
    }
}

/// 当前颜色以及下一个要写入的 ping-pong attachment
struct ColorChain {
    image: vk::Image,
    view: vk::ImageView,
    next: AttachmentKind,
}
impl ColorChain {
    fn new(image: vk::Image, view: vk::ImageView) -> Self {
        Self {
            image,
            view,
            next: AttachmentKind::ColorPing,
        }
    }

    fn target<'a>(&self, postfx: &'a PostFx) -> &'a Attachment {
        postfx.expect_attachment(self.next)
    }

    fn advance(&mut self, postfx: &PostFx) {
        let written = self.target(postfx);
        self.image = written.image();
        self.view = written.view();
        self.next = match self.next {
            AttachmentKind::ColorPing => AttachmentKind::ColorPong,
            _ => AttachmentKind::ColorPing,
        };
    }
}

struct StepRecorder<'a> {
    ctx: &'a mut RenderContext,
    postfx: &'a mut PostFx,
    cmd: &'a GfxCommandBuffer,
    frame: &'a PostFxFrame,
    color: ColorChain,
    exposure_ran: bool,
}
impl StepRecorder<'_> {
    fn dispatch<P: bytemuck::Pod>(
        &mut self,
        kind: StageKind,
        images: Vec<(u32, StageImage)>,
        extent: vk::Extent2D,
        params: &P,
    ) {
        self.postfx.dispatch(self.ctx, self.cmd, kind, images, extent, params);
    }

    /// 下一个 ping-pong attachment，只有修改颜色的 stage 使用
    fn dst(&self) -> StageImage {
        StageImage::View(self.color.target(self.postfx).view())
    }

    fn view(&self, kind: AttachmentKind) -> StageImage {
        StageImage::View(self.postfx.expect_attachment(kind).view())
    }

    fn pyramid(&self, kind: PyramidKind) -> StageImage {
        StageImage::Pyramid(self.postfx.expect_pyramid(kind).views())
    }

    fn pyramid_level(&self, kind: PyramidKind, level: u32) -> StageImage {
        StageImage::View(self.postfx.expect_pyramid(kind).level(level).view())
    }

    fn levels(&self, kind: PyramidKind) -> u32 {
        self.postfx.expect_pyramid(kind).level_count()
    }

    fn record(&mut self, step: &PlannedStep) {
        use StageImage::View;
        use StageKind::*;

        let full = self.postfx.extent();
        let src = View(self.color.view);
        let level = step.level.unwrap_or(0);
        let level_extent = pyramid_level_extent(full, level);
        let new_role = histogram::new_role(self.frame.frame_id) as u32;

        match step.stage {
            Histogram => {
                self.clear_new_role();
                let s = &self.postfx.settings().exposure;
                let params = HistogramParams {
                    min_log_luminance: s.min_log_luminance,
                    inv_log_luminance_range: 1.0 / s.log_luminance_range,
                    new_role,
                    _padding: 0,
                };
                self.dispatch(Histogram, vec![(0, src)], full, &params);
            }
            AverageLuminance => {
                let s = &self.postfx.settings().exposure;
                let params = AverageLuminanceParams {
                    min_log_luminance: s.min_log_luminance,
                    log_luminance_range: s.log_luminance_range,
                    lower_percent: s.lower_percent,
                    upper_percent: s.upper_percent,
                    time_coefficient: s.time_coefficient,
                    compensation: s.compensation,
                    new_role,
                    _padding: 0,
                };
                // 单个 workgroup
                self.dispatch(AverageLuminance, vec![], vk::Extent2D { width: 1, height: 1 }, &params);
                self.exposure_ran = true;
            }

            DurandLumChroma => {
                let images = vec![
                    (0, src),
                    (1, self.view(AttachmentKind::DurandLum)),
                    (2, self.view(AttachmentKind::DurandChroma)),
                ];
                self.dispatch(DurandLumChroma, images, full, &());
            }
            DurandBilateral => {
                let s = &self.postfx.settings().durand;
                let params = DurandBilateralParams {
                    sigma_space: s.sigma_space,
                    sigma_range: s.sigma_range,
                    radius: s.radius,
                    _padding: 0,
                };
                let images = vec![(0, self.view(AttachmentKind::DurandLum)), (1, self.view(AttachmentKind::DurandBase))];
                self.dispatch(DurandBilateral, images, full, &params);
            }
            DurandReconstruct => {
                let s = &self.postfx.settings().durand;
                let params = DurandReconstructParams {
                    compression: s.compression,
                    detail_boost: s.detail_boost,
                    log_reference: s.reference_luminance.log10(),
                    _padding: 0.0,
                };
                let images = vec![
                    (0, self.view(AttachmentKind::DurandLum)),
                    (1, self.view(AttachmentKind::DurandBase)),
                    (2, self.view(AttachmentKind::DurandChroma)),
                    (3, self.dst()),
                ];
                self.dispatch(DurandReconstruct, images, full, &params);
                self.color.advance(self.postfx);
            }

            FusionExposures => {
                let s = &self.postfx.settings().fusion;
                let params = FusionExposureParams {
                    shadows_ev: s.shadows_ev,
                    highlights_ev: s.highlights_ev,
                    well_exposed_sigma: s.well_exposed_sigma,
                    _padding: 0.0,
                };
                let images = vec![
                    (0, src),
                    (1, self.pyramid_level(PyramidKind::FusionLum, 0)),
                    (2, self.pyramid_level(PyramidKind::FusionWeight, 0)),
                ];
                self.dispatch(FusionExposures, images, full, &params);
            }
            FusionDownsample => {
                let params = LevelParams::new(level, self.levels(PyramidKind::FusionLum));
                let images = vec![
                    (0, self.pyramid(PyramidKind::FusionLum)),
                    (1, self.pyramid(PyramidKind::FusionWeight)),
                    (2, self.pyramid(PyramidKind::FusionLum)),
                    (3, self.pyramid(PyramidKind::FusionWeight)),
                ];
                self.dispatch(FusionDownsample, images, level_extent, &params);
            }
            FusionLaplacian => {
                let params = LevelParams::new(level, self.levels(PyramidKind::FusionLum));
                let images = vec![
                    (0, self.pyramid(PyramidKind::FusionLum)),
                    (1, self.pyramid(PyramidKind::FusionLaplacian)),
                ];
                self.dispatch(FusionLaplacian, images, level_extent, &params);
            }
            FusionBlend => {
                let params = LevelParams::new(level, self.levels(PyramidKind::FusionLum));
                let images = vec![
                    (0, self.pyramid(PyramidKind::FusionLaplacian)),
                    (1, self.pyramid(PyramidKind::FusionWeight)),
                    (2, self.pyramid(PyramidKind::FusionBlended)),
                ];
                self.dispatch(FusionBlend, images, level_extent, &params);
            }
            FusionUpsample => {
                let params = LevelParams::new(level, self.levels(PyramidKind::FusionLum));
                let images = vec![
                    (0, self.pyramid(PyramidKind::FusionBlended)),
                    (1, self.pyramid(PyramidKind::FusionUpsampleB)),
                    (2, self.pyramid(PyramidKind::FusionUpsampleA)),
                ];
                self.dispatch(FusionUpsample, images, level_extent, &params);
            }
            FusionAccumulate => {
                let params = LevelParams::new(level, self.levels(PyramidKind::FusionLum));
                let images = vec![
                    (0, self.pyramid(PyramidKind::FusionUpsampleA)),
                    (1, self.pyramid(PyramidKind::FusionBlended)),
                    (2, self.pyramid(PyramidKind::FusionUpsampleB)),
                ];
                self.dispatch(FusionAccumulate, images, level_extent, &params);
            }
            FusionApply => {
                // 只有一层时没有合并的过程
                let fused = match self.levels(PyramidKind::FusionLum) {
                    1 => self.pyramid_level(PyramidKind::FusionBlended, 0),
                    _ => self.pyramid_level(PyramidKind::FusionUpsampleB, 0),
                };
                self.dispatch(FusionApply, vec![(0, src), (1, fused), (2, self.dst())], full, &());
                self.color.advance(self.postfx);
            }

            BloomThreshold => {
                let s = &self.postfx.settings().bloom;
                let params = BloomThresholdParams {
                    threshold: s.threshold,
                    knee: s.knee,
                    _padding: [0.0; 2],
                };
                let images = vec![(0, src), (1, self.view(AttachmentKind::BloomThreshold))];
                self.dispatch(BloomThreshold, images, full, &params);
            }
            BloomDownsample => {
                let params = LevelParams::new(level, self.levels(PyramidKind::BloomDown));
                let images = vec![
                    (0, self.view(AttachmentKind::BloomThreshold)),
                    (1, self.pyramid(PyramidKind::BloomDown)),
                    (2, self.pyramid(PyramidKind::BloomDown)),
                ];
                self.dispatch(BloomDownsample, images, level_extent, &params);
            }
            BloomUpsample => {
                let params = BloomUpsampleParams {
                    level,
                    level_count: self.levels(PyramidKind::BloomDown),
                    filter_radius: self.postfx.settings().bloom.filter_radius,
                    _padding: 0.0,
                };
                let images = vec![
                    (0, self.pyramid(PyramidKind::BloomDown)),
                    (1, self.pyramid(PyramidKind::BloomUp)),
                    (2, self.pyramid(PyramidKind::BloomUp)),
                ];
                self.dispatch(BloomUpsample, images, level_extent, &params);
            }
            BloomComposite => {
                let bloom = match self.levels(PyramidKind::BloomDown) {
                    1 => self.pyramid_level(PyramidKind::BloomDown, 0),
                    _ => self.pyramid_level(PyramidKind::BloomUp, 0),
                };
                let params = BloomCompositeParams {
                    intensity: self.postfx.settings().bloom.intensity,
                    _padding: [0.0; 3],
                };
                self.dispatch(BloomComposite, vec![(0, src), (1, bloom), (2, self.dst())], full, &params);
                self.color.advance(self.postfx);
            }

            GlobalToneMap => {
                let settings = self.postfx.settings();
                let params = ToneMapParams {
                    mode: settings.tone_mapping_mode.into(),
                    use_auto_exposure: self.exposure_ran as u32,
                    manual_exposure: histogram::manual_exposure(settings.exposure.compensation),
                    old_role: histogram::old_role(self.frame.frame_id) as u32,
                    white_point_override: settings.tone_mapping.white_point.unwrap_or(0.0),
                    _padding: [0.0; 3],
                };
                self.dispatch(GlobalToneMap, vec![(0, src), (1, self.dst())], full, &params);
                self.color.advance(self.postfx);
            }
            Gamma => {
                let settings = self.postfx.settings();
                let params = GammaParams {
                    mode: settings.gamma_mode.as_index(),
                    gamma: settings.gamma.gamma,
                    _padding: [0; 2],
                };
                self.dispatch(Gamma, vec![(0, src), (1, self.dst())], full, &params);
                self.color.advance(self.postfx);
            }
        }
    }

    /// 清空本帧写入的直方图槽位与最大亮度
    fn clear_new_role(&self) {
        use histogram::offsets;

        let role = histogram::new_role(self.frame.frame_id);
        let buffer = self.postfx.luminance_buffer().vk_buffer();
        self.cmd.cmd_fill_buffer(buffer, offsets::buckets(role), offsets::BUCKETS_SIZE, 0);
        self.cmd.cmd_fill_buffer(buffer, offsets::max_luminance(role), size_of::<f32>() as vk::DeviceSize, 0);

        let size = size_of::<LuminanceBufferData>() as vk::DeviceSize;
        self.cmd.buffer_memory_barrier(
            vk::DependencyFlags::empty(),
            &[GfxBufferBarrier::new().mask(GfxBarrierMask::TRANSFER_WRITE_TO_COMPUTE).buffer(buffer, 0, size)],
        );
    }
}
