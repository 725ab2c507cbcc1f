use std::rc::Rc;

use ash::vk;
use lumis_crate_tools::enum_table::{EnumTable, IndexedEnum};
use lumis_gfx::{
    commands::command_buffer::GfxCommandBuffer,
    descriptors::allocator::{GfxDescriptorAllocator, GfxDescriptorPoolSizes},
    foundation::{
        deletion_stack::DeletionStack,
        device_api::{GfxDeviceApi, GfxMemoryUsage},
    },
    resources::{
        buffer::GfxBuffer,
        sampler::{GfxSampler, GfxSamplerDesc},
    },
};

use crate::{
    attachment::{Attachment, AttachmentPyramid, clamp_pyramid_depth},
    effect::{AttachmentKind, Effect, PyramidKind, StageKind},
    frame_counter::FrameLabel,
    histogram::LuminanceBufferData,
    render_context::RenderContext,
    settings::PostFxSettings,
    shader_source::ShaderSource,
    stage::{PostFxStage, StageImage, group_count},
};

/// 后处理的全部 GPU 状态
///
/// 效果的 stage 与 attachment 都是第一次用到时才创建：关闭的效果不占用任何资源。
///
/// 两种生命周期：
/// - 设备生命周期（pipeline、亮度 buffer、sampler）：销毁动作放入 [`RenderContext`] 的账本
/// - 分辨率生命周期（attachment、金字塔）：放入自己的场景账本，[`Self::rebuild`] 时 flush
///
/// # Destroy
/// 需要手动调用 `destroy`，并且要在 [`RenderContext::destroy`] 之前
pub struct PostFx {
    settings: PostFxSettings,
    shaders: Box<dyn ShaderSource>,
    device: Rc<dyn GfxDeviceApi>,
    extent: vk::Extent2D,

    stages: EnumTable<StageKind, PostFxStage>,
    /// 已经创建过 stage 的效果
    created_effects: EnumTable<Effect, ()>,
    attachments: EnumTable<AttachmentKind, Attachment>,
    pyramids: EnumTable<PyramidKind, AttachmentPyramid>,

    luminance_buffer: GfxBuffer,
    sampler: GfxSampler,
    /// stage 的 descriptor set 都从这里分配，rebuild 时整体 reset
    descriptor_allocator: GfxDescriptorAllocator,
    scene_ledger: DeletionStack,
    /// 新创建、还处于 `UNDEFINED` layout 的 image
    pending_layout_init: Vec<vk::Image>,
}
// new & init
impl PostFx {
    pub fn new(
        ctx: &mut RenderContext,
        settings: PostFxSettings,
        shaders: Box<dyn ShaderSource>,
        extent: vk::Extent2D,
    ) -> Self {
        let _span = tracy_client::span!("PostFx::new");
        let device = ctx.device().clone();

        let luminance_buffer = GfxBuffer::new(
            device.clone(),
            size_of::<LuminanceBufferData>() as vk::DeviceSize,
            vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_SRC
                | vk::BufferUsageFlags::TRANSFER_DST,
            GfxMemoryUsage::DeviceLocal,
            "luminance",
        );
        // 平均亮度为 0 表示没有历史，第一帧直接取目标值
        ctx.immediate().submit("clear-luminance", |cmd| {
            cmd.cmd_fill_buffer(luminance_buffer.vk_buffer(), 0, luminance_buffer.size(), 0);
        });
        let for_ledger = luminance_buffer.clone();
        ctx.ledger_mut().push("luminance buffer", move || for_ledger.destroy());

        let sampler = GfxSampler::new(device.clone(), &GfxSamplerDesc::linear_clamp(), "postfx-linear-clamp");
        let for_ledger = sampler.clone();
        ctx.ledger_mut().push("postfx sampler", move || for_ledger.destroy());

        log::info!("postfx created for {}x{}", extent.width, extent.height);
        Self {
            settings,
            shaders,
            descriptor_allocator: GfxDescriptorAllocator::new(
                device.clone(),
                GfxDescriptorPoolSizes::default(),
                "postfx-descriptors",
            ),
            device,
            extent,
            stages: EnumTable::new(),
            created_effects: EnumTable::new(),
            attachments: EnumTable::new(),
            pyramids: EnumTable::new(),
            luminance_buffer,
            sampler,
            scene_ledger: DeletionStack::new("postfx-scene"),
            pending_layout_init: vec![],
        }
    }

    /// 创建效果需要的 stage 以及 attachment，已经存在的不会重复创建
    ///
    /// stage 无效时不创建 attachment
    pub fn ensure_effect(&mut self, ctx: &mut RenderContext, effect: Effect) {
        if !self.created_effects.contains(effect) {
            let _span = tracy_client::span!("PostFx::create_effect");
            for &kind in effect.stages() {
                let static_buffers = kind
                    .luminance_buffer_binding()
                    .map(|binding| (binding, self.luminance_buffer.descriptor_info()))
                    .into_iter()
                    .collect();
                let stage = PostFxStage::new(
                    ctx,
                    &mut self.descriptor_allocator,
                    self.shaders.as_ref(),
                    kind,
                    self.sampler.handle(),
                    static_buffers,
                );
                self.stages.insert(kind, stage);
            }
            self.created_effects.insert(effect, ());
            log::info!("postfx effect <{}> created, valid: {}", effect, self.is_effect_valid(effect));
        }

        if !self.is_effect_valid(effect) {
            return;
        }
        if effect.modifies_color() {
            self.ensure_attachment(AttachmentKind::ColorPing);
            self.ensure_attachment(AttachmentKind::ColorPong);
        }
        for &kind in effect.attachments() {
            self.ensure_attachment(kind);
        }
        for &kind in effect.pyramids() {
            self.ensure_pyramid(kind);
        }
    }

    /// 场景颜色格式与 stage 不一致时使用的转换目标
    pub fn ensure_source_conversion(&mut self) {
        self.ensure_attachment(AttachmentKind::ColorSource);
    }

    fn ensure_attachment(&mut self, kind: AttachmentKind) {
        if self.attachments.contains(kind) {
            return;
        }
        let attachment = Attachment::new(self.device.clone(), self.extent, kind.format(), &format!("postfx-{kind}"));
        self.pending_layout_init.push(attachment.image());

        let for_ledger = attachment.clone();
        self.scene_ledger.push(format!("attachment {kind}"), move || for_ledger.destroy());
        self.attachments.insert(kind, attachment);
    }

    fn ensure_pyramid(&mut self, kind: PyramidKind) {
        if self.pyramids.contains(kind) {
            return;
        }
        let pyramid = AttachmentPyramid::new(
            self.device.clone(),
            self.extent,
            kind.format(),
            self.requested_levels(kind),
            &format!("postfx-{kind}"),
        );
        self.pending_layout_init.extend(pyramid.images());

        let for_ledger = pyramid.clone();
        self.scene_ledger.push(format!("pyramid {kind}"), move || for_ledger.destroy());
        self.pyramids.insert(kind, pyramid);
    }
}
// getters
impl PostFx {
    #[inline]
    pub fn settings(&self) -> &PostFxSettings {
        &self.settings
    }

    /// 修改金字塔层数需要 [`Self::rebuild`] 之后才生效，见 [`Self::needs_rebuild`]
    #[inline]
    pub fn settings_mut(&mut self) -> &mut PostFxSettings {
        &mut self.settings
    }

    #[inline]
    pub fn is_enabled(&self, effect: Effect) -> bool {
        self.settings.is_effect_enabled(effect)
    }

    #[inline]
    pub fn set_enabled(&mut self, effect: Effect, enabled: bool) {
        self.settings.set_effect_enabled(effect, enabled);
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// 还没有创建的效果视为有效
    pub fn is_effect_valid(&self, effect: Effect) -> bool {
        effect.stages().iter().all(|&kind| self.stages.get(kind).map_or(true, PostFxStage::is_valid))
    }

    #[inline]
    pub fn is_effect_created(&self, effect: Effect) -> bool {
        self.created_effects.contains(effect)
    }

    #[inline]
    pub fn stage(&self, kind: StageKind) -> Option<&PostFxStage> {
        self.stages.get(kind)
    }

    #[inline]
    pub fn attachment(&self, kind: AttachmentKind) -> Option<&Attachment> {
        self.attachments.get(kind)
    }

    #[inline]
    pub fn pyramid(&self, kind: PyramidKind) -> Option<&AttachmentPyramid> {
        self.pyramids.get(kind)
    }

    /// 创建之后的 attachment，找不到说明调用顺序有误
    pub(crate) fn expect_attachment(&self, kind: AttachmentKind) -> &Attachment {
        match self.attachments.get(kind) {
            Some(attachment) => attachment,
            None => panic!("postfx attachment <{kind}> is not created"),
        }
    }

    pub(crate) fn expect_pyramid(&self, kind: PyramidKind) -> &AttachmentPyramid {
        match self.pyramids.get(kind) {
            Some(pyramid) => pyramid,
            None => panic!("postfx pyramid <{kind}> is not created"),
        }
    }

    #[inline]
    pub fn luminance_buffer(&self) -> &GfxBuffer {
        &self.luminance_buffer
    }

    fn requested_levels(&self, kind: PyramidKind) -> u32 {
        match kind.owner() {
            Effect::Bloom => self.settings.bloom.levels,
            _ => self.settings.fusion.levels,
        }
    }

    /// 已经创建的金字塔使用实际层数，否则使用设置中的层数
    pub fn pyramid_depth(&self, kind: PyramidKind) -> u32 {
        match self.pyramids.get(kind) {
            Some(pyramid) => pyramid.level_count(),
            None => clamp_pyramid_depth(self.extent, self.requested_levels(kind)),
        }
    }

    /// 金字塔层数的设置与已经创建的金字塔不一致
    pub fn needs_rebuild(&self) -> bool {
        self.pyramids
            .iter()
            .any(|(kind, pyramid)| pyramid.level_count() != clamp_pyramid_depth(self.extent, self.requested_levels(kind)))
    }
}
// tools
impl PostFx {
    /// 取出需要从 `UNDEFINED` 转换到 `GENERAL` 的 image
    pub fn take_pending_layout_init(&mut self) -> Vec<vk::Image> {
        std::mem::take(&mut self.pending_layout_init)
    }

    pub fn begin_frame(&mut self, label: FrameLabel) {
        for kind in StageKind::ALL {
            if let Some(stage) = self.stages.get_mut(*kind) {
                stage.begin_frame(label);
            }
        }
    }

    /// bind、写入 image、dispatch 覆盖 `extent` 的 workgroup
    pub fn dispatch<P: bytemuck::Pod>(
        &mut self,
        ctx: &mut RenderContext,
        cmd: &GfxCommandBuffer,
        kind: StageKind,
        images: Vec<(u32, StageImage)>,
        extent: vk::Extent2D,
        params: &P,
    ) {
        let Some(stage) = self.stages.get_mut(kind) else {
            panic!("postfx stage <{kind}> is not created");
        };
        stage.bind(cmd);
        for (binding, image) in images {
            stage.update_image(binding, image);
        }
        stage.dispatch(
            cmd,
            ctx.layout_cache_mut(),
            &mut self.descriptor_allocator,
            group_count(extent, kind.local_size()),
            params,
        );
        stage.barrier(cmd);
    }

    /// 分辨率变化之后调用，调用前需要保证 GPU 不再使用旧的 attachment
    ///
    /// attachment 在下一次用到时按照新的分辨率重新创建
    pub fn rebuild(&mut self, extent: vk::Extent2D) {
        let _span = tracy_client::span!("PostFx::rebuild");
        log::info!(
            "postfx rebuild: {}x{} -> {}x{}",
            self.extent.width,
            self.extent.height,
            extent.width,
            extent.height
        );

        self.scene_ledger.flush();
        self.attachments.drain();
        self.pyramids.drain();
        self.pending_layout_init.clear();

        self.descriptor_allocator.reset_pools();
        for kind in StageKind::ALL {
            if let Some(stage) = self.stages.get_mut(*kind) {
                stage.forget_descriptor_sets();
            }
        }
        self.extent = extent;
    }
}
// destroy
impl PostFx {
    pub fn destroy(&mut self) {
        let _span = tracy_client::span!("PostFx::destroy");
        self.scene_ledger.flush();
        self.attachments.drain();
        self.pyramids.drain();
        self.stages.drain();
        self.created_effects.drain();
        self.descriptor_allocator.destroy();
    }
}
