//! 后处理中的一个 compute pass
//!
//! 每次 dispatch 之前都要重新提供所有的 image binding：
//!
//! ```text
//! begin_frame -> bind -> update_image* -> dispatch -> (bind -> update_image* -> dispatch)*
//! ```
//!
//! 同一帧内同一个 stage 可以 dispatch 多次（金字塔逐层执行），每次使用一个新的 descriptor set；
//! set 按照 frame label 缓存，下一次轮到同一个 label 时从头复用。

use ash::vk;
use glam::{UVec2, UVec3};
use itertools::Itertools;
use lumis_gfx::{
    commands::{
        barrier::{GfxBarrierMask, GfxMemoryBarrier},
        command_buffer::GfxCommandBuffer,
    },
    descriptors::{
        allocator::GfxDescriptorAllocator, builder::GfxDescriptorBuilder, layout_cache::GfxDescriptorLayoutCache,
        write::GfxWriteDescriptorSet,
    },
    foundation::device_api::vk_check,
    pipelines::{compute_pipeline::GfxComputePipeline, shader::GfxShaderModule},
};

use crate::{
    effect::StageKind,
    frame_counter::{FrameCounter, FrameLabel},
    render_context::RenderContext,
    shader_source::ShaderSource,
};

/// 金字塔 binding 的数组容量
pub const MAX_PYRAMID_LEVELS: u32 = 12;

/// binding 的种类，决定 descriptor type 与数组大小
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageBinding {
    UniformBuffer,
    StorageBuffer,
    StorageImage,
    /// 使用 linear-clamp sampler 的 combined image sampler
    SampledImage,
    StorageImagePyramid,
    SampledImagePyramid,
}
impl StageBinding {
    pub fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            Self::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            Self::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            Self::StorageImage | Self::StorageImagePyramid => vk::DescriptorType::STORAGE_IMAGE,
            Self::SampledImage | Self::SampledImagePyramid => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }

    #[inline]
    pub fn count(self) -> u32 {
        if self.is_pyramid() { MAX_PYRAMID_LEVELS } else { 1 }
    }

    #[inline]
    pub fn is_image(self) -> bool {
        !matches!(self, Self::UniformBuffer | Self::StorageBuffer)
    }

    #[inline]
    pub fn is_pyramid(self) -> bool {
        matches!(self, Self::StorageImagePyramid | Self::SampledImagePyramid)
    }
}

/// 提供给 image binding 的资源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageImage {
    View(vk::ImageView),
    /// 按层排列，第 i 个元素写入数组的第 i 个位置
    Pyramid(Vec<vk::ImageView>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Unbound,
    Bound,
    ImagesQueued,
    Dispatched,
}

pub struct PostFxStage {
    kind: StageKind,
    /// 加载或者编译失败时为 `None`，stage 无效
    pipeline: Option<GfxComputePipeline>,
    set_layout: vk::DescriptorSetLayout,
    sampler: vk::Sampler,
    /// 创建时就确定的 buffer binding，每个新分配的 set 都会写入
    static_buffers: Vec<(u32, vk::DescriptorBufferInfo)>,

    /// 按照 frame label 缓存的 set
    frame_sets: Vec<Vec<vk::DescriptorSet>>,
    frame: Option<FrameLabel>,
    /// 本帧已经使用的 set 数量
    cursor: usize,

    pending_writes: Vec<GfxWriteDescriptorSet>,
    state: StageState,
}
// new & init
impl PostFxStage {
    /// 失败不会返回错误，而是得到一个无效的 stage
    ///
    /// pipeline 的销毁动作会放入 `ctx` 的账本
    pub fn new(
        ctx: &mut RenderContext,
        allocator: &mut GfxDescriptorAllocator,
        shaders: &dyn ShaderSource,
        kind: StageKind,
        sampler: vk::Sampler,
        static_buffers: Vec<(u32, vk::DescriptorBufferInfo)>,
    ) -> Self {
        let _span = tracy_client::span!("PostFxStage::new");

        let set_layout =
            Self::declare_bindings(kind, sampler, &static_buffers, ctx.layout_cache_mut(), allocator).build_layout();

        let pipeline = match Self::create_pipeline(ctx, shaders, kind, set_layout) {
            Ok(pipeline) => {
                let for_ledger = pipeline.clone();
                ctx.ledger_mut().push(format!("pipeline {kind}"), move || for_ledger.destroy());
                Some(pipeline)
            }
            Err(err) => {
                log::warn!("stage <{}> is invalid: {:#}", kind, err);
                None
            }
        };

        Self {
            kind,
            pipeline,
            set_layout,
            sampler,
            static_buffers,
            frame_sets: vec![vec![]; FrameCounter::fif_count()],
            frame: None,
            cursor: 0,
            pending_writes: vec![],
            state: StageState::Unbound,
        }
    }

    fn create_pipeline(
        ctx: &RenderContext,
        shaders: &dyn ShaderSource,
        kind: StageKind,
        set_layout: vk::DescriptorSetLayout,
    ) -> anyhow::Result<GfxComputePipeline> {
        use anyhow::Context;

        let code = shaders.load_spirv(kind.shader_name())?;
        let module = GfxShaderModule::new(ctx.device().clone(), &code, kind.shader_name())
            .with_context(|| format!("failed to create shader module {}", kind.shader_name()))?;
        let pipeline = GfxComputePipeline::new(
            ctx.device().clone(),
            &module,
            &[set_layout],
            kind.push_constant_size(),
            &kind.to_string(),
        );
        module.destroy();
        pipeline.with_context(|| format!("failed to create compute pipeline {kind}"))
    }

    /// 按照 schema 声明所有 binding，只有 static buffer 带有资源
    fn declare_bindings<'a>(
        kind: StageKind,
        sampler: vk::Sampler,
        static_buffers: &[(u32, vk::DescriptorBufferInfo)],
        cache: &'a mut GfxDescriptorLayoutCache,
        allocator: &'a mut GfxDescriptorAllocator,
    ) -> GfxDescriptorBuilder<'a> {
        let stages = vk::ShaderStageFlags::COMPUTE;
        let mut builder = GfxDescriptorBuilder::begin(cache, allocator);
        for (binding, &ty) in kind.schema().iter().enumerate() {
            let binding = binding as u32;
            builder = if ty.is_image() {
                debug_assert!(
                    sampler != vk::Sampler::null() || ty.descriptor_type() != vk::DescriptorType::COMBINED_IMAGE_SAMPLER
                );
                builder.bind_image_empty(binding, ty.count(), ty.descriptor_type(), stages)
            } else {
                match static_buffers.iter().find(|(b, _)| *b == binding) {
                    Some((_, info)) => builder.bind_buffer(binding, *info, ty.descriptor_type(), stages),
                    None => builder.bind_buffer_empty(binding, ty.descriptor_type(), stages),
                }
            };
        }
        builder
    }
}
// getters
impl PostFxStage {
    #[inline]
    pub fn kind(&self) -> StageKind {
        self.kind
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.pipeline.is_some()
    }

    #[inline]
    pub fn state(&self) -> StageState {
        self.state
    }

    #[inline]
    pub fn set_layout(&self) -> vk::DescriptorSetLayout {
        self.set_layout
    }

    #[inline]
    pub fn pending_write_count(&self) -> usize {
        self.pending_writes.len()
    }

    /// 无效的 stage 返回 `None`
    #[inline]
    pub fn pipeline_handle(&self) -> Option<vk::Pipeline> {
        self.pipeline.as_ref().map(|p| p.handle())
    }

    /// 某个 frame label 下缓存的 set
    #[inline]
    pub fn cached_sets(&self, label: FrameLabel) -> &[vk::DescriptorSet] {
        &self.frame_sets[label.index()]
    }

    fn pipeline(&self) -> &GfxComputePipeline {
        match &self.pipeline {
            Some(pipeline) => pipeline,
            None => panic!("stage <{}> has no valid pipeline", self.kind),
        }
    }
}
// tools
impl PostFxStage {
    /// 进入新的一帧，复用该 label 之前分配过的 set
    pub fn begin_frame(&mut self, label: FrameLabel) {
        if !self.pending_writes.is_empty() {
            log::warn!(
                "stage <{}>: {} queued writes were never dispatched",
                self.kind,
                self.pending_writes.len()
            );
            self.pending_writes.clear();
        }
        self.frame = Some(label);
        self.cursor = 0;
        self.state = StageState::Unbound;
    }

    /// 所在的 descriptor pool 被 reset 之后调用
    pub fn forget_descriptor_sets(&mut self) {
        for sets in &mut self.frame_sets {
            sets.clear();
        }
        self.cursor = 0;
    }

    pub fn bind(&mut self, cmd: &GfxCommandBuffer) {
        assert!(self.frame.is_some(), "stage <{}> bound before begin_frame", self.kind);
        cmd.cmd_bind_pipeline(vk::PipelineBindPoint::COMPUTE, self.pipeline().handle());
        self.pending_writes.clear();
        self.state = StageState::Bound;
    }

    /// 记录一个 image binding 的写入，真正的写入发生在 dispatch 时
    pub fn update_image(&mut self, binding: u32, image: StageImage) {
        assert!(
            matches!(self.state, StageState::Bound | StageState::ImagesQueued),
            "stage <{}>: update_image in state {:?}, bind first",
            self.kind,
            self.state
        );
        let schema = self.kind.schema();
        let Some(&ty) = schema.get(binding as usize) else {
            panic!("stage <{}> has no binding {}", self.kind, binding);
        };
        assert!(ty.is_image(), "stage <{}>: binding {} is not an image", self.kind, binding);

        let views = match (image, ty.is_pyramid()) {
            (StageImage::View(view), false) => vec![view],
            (StageImage::Pyramid(views), true) => {
                assert!(
                    !views.is_empty() && views.len() <= MAX_PYRAMID_LEVELS as usize,
                    "stage <{}>: binding {} got {} pyramid levels",
                    self.kind,
                    binding,
                    views.len()
                );
                views
            }
            (image, _) => panic!("stage <{}>: binding {} expects {:?}, got {:?}", self.kind, binding, ty, image),
        };

        let sampler = match ty.descriptor_type() {
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER => self.sampler,
            _ => vk::Sampler::null(),
        };
        let infos = views
            .into_iter()
            .map(|view| {
                vk::DescriptorImageInfo::default()
                    .sampler(sampler)
                    .image_view(view)
                    .image_layout(vk::ImageLayout::GENERAL)
            })
            .collect_vec();

        self.pending_writes.retain(|w| w.dst_binding != binding);
        self.pending_writes.push(GfxWriteDescriptorSet::images(
            vk::DescriptorSet::null(),
            binding,
            ty.descriptor_type(),
            infos,
        ));
        self.state = StageState::ImagesQueued;
    }

    /// 写入所有排队的 binding，然后录制 dispatch
    ///
    /// `params` 的大小必须与 stage 的 push constant 大小一致，没有 push constant 时传 `&()`
    pub fn dispatch<P: bytemuck::Pod>(
        &mut self,
        cmd: &GfxCommandBuffer,
        cache: &mut GfxDescriptorLayoutCache,
        allocator: &mut GfxDescriptorAllocator,
        group_cnt: UVec3,
        params: &P,
    ) {
        let _span = tracy_client::span!("PostFxStage::dispatch");

        let has_images = self.kind.schema().iter().any(|b| b.is_image());
        let ready = match self.state {
            StageState::ImagesQueued => true,
            StageState::Bound => !has_images,
            _ => false,
        };
        assert!(ready, "stage <{}>: dispatch in state {:?}", self.kind, self.state);
        for (binding, ty) in self.kind.schema().iter().enumerate() {
            if ty.is_image() {
                assert!(
                    self.pending_writes.iter().any(|w| w.dst_binding == binding as u32),
                    "stage <{}>: image binding {} has no queued write",
                    self.kind,
                    binding
                );
            }
        }

        let set = self.next_set(cache, allocator);
        let writes = self.pending_writes.drain(..).map(|w| w.retarget(set)).collect_vec();
        let device = allocator.device().clone();
        GfxWriteDescriptorSet::with_writes(&writes, |writes| device.update_descriptor_sets(writes));

        let pipeline = self.pipeline();
        cmd.bind_descriptor_sets(vk::PipelineBindPoint::COMPUTE, pipeline.layout(), 0, &[set]);

        let bytes = bytemuck::bytes_of(params);
        assert_eq!(
            bytes.len() as u32,
            pipeline.push_constant_size(),
            "stage <{}>: push constant size mismatch",
            self.kind
        );
        if !bytes.is_empty() {
            cmd.cmd_push_constants(pipeline.layout(), vk::ShaderStageFlags::COMPUTE, 0, bytes);
        }

        cmd.cmd_dispatch(group_cnt);
        self.state = StageState::Dispatched;
    }

    /// 本 stage 的写入对之后的 compute 读写可见
    pub fn barrier(&self, cmd: &GfxCommandBuffer) {
        cmd.memory_barrier(&[GfxMemoryBarrier::new(GfxBarrierMask::COMPUTE_WRITE_TO_COMPUTE)]);
    }

    fn next_set(
        &mut self,
        cache: &mut GfxDescriptorLayoutCache,
        allocator: &mut GfxDescriptorAllocator,
    ) -> vk::DescriptorSet {
        let Some(label) = self.frame else {
            panic!("stage <{}> dispatched before begin_frame", self.kind);
        };
        let sets = &self.frame_sets[label.index()];
        let set = if let Some(&set) = sets.get(self.cursor) {
            set
        } else {
            let builder = Self::declare_bindings(self.kind, self.sampler, &self.static_buffers, cache, allocator);
            let (set, layout) = vk_check(builder.build(), "allocate postfx descriptor set");
            debug_assert_eq!(layout, self.set_layout);
            log::debug!("stage <{}> allocates descriptor set #{} for frame {}", self.kind, self.cursor, label);
            self.frame_sets[label.index()].push(set);
            set
        };
        self.cursor += 1;
        set
    }
}

/// 覆盖 `extent` 所需的 workgroup 数量
#[inline]
pub fn group_count(extent: vk::Extent2D, local_size: UVec2) -> UVec3 {
    UVec3::new(extent.width.div_ceil(local_size.x), extent.height.div_ceil(local_size.y), 1)
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use ash::vk::Handle;
    use lumis_gfx::{
        commands::command_pool::GfxCommandPool,
        descriptors::allocator::GfxDescriptorPoolSizes,
        testing::{RecordedCommand, RecordingDevice},
    };

    use super::*;
    use crate::shader_source::SpirvMemory;

    struct Fixture {
        recording: Rc<RecordingDevice>,
        ctx: RenderContext,
        allocator: GfxDescriptorAllocator,
        pool: GfxCommandPool,
        cmd: GfxCommandBuffer,
        shaders: SpirvMemory,
    }
    impl Fixture {
        fn new() -> Self {
            let recording = Rc::new(RecordingDevice::new());
            let ctx = RenderContext::new(recording.clone());
            let allocator =
                GfxDescriptorAllocator::new(recording.clone(), GfxDescriptorPoolSizes::default(), "test-postfx");
            let pool = GfxCommandPool::new(recording.clone(), vk::CommandPoolCreateFlags::empty(), "test");
            let cmd = pool.alloc_command_buffer("test");

            let mut shaders = SpirvMemory::new();
            for kind in [StageKind::Gamma, StageKind::BloomUpsample, StageKind::AverageLuminance] {
                shaders.insert(kind.shader_name(), vec![0x0723_0203]);
            }
            Self {
                recording,
                ctx,
                allocator,
                pool,
                cmd,
                shaders,
            }
        }

        fn stage(&mut self, kind: StageKind) -> PostFxStage {
            let lum = vk::DescriptorBufferInfo::default().buffer(vk::Buffer::from_raw(0xb0f)).range(64);
            let static_buffers = kind.luminance_buffer_binding().map(|b| (b, lum)).into_iter().collect();
            PostFxStage::new(
                &mut self.ctx,
                &mut self.allocator,
                &self.shaders,
                kind,
                vk::Sampler::from_raw(0x5a),
                static_buffers,
            )
        }

        fn dispatch<P: bytemuck::Pod>(&mut self, stage: &mut PostFxStage, params: &P) {
            stage.dispatch(&self.cmd, self.ctx.layout_cache_mut(), &mut self.allocator, UVec3::ONE, params);
        }

        fn finish(mut self) {
            self.pool.destroy();
            self.allocator.destroy();
            self.ctx.destroy();
        }
    }

    fn view(raw: u64) -> vk::ImageView {
        vk::ImageView::from_raw(raw)
    }

    #[test]
    fn test_missing_shader_gives_invalid_stage() {
        let mut fx = Fixture::new();
        let stage = fx.stage(StageKind::Histogram);
        assert!(!stage.is_valid());
        // 没有创建任何 pipeline
        assert_eq!(fx.recording.live_count("pipeline"), 0);
        assert_eq!(fx.recording.live_count("shader_module"), 0);
        fx.finish();
    }

    #[test]
    fn test_rejected_shader_module_gives_invalid_stage() {
        let mut fx = Fixture::new();
        fx.recording.set_shader_module_failure(true);
        let stage = fx.stage(StageKind::Gamma);
        assert!(!stage.is_valid());
        assert_eq!(fx.recording.live_count("pipeline"), 0);

        fx.recording.set_shader_module_failure(false);
        assert!(fx.stage(StageKind::Gamma).is_valid());
        fx.finish();
    }

    #[test]
    #[should_panic(expected = "has no valid pipeline")]
    fn test_binding_invalid_stage_panics() {
        let mut fx = Fixture::new();
        let mut stage = fx.stage(StageKind::Histogram);
        stage.begin_frame(FrameLabel::A);
        stage.bind(&fx.cmd);
    }

    #[test]
    fn test_pipeline_is_released_by_ledger() {
        let mut fx = Fixture::new();
        let stage = fx.stage(StageKind::Gamma);
        assert!(stage.is_valid());
        // shader module 在创建 pipeline 之后就销毁了
        assert_eq!(fx.recording.live_count("shader_module"), 0);
        assert_eq!(fx.recording.live_count("pipeline"), 1);

        let recording = fx.recording.clone();
        fx.finish();
        assert_eq!(recording.live_count("pipeline"), 0);
    }

    #[test]
    #[should_panic(expected = "image binding 1 has no queued write")]
    fn test_dispatch_without_every_image_panics() {
        let mut fx = Fixture::new();
        let mut stage = fx.stage(StageKind::Gamma);
        stage.begin_frame(FrameLabel::A);
        stage.bind(&fx.cmd);
        stage.update_image(0, StageImage::View(view(1)));
        fx.dispatch(&mut stage, &crate::params::GammaParams::default());
    }

    #[test]
    #[should_panic(expected = "bind first")]
    fn test_update_before_bind_panics() {
        let mut fx = Fixture::new();
        let mut stage = fx.stage(StageKind::Gamma);
        stage.begin_frame(FrameLabel::A);
        stage.update_image(0, StageImage::View(view(1)));
    }

    #[test]
    fn test_dispatch_consumes_queued_writes() {
        let mut fx = Fixture::new();
        let mut stage = fx.stage(StageKind::Gamma);
        stage.begin_frame(FrameLabel::A);
        stage.bind(&fx.cmd);
        stage.update_image(0, StageImage::View(view(1)));
        stage.update_image(1, StageImage::View(view(2)));
        // 重复写入同一个 binding 只保留最后一次
        stage.update_image(1, StageImage::View(view(3)));
        assert_eq!(stage.pending_write_count(), 2);

        fx.dispatch(&mut stage, &crate::params::GammaParams::default());
        assert_eq!(stage.pending_write_count(), 0);
        assert_eq!(stage.state(), StageState::Dispatched);

        let set = stage.cached_sets(FrameLabel::A)[0];
        let writes = fx.recording.descriptor_writes_for(set);
        assert_eq!(writes.len(), 2);
        assert!(writes.iter().any(|w| w.binding == 1 && w.image_views == vec![view(3)]));

        let commands = fx.recording.commands();
        assert!(matches!(commands.last(), Some(RecordedCommand::Dispatch { .. })));
        assert!(commands.iter().any(|c| matches!(c, RecordedCommand::PushConstants { data, .. } if data.len() == 16)));
        fx.finish();
    }

    #[test]
    fn test_pyramid_binding_expands_to_one_info_per_level() {
        let mut fx = Fixture::new();
        let mut stage = fx.stage(StageKind::BloomUpsample);
        stage.begin_frame(FrameLabel::A);
        stage.bind(&fx.cmd);
        let levels = vec![view(10), view(11), view(12), view(13)];
        stage.update_image(0, StageImage::Pyramid(levels.clone()));
        stage.update_image(1, StageImage::Pyramid(levels.clone()));
        stage.update_image(2, StageImage::Pyramid(levels.clone()));
        fx.dispatch(&mut stage, &crate::params::BloomUpsampleParams::default());

        let set = stage.cached_sets(FrameLabel::A)[0];
        let writes = fx.recording.descriptor_writes_for(set);
        let sampled = writes.iter().find(|w| w.binding == 0).unwrap();
        assert_eq!(sampled.image_views, levels);
        assert_eq!(sampled.descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);

        // layout 中声明的是完整容量
        let bindings = fx.recording.layout_bindings(stage.set_layout());
        assert!(bindings.iter().all(|b| b.count == MAX_PYRAMID_LEVELS));
        fx.finish();
    }

    #[test]
    #[should_panic(expected = "expects")]
    fn test_single_view_for_pyramid_binding_panics() {
        let mut fx = Fixture::new();
        let mut stage = fx.stage(StageKind::BloomUpsample);
        stage.begin_frame(FrameLabel::A);
        stage.bind(&fx.cmd);
        stage.update_image(0, StageImage::View(view(1)));
    }

    #[test]
    fn test_sets_rotate_within_frame_and_are_reused_per_label() {
        let mut fx = Fixture::new();
        let mut stage = fx.stage(StageKind::BloomUpsample);
        let levels = vec![view(10), view(11)];

        let run = |fx: &mut Fixture, stage: &mut PostFxStage, label: FrameLabel| {
            stage.begin_frame(label);
            for level in 0..2 {
                stage.bind(&fx.cmd);
                for binding in 0..3 {
                    stage.update_image(binding, StageImage::Pyramid(levels.clone()));
                }
                let params = crate::params::BloomUpsampleParams {
                    level,
                    level_count: 2,
                    ..Default::default()
                };
                fx.dispatch(stage, &params);
            }
        };

        run(&mut fx, &mut stage, FrameLabel::A);
        let first = stage.cached_sets(FrameLabel::A).to_vec();
        assert_eq!(first.len(), 2);
        assert_ne!(first[0], first[1]);

        run(&mut fx, &mut stage, FrameLabel::B);
        assert_eq!(stage.cached_sets(FrameLabel::B).len(), 2);

        // 再次轮到 A：不再分配
        let allocated = fx.recording.descriptor_set_count();
        run(&mut fx, &mut stage, FrameLabel::A);
        assert_eq!(stage.cached_sets(FrameLabel::A), first.as_slice());
        assert_eq!(fx.recording.descriptor_set_count(), allocated);
        fx.finish();
    }

    #[test]
    fn test_static_buffer_is_written_into_new_sets() {
        let mut fx = Fixture::new();
        let mut stage = fx.stage(StageKind::AverageLuminance);
        stage.begin_frame(FrameLabel::C);
        stage.bind(&fx.cmd);
        // 没有 image binding，可以直接 dispatch
        fx.dispatch(&mut stage, &crate::params::AverageLuminanceParams::default());

        let set = stage.cached_sets(FrameLabel::C)[0];
        let writes = fx.recording.descriptor_writes_for(set);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].buffers, vec![vk::Buffer::from_raw(0xb0f)]);
        fx.finish();
    }

    #[test]
    fn test_group_count_rounds_up() {
        let extent = vk::Extent2D {
            width: 1920,
            height: 1081,
        };
        assert_eq!(group_count(extent, UVec2::new(16, 16)), UVec3::new(120, 68, 1));
        assert_eq!(group_count(extent, StageKind::AverageLuminance.local_size()).y, 1081);
    }
}
