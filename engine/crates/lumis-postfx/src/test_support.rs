use std::rc::Rc;

use ash::vk;
use lumis_crate_tools::enum_table::IndexedEnum;
use lumis_gfx::{
    commands::{command_buffer::GfxCommandBuffer, command_pool::GfxCommandPool},
    testing::RecordingDevice,
};

use crate::{
    attachment::Attachment,
    effect::{HDR_COLOR_FORMAT, StageKind},
    postfx::PostFx,
    render_context::RenderContext,
    settings::PostFxSettings,
    shader_source::SpirvMemory,
};

pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// 除了 `missing` 以外所有 stage 的 shader
pub fn shaders_without(missing: &[StageKind]) -> SpirvMemory {
    let mut shaders = SpirvMemory::new();
    for &kind in StageKind::ALL {
        if !missing.contains(&kind) {
            shaders.insert(kind.shader_name(), vec![SPIRV_MAGIC]);
        }
    }
    shaders
}

pub struct Harness {
    pub recording: Rc<RecordingDevice>,
    pub ctx: RenderContext,
    pub postfx: PostFx,
    pub pool: GfxCommandPool,
    pub cmd: GfxCommandBuffer,
    /// 场景渲染的输出
    pub source: Attachment,
}
impl Harness {
    pub fn new(settings: PostFxSettings, extent: vk::Extent2D, missing: &[StageKind]) -> Self {
        Self::with_source_format(settings, extent, missing, HDR_COLOR_FORMAT)
    }

    pub fn with_source_format(
        settings: PostFxSettings,
        extent: vk::Extent2D,
        missing: &[StageKind],
        source_format: vk::Format,
    ) -> Self {
        let recording = Rc::new(RecordingDevice::new());
        let mut ctx = RenderContext::new(recording.clone());
        let postfx = PostFx::new(&mut ctx, settings, Box::new(shaders_without(missing)), extent);
        let pool = GfxCommandPool::new(recording.clone(), vk::CommandPoolCreateFlags::empty(), "test-frame");
        let cmd = pool.alloc_command_buffer("test-frame");
        let source = Attachment::new(recording.clone(), extent, source_format, "scene-color");
        Self {
            recording,
            ctx,
            postfx,
            pool,
            cmd,
            source,
        }
    }

    pub fn finish(mut self) {
        self.source.destroy();
        self.pool.destroy();
        self.postfx.destroy();
        self.ctx.destroy();
    }
}

pub fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D { width, height }
}
