use std::rc::Rc;

use ash::{prelude::VkResult, vk};
use itertools::Itertools;
use lumis_gfx::{commands::submit_info::GfxSubmitInfo, foundation::device_api::GfxDeviceApi};
use lumis_postfx::{
    frame_counter::FrameCounter,
    histogram::LuminanceReadback,
    orchestrator::{CompositeTarget, FrameOrchestrator, FrameOutput, PostFxFrame, SourceImage},
    postfx::PostFx,
    render_context::RenderContext,
    settings::PostFxSettings,
    shader_source::{ShaderSource, SpirvDirectory},
};

use crate::frame_slot::FrameSlot;

/// 帧的调度者：持有渲染上下文、后处理以及所有的帧槽位
///
/// 每一帧的调用顺序：
/// 1. [`Renderer::begin_frame`]：等待当前槽位的 fence，取出回读数据，开始录制
/// 2. 写入 [`Renderer::current_slot`] 的 buffer，录制场景
/// 3. [`Renderer::run_frame`]：录制后处理并合成到目标 image
/// 4. [`Renderer::end_frame`]：提交，然后切换到下一帧
pub struct Renderer {
    ctx: RenderContext,
    postfx: PostFx,
    orchestrator: FrameOrchestrator,

    frame_counter: FrameCounter,
    slots: Vec<FrameSlot>,

    /// 当前帧是否已经 begin，还没有 end
    recording: bool,
    /// 当前帧的后处理是否把亮度 copy 进了槽位的 readback buffer
    luminance_copied: bool,
    last_readback: Option<LuminanceReadback>,

    /// present 报告 swapchain 过期，等待调用方 resize
    resize_requested: bool,
}
// new & init
impl Renderer {
    pub fn new(
        device: Rc<dyn GfxDeviceApi>,
        settings: PostFxSettings,
        shaders: Box<dyn ShaderSource>,
        extent: vk::Extent2D,
    ) -> Self {
        let _span = tracy_client::span!("Renderer::new");
        // 窗口最小化时启动，先按 1x1 创建，等调用方 resize 到真实尺寸
        let minimized = extent.width == 0 || extent.height == 0;
        let extent = if minimized {
            log::warn!("renderer created with extent {}x{}, wait for resize", extent.width, extent.height);
            vk::Extent2D {
                width: extent.width.max(1),
                height: extent.height.max(1),
            }
        } else {
            extent
        };

        let mut ctx = RenderContext::new(device);
        let postfx = PostFx::new(&mut ctx, settings, shaders, extent);
        let slots = FrameCounter::frame_labels().into_iter().map(|label| FrameSlot::new(&mut ctx, label)).collect_vec();

        Self {
            ctx,
            postfx,
            orchestrator: FrameOrchestrator::new(),
            frame_counter: FrameCounter::new(0),
            slots,
            recording: false,
            luminance_copied: false,
            last_readback: None,
            resize_requested: minimized,
        }
    }

    /// 从 `settings.shader_dir` 读取 SPIR-V
    pub fn from_settings(device: Rc<dyn GfxDeviceApi>, settings: PostFxSettings, extent: vk::Extent2D) -> Self {
        let shaders = SpirvDirectory::new(settings.shader_dir.clone());
        log::info!("load postfx shaders from {}", shaders.root().display());
        Self::new(device, settings, Box::new(shaders), extent)
    }
}
// getters
impl Renderer {
    #[inline]
    pub fn ctx(&self) -> &RenderContext {
        &self.ctx
    }

    #[inline]
    pub fn postfx(&self) -> &PostFx {
        &self.postfx
    }

    /// UI 通过这里修改设置与开关
    #[inline]
    pub fn postfx_mut(&mut self) -> &mut PostFx {
        &mut self.postfx
    }

    #[inline]
    pub fn frame_counter(&self) -> &FrameCounter {
        &self.frame_counter
    }

    #[inline]
    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }

    #[inline]
    pub fn current_slot(&self) -> &FrameSlot {
        &self.slots[self.frame_counter.frame_label().index()]
    }

    /// 最近一次从 GPU 读回的亮度统计，比当前帧晚 `fif_count` 帧
    #[inline]
    pub fn luminance_readback(&self) -> Option<&LuminanceReadback> {
        self.last_readback.as_ref()
    }

    #[inline]
    pub fn is_resize_requested(&self) -> bool {
        self.resize_requested
    }
}
// frame
impl Renderer {
    pub fn begin_frame(&mut self) {
        let _span = tracy_client::span!("Renderer::begin_frame");
        assert!(!self.recording, "begin_frame called twice without end_frame");

        let slot_index = self.frame_counter.frame_label().index();
        let slot = &mut self.slots[slot_index];
        slot.wait();
        if let Some(readback) = slot.read_luminance() {
            self.last_readback = Some(readback);
        }

        // 金字塔层数变化时，旧的 attachment 可能还被其他槽位使用
        if self.postfx.needs_rebuild() {
            log::info!("postfx pyramid levels changed, rebuild");
            self.ctx.device().wait_idle();
            self.postfx.rebuild(self.postfx.extent());
        }

        self.slots[slot_index].begin_recording(&self.frame_counter.frame_name());
        self.recording = true;
        self.luminance_copied = false;
    }

    /// 在当前槽位的 command buffer 中录制后处理
    pub fn run_frame(&mut self, source: &SourceImage, target: &CompositeTarget) -> FrameOutput {
        let _span = tracy_client::span!("Renderer::run_frame");
        assert!(self.recording, "run_frame called outside of begin_frame/end_frame");

        let slot = &self.slots[self.frame_counter.frame_label().index()];
        let frame = PostFxFrame {
            label: slot.label(),
            frame_id: self.frame_counter.frame_id(),
            readback: Some(slot.readback_buffer().vk_buffer()),
        };
        let output = self.orchestrator.run_frame(&mut self.ctx, &mut self.postfx, slot.cmd(), &frame, source, target);
        self.luminance_copied |= output.luminance_copied;
        output
    }

    /// 结束录制并提交
    ///
    /// `presenting` 为 true 时等待 image-acquired，并 signal render-complete 供 present 使用
    pub fn end_frame(&mut self, presenting: bool) {
        let _span = tracy_client::span!("Renderer::end_frame");
        assert!(self.recording, "end_frame called without begin_frame");

        let frame_id = self.frame_counter.frame_id();
        let slot = &mut self.slots[self.frame_counter.frame_label().index()];
        slot.cmd().end();

        let mut submit_info = GfxSubmitInfo::new(std::slice::from_ref(slot.cmd()));
        if presenting {
            submit_info = submit_info
                .wait(slot.image_acquired(), vk::PipelineStageFlags2::TRANSFER)
                .signal(slot.render_complete(), vk::PipelineStageFlags2::ALL_COMMANDS);
        }

        // reset 与提交之间不能有其他可能失败的操作
        slot.fence().reset();
        self.ctx.device().queue_submit(&[submit_info], slot.fence().handle());
        slot.mark_submitted(frame_id, self.luminance_copied);

        self.recording = false;
        self.frame_counter.next_frame();
    }

    /// 分辨率变化：等待 GPU 空闲，然后按照新的尺寸重建后处理资源
    ///
    /// 尺寸为 0 时（窗口最小化）什么都不做，保留 resize 请求
    pub fn resize(&mut self, extent: vk::Extent2D) {
        let _span = tracy_client::span!("Renderer::resize");
        assert!(!self.recording, "resize during frame recording");
        if extent.width == 0 || extent.height == 0 {
            log::debug!("skip resize to {}x{}", extent.width, extent.height);
            return;
        }

        self.ctx.device().wait_idle();
        self.postfx.rebuild(extent);
        self.resize_requested = false;
        log::info!("renderer resized to {}x{}", extent.width, extent.height);
    }

    /// 处理 `vkQueuePresentKHR` 的结果，返回是否需要 resize
    ///
    /// `Ok(true)` 表示 suboptimal
    pub fn handle_present_result(&mut self, result: VkResult<bool>) -> bool {
        match result {
            Ok(false) => false,
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::debug!("swapchain out of date or suboptimal, request resize");
                self.resize_requested = true;
                true
            }
            Err(err) => {
                log::error!("present failed: {:?}", err);
                panic!("present failed: {err:?}");
            }
        }
    }
}
// destroy
impl Renderer {
    pub fn destroy(mut self) {
        let _span = tracy_client::span!("Renderer::destroy");
        self.ctx.device().wait_idle();
        for slot in std::mem::take(&mut self.slots) {
            slot.destroy();
        }
        self.postfx.destroy();
        self.ctx.destroy();
        log::info!("renderer destroyed");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use ash::vk::Handle;
    use lumis_crate_tools::enum_table::IndexedEnum;
    use lumis_gfx::testing::{DeviceEvent, RecordingDevice};
    use lumis_postfx::{
        attachment::Attachment,
        effect::{Effect, HDR_COLOR_FORMAT, StageKind},
        histogram::{self, LuminanceBufferData},
        shader_source::SpirvMemory,
    };

    use super::*;
    use crate::frame_slot::{CameraData, ObjectData};

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    struct Scene {
        recording: Rc<RecordingDevice>,
        renderer: Renderer,
        source: Attachment,
    }
    impl Scene {
        fn new(size: vk::Extent2D) -> Self {
            let recording = Rc::new(RecordingDevice::new());
            let mut shaders = SpirvMemory::new();
            for &kind in StageKind::ALL {
                shaders.insert(kind.shader_name(), vec![SPIRV_MAGIC]);
            }
            let renderer = Renderer::new(recording.clone(), PostFxSettings::default(), Box::new(shaders), size);
            let source = Attachment::new(recording.clone(), size, HDR_COLOR_FORMAT, "scene-color");
            Self {
                recording,
                renderer,
                source,
            }
        }

        fn frame(&mut self) -> FrameOutput {
            self.renderer.begin_frame();
            let slot = self.renderer.current_slot();
            slot.write_camera(&CameraData::default());
            slot.write_objects(&[ObjectData::default(); 4]);

            let target = CompositeTarget {
                image: vk::Image::from_raw(0xfeed_0000),
                extent: self.source.extent(),
                old_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            };
            let output = self.renderer.run_frame(&SourceImage::from_attachment(&self.source), &target);
            self.renderer.end_frame(true);
            output
        }

        fn slot_fences(&self) -> Vec<vk::Fence> {
            self.renderer.slots().iter().map(|slot| slot.fence().handle()).collect_vec()
        }

        fn finish(self) {
            self.source.destroy();
            self.renderer.destroy();
        }
    }

    #[test]
    fn test_slot_buffers_are_never_written_while_in_flight() {
        let mut scene = Scene::new(extent(64, 32));
        for _ in 0..7 {
            scene.frame();
        }

        let owner: HashMap<_, _> = scene
            .renderer
            .slots()
            .iter()
            .flat_map(|slot| {
                let fence = slot.fence().handle();
                [slot.camera_buffer().allocation(), slot.object_buffer().allocation()].map(|a| (a, fence))
            })
            .collect();

        let mut checked = 0;
        for event in scene.recording.events() {
            let DeviceEvent::Flush {
                allocation,
                pending_fences,
            } = event
            else {
                continue;
            };
            if let Some(fence) = owner.get(&allocation) {
                assert!(!pending_fences.contains(fence), "slot buffer written while its fence is pending");
                checked += 1;
            }
        }
        assert_eq!(checked, 7 * 2);
        scene.finish();
    }

    #[test]
    fn test_fence_reset_right_before_submit() {
        let mut scene = Scene::new(extent(64, 32));
        for _ in 0..5 {
            scene.frame();
        }

        let fences = scene.slot_fences();
        let events = scene.recording.events();
        let mut submits = 0;
        for (idx, event) in events.iter().enumerate() {
            match event {
                DeviceEvent::Submit { fence } if fences.contains(fence) => {
                    assert_eq!(events[idx - 1], DeviceEvent::ResetFence { fence: *fence });
                    submits += 1;
                }
                _ => {}
            }
        }
        assert_eq!(submits, 5);

        // 每个槽位的 fence 依次使用
        let order = scene
            .recording
            .submits()
            .iter()
            .filter(|submit| fences.contains(&submit.fence))
            .map(|submit| submit.fence)
            .collect_vec();
        assert_eq!(order, vec![fences[0], fences[1], fences[2], fences[0], fences[1]]);
        scene.finish();
    }

    #[test]
    fn test_present_semaphores_only_when_presenting() {
        let mut scene = Scene::new(extent(16, 16));
        scene.frame();

        scene.renderer.begin_frame();
        scene.renderer.end_frame(false);

        let submits = scene.recording.submits();
        let slot_submits = submits.iter().rev().take(2).collect_vec();
        let presented = slot_submits[1];
        let offscreen = slot_submits[0];

        let slot_a = &scene.renderer.slots()[0];
        assert_eq!(presented.wait_semaphores, vec![slot_a.image_acquired().handle()]);
        assert_eq!(presented.signal_semaphores, vec![slot_a.render_complete().handle()]);
        assert!(offscreen.wait_semaphores.is_empty());
        assert!(offscreen.signal_semaphores.is_empty());
        scene.finish();
    }

    #[test]
    #[should_panic(expected = "device lost")]
    fn test_hung_fence_is_fatal() {
        let mut scene = Scene::new(extent(16, 16));
        scene.recording.set_fence_hang(true);
        // 三个槽位的 fence 创建时都是 signaled，第四帧开始等待真正提交过的 fence
        for _ in 0..4 {
            scene.frame();
        }
    }

    #[test]
    fn test_readback_arrives_after_slot_cycle() {
        let mut scene = Scene::new(extent(32, 32));
        let luminance = scene.renderer.postfx().luminance_buffer().vk_buffer();
        let offset = std::mem::offset_of!(LuminanceBufferData, average_luminance);

        for frame_id in 0..3 {
            scene.recording.write_buffer_memory(luminance, offset, &(0.25 * (frame_id + 1) as f32).to_ne_bytes());
            let output = scene.frame();
            assert!(output.luminance_copied);
            assert!(scene.renderer.luminance_readback().is_none());
        }

        scene.renderer.begin_frame();
        let readback = scene.renderer.luminance_readback().unwrap();
        assert_eq!(readback.frame_id, 0);
        assert_eq!(readback.average_luminance, 0.25);
        scene.renderer.end_frame(false);

        scene.renderer.begin_frame();
        let readback = scene.renderer.luminance_readback().unwrap();
        assert_eq!(readback.frame_id, 1);
        assert_eq!(readback.average_luminance, 0.5);
        scene.renderer.end_frame(false);
        scene.finish();
    }

    #[test]
    fn test_luminance_state_round_trips_through_slot_readback() {
        let mut scene = Scene::new(extent(32, 32));
        let exposure = scene.renderer.postfx().settings().exposure.clone();
        let luminance = scene.renderer.postfx().luminance_buffer().vk_buffer();

        // 上一帧（role 1）是一张全部为 1.0 的图像，并且已经收敛
        let mut written = LuminanceBufferData::default();
        written.buckets[1][histogram::bucket_of(1.0, &exposure)] = 32 * 32;
        written.max_luminance[1] = 1.0;
        written.buckets[0][7] = 99;
        written.max_luminance[0] = 5.0;
        written.average_luminance = 1.0;
        written.target_average_luminance = 1.0;
        written.exposure = histogram::exposure_from_luminance(1.0, exposure.compensation);
        written._padding = [3.0; 3];
        scene.recording.write_buffer_memory(luminance, 0, bytemuck::bytes_of(&written));

        for _ in 0..3 {
            scene.frame();
        }
        scene.renderer.begin_frame();

        // 第 0 帧只清空了自己的 role，其余字节原样回读
        let mut expected = written;
        expected.buckets[0] = [0; histogram::HISTOGRAM_BUCKETS];
        expected.max_luminance[0] = 0.0;
        let raw: LuminanceBufferData = scene.renderer.slots()[0].readback_buffer().read_pod();
        assert_eq!(raw, expected);

        let readback = scene.renderer.luminance_readback().unwrap();
        assert_eq!(readback.frame_id, 0);
        assert_eq!(readback.average_luminance, 1.0);
        assert_eq!(readback.target_average_luminance, 1.0);
        assert_eq!(readback.exposure, written.exposure);
        assert_eq!(readback.histogram.buckets, expected.buckets[0]);

        scene.renderer.end_frame(false);
        scene.finish();
    }

    #[test]
    fn test_zero_extent_at_startup_requests_resize() {
        let recording = Rc::new(RecordingDevice::new());
        let mut shaders = SpirvMemory::new();
        for &kind in StageKind::ALL {
            shaders.insert(kind.shader_name(), vec![SPIRV_MAGIC]);
        }
        let mut renderer = Renderer::new(recording.clone(), PostFxSettings::default(), Box::new(shaders), extent(0, 0));
        assert_eq!(renderer.postfx().extent(), extent(1, 1));
        assert!(renderer.is_resize_requested());

        renderer.resize(extent(0, 0));
        assert!(renderer.is_resize_requested());
        renderer.resize(extent(40, 20));
        assert!(!renderer.is_resize_requested());
        assert_eq!(renderer.postfx().extent(), extent(40, 20));
        renderer.destroy();
    }

    #[test]
    fn test_disabled_adaptation_keeps_previous_readback() {
        let mut scene = Scene::new(extent(32, 32));
        scene.renderer.postfx_mut().settings_mut().enable_adaptation = false;
        for _ in 0..4 {
            let output = scene.frame();
            assert!(!output.luminance_copied);
        }
        assert!(scene.renderer.luminance_readback().is_none());
        scene.finish();
    }

    #[test]
    fn test_resize_waits_idle_and_rebuilds() {
        let mut scene = Scene::new(extent(64, 32));
        scene.frame();
        let idle_before = scene.recording.wait_idle_count();

        scene.renderer.resize(extent(0, 0));
        assert_eq!(scene.recording.wait_idle_count(), idle_before);
        assert_eq!(scene.renderer.postfx().extent(), extent(64, 32));

        scene.renderer.resize(extent(32, 16));
        assert_eq!(scene.recording.wait_idle_count(), idle_before + 1);
        assert_eq!(scene.renderer.postfx().extent(), extent(32, 16));

        // 旧的 attachment 已经销毁，新尺寸的帧重新创建
        let old_source = std::mem::replace(
            &mut scene.source,
            Attachment::new(scene.recording.clone(), extent(32, 16), HDR_COLOR_FORMAT, "scene-color"),
        );
        old_source.destroy();
        let output = scene.frame();
        assert!(output.skipped.is_empty());
        scene.finish();
    }

    #[test]
    fn test_level_change_rebuilds_at_frame_start() {
        let mut scene = Scene::new(extent(64, 64));
        scene.frame();
        let idle_before = scene.recording.wait_idle_count();

        scene.renderer.postfx_mut().settings_mut().bloom.levels = 2;
        scene.frame();
        assert_eq!(scene.recording.wait_idle_count(), idle_before + 1);
        assert!(!scene.renderer.postfx().needs_rebuild());
        scene.finish();
    }

    #[test]
    fn test_missing_shader_dir_skips_every_enabled_effect() {
        let recording = Rc::new(RecordingDevice::new());
        let settings = PostFxSettings {
            shader_dir: "does/not/exist".into(),
            ..Default::default()
        };
        let mut renderer = Renderer::from_settings(recording.clone(), settings, extent(32, 32));
        let source = Attachment::new(recording.clone(), extent(32, 32), HDR_COLOR_FORMAT, "scene-color");
        let target = CompositeTarget {
            image: vk::Image::from_raw(0xfeed_0000),
            extent: extent(32, 32),
            old_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        };

        renderer.begin_frame();
        let output = renderer.run_frame(&SourceImage::from_attachment(&source), &target);
        renderer.end_frame(false);

        let enabled = Effect::ALL.iter().copied().filter(|&e| renderer.postfx().is_enabled(e)).collect_vec();
        assert!(!enabled.is_empty());
        assert_eq!(output.skipped, enabled);
        assert!(output.steps.is_empty());
        // 没有跑曝光，也就没有回读
        assert!(!output.luminance_copied);
        assert_eq!(recording.live_count("pipeline"), 0);

        source.destroy();
        renderer.destroy();
    }

    #[test]
    fn test_present_results() {
        let mut scene = Scene::new(extent(16, 16));
        assert!(!scene.renderer.handle_present_result(Ok(false)));
        assert!(!scene.renderer.is_resize_requested());

        assert!(scene.renderer.handle_present_result(Ok(true)));
        assert!(scene.renderer.is_resize_requested());
        scene.renderer.resize(extent(8, 8));
        assert!(!scene.renderer.is_resize_requested());

        assert!(scene.renderer.handle_present_result(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)));
        assert!(scene.renderer.is_resize_requested());
        scene.finish();
    }

    #[test]
    #[should_panic(expected = "present failed")]
    fn test_device_lost_on_present_is_fatal() {
        let mut scene = Scene::new(extent(16, 16));
        scene.renderer.handle_present_result(Err(vk::Result::ERROR_DEVICE_LOST));
    }

    #[test]
    fn test_destroy_releases_everything() {
        let mut scene = Scene::new(extent(64, 32));
        for _ in 0..3 {
            scene.frame();
        }
        let recording = scene.recording.clone();
        scene.finish();
        for kind in [
            "fence",
            "semaphore",
            "command_pool",
            "buffer",
            "image",
            "image_view",
            "pipeline",
            "pipeline_layout",
            "shader_module",
            "descriptor_pool",
            "descriptor_set_layout",
            "sampler",
        ] {
            assert_eq!(recording.live_count(kind), 0, "{kind} leaked");
        }
    }
}
