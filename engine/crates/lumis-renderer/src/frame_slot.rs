use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use lumis_gfx::{
    commands::{
        command_buffer::GfxCommandBuffer, command_pool::GfxCommandPool, fence::GfxFence, semaphore::GfxSemaphore,
    },
    descriptors::builder::GfxDescriptorBuilder,
    foundation::{deletion_stack::DeletionStack, device_api::vk_check},
    resources::buffer::GfxBuffer,
};
use lumis_postfx::{
    frame_counter::FrameLabel,
    histogram::{LuminanceBufferData, LuminanceReadback},
    render_context::RenderContext,
};

/// 每个帧槽位最多容纳的物体数量
pub const MAX_OBJECTS: usize = 1024;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CameraData {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    /// w 分量未使用
    pub position: Vec4,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct ObjectData {
    pub model: Mat4,
    pub inv_model: Mat4,
    pub base_color: Vec4,
}

/// 一个 in-flight 帧独占的资源
///
/// fence 创建时就是 signaled，第一次 `wait` 不会阻塞。
/// CPU 只能在 fence signaled 的时候写入这里的 buffer，也就是 `wait` 之后、下一次提交之前。
///
/// # Destroy
/// 需要手动调用 `destroy`，调用前需要保证 GPU 已经空闲
pub struct FrameSlot {
    label: FrameLabel,

    command_pool: GfxCommandPool,
    cmd: GfxCommandBuffer,

    fence: GfxFence,
    image_acquired: GfxSemaphore,
    render_complete: GfxSemaphore,

    camera_buffer: GfxBuffer,
    object_buffer: GfxBuffer,
    /// 后处理把亮度 buffer copy 到这里，槽位下一次被等待之后再读
    readback_buffer: GfxBuffer,
    /// readback buffer 中的数据来自哪一帧
    readback_frame_id: Option<u64>,

    descriptor_set: vk::DescriptorSet,
    descriptor_set_layout: vk::DescriptorSetLayout,

    ledger: DeletionStack,
}
// new & init
impl FrameSlot {
    pub fn new(ctx: &mut RenderContext, label: FrameLabel) -> Self {
        let _span = tracy_client::span!("FrameSlot::new");
        let device = ctx.device().clone();
        let mut ledger = DeletionStack::new(format!("frame-slot-{label}"));

        let command_pool = GfxCommandPool::new(
            device.clone(),
            vk::CommandPoolCreateFlags::TRANSIENT,
            &format!("frame-{label}-graphics"),
        );
        let cmd = command_pool.alloc_command_buffer(&format!("frame-{label}-main"));
        let for_ledger = command_pool.clone();
        ledger.push("command pool", move || for_ledger.destroy());

        let fence = GfxFence::new(device.clone(), true, &format!("frame-{label}-in-flight"));
        let image_acquired = GfxSemaphore::new(device.clone(), &format!("frame-{label}-image-acquired"));
        let render_complete = GfxSemaphore::new(device.clone(), &format!("frame-{label}-render-complete"));
        {
            let fence = fence.clone();
            let image_acquired = image_acquired.clone();
            let render_complete = render_complete.clone();
            ledger.push("sync primitives", move || {
                render_complete.destroy();
                image_acquired.destroy();
                fence.destroy();
            });
        }

        let camera_buffer = GfxBuffer::new_host_write(
            device.clone(),
            size_of::<CameraData>() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            format!("frame-{label}-camera"),
        );
        let object_buffer = GfxBuffer::new_host_write(
            device.clone(),
            (size_of::<ObjectData>() * MAX_OBJECTS) as vk::DeviceSize,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            format!("frame-{label}-objects"),
        );
        let readback_buffer = GfxBuffer::new_readback(
            device.clone(),
            size_of::<LuminanceBufferData>() as vk::DeviceSize,
            format!("frame-{label}-luminance-readback"),
        );
        for buffer in [&camera_buffer, &object_buffer, &readback_buffer] {
            let buffer = buffer.clone();
            ledger.push(format!("buffer {}", buffer.debug_name()), move || buffer.destroy());
        }

        // set 来自设备级的分配器，随 RenderContext 一起销毁
        let stages = vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT | vk::ShaderStageFlags::COMPUTE;
        let (cache, allocator) = ctx.descriptor_parts_mut();
        let (descriptor_set, descriptor_set_layout) = vk_check(
            GfxDescriptorBuilder::begin(cache, allocator)
                .bind_buffer(0, camera_buffer.descriptor_info(), vk::DescriptorType::UNIFORM_BUFFER, stages)
                .bind_buffer(1, object_buffer.descriptor_info(), vk::DescriptorType::STORAGE_BUFFER, stages)
                .build(),
            "frame slot descriptor set",
        );

        log::info!("frame slot {} created", label);
        Self {
            label,
            command_pool,
            cmd,
            fence,
            image_acquired,
            render_complete,
            camera_buffer,
            object_buffer,
            readback_buffer,
            readback_frame_id: None,
            descriptor_set,
            descriptor_set_layout,
            ledger,
        }
    }
}
// getters
impl FrameSlot {
    #[inline]
    pub fn label(&self) -> FrameLabel {
        self.label
    }

    #[inline]
    pub fn cmd(&self) -> &GfxCommandBuffer {
        &self.cmd
    }

    #[inline]
    pub fn fence(&self) -> &GfxFence {
        &self.fence
    }

    #[inline]
    pub fn image_acquired(&self) -> &GfxSemaphore {
        &self.image_acquired
    }

    #[inline]
    pub fn render_complete(&self) -> &GfxSemaphore {
        &self.render_complete
    }

    #[inline]
    pub fn camera_buffer(&self) -> &GfxBuffer {
        &self.camera_buffer
    }

    #[inline]
    pub fn object_buffer(&self) -> &GfxBuffer {
        &self.object_buffer
    }

    #[inline]
    pub fn readback_buffer(&self) -> &GfxBuffer {
        &self.readback_buffer
    }

    #[inline]
    pub fn descriptor_set(&self) -> vk::DescriptorSet {
        self.descriptor_set
    }

    #[inline]
    pub fn descriptor_set_layout(&self) -> vk::DescriptorSetLayout {
        self.descriptor_set_layout
    }

    /// GPU 已经不再使用这个槽位
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.fence.is_signaled()
    }
}
// tools
impl FrameSlot {
    /// 等待这个槽位上一次提交的工作完成
    pub fn wait(&self) {
        let _span = tracy_client::span!("FrameSlot::wait");
        self.fence.wait();
    }

    /// 重置 command pool 并开始录制
    pub fn begin_recording(&self, frame_name: &str) {
        assert!(self.is_idle(), "frame slot {} recorded while in flight", self.label);
        self.command_pool.reset_all_buffers();
        self.cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, frame_name);
    }

    pub fn write_camera(&self, camera: &CameraData) {
        assert!(self.is_idle(), "frame slot {} camera written while in flight", self.label);
        self.camera_buffer.write_pod(camera);
    }

    pub fn write_objects(&self, objects: &[ObjectData]) {
        assert!(self.is_idle(), "frame slot {} objects written while in flight", self.label);
        assert!(objects.len() <= MAX_OBJECTS, "too many objects: {} > {}", objects.len(), MAX_OBJECTS);
        if !objects.is_empty() {
            self.object_buffer.transfer_data_by_mmap(objects);
        }
    }

    /// 记录本次提交的帧，以及这一帧是否把亮度 copy 进了 readback buffer
    pub fn mark_submitted(&mut self, frame_id: u64, luminance_copied: bool) {
        self.readback_frame_id = luminance_copied.then_some(frame_id);
    }

    /// 读出上一次提交留下的亮度数据，每份数据只会读出一次
    ///
    /// 必须在 `wait` 之后调用
    pub fn read_luminance(&mut self) -> Option<LuminanceReadback> {
        assert!(self.is_idle(), "frame slot {} read back while in flight", self.label);
        let frame_id = self.readback_frame_id.take()?;
        let data: LuminanceBufferData = self.readback_buffer.read_pod();
        Some(LuminanceReadback::from_buffer(&data, frame_id))
    }
}
// destroy
impl FrameSlot {
    pub fn destroy(mut self) {
        self.ledger.flush();
        log::info!("frame slot {} destroyed", self.label);
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use ash::vk::Handle;
    use lumis_gfx::{foundation::device_api::GfxDeviceApi, testing::RecordingDevice};

    use super::*;

    fn slot() -> (Rc<RecordingDevice>, RenderContext, FrameSlot) {
        let recording = Rc::new(RecordingDevice::new());
        let mut ctx = RenderContext::new(recording.clone());
        let slot = FrameSlot::new(&mut ctx, FrameLabel::B);
        (recording, ctx, slot)
    }

    #[test]
    fn test_descriptor_set_points_at_own_buffers() {
        let (recording, mut ctx, slot) = slot();
        let writes = recording.descriptor_writes_for(slot.descriptor_set());
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].buffers, vec![slot.camera_buffer().vk_buffer()]);
        assert_eq!(writes[1].buffers, vec![slot.object_buffer().vk_buffer()]);
        assert_eq!(
            recording.object_name(slot.camera_buffer().vk_buffer().as_raw()).as_deref(),
            Some("frame-B-camera")
        );

        slot.destroy();
        ctx.destroy();
        for kind in ["buffer", "fence", "semaphore", "command_pool", "descriptor_pool"] {
            assert_eq!(recording.live_count(kind), 0, "{kind} leaked");
        }
    }

    #[test]
    fn test_write_before_first_submit_is_legal() {
        let (recording, mut ctx, slot) = slot();
        slot.wait();
        slot.write_camera(&CameraData {
            position: Vec4::new(1.0, 2.0, 3.0, 1.0),
            ..Default::default()
        });
        let camera: CameraData = slot.camera_buffer().read_pod();
        assert_eq!(camera.position, Vec4::new(1.0, 2.0, 3.0, 1.0));
        assert!(recording.fence_state(slot.fence().handle()).is_some());

        slot.destroy();
        ctx.destroy();
    }

    #[test]
    #[should_panic(expected = "written while in flight")]
    fn test_write_while_in_flight_panics() {
        let (recording, _ctx, slot) = slot();
        slot.fence().reset();
        recording.queue_submit(&[], slot.fence().handle());
        slot.write_objects(&[ObjectData::default()]);
    }

    #[test]
    fn test_readback_is_consumed_once() {
        let (_recording, mut ctx, mut slot) = slot();
        assert!(slot.read_luminance().is_none());

        slot.mark_submitted(7, true);
        let readback = slot.read_luminance().unwrap();
        assert_eq!(readback.frame_id, 7);
        assert!(slot.read_luminance().is_none());

        slot.mark_submitted(8, false);
        assert!(slot.read_luminance().is_none());

        slot.destroy();
        ctx.destroy();
    }
}
