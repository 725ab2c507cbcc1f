use std::rc::Rc;

use ash::vk;

use crate::{
    commands::{
        command_buffer::GfxCommandBuffer, command_pool::GfxCommandPool, fence::GfxFence, submit_info::GfxSubmitInfo,
    },
    foundation::device_api::GfxDeviceApi,
};

/// 同步执行一次性的命令：录制、提交、阻塞等待专用的 fence
///
/// 只在加载阶段使用（资源上传、初始化），不参与逐帧的流水线。
#[derive(Clone)]
pub struct GfxImmediateSubmit {
    device: Rc<dyn GfxDeviceApi>,
    command_pool: GfxCommandPool,
    command_buffer: GfxCommandBuffer,
    fence: GfxFence,
}
// new & init
impl GfxImmediateSubmit {
    pub fn new(device: Rc<dyn GfxDeviceApi>) -> Self {
        let command_pool =
            GfxCommandPool::new(device.clone(), vk::CommandPoolCreateFlags::TRANSIENT, "immediate-submit");
        let command_buffer = command_pool.alloc_command_buffer("immediate-submit");
        let fence = GfxFence::new(device.clone(), false, "immediate-submit");

        Self {
            device,
            command_pool,
            command_buffer,
            fence,
        }
    }
}
// destroy
impl GfxImmediateSubmit {
    pub fn destroy(self) {
        self.fence.destroy();
        self.command_pool.destroy();
    }
}
// tools
impl GfxImmediateSubmit {
    /// 阻塞直到 GPU 执行完毕
    pub fn submit(&self, name: &str, record: impl FnOnce(&GfxCommandBuffer)) {
        let _span = tracy_client::span!("GfxImmediateSubmit::submit");

        self.command_pool.reset_all_buffers();
        self.command_buffer.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, name);
        record(&self.command_buffer);
        self.command_buffer.end();

        self.device.queue_submit(
            std::slice::from_ref(&GfxSubmitInfo::new(std::slice::from_ref(&self.command_buffer))),
            self.fence.handle(),
        );
        self.fence.wait();
        self.fence.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordedCommand, RecordingDevice};

    #[test]
    fn test_submit_waits_and_resets_fence() {
        let recording = Rc::new(RecordingDevice::new());
        let device: Rc<dyn GfxDeviceApi> = recording.clone();
        let immediate = GfxImmediateSubmit::new(device);

        immediate.submit("upload", |cmd| cmd.cmd_fill_buffer(vk::Buffer::null(), 0, 16, 7));

        assert_eq!(recording.submit_count(), 1);
        assert!(recording.commands().iter().any(|c| matches!(c, RecordedCommand::FillBuffer { data: 7, .. })));
        // 等待之后 fence 被 reset，下一次可以直接提交
        assert!(!recording.fence_signaled(immediate.fence.handle()));

        immediate.submit("upload-again", |_| {});
        assert_eq!(recording.submit_count(), 2);

        immediate.destroy();
    }
}
