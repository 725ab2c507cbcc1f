//! Vulkan GFX 抽象层
//!
//! 提供对 Vulkan API 的封装，包括设备、命令缓冲、同步原语、描述符、计算管线以及资源。
//!
//! 所有的 Vulkan 调用都经过 [`foundation::device_api::GfxDeviceApi`]，上层通过
//! `Rc<dyn GfxDeviceApi>` 显式持有设备，不存在全局单例。
//!
//! # 销毁
//! 各个句柄封装都是可以 Clone 的轻量对象，不实现 Drop 销毁；
//! 创建者需要将销毁动作放入 [`foundation::deletion_stack::DeletionStack`]。

pub mod commands;
pub mod descriptors;
pub mod foundation;
pub mod pipelines;
pub mod resources;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
