//! Lumis 的帧调度
//!
//! [`renderer::Renderer`] 持有 [`RenderContext`]、后处理以及 `fif_count` 个
//! [`frame_slot::FrameSlot`]，负责 fence 节奏、提交、亮度回读以及分辨率变化。

pub mod frame_slot;
pub mod renderer;

pub use lumis_postfx::{frame_counter::FrameCounter, render_context::RenderContext};
