//! HDR 后处理管线
//!
//! - [`postfx::PostFx`] 持有所有效果的 stage、attachment、金字塔以及亮度 buffer
//! - [`orchestrator::FrameOrchestrator`] 每帧按照依赖顺序录制 dispatch 与 barrier
//! - [`histogram`] 与 [`tone_mapping`] 是 GPU 算法的 CPU 参考实现，也用于解释回读的数据

pub mod attachment;
pub mod effect;
pub mod frame_counter;
pub mod histogram;
pub mod orchestrator;
pub mod params;
pub mod postfx;
pub mod render_context;
pub mod settings;
pub mod shader_source;
pub mod stage;
pub mod tone_mapping;

#[cfg(test)]
mod test_support;
