pub mod compute_pipeline;
pub mod shader;
