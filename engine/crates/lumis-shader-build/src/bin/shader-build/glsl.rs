//! 使用 glslc (来自 Vulkan SDK) 将 GLSL 编译为 SPIR-V

use std::path::PathBuf;

use anyhow::{Context, bail};

use crate::task::ShaderCompileTask;

pub struct GlslCompiler {
    include_dir: PathBuf,
}
impl GlslCompiler {
    pub fn new(include_dir: PathBuf) -> Self {
        Self { include_dir }
    }

    pub fn compile(&self, task: &ShaderCompileTask) -> anyhow::Result<()> {
        if let Some(parent) = task.output_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create output dir: {}", parent.display()))?;
        }

        let output = std::process::Command::new("glslc")
            .arg(format!("-I{}", self.include_dir.display()))
            .arg(format!("-fshader-stage={}", task.shader_stage.glslc_name()))
            .args(["-g", "--target-env=vulkan1.3", "-o"])
            .arg(&task.output_path)
            .arg(&task.shader_path)
            .output()
            .context("failed to execute glslc, is the Vulkan SDK installed?")?;

        if !output.stdout.is_empty() {
            log::info!("stdout: {}", String::from_utf8_lossy(&output.stdout));
        }
        if !output.status.success() {
            bail!(
                "glslc failed for {}:\n{}",
                task.shader_path.display(),
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(())
    }
}
