//! Shader 编译工具
//!
//! 将 `shader/` 下的所有 GLSL 编译为 SPIR-V，输出到 `shader/.build`，
//! 后处理在运行时从 `shader/.build/postfx` 读取。

mod glsl;
mod task;

use glsl::GlslCompiler;
use lumis_crate_tools::{init_log::init_log, resource::LumisPath};
use rayon::prelude::*;
use task::ShaderCompileTask;

fn main() {
    init_log();

    let src_root = LumisPath::shader_root_path();
    let build_root = LumisPath::shader_build_path();
    log::info!("Shader source path: {:?}", src_root);
    log::info!("Shader output path: {:?}", build_root);

    let compiler = GlslCompiler::new(src_root.join("include"));
    let failed = walkdir::WalkDir::new(&src_root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| ShaderCompileTask::new(entry.path(), &src_root, &build_root))
        .par_bridge() // 并行化编译
        .filter(|task| {
            log::info!("Compiling shader: {:?}", task.shader_path);
            match compiler.compile(task) {
                Ok(()) => false,
                Err(err) => {
                    log::error!("{:#}", err);
                    true
                }
            }
        })
        .count();

    if failed > 0 {
        log::error!("{} shader(s) failed to compile", failed);
        std::process::exit(1);
    }
    log::info!("Shader compilation completed.");
}
