use std::path::{Path, PathBuf};

/// Shader 的执行阶段，由文件扩展名决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}
impl ShaderStage {
    fn from_file_name(name: &str) -> Option<Self> {
        let stage = match () {
            _ if name.ends_with(".vert") => Self::Vertex,
            _ if name.ends_with(".frag") => Self::Fragment,
            _ if name.ends_with(".comp") => Self::Compute,
            // include 的头文件等
            _ => return None,
        };
        Some(stage)
    }

    /// glslc 的 `-fshader-stage`
    pub fn glslc_name(self) -> &'static str {
        match self {
            Self::Vertex => "vert",
            Self::Fragment => "frag",
            Self::Compute => "comp",
        }
    }
}

/// 一个具体的编译任务
#[derive(Debug)]
pub struct ShaderCompileTask {
    pub shader_path: PathBuf,
    pub output_path: PathBuf,
    pub shader_stage: ShaderStage,
}
impl ShaderCompileTask {
    /// 输出路径与源码相对于 `src_root` 的路径一致，文件名追加 `.spv`
    ///
    /// 不是 shader 入口或者不在 `src_root` 下时返回 None
    pub fn new(shader_path: &Path, src_root: &Path, build_root: &Path) -> Option<Self> {
        let relative_path = shader_path.strip_prefix(src_root).ok()?;
        // 输出目录本身也在 shader/ 下
        if shader_path.starts_with(build_root) {
            return None;
        }
        let shader_name = shader_path.file_name()?.to_str()?;
        let shader_stage = ShaderStage::from_file_name(shader_name)?;

        let mut output_path = build_root.join(relative_path);
        output_path.set_file_name(format!("{shader_name}.spv"));

        Some(Self {
            shader_path: shader_path.to_path_buf(),
            output_path,
            shader_stage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_mirrors_source_tree() {
        let task = ShaderCompileTask::new(
            Path::new("/ws/shader/postfx/tone_map.comp"),
            Path::new("/ws/shader"),
            Path::new("/ws/shader/.build"),
        )
        .unwrap();
        assert_eq!(task.output_path, Path::new("/ws/shader/.build/postfx/tone_map.comp.spv"));
        assert_eq!(task.shader_stage, ShaderStage::Compute);
    }

    #[test]
    fn test_headers_and_outputs_are_skipped() {
        let src = Path::new("/ws/shader");
        let build = Path::new("/ws/shader/.build");
        assert!(ShaderCompileTask::new(Path::new("/ws/shader/include/color.glsl"), src, build).is_none());
        assert!(ShaderCompileTask::new(Path::new("/ws/shader/.build/postfx/gamma.comp"), src, build).is_none());
        assert!(ShaderCompileTask::new(Path::new("/elsewhere/gamma.comp"), src, build).is_none());
    }
}
