use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use anyhow::Context;

/// 按文件名提供 SPIR-V
///
/// 加载失败不是致命错误：对应的 stage 会被标记为无效，所在的效果整体跳过。
pub trait ShaderSource {
    fn load_spirv(&self, name: &str) -> anyhow::Result<Vec<u32>>;
}

/// 从磁盘目录读取 `*.spv`，一般是 shader 编译步骤的输出目录
pub struct SpirvDirectory {
    root: PathBuf,
}
impl SpirvDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }
}
impl ShaderSource for SpirvDirectory {
    fn load_spirv(&self, name: &str) -> anyhow::Result<Vec<u32>> {
        let path = self.root.join(name);
        let mut file =
            std::fs::File::open(&path).with_context(|| format!("failed to open shader: {}", path.display()))?;
        let code = ash::util::read_spv(&mut file).with_context(|| format!("invalid SPIR-V: {}", path.display()))?;
        log::debug!("load shader: {} ({} words)", path.display(), code.len());
        Ok(code)
    }
}

/// 内存中的 SPIR-V，测试以及把 shader 嵌入可执行文件时使用
#[derive(Default)]
pub struct SpirvMemory {
    modules: HashMap<String, Vec<u32>>,
}
impl SpirvMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, code: Vec<u32>) {
        self.modules.insert(name.into(), code);
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<u32>> {
        self.modules.remove(name)
    }
}
impl ShaderSource for SpirvMemory {
    fn load_spirv(&self, name: &str) -> anyhow::Result<Vec<u32>> {
        self.modules.get(name).cloned().with_context(|| format!("shader not found: {name}"))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_missing_file_reports_path() {
        let source = SpirvDirectory::new("/nonexistent/shaders");
        let err = source.load_spirv("tone_map.comp.spv").unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/shaders/tone_map.comp.spv"));
    }

    #[test]
    fn test_reads_words_from_disk() {
        let dir = std::env::temp_dir().join(format!("lumis-postfx-spv-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let words = [0x0723_0203u32, 0x0001_0000, 0, 1];
        let mut file = std::fs::File::create(dir.join("gamma.comp.spv")).unwrap();
        for word in words {
            file.write_all(&word.to_le_bytes()).unwrap();
        }
        drop(file);

        let source = SpirvDirectory::new(&dir);
        assert_eq!(source.load_spirv("gamma.comp.spv").unwrap(), words);

        // 长度不是 4 的倍数
        std::fs::write(dir.join("broken.comp.spv"), [0u8; 6]).unwrap();
        assert!(source.load_spirv("broken.comp.spv").is_err());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_memory_source() {
        let mut source = SpirvMemory::new();
        source.insert("histogram.comp.spv", vec![0x0723_0203]);
        assert_eq!(source.load_spirv("histogram.comp.spv").unwrap(), vec![0x0723_0203]);
        assert!(source.load_spirv("gamma.comp.spv").is_err());
    }
}
