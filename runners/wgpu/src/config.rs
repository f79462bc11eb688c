use crate::KernelKind;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Everything one run of the runner needs. Missing fields take their defaults,
/// which reproduce the hello-world scenario.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RunConfig {
    pub kernel: KernelKind,
    /// Kernel source (`wgsl`, `glsl`) or binary (`spirv`) to load instead of
    /// the embedded one.
    pub shader_path: Option<PathBuf>,
    pub message: String,
    pub offsets: Vec<i32>,
    pub width: u32,
    pub dispatches: u32,
    pub output_path: Option<PathBuf>,
    pub verify: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            kernel: KernelKind::Wgsl,
            shader_path: None,
            message: "Hello ".to_owned(),
            offsets: vec![15, 10, 6, 0, -11, 1],
            width: add_shader::WIDTH,
            dispatches: 1,
            output_path: None,
            verify: false,
        }
    }
}

impl RunConfig {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }
}

/// Metadata written next to an output file, describing how to read it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputMetadata {
    pub output_type: OutputType,
    pub width: u32,
    pub dispatches: u32,
}

/// How the bytes of an output file are laid out.
#[derive(Debug, Serialize, Deserialize, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    /// Little-endian 32-bit signed integers
    #[default]
    I32,
}

/// Path of the metadata file belonging to `output_path`.
pub fn metadata_path(output_path: &Path) -> PathBuf {
    let mut path = output_path.as_os_str().to_owned();
    path.push(".json");
    PathBuf::from(path)
}

/// Writes `lanes` as raw little-endian bytes to `output_path`, and the
/// metadata next to it.
pub fn write_output(output_path: &Path, lanes: &[i32], metadata: &OutputMetadata) -> Result<()> {
    let bytes: Vec<u8> = lanes.iter().flat_map(|lane| lane.to_le_bytes()).collect();
    fs::write(output_path, bytes)?;
    fs::write(metadata_path(output_path), serde_json::to_string(metadata)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, tempdir};

    #[test]
    fn test_config_from_path() {
        let mut tmp = NamedTempFile::new().unwrap();
        let config_json = r#"{ "kernel": "glsl", "width": 1, "offsets": [41], "message": "" }"#;
        write!(tmp, "{}", config_json).unwrap();
        let config = RunConfig::from_path(tmp.path()).unwrap();
        assert_eq!(config.kernel, KernelKind::Glsl);
        assert_eq!(config.width, 1);
        assert_eq!(config.offsets, [41]);
        assert_eq!(config.dispatches, 1);
        assert!(!config.verify);
    }

    #[test]
    fn empty_config_is_the_default() {
        let mut tmp = NamedTempFile::new().unwrap();
        write!(tmp, "{{}}").unwrap();
        assert_eq!(RunConfig::from_path(tmp.path()).unwrap(), RunConfig::default());
    }

    #[test]
    fn unknown_kernel_is_an_error() {
        let mut tmp = NamedTempFile::new().unwrap();
        write!(tmp, r#"{{ "kernel": "hlsl" }}"#).unwrap();
        assert!(RunConfig::from_path(tmp.path()).is_err());
    }

    #[test]
    fn output_is_little_endian_with_metadata() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("accumulator.bin");
        let metadata = OutputMetadata {
            output_type: OutputType::I32,
            width: 2,
            dispatches: 1,
        };
        write_output(&output, &[1, -1], &metadata).unwrap();

        assert_eq!(fs::read(&output).unwrap(), [1, 0, 0, 0, 0xff, 0xff, 0xff, 0xff]);
        let written = fs::read_to_string(dir.path().join("accumulator.bin.json")).unwrap();
        assert_eq!(
            written,
            r#"{"output_type":"i32","width":2,"dispatches":1}"#
        );
    }
}
