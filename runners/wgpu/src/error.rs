use std::path::PathBuf;
use thiserror::Error;

/// Everything the host harness can report. The kernel itself has no failure
/// modes, so each variant is either a device problem or a host contract that
/// was caught before dispatch.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no suitable GPU adapter found: {0}")]
    NoAdapter(#[from] wgpu::RequestAdapterError),
    #[error("adapter {adapter:?} does not support compute shaders")]
    ComputeUnsupported { adapter: String },
    #[error("failed to create device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
    #[error("failed to parse {path}:\n{diagnostic}")]
    ShaderParse { path: String, diagnostic: String },
    #[error("kernel {path} failed validation:\n{diagnostic}")]
    ShaderValidation { path: String, diagnostic: String },
    #[error("failed to write kernel {path} as WGSL: {message}")]
    ShaderTranspile { path: String, message: String },
    #[error("SPIR-V binary {path:?} is {len} bytes, which is not a multiple of 4")]
    InvalidSpirv { path: PathBuf, len: usize },
    #[error("kernel {path} breaks the binding contract: {message}")]
    BindingContract { path: String, message: String },
    #[error("accumulator has {accumulator} elements but offsets has {offsets}")]
    LengthMismatch { accumulator: usize, offsets: usize },
    #[error("buffers hold {len} elements but the kernel runs {width} invocations")]
    WidthMismatch { len: usize, width: u32 },
    #[error("workgroup of {width} invocations exceeds the device limit of {limit}")]
    WorkgroupTooLarge { width: u32, limit: u32 },
    #[error("at least one dispatch is required")]
    NoDispatches,
    #[error("message is {len} bytes but only {width} lanes are available")]
    MessageTooLong { len: usize, width: usize },
    #[error("failed to map readback buffer: {0}")]
    Map(#[from] wgpu::BufferAsyncError),
    #[error("readback mapping was canceled")]
    MapCanceled,
    #[error("device poll failed: {0}")]
    Poll(#[from] wgpu::PollError),
    #[error("outputs differ:\n\n{0}")]
    DifferingOutput(String),
    #[error("configuration error: {msg}")]
    Config { msg: String },
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

impl From<add_shader::cpu::LengthMismatch> for Error {
    fn from(err: add_shader::cpu::LengthMismatch) -> Self {
        Self::LengthMismatch {
            accumulator: err.accumulator,
            offsets: err.offsets,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
