//! Loading the add kernel into wgpu.
//!
//! Every flavour goes through naga on the host first: the source is parsed and
//! validated so that errors carry source spans, then the binding layout is
//! reflected and checked against the contract the host binds against
//! (set 0, binding 5 read-write, binding 6 read-only, one row of `width`
//! invocations). Only then is the module handed to the device.

use crate::error::{Error, Result};
use add_shader::{ACCUMULATOR_BINDING, DESCRIPTOR_SET, ENTRY_POINT, OFFSETS_BINDING};
use naga::valid::{Capabilities, ValidationFlags, Validator};
use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A kernel that can be turned into a wgpu shader module.
pub trait KernelShader {
    /// Invocations per workgroup along `x`, which is also the buffer length.
    fn workgroup_width(&self) -> u32;

    /// Parses and validates the kernel.
    fn parse(&self) -> Result<ParsedKernel>;

    /// Creates the module after checking the binding contract, and returns it
    /// together with its entry point.
    fn create_module(&self, device: &wgpu::Device) -> Result<(wgpu::ShaderModule, Option<String>)> {
        let parsed = self.parse()?;
        parsed
            .reflect()
            .check_add_contract(self.workgroup_width())
            .map_err(|message| Error::BindingContract {
                path: parsed.path.clone(),
                message,
            })?;

        let source = match parsed.source {
            ModuleSource::Wgsl(wgsl) => wgpu::ShaderSource::Wgsl(Cow::Owned(wgsl)),
            ModuleSource::SpirV(words) => wgpu::ShaderSource::SpirV(Cow::Owned(words)),
        };
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(parsed.path.as_str()),
            source,
        });
        Ok((module, Some(parsed.entry_point)))
    }
}

/// What a device consumes for a kernel.
pub enum ModuleSource {
    Wgsl(String),
    SpirV(Vec<u32>),
}

/// A kernel that naga parsed and validated.
pub struct ParsedKernel {
    /// Where the kernel came from, for diagnostics.
    pub path: String,
    pub module: naga::Module,
    pub entry_point: String,
    pub source: ModuleSource,
}

impl ParsedKernel {
    pub fn reflect(&self) -> KernelReflection {
        reflect(&self.module, &self.entry_point)
    }
}

/// A storage buffer as a kernel declares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageBinding {
    pub group: u32,
    pub binding: u32,
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelReflection {
    pub entry_point: String,
    /// `None` when the module has no compute entry point by that name.
    pub workgroup_size: Option<[u32; 3]>,
    pub storage_bindings: Vec<StorageBinding>,
}

impl KernelReflection {
    fn binding(&self, binding: u32) -> Option<&StorageBinding> {
        self.storage_bindings
            .iter()
            .find(|b| b.group == DESCRIPTOR_SET && b.binding == binding)
    }

    /// Checks that the kernel matches what the host binds and dispatches.
    pub fn check_add_contract(&self, width: u32) -> std::result::Result<(), String> {
        let Some(workgroup_size) = self.workgroup_size else {
            return Err(format!("no compute entry point named {:?}", self.entry_point));
        };
        if workgroup_size != [width, 1, 1] {
            return Err(format!(
                "workgroup size is {workgroup_size:?}, expected [{width}, 1, 1]"
            ));
        }
        match self.binding(ACCUMULATOR_BINDING) {
            Some(b) if !b.read_only => {}
            Some(_) => {
                return Err(format!(
                    "accumulator at binding {ACCUMULATOR_BINDING} must be writable"
                ));
            }
            None => {
                return Err(format!(
                    "no storage buffer at set {DESCRIPTOR_SET}, binding {ACCUMULATOR_BINDING}"
                ));
            }
        }
        match self.binding(OFFSETS_BINDING) {
            Some(b) if b.read_only => Ok(()),
            Some(_) => Err(format!(
                "offsets at binding {OFFSETS_BINDING} must be read-only"
            )),
            None => Err(format!(
                "no storage buffer at set {DESCRIPTOR_SET}, binding {OFFSETS_BINDING}"
            )),
        }
    }
}

pub fn reflect(module: &naga::Module, entry_point: &str) -> KernelReflection {
    let workgroup_size = module
        .entry_points
        .iter()
        .find(|ep| ep.name == entry_point && ep.stage == naga::ShaderStage::Compute)
        .map(|ep| ep.workgroup_size);

    let storage_bindings = module
        .global_variables
        .iter()
        .filter_map(|(_, var)| {
            let binding = var.binding.as_ref()?;
            match var.space {
                naga::AddressSpace::Storage { access } => Some(StorageBinding {
                    group: binding.group,
                    binding: binding.binding,
                    read_only: !access.contains(naga::StorageAccess::STORE),
                }),
                _ => None,
            }
        })
        .collect();

    KernelReflection {
        entry_point: entry_point.to_owned(),
        workgroup_size,
        storage_bindings,
    }
}

/// `source` is only used to annotate errors, binary kernels have none.
fn validate(
    module: &naga::Module,
    path: &str,
    source: Option<&str>,
) -> Result<naga::valid::ModuleInfo> {
    Validator::new(ValidationFlags::all(), Capabilities::default())
        .validate(module)
        .map_err(|err| Error::ShaderValidation {
            path: path.to_owned(),
            diagnostic: match source {
                Some(source) => err.emit_to_string(source),
                None => err.as_inner().to_string(),
            },
        })
}

fn read_source(
    path: Option<&Path>,
    embedded: &'static str,
) -> Result<(String, Cow<'static, str>)> {
    match path {
        Some(path) => Ok((path.display().to_string(), Cow::Owned(fs::read_to_string(path)?))),
        None => Ok(("<embedded>".to_owned(), Cow::Borrowed(embedded))),
    }
}

/// The WGSL flavour. Its width is fixed by `@workgroup_size` in the source.
pub struct WgslKernel {
    /// `None` uses the source embedded in `add-shader`.
    pub path: Option<PathBuf>,
}

impl WgslKernel {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl KernelShader for WgslKernel {
    fn workgroup_width(&self) -> u32 {
        add_shader::WIDTH
    }

    fn parse(&self) -> Result<ParsedKernel> {
        let (path, source) = read_source(self.path.as_deref(), add_shader::WGSL_SOURCE)?;
        let module = naga::front::wgsl::parse_str(&source).map_err(|err| Error::ShaderParse {
            path: path.clone(),
            diagnostic: err.emit_to_string(&source),
        })?;
        validate(&module, &path, Some(&source))?;
        debug!(%path, "parsed WGSL kernel");
        Ok(ParsedKernel {
            path,
            module,
            entry_point: ENTRY_POINT.to_owned(),
            source: ModuleSource::Wgsl(source.into_owned()),
        })
    }
}

/// The GLSL flavour. The workgroup size is passed in as `WIDTH`/`HEIGHT`
/// defines, and the kernel is rewritten to WGSL by naga.
pub struct GlslKernel {
    pub path: Option<PathBuf>,
    pub width: u32,
}

impl GlslKernel {
    /// GLSL entry points are always called `main`.
    pub const ENTRY_POINT: &'static str = "main";

    pub fn new(path: Option<PathBuf>, width: u32) -> Self {
        Self { path, width }
    }
}

impl KernelShader for GlslKernel {
    fn workgroup_width(&self) -> u32 {
        self.width
    }

    fn parse(&self) -> Result<ParsedKernel> {
        let (path, source) = read_source(self.path.as_deref(), add_shader::GLSL_SOURCE)?;
        let mut options = naga::front::glsl::Options::from(naga::ShaderStage::Compute);
        options
            .defines
            .insert("WIDTH".to_owned(), self.width.to_string());
        options
            .defines
            .insert("HEIGHT".to_owned(), add_shader::HEIGHT.to_string());

        let module = naga::front::glsl::Frontend::default()
            .parse(&options, &source)
            .map_err(|err| Error::ShaderParse {
                path: path.clone(),
                diagnostic: err.emit_to_string(&source),
            })?;
        let info = validate(&module, &path, Some(&source))?;
        let wgsl = naga::back::wgsl::write_string(
            &module,
            &info,
            naga::back::wgsl::WriterFlags::empty(),
        )
        .map_err(|err| Error::ShaderTranspile {
            path: path.clone(),
            message: err.to_string(),
        })?;
        debug!(%path, width = self.width, "transpiled GLSL kernel to WGSL");
        Ok(ParsedKernel {
            path,
            module,
            entry_point: Self::ENTRY_POINT.to_owned(),
            source: ModuleSource::Wgsl(wgsl),
        })
    }
}

/// A precompiled SPIR-V module, e.g. `add-shader` built with `spirv-builder`
/// for `spirv-unknown-vulkan1.1`.
pub struct SpirvKernel {
    pub path: PathBuf,
}

impl SpirvKernel {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

impl KernelShader for SpirvKernel {
    fn workgroup_width(&self) -> u32 {
        add_shader::WIDTH
    }

    fn parse(&self) -> Result<ParsedKernel> {
        let bytes = fs::read(&self.path)?;
        if !bytes.len().is_multiple_of(4) {
            return Err(Error::InvalidSpirv {
                path: self.path.clone(),
                len: bytes.len(),
            });
        }
        let path = self.path.display().to_string();
        let module = naga::front::spv::parse_u8_slice(&bytes, &naga::front::spv::Options::default())
            .map_err(|err| Error::ShaderParse {
                path: path.clone(),
                diagnostic: err.to_string(),
            })?;
        validate(&module, &path, None)?;
        let words = bytes
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        debug!(%path, "loaded SPIR-V kernel");
        Ok(ParsedKernel {
            path,
            module,
            entry_point: ENTRY_POINT.to_owned(),
            source: ModuleSource::SpirV(words),
        })
    }
}
