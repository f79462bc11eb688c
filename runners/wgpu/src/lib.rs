// BEGIN - Embark standard lints v0.4
// do not change or add/remove here, but one can add exceptions after this section
// for more info see: <https://github.com/EmbarkStudios/rust-ecosystem/issues/59>
#![deny(unsafe_code)]
#![warn(
    clippy::all,
    clippy::await_holding_lock,
    clippy::char_lit_as_u8,
    clippy::checked_conversions,
    clippy::dbg_macro,
    clippy::debug_assert_with_mut_call,
    clippy::doc_markdown,
    clippy::empty_enum,
    clippy::enum_glob_use,
    clippy::exit,
    clippy::expl_impl_clone_on_copy,
    clippy::explicit_deref_methods,
    clippy::explicit_into_iter_loop,
    clippy::fallible_impl_from,
    clippy::filter_map_next,
    clippy::float_cmp_const,
    clippy::fn_params_excessive_bools,
    clippy::if_let_mutex,
    clippy::implicit_clone,
    clippy::imprecise_flops,
    clippy::inefficient_to_string,
    clippy::invalid_upcast_comparisons,
    clippy::large_types_passed_by_value,
    clippy::let_unit_value,
    clippy::linkedlist,
    clippy::lossy_float_literal,
    clippy::macro_use_imports,
    clippy::manual_ok_or,
    clippy::map_err_ignore,
    clippy::map_flatten,
    clippy::map_unwrap_or,
    clippy::match_same_arms,
    clippy::match_wildcard_for_single_variants,
    clippy::mem_forget,
    clippy::mut_mut,
    clippy::mutex_integer,
    clippy::needless_borrow,
    clippy::needless_continue,
    clippy::option_option,
    clippy::path_buf_push_overwrite,
    clippy::ptr_as_ptr,
    clippy::ref_option_ref,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::same_functions_in_if_condition,
    clippy::semicolon_if_nothing_returned,
    clippy::string_add_assign,
    clippy::string_add,
    clippy::string_lit_as_bytes,
    clippy::string_to_string,
    clippy::todo,
    clippy::trait_duplication_in_bounds,
    clippy::unimplemented,
    clippy::unnested_or_patterns,
    clippy::unused_self,
    clippy::useless_transmute,
    clippy::verbose_file_reads,
    clippy::zero_sized_map_values,
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms
)]
// END - Embark standard lints v0.4
// crate-specific exceptions:
// #![allow()]

//! Headless host harness for the add kernel.
//!
//! The harness packs a message into `i32` lanes, binds it as the accumulator
//! (binding 5) next to the offsets (binding 6), dispatches one workgroup per
//! run and reads the sums back. With the default inputs `"Hello "` turns into
//! `"World!"`.

use add_shader::cpu;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use strum::{Display, EnumString};
use tracing::{info, warn};

pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod message;
pub mod shader;
pub mod verify;

pub use config::RunConfig;
pub use context::{ComputeLimits, GpuContext};
pub use dispatch::AddPipeline;
pub use error::{Error, Result};
pub use shader::{GlslKernel, KernelShader, SpirvKernel, WgslKernel};

/// Which flavour of the kernel runs the addition.
#[derive(
    Debug, EnumString, Display, PartialEq, Eq, Copy, Clone, ValueEnum, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum KernelKind {
    Wgsl,
    Glsl,
    Spirv,
    /// The rayon reference; no GPU involved.
    Cpu,
}

#[derive(Parser, Clone, Debug, Default)]
#[command(about = "Adds offsets onto a message on the GPU")]
pub struct Options {
    /// which kernel to run
    #[arg(short, long)]
    pub kernel: Option<KernelKind>,

    /// kernel source or SPIR-V binary to load instead of the embedded one
    #[arg(long)]
    pub shader_path: Option<PathBuf>,

    /// text packed into the accumulator, one byte per lane
    #[arg(short, long)]
    pub message: Option<String>,

    /// offsets added to each lane, zero-padded to the width
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub offsets: Option<Vec<i32>>,

    /// invocations per workgroup; only the glsl and cpu kernels can change it
    #[arg(short, long)]
    pub width: Option<u32>,

    /// how many times the kernel runs over the same buffers
    #[arg(short = 'n', long)]
    pub dispatches: Option<u32>,

    /// JSON run configuration; flags given on the command line override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// write the final accumulator as little-endian i32 to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// cross-check the result against the CPU reference
    #[arg(long)]
    pub verify: bool,

    /// print the device compute limits
    #[arg(long)]
    pub print_limits: bool,
}

impl Options {
    /// The run configuration: the config file (or the defaults) with the
    /// flags that were given layered on top.
    pub fn resolve(&self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_path(path)?,
            None => RunConfig::default(),
        };
        if let Some(kernel) = self.kernel {
            config.kernel = kernel;
        }
        if let Some(path) = &self.shader_path {
            config.shader_path = Some(path.clone());
        }
        if let Some(message) = &self.message {
            config.message.clone_from(message);
        }
        if let Some(offsets) = &self.offsets {
            config.offsets.clone_from(offsets);
        }
        if let Some(width) = self.width {
            config.width = width;
        }
        if let Some(dispatches) = self.dispatches {
            config.dispatches = dispatches;
        }
        if let Some(output) = &self.output {
            config.output_path = Some(output.clone());
        }
        config.verify |= self.verify;
        Ok(config)
    }
}

/// The message before and after the kernel ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub before: String,
    pub after: String,
    pub accumulator: Vec<i32>,
}

fn kernel_for(config: &RunConfig) -> Result<Box<dyn KernelShader>> {
    let fixed_width = |kind: KernelKind| {
        if config.width == add_shader::WIDTH {
            Ok(())
        } else {
            Err(Error::Config {
                msg: format!(
                    "the {kind} kernel is {} wide, width {} needs the glsl or cpu kernel",
                    add_shader::WIDTH,
                    config.width
                ),
            })
        }
    };
    Ok(match config.kernel {
        KernelKind::Wgsl => {
            fixed_width(KernelKind::Wgsl)?;
            Box::new(WgslKernel::new(config.shader_path.clone()))
        }
        KernelKind::Glsl => Box::new(GlslKernel::new(config.shader_path.clone(), config.width)),
        KernelKind::Spirv => {
            fixed_width(KernelKind::Spirv)?;
            let path = config.shader_path.clone().ok_or_else(|| Error::Config {
                msg: "the spirv kernel needs --shader-path".to_owned(),
            })?;
            Box::new(SpirvKernel::new(path))
        }
        KernelKind::Cpu => {
            return Err(Error::Config {
                msg: "the cpu kernel has no shader".to_owned(),
            });
        }
    })
}

/// Runs the kernel as configured. `print_limits` prints the device limits to
/// stdout before dispatching.
pub fn run(config: &RunConfig, print_limits: bool) -> Result<Outcome> {
    if config.width == 0 {
        return Err(Error::Config {
            msg: "width must be at least 1".to_owned(),
        });
    }
    let width = config.width as usize;
    let initial = message::pack(&config.message, width)?;
    let offsets = message::pad_lanes(&config.offsets, width)?;
    let mut accumulator = initial.clone();

    info!(
        kernel = %config.kernel,
        width,
        dispatches = config.dispatches,
        "running add kernel"
    );
    if config.dispatches == 0 {
        return Err(Error::NoDispatches);
    }
    match config.kernel {
        KernelKind::Cpu => {
            if print_limits {
                warn!("the cpu kernel has no device limits to print");
            }
            for _ in 0..config.dispatches {
                cpu::dispatch(&mut accumulator, &offsets)?;
            }
        }
        _ => {
            let kernel = kernel_for(config)?;
            let ctx = GpuContext::new()?;
            let limits = ctx.limits();
            info!(?limits, "device compute limits");
            if print_limits {
                println!("{limits}");
            }
            dispatch::check_launch(kernel.workgroup_width(), &limits, config.dispatches)?;
            let pipeline = AddPipeline::new(&ctx, kernel.as_ref())?;
            pipeline.dispatch(&ctx, &mut accumulator, &offsets, config.dispatches)?;
        }
    }

    if config.verify {
        let mut expected = initial.clone();
        for _ in 0..config.dispatches {
            cpu::dispatch(&mut expected, &offsets)?;
        }
        let diffs = verify::compare(&expected, &accumulator);
        if !diffs.is_empty() {
            return Err(Error::DifferingOutput(verify::format_table(
                &diffs,
                "CPU",
                &config.kernel.to_string().to_uppercase(),
            )));
        }
        info!("result matches the CPU reference");
    }

    if let Some(output_path) = &config.output_path {
        let metadata = crate::config::OutputMetadata {
            output_type: crate::config::OutputType::I32,
            width: config.width,
            dispatches: config.dispatches,
        };
        crate::config::write_output(output_path, &accumulator, &metadata)?;
        info!(path = %output_path.display(), "wrote output");
    }

    Ok(Outcome {
        before: message::unpack(&initial),
        after: message::unpack(&accumulator),
        accumulator,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, tempdir};

    #[test]
    fn defaults_say_hello() {
        let config = Options::default().resolve().unwrap();
        assert_eq!(config, RunConfig::default());
        assert_eq!(config.kernel, KernelKind::Wgsl);
        assert_eq!(config.message, "Hello ");
    }

    #[test]
    fn flags_override_the_config_file() {
        let mut tmp = NamedTempFile::new().unwrap();
        write!(tmp, r#"{{ "kernel": "glsl", "dispatches": 3, "message": "abc" }}"#).unwrap();
        let options = Options::parse_from([
            "add-runner-wgpu",
            "--config",
            tmp.path().to_str().unwrap(),
            "-n",
            "2",
            "--offsets",
            "-1,2,-3",
        ]);
        let config = options.resolve().unwrap();
        assert_eq!(config.kernel, KernelKind::Glsl);
        assert_eq!(config.dispatches, 2);
        assert_eq!(config.message, "abc");
        assert_eq!(config.offsets, [-1, 2, -3]);
    }

    #[test]
    fn kernel_names_parse() {
        assert_eq!("spirv".parse::<KernelKind>().unwrap(), KernelKind::Spirv);
        assert_eq!(KernelKind::Cpu.to_string(), "cpu");
    }

    #[test]
    fn cpu_run_says_world() {
        let config = RunConfig {
            kernel: KernelKind::Cpu,
            verify: true,
            ..Default::default()
        };
        let outcome = run(&config, false).unwrap();
        assert_eq!(outcome.before, "Hello ");
        assert_eq!(outcome.after, "World!");
    }

    #[test]
    fn cpu_run_with_a_single_lane() {
        let config = RunConfig {
            kernel: KernelKind::Cpu,
            message: "A".to_owned(),
            offsets: vec![1],
            width: 1,
            dispatches: 2,
            ..Default::default()
        };
        let outcome = run(&config, false).unwrap();
        assert_eq!(outcome.accumulator, [67]);
        assert_eq!(outcome.after, "C");
    }

    #[test]
    fn cpu_run_writes_output() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("out.bin");
        let config = RunConfig {
            kernel: KernelKind::Cpu,
            output_path: Some(output.clone()),
            ..Default::default()
        };
        run(&config, false).unwrap();
        let bytes = std::fs::read(&output).unwrap();
        assert_eq!(bytes.len(), 16 * 4);
        assert_eq!(&bytes[..4], &i32::from(b'W').to_le_bytes());
        assert!(crate::config::metadata_path(&output).exists());
    }

    #[test]
    fn zero_dispatches_are_rejected() {
        // Refused before a device is requested, so this holds without a GPU.
        for kernel in [KernelKind::Cpu, KernelKind::Wgsl, KernelKind::Glsl] {
            let config = RunConfig {
                kernel,
                dispatches: 0,
                ..Default::default()
            };
            assert!(matches!(run(&config, false), Err(Error::NoDispatches)));
        }
    }

    #[test]
    fn zero_width_is_rejected() {
        let config = RunConfig {
            kernel: KernelKind::Cpu,
            width: 0,
            message: String::new(),
            offsets: vec![],
            ..Default::default()
        };
        assert!(matches!(run(&config, false), Err(Error::Config { .. })));
    }

    #[test]
    fn fixed_width_kernels_reject_other_widths() {
        let config = RunConfig {
            width: 8,
            ..Default::default()
        };
        assert!(matches!(kernel_for(&config), Err(Error::Config { .. })));
    }

    #[test]
    fn spirv_kernel_needs_a_path() {
        let config = RunConfig {
            kernel: KernelKind::Spirv,
            ..Default::default()
        };
        assert!(matches!(kernel_for(&config), Err(Error::Config { .. })));
    }
}
