//! Headless device setup.
//!
//! The kernel only needs a device and a queue: no surface, no window. The
//! adapter is picked from `WGPU_BACKEND` when set, otherwise from the primary
//! backends, and must support compute shaders.

use crate::error::{Error, Result};
use std::fmt;
use tracing::{debug, info, warn};

pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: wgpu::AdapterInfo,
    /// Whether pass timestamps can be written; GPU timings are skipped otherwise.
    pub timestamping: bool,
}

impl GpuContext {
    /// Blocks on [`Self::new_async`].
    pub fn new() -> Result<Self> {
        futures::executor::block_on(Self::new_async())
    }

    pub async fn new_async() -> Result<Self> {
        let backends = wgpu::Backends::from_env().unwrap_or(wgpu::Backends::PRIMARY);
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await?;
        let adapter_info = adapter.get_info();
        debug!(?adapter_info, "selected adapter");

        let downlevel = adapter.get_downlevel_capabilities();
        if !downlevel
            .flags
            .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS)
        {
            return Err(Error::ComputeUnsupported {
                adapter: adapter_info.name,
            });
        }

        // Timestamping may not be supported
        let timestamping = adapter.features().contains(wgpu::Features::TIMESTAMP_QUERY);
        if !timestamping {
            warn!(
                "Adapter reports that timestamping is not supported - no timing information will be available"
            );
        }
        let required_features = if timestamping {
            wgpu::Features::TIMESTAMP_QUERY
        } else {
            wgpu::Features::empty()
        };

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("add kernel device"),
                required_features,
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: Default::default(),
            })
            .await?;

        info!(
            adapter = %adapter_info.name,
            backend = ?adapter_info.backend,
            "created device"
        );

        Ok(Self {
            device,
            queue,
            adapter_info,
            timestamping,
        })
    }

    pub fn limits(&self) -> ComputeLimits {
        ComputeLimits::from(&self.device.limits())
    }
}

/// The compute limits of a device, the subset that decides how large a
/// workgroup and a dispatch may be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeLimits {
    pub max_workgroups_per_dimension: u32,
    pub max_workgroup_size: [u32; 3],
    pub max_invocations_per_workgroup: u32,
    /// Bytes of workgroup-shared memory.
    pub max_workgroup_storage_size: u32,
}

impl From<&wgpu::Limits> for ComputeLimits {
    fn from(limits: &wgpu::Limits) -> Self {
        Self {
            max_workgroups_per_dimension: limits.max_compute_workgroups_per_dimension,
            max_workgroup_size: [
                limits.max_compute_workgroup_size_x,
                limits.max_compute_workgroup_size_y,
                limits.max_compute_workgroup_size_z,
            ],
            max_invocations_per_workgroup: limits.max_compute_invocations_per_workgroup,
            max_workgroup_storage_size: limits.max_compute_workgroup_storage_size,
        }
    }
}

impl fmt::Display for ComputeLimits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [x, y, z] = self.max_workgroup_size;
        let count = self.max_workgroups_per_dimension;
        writeln!(f, "max workgroups per dispatch: {count}, {count}, {count}")?;
        writeln!(f, "max workgroup size: {x}, {y}, {z}")?;
        writeln!(
            f,
            "max invocations per workgroup: {}",
            self.max_invocations_per_workgroup
        )?;
        write!(
            f,
            "max workgroup storage size: {}",
            self.max_workgroup_storage_size
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_are_taken_from_wgpu() {
        let limits = wgpu::Limits::downlevel_defaults();
        let compute = ComputeLimits::from(&limits);
        assert_eq!(
            compute.max_workgroup_size,
            [
                limits.max_compute_workgroup_size_x,
                limits.max_compute_workgroup_size_y,
                limits.max_compute_workgroup_size_z,
            ]
        );
        assert_eq!(
            compute.max_invocations_per_workgroup,
            limits.max_compute_invocations_per_workgroup
        );
    }

    #[test]
    fn limits_report_one_line_each() {
        let compute = ComputeLimits {
            max_workgroups_per_dimension: 65535,
            max_workgroup_size: [256, 256, 64],
            max_invocations_per_workgroup: 256,
            max_workgroup_storage_size: 16384,
        };
        let report = compute.to_string();
        assert_eq!(report.lines().count(), 4);
        assert!(report.contains("max workgroup size: 256, 256, 64"));
        assert!(report.contains("max workgroup storage size: 16384"));
    }
}
