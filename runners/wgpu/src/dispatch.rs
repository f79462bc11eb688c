use crate::context::{ComputeLimits, GpuContext};
use crate::error::{Error, Result};
use crate::shader::KernelShader;
use add_shader::{ACCUMULATOR_BINDING, OFFSETS_BINDING};
use std::time::Duration;
use tracing::{debug, info};
use wgpu::util::DeviceExt;

const LANE_SIZE: wgpu::BufferAddress = size_of::<i32>() as wgpu::BufferAddress;

/// A compiled add kernel bound to the fixed slot layout.
pub struct AddPipeline {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    width: u32,
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: wgpu::BufferSize::new(LANE_SIZE),
        },
        count: None,
    }
}

/// Checks that the device can run one workgroup `width` invocations wide,
/// `times` times over.
pub fn check_launch(width: u32, limits: &ComputeLimits, times: u32) -> Result<()> {
    let limit = limits.max_workgroup_size[0].min(limits.max_invocations_per_workgroup);
    if width > limit {
        return Err(Error::WorkgroupTooLarge { width, limit });
    }
    if times == 0 {
        return Err(Error::NoDispatches);
    }
    Ok(())
}

/// Checks what the kernel itself never checks: both buffers cover exactly
/// one workgroup, and the device can run a workgroup that wide.
pub fn check_host_contract(
    width: u32,
    limits: &ComputeLimits,
    accumulator_len: usize,
    offsets_len: usize,
    times: u32,
) -> Result<()> {
    if accumulator_len != offsets_len {
        return Err(Error::LengthMismatch {
            accumulator: accumulator_len,
            offsets: offsets_len,
        });
    }
    if accumulator_len != width as usize {
        return Err(Error::WidthMismatch {
            len: accumulator_len,
            width,
        });
    }
    check_launch(width, limits, times)
}

/// Converts a begin/end timestamp pair into wall time.
fn elapsed(begin: u64, end: u64, period: f32) -> Duration {
    Duration::from_nanos((end.saturating_sub(begin) as f64 * f64::from(period)) as u64)
}

struct Timestamps {
    queries: wgpu::QuerySet,
    resolve: wgpu::Buffer,
    readback: wgpu::Buffer,
}

impl Timestamps {
    fn new(device: &wgpu::Device) -> Self {
        let size = 2 * wgpu::QUERY_SIZE as wgpu::BufferAddress;
        Self {
            queries: device.create_query_set(&wgpu::QuerySetDescriptor {
                label: Some("Dispatch timestamps"),
                count: 2,
                ty: wgpu::QueryType::Timestamp,
            }),
            resolve: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Timestamps buffer"),
                size,
                usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            }),
            readback: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Timestamps readback"),
                size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
        }
    }
}

type Mapped = futures::channel::oneshot::Receiver<std::result::Result<(), wgpu::BufferAsyncError>>;

fn map_read(slice: wgpu::BufferSlice<'_>) -> Mapped {
    let (sender, receiver) = futures::channel::oneshot::channel();
    slice.map_async(wgpu::MapMode::Read, move |res| {
        let _ = sender.send(res);
    });
    receiver
}

fn wait_mapped(receiver: Mapped) -> Result<()> {
    futures::executor::block_on(receiver).map_err(|_| Error::MapCanceled)??;
    Ok(())
}

impl AddPipeline {
    /// Compiles `kernel`, refusing workgroups the device cannot run before
    /// anything reaches the device.
    pub fn new(ctx: &GpuContext, kernel: &dyn KernelShader) -> Result<Self> {
        check_launch(kernel.workgroup_width(), &ctx.limits(), 1)?;
        let device = &ctx.device;
        let (module, entry_point) = kernel.create_module(device)?;

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Add bind group layout"),
            entries: &[
                storage_entry(ACCUMULATOR_BINDING, false),
                storage_entry(OFFSETS_BINDING, true),
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Add pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Add pipeline"),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: entry_point.as_deref(),
            compilation_options: Default::default(),
            cache: None,
        });

        Ok(Self {
            pipeline,
            bind_group_layout,
            width: kernel.workgroup_width(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    /// Runs the kernel `times` times over the same buffers and writes the
    /// final sums back into `accumulator`. The accumulator stays on the GPU
    /// between runs, so the offsets are added `times` times.
    ///
    /// Returns the GPU time spent, when the device can measure it.
    pub fn dispatch(
        &self,
        ctx: &GpuContext,
        accumulator: &mut [i32],
        offsets: &[i32],
        times: u32,
    ) -> Result<Option<Duration>> {
        check_host_contract(
            self.width,
            &ctx.limits(),
            accumulator.len(),
            offsets.len(),
            times,
        )?;
        let device = &ctx.device;
        let size = accumulator.len() as wgpu::BufferAddress * LANE_SIZE;

        let accumulator_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Accumulator"),
            contents: bytemuck::cast_slice(accumulator),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        });
        let offsets_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Offsets"),
            contents: bytemuck::cast_slice(offsets),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Staging Buffer"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Add bind group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: ACCUMULATOR_BINDING,
                    resource: accumulator_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: OFFSETS_BINDING,
                    resource: offsets_buffer.as_entire_binding(),
                },
            ],
        });

        let timestamps = ctx.timestamping.then(|| Timestamps::new(device));

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Add encoder"),
        });
        for pass in 0..times {
            let first = pass == 0;
            let last = pass + 1 == times;
            // Only the first and last pass bracket the measurement.
            let timestamp_writes = timestamps
                .as_ref()
                .filter(|_| first || last)
                .map(|t| wgpu::ComputePassTimestampWrites {
                    query_set: &t.queries,
                    beginning_of_pass_write_index: first.then_some(0),
                    end_of_pass_write_index: last.then_some(1),
                });
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Add pass"),
                timestamp_writes,
            });
            cpass.set_pipeline(&self.pipeline);
            cpass.set_bind_group(0, &bind_group, &[]);
            // A single workgroup of `width` invocations covers the buffers exactly.
            cpass.dispatch_workgroups(1, 1, 1);
        }
        debug!(width = self.width, times, "recorded dispatches");

        encoder.copy_buffer_to_buffer(&accumulator_buffer, 0, &staging_buffer, 0, size);
        if let Some(t) = &timestamps {
            encoder.resolve_query_set(&t.queries, 0..2, &t.resolve, 0);
            encoder.copy_buffer_to_buffer(&t.resolve, 0, &t.readback, 0, t.resolve.size());
        }
        ctx.queue.submit(Some(encoder.finish()));

        let staging_slice = staging_buffer.slice(..);
        let accumulator_mapped = map_read(staging_slice);
        let timestamps_mapped = timestamps.as_ref().map(|t| map_read(t.readback.slice(..)));
        device.poll(wgpu::PollType::Wait)?;

        wait_mapped(accumulator_mapped)?;
        {
            let data = staging_slice.get_mapped_range();
            accumulator.copy_from_slice(bytemuck::cast_slice(&data[..]));
        }
        staging_buffer.unmap();

        let gpu_time = match (timestamps, timestamps_mapped) {
            (Some(t), Some(mapped)) => {
                wait_mapped(mapped)?;
                let ticks: Vec<u64> = {
                    let data = t.readback.slice(..).get_mapped_range();
                    bytemuck::cast_slice(&data[..]).to_vec()
                };
                t.readback.unmap();
                let took = elapsed(ticks[0], ticks[1], ctx.queue.get_timestamp_period());
                info!("Took: {took:?}");
                Some(took)
            }
            _ => None,
        };
        Ok(gpu_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ComputeLimits {
        ComputeLimits {
            max_workgroups_per_dimension: 65535,
            max_workgroup_size: [256, 256, 64],
            max_invocations_per_workgroup: 256,
            max_workgroup_storage_size: 16384,
        }
    }

    #[test]
    fn matching_buffers_pass() {
        check_host_contract(16, &limits(), 16, 16, 1).unwrap();
        check_host_contract(1, &limits(), 1, 1, 3).unwrap();
    }

    #[test]
    fn mismatched_buffers_fail() {
        let err = check_host_contract(16, &limits(), 16, 15, 1).unwrap_err();
        assert!(matches!(
            err,
            Error::LengthMismatch {
                accumulator: 16,
                offsets: 15
            }
        ));
    }

    #[test]
    fn buffers_must_match_the_workgroup() {
        let err = check_host_contract(16, &limits(), 8, 8, 1).unwrap_err();
        assert!(matches!(err, Error::WidthMismatch { len: 8, width: 16 }));
    }

    #[test]
    fn workgroup_must_fit_the_device() {
        let mut small = limits();
        small.max_invocations_per_workgroup = 8;
        let err = check_host_contract(16, &small, 16, 16, 1).unwrap_err();
        assert!(matches!(err, Error::WorkgroupTooLarge { width: 16, limit: 8 }));
    }

    #[test]
    fn zero_dispatches_fail() {
        let err = check_host_contract(16, &limits(), 16, 16, 0).unwrap_err();
        assert!(matches!(err, Error::NoDispatches));
    }

    #[test]
    fn launch_is_checked_without_buffers() {
        check_launch(256, &limits(), 1).unwrap();
        let err = check_launch(2048, &limits(), 1).unwrap_err();
        assert!(matches!(
            err,
            Error::WorkgroupTooLarge {
                width: 2048,
                limit: 256
            }
        ));
        assert!(matches!(
            check_launch(16, &limits(), 0).unwrap_err(),
            Error::NoDispatches
        ));
    }

    #[test]
    fn timestamps_scale_by_period() {
        assert_eq!(elapsed(100, 300, 2.0), Duration::from_nanos(400));
        assert_eq!(elapsed(300, 100, 1.0), Duration::ZERO);
    }
}
