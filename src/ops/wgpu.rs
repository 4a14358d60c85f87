//! GPU-accelerated array storage using WGPU.
//!
//! Arrays on this backend live in device buffers as `f32`. Every elementwise
//! kernel runs through one precompiled WGSL shader (`shaders/elementwise.wgsl`)
//! that switches on an opcode; contractions and last-axis slicing round-trip
//! through the host backend.
//!
//! The device is initialised lazily on first use. If no adapter is available
//! every operation fails with [`GpuFailure`] instead of panicking.

use crate::array::Array;
use crate::backend::{ArrayBackend, Backend};
use crate::einsum::ContractionPlan;
use crate::error::{Error, Result};
use crate::ops::cpu::CpuBackend;
use crate::ops::kernel::{BinaryKernel, UnaryKernel};
use crate::storage::Storage;
use briny::prelude::*;
use std::rc::Rc;
use std::sync::mpsc;
use wgpu::util::DeviceExt;

const ELEMENTWISE: &str = include_str!("shaders/elementwise.wgsl");

const WORKGROUP_SIZE: u32 = 64;
const MAX_GROUPS_PER_DIM: u32 = 65_535;

/// Basic wrapper for common GPU errors.
#[derive(Debug)]
pub enum GpuError {
    /// An error in requesting the adapter.
    Adapter(wgpu::RequestAdapterError),
    /// An error in requesting the GPU (device).
    Device(wgpu::RequestDeviceError),
}

impl std::fmt::Display for GpuError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpuError::Adapter(e) => write!(f, "Adapter error: {e}"),
            GpuError::Device(e) => write!(f, "Device error: {e}"),
        }
    }
}

/// Wrapper for a `GpuError` or `ValidationError` depending on how it fails.
#[derive(Debug)]
pub enum GpuFailureKind {
    Gpu(GpuError),
    Validation(ValidationError),
}

impl std::fmt::Display for GpuFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpuFailureKind::Gpu(err) => write!(f, "GPU error: {err}"),
            GpuFailureKind::Validation(err) => write!(f, "Validation error: {err}"),
        }
    }
}

/// A type of error closely related to the GPU.
#[derive(Debug)]
pub struct GpuFailure {
    pub kind: Option<GpuFailureKind>,
    pub message: Option<String>,
}

impl From<GpuError> for GpuFailure {
    fn from(kind: GpuError) -> Self {
        Self {
            kind: Some(GpuFailureKind::Gpu(kind)),
            message: None,
        }
    }
}

impl From<ValidationError> for GpuFailure {
    fn from(kind: ValidationError) -> Self {
        Self {
            kind: Some(GpuFailureKind::Validation(kind)),
            message: None,
        }
    }
}

impl From<&str> for GpuFailure {
    fn from(msg: &str) -> Self {
        Self {
            kind: None,
            message: Some(msg.to_string()),
        }
    }
}

impl From<String> for GpuFailure {
    fn from(msg: String) -> Self {
        Self {
            kind: None,
            message: Some(msg),
        }
    }
}

impl std::fmt::Display for GpuFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if let Some(kind) = &self.kind {
            write!(f, "GPU failure: {kind}")
        } else if let Some(msg) = &self.message {
            write!(f, "GPU failure: {msg}")
        } else {
            write!(f, "Unknown GPU failure")
        }
    }
}

impl std::error::Error for GpuFailure {}

/// Holds the WGPU device and queue used for executing compute pipelines.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Selects the default adapter and creates a device and queue.
    ///
    /// Uses `pollster::block_on` to wait for the asynchronous WGPU calls.
    pub fn new() -> std::result::Result<Self, GpuError> {
        let instance = wgpu::Instance::default();
        let adapter =
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))
                .map_err(GpuError::Adapter)?;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: None,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))
        .map_err(GpuError::Device)?;

        Ok(Self { device, queue })
    }
}

/// Secure wrapper for WGSL source code extracted from files.
pub struct WgslSource<'a>(pub &'a str);

impl<'a> Validate for WgslSource<'a> {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        let src = self.0;

        if src.len() > 65536 {
            return Err(ValidationError);
        }

        if !src.contains("fn main") {
            return Err(ValidationError);
        }

        if src.contains("import") || src.contains("#include") {
            return Err(ValidationError);
        }

        let forbidden = ["asm", "unsafe", "ptr", "std::"];
        if forbidden.iter().any(|bad| src.contains(bad)) {
            return Err(ValidationError);
        }

        Ok(())
    }
}

/// Validates a WGSL shader and compiles it on `device`.
pub fn load_shader(
    device: &wgpu::Device,
    label: &str,
    source: &str,
) -> std::result::Result<wgpu::ShaderModule, GpuFailure> {
    WgslSource(source).validate()?;

    Ok(device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    }))
}

/// The elementwise pipeline and the layout its bind groups follow.
struct ElementwisePipeline {
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl ElementwisePipeline {
    fn new(ctx: &GpuContext) -> std::result::Result<Self, GpuFailure> {
        let device = &ctx.device;
        let module = load_shader(device, "elementwise", ELEMENTWISE)?;
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("elementwise_bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, false),
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("elementwise_pipeline_layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("elementwise_pipeline"),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            cache: None,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        });
        Ok(Self { layout, pipeline })
    }
}

lazy_static::lazy_static! {
    static ref GPU_CONTEXT: std::result::Result<GpuContext, String> =
        GpuContext::new().map_err(|e| e.to_string());
    static ref ELEMENTWISE_PIPELINE: std::result::Result<ElementwisePipeline, String> =
        match &*GPU_CONTEXT {
            Ok(ctx) => ElementwisePipeline::new(ctx).map_err(|e| e.to_string()),
            Err(e) => Err(e.clone()),
        };
}

fn context() -> std::result::Result<&'static GpuContext, GpuFailure> {
    GPU_CONTEXT.as_ref().map_err(|e| GpuFailure::from(e.as_str()))
}

fn elementwise() -> std::result::Result<&'static ElementwisePipeline, GpuFailure> {
    ELEMENTWISE_PIPELINE
        .as_ref()
        .map_err(|e| GpuFailure::from(e.as_str()))
}

fn as_bytes<T: Copy>(data: &[T]) -> &[u8] {
    let len = std::mem::size_of_val(data);
    unsafe { std::slice::from_raw_parts(data.as_ptr() as *const u8, len) }
}

fn bytes_to_f32_slice(data: &[u8]) -> std::result::Result<&[f32], &'static str> {
    use std::mem::{align_of, size_of};

    if data.as_ptr() as usize % align_of::<f32>() != 0 {
        return Err("unaligned buffer");
    }

    if data.len() % size_of::<f32>() != 0 {
        return Err("buffer length is not a multiple of f32");
    }

    let len = data.len() / size_of::<f32>();
    let ptr = data.as_ptr() as *const f32;
    unsafe { Ok(std::slice::from_raw_parts(ptr, len)) }
}

/// An `f32` device buffer together with its logical shape.
#[derive(Debug)]
pub struct DeviceArray {
    buffer: wgpu::Buffer,
    shape: Vec<usize>,
}

impl DeviceArray {
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn device_array(storage: &Storage) -> Result<&DeviceArray> {
    match storage {
        Storage::Device(array) => Ok(array.as_ref()),
        Storage::Host(_) => Err(Error::BackendMismatch {
            lhs: Backend::Wgpu,
            rhs: Backend::Cpu,
        }),
    }
}

/// Zero-length buffers cannot be bound, so every buffer holds at least one
/// element.
fn buffer_size(len: usize) -> u64 {
    (len.max(1) * std::mem::size_of::<f32>()) as u64
}

fn upload(ctx: &GpuContext, shape: Vec<usize>, data: &[f64]) -> DeviceArray {
    let mut values: Vec<f32> = data.iter().map(|&v| v as f32).collect();
    if values.is_empty() {
        values.push(0.0);
    }
    let buffer = ctx
        .device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("array"),
            contents: as_bytes(&values),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
        });
    DeviceArray { buffer, shape }
}

fn empty(ctx: &GpuContext, shape: Vec<usize>) -> DeviceArray {
    let len = shape.iter().product();
    let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("output"),
        size: buffer_size(len),
        usage: wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    DeviceArray { buffer, shape }
}

fn download(ctx: &GpuContext, array: &DeviceArray) -> std::result::Result<Vec<f64>, GpuFailure> {
    let len = array.len();
    if len == 0 {
        return Ok(Vec::new());
    }
    let size = buffer_size(len);
    let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("staging"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("download_encoder"),
        });
    encoder.copy_buffer_to_buffer(&array.buffer, 0, &staging, 0, size);
    ctx.queue.submit(Some(encoder.finish()));

    let (tx, rx) = mpsc::channel();
    let slice = staging.slice(..);
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    ctx.device
        .poll(wgpu::PollType::Wait)
        .map_err(|e| GpuFailure::from(e.to_string()))?;
    rx.recv()
        .map_err(|e| GpuFailure::from(e.to_string()))?
        .map_err(|e| GpuFailure::from(e.to_string()))?;

    let view = slice.get_mapped_range();
    let data = bytes_to_f32_slice(&view)?[..len]
        .iter()
        .map(|&v| v as f64)
        .collect();
    drop(view);
    staging.unmap();
    Ok(data)
}

fn run_elementwise(
    lhs: &DeviceArray,
    rhs: &DeviceArray,
    out_shape: Vec<usize>,
    opcode: u32,
    scalar: f64,
) -> std::result::Result<DeviceArray, GpuFailure> {
    let ctx = context()?;
    let pipeline = elementwise()?;
    let out = empty(ctx, out_shape);
    let len = out.len();
    if len == 0 {
        return Ok(out);
    }

    // Matches `Params` in the shader: four u32 then the scalar, padded to 32 bytes.
    let params: [u32; 8] = [
        opcode,
        len as u32,
        lhs.len().max(1) as u32,
        rhs.len().max(1) as u32,
        (scalar as f32).to_bits(),
        0,
        0,
        0,
    ];
    let params_buffer = ctx
        .device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("params"),
            contents: as_bytes(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

    let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("elementwise_bind_group"),
        layout: &pipeline.layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: params_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: lhs.buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: rhs.buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: out.buffer.as_entire_binding(),
            },
        ],
    });

    let groups = (len as u32).div_ceil(WORKGROUP_SIZE);
    let (x, y) = if groups > MAX_GROUPS_PER_DIM {
        (MAX_GROUPS_PER_DIM, groups.div_ceil(MAX_GROUPS_PER_DIM))
    } else {
        (groups, 1)
    };

    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("elementwise_encoder"),
        });
    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("elementwise_pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&pipeline.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(x, y, 1);
    }
    ctx.queue.submit(Some(encoder.finish()));

    Ok(out)
}

fn store(array: DeviceArray) -> Storage {
    Storage::Device(Rc::new(array))
}

/// Accelerator backend singleton.
#[derive(Debug, Clone, Copy, Default)]
pub struct WgpuBackend;

impl WgpuBackend {
    fn host_data(&self, storage: &Storage) -> Result<(Vec<usize>, Vec<f64>)> {
        let array = device_array(storage)?;
        Ok((array.shape.clone(), download(context()?, array)?))
    }

    fn upload_parts(&self, shape: Vec<usize>, data: &[f64]) -> Result<Storage> {
        Ok(store(upload(context()?, shape, data)))
    }
}

impl ArrayBackend for WgpuBackend {
    fn kind(&self) -> Backend {
        Backend::Wgpu
    }

    fn allocate(&self, array: Array) -> Result<Storage> {
        let (shape, data) = array.into_parts();
        self.upload_parts(shape, &data)
    }

    fn to_host(&self, storage: &Storage) -> Result<Array> {
        let (shape, data) = self.host_data(storage)?;
        Ok(Array::from_raw_parts(shape, data))
    }

    fn map(&self, input: &Storage, kernel: UnaryKernel) -> Result<Storage> {
        let array = device_array(input)?;
        let (opcode, scalar) = kernel.opcode();
        let out = run_elementwise(array, array, array.shape.clone(), opcode, scalar)?;
        Ok(store(out))
    }

    fn zip(
        &self,
        lhs: &Storage,
        rhs: &Storage,
        out_shape: &[usize],
        kernel: BinaryKernel,
    ) -> Result<Storage> {
        let (a, b) = (device_array(lhs)?, device_array(rhs)?);
        let out = run_elementwise(a, b, out_shape.to_vec(), kernel.opcode(), 0.0)?;
        Ok(store(out))
    }

    fn contract(&self, plan: &ContractionPlan, operands: &[&Storage]) -> Result<Storage> {
        let downloaded = operands
            .iter()
            .map(|s| self.host_data(s).map(|(_, data)| data))
            .collect::<Result<Vec<_>>>()?;
        let slices: Vec<&[f64]> = downloaded.iter().map(Vec::as_slice).collect();
        let data = CpuBackend::contract_slices(plan, &slices);
        self.upload_parts(plan.out_shape().to_vec(), &data)
    }

    fn slice_last_axis(&self, input: &Storage, start: usize, end: usize) -> Result<Storage> {
        let (shape, data) = self.host_data(input)?;
        let (shape, data) = CpuBackend::slice_last_axis_slice(&data, &shape, start, end);
        self.upload_parts(shape, &data)
    }

    fn concat_last_axis(&self, parts: &[&Storage]) -> Result<Storage> {
        let downloaded = parts
            .iter()
            .map(|s| self.host_data(s))
            .collect::<Result<Vec<_>>>()?;
        let views: Vec<(&[usize], &[f64])> = downloaded
            .iter()
            .map(|(shape, data)| (shape.as_slice(), data.as_slice()))
            .collect();
        let (shape, data) = CpuBackend::concat_last_axis_slices(&views);
        self.upload_parts(shape, &data)
    }
}
