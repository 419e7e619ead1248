//! The scene build pipeline and the per-frame trace dispatch.
//!
//! Building runs as a series of blocking one-shot submissions: geometry,
//! materials and lights are staged into device-local buffers, the
//! acceleration structures are built over them, and the shader binding
//! tables are filled from the pipeline's group handles. After that the
//! per-frame path only writes one constants region and records one
//! dispatch plus the copy into the swapchain image.

pub mod pipeline;
pub mod slots;

use std::sync::{Arc, Mutex};

use anyhow::Result;
use ash::vk;
use gpu_allocator::vulkan::Allocator;
use gpu_allocator::MemoryLocation;

use crate::loader::LoadedScene;
use crate::shader_types::{MaterialPbr, PointLight, SceneConstants, Vertex};
use crate::utility::aligned_size_u64;
use crate::vulkan::acceleration_structure::{
    self, AccelerationStructure, AccelerationStructureBuildError,
};
use crate::vulkan::buffer::Buffer;
use crate::vulkan::command_buffer::OneTimeCommands;
use crate::vulkan::command_pool::CommandPool;
use crate::vulkan::context::Context;
use crate::vulkan::descriptor_set::{DescriptorSet, WriteDescriptorSet};
use crate::vulkan::image::{self, Image};
use crate::vulkan::image_view::ImageView;
use crate::vulkan::shader_binding_table::ShaderBindingTables;

use self::pipeline::RaytracingPipeline;
use self::slots::{GeometrySlots, SlotTable};

/// Frames in flight; also the number of regions in the constants buffer.
pub const FRAME_COUNT: usize = 3;

const OUTPUT_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// The GPU-side buffers of one geometry object and the descriptor slots
/// they were assigned.
struct GeometryBuffers {
    index_buffer: Buffer<u32>,
    index_count: u32,
    vertex_buffer: Buffer<Vertex>,
    vertex_count: u32,
    material_index_buffer: Buffer<i32>,
    slots: GeometrySlots,
}

struct OutputTarget {
    image: Arc<Image>,
    view: ImageView,
    extent: vk::Extent2D,
}

pub struct Renderer {
    context: Arc<Context>,
    allocator: Arc<Mutex<Allocator>>,
    command_pool: CommandPool,

    pipeline: RaytracingPipeline,

    // Referenced by the scene descriptor set and the TLAS; held so they
    // outlive every dispatch that reads them.
    _geometry: Vec<GeometryBuffers>,
    _material_buffer: Buffer<MaterialPbr>,
    _light_buffer: Buffer<PointLight>,
    _bottom_level: Vec<AccelerationStructure>,
    _top_level: AccelerationStructure,

    shader_binding_tables: ShaderBindingTables,

    output_target: OutputTarget,

    constants_buffer: Buffer<u8>,
    constants_stride: u64,

    descriptor_pool: vk::DescriptorPool,
    scene_descriptor_set: DescriptorSet,
    constants_descriptor_set: DescriptorSet,
}

impl Renderer {
    pub fn new(
        context: Arc<Context>,
        allocator: Arc<Mutex<Allocator>>,
        command_pool: CommandPool,
        scene: &LoadedScene,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let pipeline = RaytracingPipeline::new(&context);

        let geometry = build_geometry(&context, &allocator, &command_pool, scene)?;
        let material_buffer = build_materials(&context, &allocator, &command_pool, scene);
        let light_buffer = build_light_buffers(&context, &allocator, &command_pool);

        let (bottom_level, top_level) =
            build_acceleration_structures(&context, &allocator, &command_pool, &geometry)?;

        let shader_binding_tables =
            ShaderBindingTables::new(&context, &allocator, pipeline.pipeline);
        log::info!("Shader binding tables written");

        let output_target = create_output_target(&context, &allocator, &command_pool, extent);

        let constants_stride = aligned_size_u64(
            std::mem::size_of::<SceneConstants>() as u64,
            context.min_uniform_buffer_offset_alignment(),
        );
        let constants_buffer: Buffer<u8> = Buffer::new(
            context.clone(),
            allocator.clone(),
            constants_stride * FRAME_COUNT as u64,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
            "scene constants",
        );

        let descriptor_pool = create_descriptor_pool(&context);

        let scene_descriptor_set = DescriptorSet::new(
            context.clone(),
            descriptor_pool,
            pipeline.scene_set_layout,
            scene_descriptor_writes(&output_target, &top_level, &light_buffer, &material_buffer, &geometry),
        );
        let constants_descriptor_set = DescriptorSet::new(
            context.clone(),
            descriptor_pool,
            pipeline.constants_set_layout,
            vec![WriteDescriptorSet::uniform_buffer_dynamic(
                0,
                &constants_buffer,
                std::mem::size_of::<SceneConstants>() as vk::DeviceSize,
            )],
        );

        log::info!(
            "Renderer ready: {} objects, {} materials",
            geometry.len(),
            scene.materials.len()
        );

        Ok(Self {
            context,
            allocator,
            command_pool,
            pipeline,
            _geometry: geometry,
            _material_buffer: material_buffer,
            _light_buffer: light_buffer,
            _bottom_level: bottom_level,
            _top_level: top_level,
            shader_binding_tables,
            output_target,
            constants_buffer,
            constants_stride,
            descriptor_pool,
            scene_descriptor_set,
            constants_descriptor_set,
        })
    }

    /// Writes the constants region of one in-flight frame. The caller must
    /// have waited on that frame's fence, so the region is not read by any
    /// pending dispatch.
    pub fn update_constants(&mut self, frame_index: usize, constants: &SceneConstants) {
        let offset = frame_index as u64 * self.constants_stride;
        self.constants_buffer
            .copy_data_at_offset(offset as usize, bytemuck::bytes_of(constants));
    }

    /// Records the trace dispatch and the copy of the output image into the
    /// given swapchain image, leaving it ready for presentation.
    pub fn trace(
        &self,
        command_buffer: vk::CommandBuffer,
        frame_index: usize,
        swapchain_image: vk::Image,
    ) {
        let device = &self.context.device;
        let extent = self.output_target.extent;

        unsafe {
            device.cmd_bind_pipeline(
                command_buffer,
                vk::PipelineBindPoint::RAY_TRACING_KHR,
                self.pipeline.pipeline,
            );

            let descriptor_sets = [
                self.scene_descriptor_set.inner,
                self.constants_descriptor_set.inner,
            ];
            let dynamic_offset = (frame_index as u64 * self.constants_stride) as u32;
            device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::RAY_TRACING_KHR,
                self.pipeline.pipeline_layout,
                0,
                &descriptor_sets,
                &[dynamic_offset],
            );

            let callable = vk::StridedDeviceAddressRegionKHR::default();
            self.context
                .context_raytracing
                .ray_tracing_pipeline
                .cmd_trace_rays(
                    command_buffer,
                    &self.shader_binding_tables.raygen.strided_device_address_region,
                    &self.shader_binding_tables.miss.strided_device_address_region,
                    &self.shader_binding_tables.hit.strided_device_address_region,
                    &callable,
                    extent.width,
                    extent.height,
                    1,
                );
        }

        // Traced output -> copy source.
        image::cmd_image_memory_barrier(
            &self.context,
            command_buffer,
            self.output_target.image.inner,
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
            vk::AccessFlags2::SHADER_STORAGE_WRITE,
            vk::PipelineStageFlags2::COPY,
            vk::AccessFlags2::TRANSFER_READ,
        );
        // Swapchain image -> copy destination. Contents are overwritten, so
        // the old layout does not matter.
        image::cmd_image_memory_barrier(
            &self.context,
            command_buffer,
            swapchain_image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::PipelineStageFlags2::TOP_OF_PIPE,
            vk::AccessFlags2::empty(),
            vk::PipelineStageFlags2::COPY,
            vk::AccessFlags2::TRANSFER_WRITE,
        );

        let subresource = vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };
        let copy_region = vk::ImageCopy {
            src_subresource: subresource,
            src_offset: vk::Offset3D::default(),
            dst_subresource: subresource,
            dst_offset: vk::Offset3D::default(),
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
        };
        unsafe {
            device.cmd_copy_image(
                command_buffer,
                self.output_target.image.inner,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                swapchain_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&copy_region),
            )
        };

        // Back to the storage layout for the next frame's dispatch.
        image::cmd_image_memory_barrier(
            &self.context,
            command_buffer,
            self.output_target.image.inner,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::GENERAL,
            vk::PipelineStageFlags2::COPY,
            vk::AccessFlags2::TRANSFER_READ,
            vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
            vk::AccessFlags2::SHADER_STORAGE_WRITE,
        );
        image::cmd_image_memory_barrier(
            &self.context,
            command_buffer,
            swapchain_image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::PipelineStageFlags2::COPY,
            vk::AccessFlags2::TRANSFER_WRITE,
            vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
            vk::AccessFlags2::empty(),
        );
    }

    /// Recreates the output target for a new swapchain extent. The caller
    /// must have idled the device (swapchain recreation does).
    pub fn resize(&mut self, extent: vk::Extent2D) {
        self.output_target =
            create_output_target(&self.context, &self.allocator, &self.command_pool, extent);
        self.scene_descriptor_set.update(
            &self.context,
            vec![WriteDescriptorSet::storage_image_view(
                slots::OUTPUT_TARGET_SLOT,
                &self.output_target.view,
            )],
        );
    }

    /// Rays dispatched per frame, for the window title statistics.
    pub fn rays_per_frame(&self) -> u64 {
        self.output_target.extent.width as u64 * self.output_target.extent.height as u64
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // A lost device fails the wait; the rebuild path drops us anyway.
        let _ = unsafe { self.context.device.device_wait_idle() };
        unsafe {
            self.context
                .device
                .destroy_descriptor_pool(self.descriptor_pool, None)
        };
    }
}

/// Uploads every object's index, vertex and material index buffers and
/// assigns their descriptor slots in object order.
fn build_geometry(
    context: &Arc<Context>,
    allocator: &Arc<Mutex<Allocator>>,
    command_pool: &CommandPool,
    scene: &LoadedScene,
) -> Result<Vec<GeometryBuffers>> {
    let mut slot_table = SlotTable::new();
    let mut geometry = Vec::with_capacity(scene.objects.len());
    // Staging buffers must outlive the submission below.
    let mut staging: (Vec<Buffer<u32>>, Vec<Buffer<Vertex>>, Vec<Buffer<i32>>) =
        Default::default();

    let commands = OneTimeCommands::begin(command_pool);
    for object in &scene.objects {
        let slots = slot_table.allocate_geometry()?;

        let geometry_usage = vk::BufferUsageFlags::STORAGE_BUFFER
            | vk::BufferUsageFlags::TRANSFER_DST
            | vk::BufferUsageFlags::TRANSFER_SRC
            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
            | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR;

        let index_buffer: Buffer<u32> = Buffer::new(
            context.clone(),
            allocator.clone(),
            std::mem::size_of_val(object.indices.as_slice()) as vk::DeviceSize,
            geometry_usage,
            MemoryLocation::GpuOnly,
            "index buffer",
        );
        let vertex_buffer: Buffer<Vertex> = Buffer::new(
            context.clone(),
            allocator.clone(),
            std::mem::size_of_val(object.vertices.as_slice()) as vk::DeviceSize,
            geometry_usage,
            MemoryLocation::GpuOnly,
            "vertex buffer",
        );
        let material_index_buffer: Buffer<i32> = Buffer::new(
            context.clone(),
            allocator.clone(),
            std::mem::size_of_val(object.material_indices.as_slice()) as vk::DeviceSize,
            vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::GpuOnly,
            "material index buffer",
        );

        staging.0.push(index_buffer.copy_from_host(*commands, &object.indices));
        staging.1.push(vertex_buffer.copy_from_host(*commands, &object.vertices));
        staging.2.push(
            material_index_buffer.copy_from_host(*commands, &object.material_indices),
        );

        geometry.push(GeometryBuffers {
            index_buffer,
            index_count: object.indices.len() as u32,
            vertex_buffer,
            vertex_count: object.vertices.len() as u32,
            material_index_buffer,
            slots,
        });
    }
    commands.submit_and_wait();
    drop(staging);

    log::info!("Uploaded geometry for {} objects", geometry.len());

    #[cfg(debug_assertions)]
    verify_geometry_upload(command_pool, scene, &geometry);

    Ok(geometry)
}

/// Debug builds copy the uploaded buffers back and compare them against the
/// host data, catching staging or barrier mistakes early.
#[cfg(debug_assertions)]
fn verify_geometry_upload(
    command_pool: &CommandPool,
    scene: &LoadedScene,
    geometry: &[GeometryBuffers],
) {
    for (object, buffers) in scene.objects.iter().zip(geometry) {
        assert_eq!(buffers.index_buffer.read_back(command_pool), object.indices);
        assert_eq!(
            bytemuck::cast_slice::<Vertex, u8>(&buffers.vertex_buffer.read_back(command_pool)),
            bytemuck::cast_slice::<Vertex, u8>(&object.vertices)
        );
    }
    log::debug!("Geometry upload verified");
}

fn build_materials(
    context: &Arc<Context>,
    allocator: &Arc<Mutex<Allocator>>,
    command_pool: &CommandPool,
    scene: &LoadedScene,
) -> Buffer<MaterialPbr> {
    let buffer: Buffer<MaterialPbr> = Buffer::new(
        context.clone(),
        allocator.clone(),
        std::mem::size_of_val(scene.materials.as_slice()) as vk::DeviceSize,
        vk::BufferUsageFlags::STORAGE_BUFFER
            | vk::BufferUsageFlags::TRANSFER_DST
            | vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::GpuOnly,
        "material buffer",
    );

    let commands = OneTimeCommands::begin(command_pool);
    let staging = buffer.copy_from_host(*commands, &scene.materials);
    commands.submit_and_wait();
    drop(staging);

    log::info!("Uploaded {} materials", scene.materials.len());
    buffer
}

/// The two fixed point lights of the scene.
fn build_light_buffers(
    context: &Arc<Context>,
    allocator: &Arc<Mutex<Allocator>>,
    command_pool: &CommandPool,
) -> Buffer<PointLight> {
    use ultraviolet::Vec3;

    // TODO: read the lights from the scene file instead of hardcoding them.
    let lights = [
        PointLight::new(Vec3::new(0.5, 1.0, -0.3), Vec3::new(0.35, 0.35, 0.35)),
        PointLight::new(Vec3::new(-0.5, 1.0, 0.2), Vec3::new(0.65, 0.65, 0.65)),
    ];

    let buffer: Buffer<PointLight> = Buffer::new(
        context.clone(),
        allocator.clone(),
        std::mem::size_of_val(&lights) as vk::DeviceSize,
        vk::BufferUsageFlags::STORAGE_BUFFER
            | vk::BufferUsageFlags::TRANSFER_DST
            | vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::GpuOnly,
        "point light buffer",
    );

    let commands = OneTimeCommands::begin(command_pool);
    let staging = buffer.copy_from_host(*commands, &lights);
    commands.submit_and_wait();
    drop(staging);

    buffer
}

/// Builds one BLAS per object and the TLAS over them in a single
/// submission, with a barrier between the two levels.
fn build_acceleration_structures(
    context: &Arc<Context>,
    allocator: &Arc<Mutex<Allocator>>,
    command_pool: &CommandPool,
    geometry: &[GeometryBuffers],
) -> Result<(Vec<AccelerationStructure>, AccelerationStructure), AccelerationStructureBuildError> {
    let commands = OneTimeCommands::begin(command_pool);

    let mut bottom_level = Vec::with_capacity(geometry.len());
    let mut scratch_buffers = Vec::with_capacity(geometry.len() + 1);
    for buffers in geometry {
        let (blas, scratch) = acceleration_structure::build_blas(
            context,
            allocator,
            *commands,
            &buffers.vertex_buffer,
            buffers.vertex_count,
            &buffers.index_buffer,
            buffers.index_count,
        )?;
        bottom_level.push(blas);
        scratch_buffers.push(scratch);
    }

    acceleration_structure::cmd_build_barrier(context, *commands);

    let blas_addresses: Vec<vk::DeviceAddress> =
        bottom_level.iter().map(|blas| blas.device_address).collect();
    let instances = plan_instances(&blas_addresses);

    let mut instance_buffer: Buffer<vk::AccelerationStructureInstanceKHR> = Buffer::new(
        context.clone(),
        allocator.clone(),
        std::mem::size_of_val(instances.as_slice()) as vk::DeviceSize,
        vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
        MemoryLocation::CpuToGpu,
        "instance buffer",
    );
    instance_buffer.copy_untyped(&instances);

    let (top_level, tlas_scratch) = acceleration_structure::build_tlas(
        context,
        allocator,
        *commands,
        &instance_buffer,
        instances.len() as u32,
    )?;
    scratch_buffers.push(tlas_scratch);

    commands.submit_and_wait();
    drop(scratch_buffers);
    drop(instance_buffer);

    log::info!(
        "Built {} bottom-level acceleration structures and the top level",
        bottom_level.len()
    );

    Ok((bottom_level, top_level))
}

const IDENTITY_TRANSFORM: vk::TransformMatrixKHR = vk::TransformMatrixKHR {
    matrix: [
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0,
    ],
};

/// One untransformed instance per BLAS. The custom index is the object's
/// position in the build order, which the hit shader uses to find the
/// object's buffer slots.
fn plan_instances(blas_addresses: &[vk::DeviceAddress]) -> Vec<vk::AccelerationStructureInstanceKHR> {
    blas_addresses
        .iter()
        .enumerate()
        .map(|(i, &address)| vk::AccelerationStructureInstanceKHR {
            transform: IDENTITY_TRANSFORM,
            instance_custom_index_and_mask: vk::Packed24_8::new(i as u32, 1),
            instance_shader_binding_table_record_offset_and_flags: vk::Packed24_8::new(0, 0),
            acceleration_structure_reference: vk::AccelerationStructureReferenceKHR {
                device_handle: address,
            },
        })
        .collect()
}

fn create_output_target(
    context: &Arc<Context>,
    allocator: &Arc<Mutex<Allocator>>,
    command_pool: &CommandPool,
    extent: vk::Extent2D,
) -> OutputTarget {
    let image = Arc::new(Image::storage_target(
        context.clone(),
        allocator.clone(),
        extent,
        OUTPUT_FORMAT,
    ));
    let view = ImageView::new_default(context.clone(), image.clone(), vk::ImageAspectFlags::COLOR);

    // The storage image starts in GENERAL and returns to it every frame.
    let commands = OneTimeCommands::begin(command_pool);
    image::cmd_image_memory_barrier(
        context,
        *commands,
        image.inner,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::GENERAL,
        vk::PipelineStageFlags2::TOP_OF_PIPE,
        vk::AccessFlags2::empty(),
        vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
        vk::AccessFlags2::SHADER_STORAGE_WRITE,
    );
    commands.submit_and_wait();

    OutputTarget {
        image,
        view,
        extent,
    }
}

fn create_descriptor_pool(context: &Arc<Context>) -> vk::DescriptorPool {
    let pool_sizes = [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_IMAGE,
            descriptor_count: 1,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
            descriptor_count: 1,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_BUFFER,
            // Lights, materials, and the whole per-object array binding.
            descriptor_count: 2 + (slots::TABLE_CAPACITY - slots::GEOMETRY_SLOTS_START),
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            descriptor_count: 1,
        },
    ];

    let create_info = vk::DescriptorPoolCreateInfo::builder()
        .pool_sizes(&pool_sizes)
        .max_sets(2);

    unsafe { context.device.create_descriptor_pool(&create_info, None) }
        .expect("Could not create descriptor pool")
}

fn scene_descriptor_writes(
    output_target: &OutputTarget,
    top_level: &AccelerationStructure,
    light_buffer: &Buffer<PointLight>,
    material_buffer: &Buffer<MaterialPbr>,
    geometry: &[GeometryBuffers],
) -> Vec<WriteDescriptorSet> {
    let mut writes = vec![
        WriteDescriptorSet::storage_image_view(slots::OUTPUT_TARGET_SLOT, &output_target.view),
        WriteDescriptorSet::acceleration_structure(slots::TLAS_SLOT, top_level),
        WriteDescriptorSet::storage_buffer(slots::POINT_LIGHTS_SLOT, light_buffer),
        WriteDescriptorSet::storage_buffer(slots::MATERIALS_SLOT, material_buffer),
    ];
    for buffers in geometry {
        let offset = buffers.slots.array_offset();
        writes.push(WriteDescriptorSet::storage_buffer_array_element(
            slots::GEOMETRY_SLOTS_START,
            offset,
            &buffers.index_buffer,
        ));
        writes.push(WriteDescriptorSet::storage_buffer_array_element(
            slots::GEOMETRY_SLOTS_START,
            offset + 1,
            &buffers.vertex_buffer,
        ));
        writes.push(WriteDescriptorSet::storage_buffer_array_element(
            slots::GEOMETRY_SLOTS_START,
            offset + 2,
            &buffers.material_index_buffer,
        ));
    }
    writes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instances_reference_their_blas_in_order() {
        let addresses = [0x1000, 0x2000, 0x3000];
        let instances = plan_instances(&addresses);

        assert_eq!(instances.len(), 3);
        for (i, instance) in instances.iter().enumerate() {
            assert_eq!(
                instance.instance_custom_index_and_mask.low_24(),
                i as u32
            );
            assert_eq!(instance.instance_custom_index_and_mask.high_8(), 1);
            assert_eq!(
                instance
                    .instance_shader_binding_table_record_offset_and_flags
                    .low_24(),
                0
            );
            unsafe {
                assert_eq!(
                    instance.acceleration_structure_reference.device_handle,
                    addresses[i]
                );
            }
        }
    }

    #[test]
    fn instance_transform_is_identity() {
        let instances = plan_instances(&[0xabc]);
        let m = instances[0].transform.matrix;
        let identity = [
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0,
        ];
        assert_eq!(m, identity);
    }
}

/// Scenarios that need a real device with ray tracing support; run with
/// `cargo test -- --ignored`.
#[cfg(all(test, target_os = "linux"))]
mod gpu_tests {
    use super::*;

    use gpu_allocator::vulkan::AllocatorCreateDesc;
    use ultraviolet::Vec3;
    use winit::platform::x11::EventLoopBuilderExtX11;

    fn test_device() -> (Arc<Context>, Arc<Mutex<Allocator>>, CommandPool) {
        let event_loop = winit::event_loop::EventLoopBuilder::new()
            .with_any_thread(true)
            .build();
        let window = winit::window::WindowBuilder::new()
            .with_visible(false)
            .build(&event_loop)
            .unwrap();
        let context = Arc::new(Context::new(&window));

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: context.instance.clone(),
            device: context.device.clone(),
            physical_device: context.physical_device,
            debug_settings: Default::default(),
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        })
        .unwrap();
        let allocator = Arc::new(Mutex::new(allocator));

        let command_pool = CommandPool::new(context.clone());
        (context, allocator, command_pool)
    }

    fn upload_triangle(
        context: &Arc<Context>,
        allocator: &Arc<Mutex<Allocator>>,
        command_pool: &CommandPool,
    ) -> (Buffer<Vertex>, Buffer<u32>) {
        let vertices = [
            Vertex {
                position: Vec3::new(0.0, 0.0, 0.0),
                normal: Vec3::new(0.0, 0.0, 1.0),
            },
            Vertex {
                position: Vec3::new(1.0, 0.0, 0.0),
                normal: Vec3::new(0.0, 0.0, 1.0),
            },
            Vertex {
                position: Vec3::new(0.0, 1.0, 0.0),
                normal: Vec3::new(0.0, 0.0, 1.0),
            },
        ];
        let indices = [0u32, 1, 2];

        let usage = vk::BufferUsageFlags::STORAGE_BUFFER
            | vk::BufferUsageFlags::TRANSFER_DST
            | vk::BufferUsageFlags::TRANSFER_SRC
            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
            | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR;

        let vertex_buffer: Buffer<Vertex> = Buffer::new(
            context.clone(),
            allocator.clone(),
            std::mem::size_of_val(&vertices) as vk::DeviceSize,
            usage,
            MemoryLocation::GpuOnly,
            "test vertex buffer",
        );
        let index_buffer: Buffer<u32> = Buffer::new(
            context.clone(),
            allocator.clone(),
            std::mem::size_of_val(&indices) as vk::DeviceSize,
            usage,
            MemoryLocation::GpuOnly,
            "test index buffer",
        );

        let commands = OneTimeCommands::begin(command_pool);
        let vertex_staging = vertex_buffer.copy_from_host(*commands, &vertices);
        let index_staging = index_buffer.copy_from_host(*commands, &indices);
        commands.submit_and_wait();
        drop((vertex_staging, index_staging));

        (vertex_buffer, index_buffer)
    }

    #[test]
    #[ignore = "needs a Vulkan device with hardware ray tracing"]
    fn upload_round_trips_through_the_device() {
        let (context, allocator, command_pool) = test_device();
        let (vertex_buffer, index_buffer) =
            upload_triangle(&context, &allocator, &command_pool);

        assert_eq!(index_buffer.read_back(&command_pool), vec![0, 1, 2]);
        let vertices = vertex_buffer.read_back(&command_pool);
        assert_eq!(vertices.len(), 3);
        assert_eq!(vertices[1].position, Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    #[ignore = "needs a Vulkan device with hardware ray tracing"]
    fn single_triangle_acceleration_structures_build() {
        let (context, allocator, command_pool) = test_device();
        let (vertex_buffer, index_buffer) =
            upload_triangle(&context, &allocator, &command_pool);

        let commands = OneTimeCommands::begin(&command_pool);
        let (blas, blas_scratch) = acceleration_structure::build_blas(
            &context,
            &allocator,
            *commands,
            &vertex_buffer,
            3,
            &index_buffer,
            3,
        )
        .unwrap();
        acceleration_structure::cmd_build_barrier(&context, *commands);

        let instances = plan_instances(&[blas.device_address]);
        let mut instance_buffer: Buffer<vk::AccelerationStructureInstanceKHR> = Buffer::new(
            context.clone(),
            allocator.clone(),
            std::mem::size_of_val(instances.as_slice()) as vk::DeviceSize,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::CpuToGpu,
            "test instance buffer",
        );
        instance_buffer.copy_untyped(&instances);

        let (tlas, tlas_scratch) = acceleration_structure::build_tlas(
            &context,
            &allocator,
            *commands,
            &instance_buffer,
            1,
        )
        .unwrap();
        commands.submit_and_wait();
        drop((blas_scratch, tlas_scratch));

        assert_ne!(blas.device_address, 0);
        assert_ne!(tlas.device_address, 0);
    }
}
