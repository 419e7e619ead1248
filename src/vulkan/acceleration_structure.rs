use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::Allocator;
use gpu_allocator::MemoryLocation;
use thiserror::Error;

use crate::shader_types::Vertex;

use super::{buffer::Buffer, context::Context};

#[derive(Debug, Error)]
pub enum AccelerationStructureBuildError {
    /// The driver reported a zero result size for a build. A structure of
    /// size zero cannot hold any geometry, so this is unrecoverable.
    #[error("device reported a zero acceleration structure size for the {0}")]
    ZeroPrebuildSize(&'static str),
}

pub struct AccelerationStructure {
    pub inner: vk::AccelerationStructureKHR,
    pub context: Arc<Context>,
    pub buffer: Buffer<u8>,
    pub device_address: vk::DeviceAddress,
}

impl AccelerationStructure {
    fn new(
        context: Arc<Context>,
        allocator: Arc<Mutex<Allocator>>,
        structure_type: vk::AccelerationStructureTypeKHR,
        build_size_info: vk::AccelerationStructureBuildSizesInfoKHR,
    ) -> Self {
        let buffer: Buffer<u8> = Buffer::new(
            context.clone(),
            allocator,
            build_size_info.acceleration_structure_size,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::GpuOnly,
            "acceleration structure",
        );

        let create_info = vk::AccelerationStructureCreateInfoKHR::builder()
            .buffer(buffer.inner)
            .size(build_size_info.acceleration_structure_size)
            .ty(structure_type);

        let inner = unsafe {
            context
                .context_raytracing
                .acceleration_structure
                .create_acceleration_structure(&create_info, None)
        }
        .expect("Could not create acceleration structure");

        let device_address = {
            let device_address_info =
                vk::AccelerationStructureDeviceAddressInfoKHR::builder().acceleration_structure(inner);

            unsafe {
                context
                    .context_raytracing
                    .acceleration_structure
                    .get_acceleration_structure_device_address(&device_address_info)
            }
        };

        Self {
            inner,
            context,
            buffer,
            device_address,
        }
    }
}

impl Drop for AccelerationStructure {
    fn drop(&mut self) {
        unsafe {
            self.context
                .context_raytracing
                .acceleration_structure
                .destroy_acceleration_structure(self.inner, None);
        }
    }
}

/// Records a bottom-level build over one object's triangle buffers. Counts
/// are passed explicitly since the buffers only know their byte size.
///
/// Returns the structure and the scratch buffer, which must stay alive
/// until the command buffer has finished executing.
pub fn build_blas(
    context: &Arc<Context>,
    allocator: &Arc<Mutex<Allocator>>,
    command_buffer: vk::CommandBuffer,
    vertex_buffer: &Buffer<Vertex>,
    vertex_count: u32,
    index_buffer: &Buffer<u32>,
    index_count: u32,
) -> Result<(AccelerationStructure, Buffer<u8>), AccelerationStructureBuildError> {
    let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::builder()
        .vertex_format(vk::Format::R32G32B32_SFLOAT)
        .vertex_data(vk::DeviceOrHostAddressConstKHR {
            device_address: vertex_buffer.get_device_address(),
        })
        .vertex_stride(std::mem::size_of::<Vertex>() as vk::DeviceSize)
        .max_vertex(vertex_count - 1)
        .index_type(vk::IndexType::UINT32)
        .index_data(vk::DeviceOrHostAddressConstKHR {
            device_address: index_buffer.get_device_address(),
        });

    // All geometry is opaque; the hit shaders never rely on any-hit
    // invocations.
    let geometry = vk::AccelerationStructureGeometryKHR::builder()
        .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
        .flags(vk::GeometryFlagsKHR::OPAQUE)
        .geometry(vk::AccelerationStructureGeometryDataKHR {
            triangles: *triangles,
        });

    let primitive_count = index_count / 3;

    build(
        context,
        allocator,
        command_buffer,
        vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
        &geometry,
        primitive_count,
        "bottom-level acceleration structure",
    )
}

/// Records a top-level build over an instance buffer. The instance buffer
/// must already be visible to the build (uploaded with `copy_from_host`
/// earlier in the same command buffer, or host-visible).
pub fn build_tlas(
    context: &Arc<Context>,
    allocator: &Arc<Mutex<Allocator>>,
    command_buffer: vk::CommandBuffer,
    instance_buffer: &Buffer<vk::AccelerationStructureInstanceKHR>,
    instance_count: u32,
) -> Result<(AccelerationStructure, Buffer<u8>), AccelerationStructureBuildError> {
    let instances = vk::AccelerationStructureGeometryInstancesDataKHR::builder()
        .array_of_pointers(false)
        .data(vk::DeviceOrHostAddressConstKHR {
            device_address: instance_buffer.get_device_address(),
        });

    let geometry = vk::AccelerationStructureGeometryKHR::builder()
        .geometry_type(vk::GeometryTypeKHR::INSTANCES)
        .geometry(vk::AccelerationStructureGeometryDataKHR {
            instances: *instances,
        });

    build(
        context,
        allocator,
        command_buffer,
        vk::AccelerationStructureTypeKHR::TOP_LEVEL,
        &geometry,
        instance_count,
        "top-level acceleration structure",
    )
}

fn build(
    context: &Arc<Context>,
    allocator: &Arc<Mutex<Allocator>>,
    command_buffer: vk::CommandBuffer,
    structure_type: vk::AccelerationStructureTypeKHR,
    geometry: &vk::AccelerationStructureGeometryKHR,
    primitive_count: u32,
    what: &'static str,
) -> Result<(AccelerationStructure, Buffer<u8>), AccelerationStructureBuildError> {
    let loader = &context.context_raytracing.acceleration_structure;

    let build_geometry_info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
        .ty(structure_type)
        .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
        .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
        .geometries(std::slice::from_ref(geometry));

    let build_sizes = unsafe {
        loader.get_acceleration_structure_build_sizes(
            vk::AccelerationStructureBuildTypeKHR::DEVICE,
            &build_geometry_info,
            &[primitive_count],
        )
    };
    if build_sizes.acceleration_structure_size == 0 {
        return Err(AccelerationStructureBuildError::ZeroPrebuildSize(what));
    }

    let structure = AccelerationStructure::new(
        context.clone(),
        allocator.clone(),
        structure_type,
        build_sizes,
    );

    let scratch_buffer: Buffer<u8> = Buffer::new(
        context.clone(),
        allocator.clone(),
        build_sizes.build_scratch_size,
        vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
        MemoryLocation::GpuOnly,
        "acceleration structure scratch",
    );

    let build_geometry_info = build_geometry_info
        .dst_acceleration_structure(structure.inner)
        .scratch_data(vk::DeviceOrHostAddressKHR {
            device_address: scratch_buffer.get_device_address(),
        })
        .build();

    let build_range_info = vk::AccelerationStructureBuildRangeInfoKHR::builder()
        .primitive_count(primitive_count)
        .primitive_offset(0)
        .first_vertex(0)
        .transform_offset(0)
        .build();

    unsafe {
        loader.cmd_build_acceleration_structures(
            command_buffer,
            std::slice::from_ref(&build_geometry_info),
            &[std::slice::from_ref(&build_range_info)],
        )
    };

    Ok((structure, scratch_buffer))
}

/// Barrier between acceleration structure builds recorded into the same
/// command buffer. The top-level build reads the bottom-level results.
pub fn cmd_build_barrier(context: &Context, command_buffer: vk::CommandBuffer) {
    let barrier = vk::MemoryBarrier2 {
        src_stage_mask: vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR,
        src_access_mask: vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR,
        dst_stage_mask: vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR,
        dst_access_mask: vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR,
        ..vk::MemoryBarrier2::default()
    };
    let dependency_info =
        vk::DependencyInfo::builder().memory_barriers(std::slice::from_ref(&barrier));
    unsafe {
        context
            .synchronisation2_loader
            .cmd_pipeline_barrier2(command_buffer, &dependency_info)
    };
}
