use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::Allocator;
use gpu_allocator::MemoryLocation;

use crate::utility::aligned_size;

use super::{buffer::Buffer, context::Context};

/// One shader binding table: a buffer holding shader group handles and the
/// strided region `cmd_trace_rays` consumes.
pub struct ShaderBindingTable {
    pub buffer: Buffer<u8>,
    pub strided_device_address_region: vk::StridedDeviceAddressRegionKHR,
}

impl ShaderBindingTable {
    fn new(context: &Arc<Context>, allocator: &Arc<Mutex<Allocator>>, handle: &[u8]) -> Self {
        let properties = &context
            .context_raytracing
            .physical_device_ray_tracing_pipeline_properties_khr;

        let stride = record_stride(
            properties.shader_group_handle_size,
            properties.shader_group_handle_alignment,
        );

        let mut buffer: Buffer<u8> = Buffer::new(
            context.clone(),
            allocator.clone(),
            stride,
            vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::CpuToGpu,
            "shader binding table",
        );
        buffer.copy_data(handle);

        let strided_device_address_region = vk::StridedDeviceAddressRegionKHR::builder()
            .device_address(buffer.get_device_address())
            .stride(stride)
            .size(stride)
            .build();

        Self {
            buffer,
            strided_device_address_region,
        }
    }
}

/// Table record stride: the group handle size rounded up to the handle
/// alignment. Every record in a table occupies one stride.
fn record_stride(handle_size: u32, handle_alignment: u32) -> vk::DeviceSize {
    aligned_size(handle_size, handle_alignment) as vk::DeviceSize
}

/// The three single-record tables of the ray-tracing pipeline: ray
/// generation, miss, and the triangle hit group, in that group order.
pub struct ShaderBindingTables {
    pub raygen: ShaderBindingTable,
    pub miss: ShaderBindingTable,
    pub hit: ShaderBindingTable,
}

const GROUP_COUNT: u32 = 3;

impl ShaderBindingTables {
    pub fn new(
        context: &Arc<Context>,
        allocator: &Arc<Mutex<Allocator>>,
        pipeline: vk::Pipeline,
    ) -> Self {
        let properties = &context
            .context_raytracing
            .physical_device_ray_tracing_pipeline_properties_khr;
        let handle_size = properties.shader_group_handle_size as usize;

        let handle_data = unsafe {
            context
                .context_raytracing
                .ray_tracing_pipeline
                .get_ray_tracing_shader_group_handles(
                    pipeline,
                    0,
                    GROUP_COUNT,
                    GROUP_COUNT as usize * handle_size,
                )
        }
        .expect("Could not get ray tracing shader group handles");

        let handle = |group: usize| &handle_data[group * handle_size..(group + 1) * handle_size];

        Self {
            raygen: ShaderBindingTable::new(context, allocator, handle(0)),
            miss: ShaderBindingTable::new(context, allocator, handle(1)),
            hit: ShaderBindingTable::new(context, allocator, handle(2)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_stride_rounds_handles_up_to_their_alignment() {
        // Common device values: 32 byte handles, 32 or 64 byte alignment.
        assert_eq!(record_stride(32, 32), 32);
        assert_eq!(record_stride(32, 64), 64);
        // A table of records is laid out at one stride per record, so the
        // region size for N records is N strides.
        let records = 5;
        assert_eq!(records * record_stride(32, 64), 320);
    }
}
