use std::sync::{Arc, Mutex};
use std::{marker::PhantomData, ops::Deref};

use ash::vk;
use bytemuck::Pod;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::MemoryLocation;

use crate::vulkan::command_pool::CommandPool;
use crate::vulkan::context::Context;

use super::command_buffer::OneTimeCommands;

/// A Vulkan buffer plus its allocation. `T` is the element type the buffer
/// holds; untyped scratch and storage buffers use `Buffer<u8>`.
pub struct Buffer<T> {
    pub inner: vk::Buffer,
    pub usage: vk::BufferUsageFlags,
    pub size: vk::DeviceSize,

    allocation: Option<Allocation>,
    allocator: Arc<Mutex<Allocator>>,
    context: Arc<Context>,
    _marker: PhantomData<T>,
}

impl<T> Buffer<T> {
    pub fn new(
        context: Arc<Context>,
        allocator: Arc<Mutex<Allocator>>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Buffer<T> {
        let device = &context.device;

        let create_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer =
            unsafe { device.create_buffer(&create_info, None) }.expect("Could not create buffer");

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let allocation = allocator
            .lock()
            .unwrap()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .expect("Could not allocate memory for buffer");

        unsafe { device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) }
            .expect("Could not bind buffer memory");

        Buffer {
            inner: buffer,
            usage,
            size,
            allocation: Some(allocation),
            allocator,
            context,
            _marker: PhantomData,
        }
    }

    pub fn get_device_address(&self) -> vk::DeviceAddress {
        let info = vk::BufferDeviceAddressInfo::builder().buffer(self.inner);
        unsafe {
            self.context
                .buffer_device_address
                .get_buffer_device_address(&info)
        }
    }

    /// Writes `data` at the start of a host-visible buffer without a `Pod`
    /// bound. Needed for driver records like
    /// `vk::AccelerationStructureInstanceKHR`, which contain unions and so
    /// cannot be cast with bytemuck.
    pub fn copy_untyped(&mut self, data: &[T]) {
        let mapped = self
            .allocation
            .as_mut()
            .unwrap()
            .mapped_slice_mut()
            .expect("Could not map buffer memory");
        write_untyped(mapped, data);
    }
}

/// Copies the raw bytes of `data` to the start of `target`.
fn write_untyped<T>(target: &mut [u8], data: &[T]) {
    let size = std::mem::size_of_val(data);
    assert!(size <= target.len());
    unsafe {
        std::ptr::copy_nonoverlapping(data.as_ptr().cast::<u8>(), target.as_mut_ptr(), size)
    };
}

impl<T: Pod> Buffer<T> {
    /// Writes `data` at the start of a host-visible buffer.
    pub fn copy_data(&mut self, data: &[T]) {
        self.copy_data_at_offset(0, data);
    }

    /// Writes `data` at a byte offset into a host-visible buffer. Used for
    /// the per-frame regions of the constants buffer.
    pub fn copy_data_at_offset(&mut self, offset: usize, data: &[T]) {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let mapped = self
            .allocation
            .as_mut()
            .unwrap()
            .mapped_slice_mut()
            .expect("Could not map buffer memory");
        mapped[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Records a transfer of `data` into this device-local buffer through a
    /// fresh staging buffer, followed by a barrier that makes the copy
    /// visible to acceleration-structure builds and ray-tracing shaders.
    ///
    /// The returned staging buffer must be kept alive until the command
    /// buffer has finished executing.
    pub fn copy_from_host(&self, command_buffer: vk::CommandBuffer, data: &[T]) -> Buffer<T> {
        assert!(self.usage.contains(vk::BufferUsageFlags::TRANSFER_DST));

        let mut staging_buffer: Buffer<T> = Buffer::new(
            self.context.clone(),
            self.allocator.clone(),
            std::mem::size_of_val(data) as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            "staging",
        );
        staging_buffer.copy_data(data);

        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: staging_buffer.size,
        };
        unsafe {
            self.context.device.cmd_copy_buffer(
                command_buffer,
                staging_buffer.inner,
                self.inner,
                std::slice::from_ref(&region),
            )
        };

        let barrier = vk::BufferMemoryBarrier2 {
            src_stage_mask: vk::PipelineStageFlags2::COPY,
            src_access_mask: vk::AccessFlags2::TRANSFER_WRITE,
            dst_stage_mask: vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR
                | vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
            dst_access_mask: vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR
                | vk::AccessFlags2::SHADER_READ,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            buffer: self.inner,
            offset: 0,
            size: vk::WHOLE_SIZE,
            ..vk::BufferMemoryBarrier2::default()
        };
        let dependency_info =
            vk::DependencyInfo::builder().buffer_memory_barriers(std::slice::from_ref(&barrier));
        unsafe {
            self.context
                .synchronisation2_loader
                .cmd_pipeline_barrier2(command_buffer, &dependency_info)
        };

        staging_buffer
    }

    /// Copies the buffer contents back to the host through a readback
    /// buffer. Blocks until the copy has completed. Only used by the debug
    /// verification after geometry uploads.
    pub fn read_back(&self, command_pool: &CommandPool) -> Vec<T> {
        assert!(self.usage.contains(vk::BufferUsageFlags::TRANSFER_SRC));

        let readback_buffer: Buffer<T> = Buffer::new(
            self.context.clone(),
            self.allocator.clone(),
            self.size,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
            "readback",
        );

        let commands = OneTimeCommands::begin(command_pool);
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: self.size,
        };
        unsafe {
            self.context.device.cmd_copy_buffer(
                *commands,
                self.inner,
                readback_buffer.inner,
                std::slice::from_ref(&region),
            )
        };
        commands.submit_and_wait();

        let mapped = readback_buffer
            .allocation
            .as_ref()
            .unwrap()
            .mapped_slice()
            .expect("Could not map readback buffer");
        // The mapped slice is not guaranteed to be aligned for T.
        bytemuck::pod_collect_to_vec(&mapped[..self.size as usize])
    }
}

impl<T> Drop for Buffer<T> {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            self.allocator
                .lock()
                .unwrap()
                .free(allocation)
                .expect("Could not free buffer allocation");
        }
        unsafe { self.context.device.destroy_buffer(self.inner, None) };
    }
}

impl<T> Deref for Buffer<T> {
    type Target = vk::Buffer;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untyped_writes_accept_instance_records() {
        // AccelerationStructureInstanceKHR holds a union, so it has no Pod
        // impl and must go through the raw byte path.
        let instance = vk::AccelerationStructureInstanceKHR {
            transform: vk::TransformMatrixKHR { matrix: [0.0; 12] },
            instance_custom_index_and_mask: vk::Packed24_8::new(7, 1),
            instance_shader_binding_table_record_offset_and_flags: vk::Packed24_8::new(0, 0),
            acceleration_structure_reference: vk::AccelerationStructureReferenceKHR {
                device_handle: 0x1234,
            },
        };

        let mut target = vec![0u8; std::mem::size_of::<vk::AccelerationStructureInstanceKHR>()];
        write_untyped(&mut target, std::slice::from_ref(&instance));

        // The acceleration structure reference is the final 8 bytes of the
        // 64 byte record.
        assert_eq!(u64::from_le_bytes(target[56..64].try_into().unwrap()), 0x1234);
    }

    #[test]
    fn readback_collection_accepts_unaligned_bytes() {
        // The mapped slice is not guaranteed to be aligned for the element
        // type; the collection must copy instead of casting in place.
        let mut bytes = vec![0u8; 9];
        bytes[1..5].copy_from_slice(&42u32.to_le_bytes());
        bytes[5..9].copy_from_slice(&7u32.to_le_bytes());

        let values: Vec<u32> = bytemuck::pod_collect_to_vec(&bytes[1..9]);
        assert_eq!(values, [42, 7]);
    }
}
