use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::MemoryLocation;

use crate::vulkan::context::Context;

pub struct Image {
    pub inner: vk::Image,

    pub format: vk::Format,
    pub extent: vk::Extent3D,

    allocation: Option<Allocation>,
    allocator: Arc<Mutex<Allocator>>,
    context: Arc<Context>,
}

impl Image {
    /// The ray generation shader's output target: written as a storage
    /// image, then copied into the swapchain image every frame.
    pub fn storage_target(
        context: Arc<Context>,
        allocator: Arc<Mutex<Allocator>>,
        extent: vk::Extent2D,
        format: vk::Format,
    ) -> Image {
        let create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        Self::new(context, allocator, &create_info)
    }

    pub fn new(
        context: Arc<Context>,
        allocator: Arc<Mutex<Allocator>>,
        create_info: &vk::ImageCreateInfo,
    ) -> Image {
        let device = &context.device;

        let format = create_info.format;
        let extent = create_info.extent;

        let image =
            unsafe { device.create_image(create_info, None) }.expect("Could not create image");

        let requirements = unsafe { device.get_image_memory_requirements(image) };

        let allocation = allocator
            .lock()
            .unwrap()
            .allocate(&AllocationCreateDesc {
                name: "image",
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .expect("Could not allocate memory for image");

        unsafe { device.bind_image_memory(image, allocation.memory(), allocation.offset()) }
            .expect("Could not bind image memory");

        Self {
            inner: image,
            format,
            extent,
            allocation: Some(allocation),
            allocator,
            context,
        }
    }

    pub fn full_subresource_range(
        &self,
        aspect_mask: vk::ImageAspectFlags,
    ) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        }
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            self.allocator
                .lock()
                .unwrap()
                .free(allocation)
                .expect("Could not free image allocation");
        }
        unsafe { self.context.device.destroy_image(self.inner, None) };
    }
}

/// Single-mip color image barrier. Also used on raw swapchain images, which
/// have no `Image` wrapper.
#[allow(clippy::too_many_arguments)]
pub fn cmd_image_memory_barrier(
    context: &Context,
    command_buffer: vk::CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_stage_mask: vk::PipelineStageFlags2,
    src_access_mask: vk::AccessFlags2,
    dst_stage_mask: vk::PipelineStageFlags2,
    dst_access_mask: vk::AccessFlags2,
) {
    let barrier = vk::ImageMemoryBarrier2 {
        old_layout,
        new_layout,
        src_stage_mask,
        dst_stage_mask,
        src_access_mask,
        dst_access_mask,
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        image,
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..vk::ImageMemoryBarrier2::default()
    };

    let dependency_info =
        vk::DependencyInfo::builder().image_memory_barriers(std::slice::from_ref(&barrier));

    unsafe {
        context
            .synchronisation2_loader
            .cmd_pipeline_barrier2(command_buffer, &dependency_info)
    };
}
