use std::sync::Arc;

use ash::vk;

use crate::vulkan::buffer::Buffer;
use crate::vulkan::context::Context;
use crate::vulkan::image_view::ImageView;

use super::acceleration_structure::AccelerationStructure;

pub struct DescriptorSet {
    pub inner: vk::DescriptorSet,
}

impl DescriptorSet {
    pub fn new(
        context: Arc<Context>,
        descriptor_pool: vk::DescriptorPool,
        set_layout: vk::DescriptorSetLayout,
        write_descriptor_sets: Vec<WriteDescriptorSet>,
    ) -> Self {
        let device = &context.device;
        let allocate_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(descriptor_pool)
            .set_layouts(std::slice::from_ref(&set_layout));

        let descriptor_set = unsafe {
            device
                .allocate_descriptor_sets(&allocate_info)
                .expect("Could not create descriptor set")
        }[0];

        let descriptor_set = Self {
            inner: descriptor_set,
        };
        descriptor_set.update(&context, write_descriptor_sets);
        descriptor_set
    }

    /// Rewrites bindings on an already allocated set. Callers must make
    /// sure no submitted work still reads the set.
    pub fn update(&self, context: &Context, write_descriptor_sets: Vec<WriteDescriptorSet>) {
        let device = &context.device;
        let descriptor_set = self.inner;

        // The acceleration structure writes go through a pNext struct that
        // must stay alive until update_descriptor_sets. Pre-sized so the
        // pointers captured below never move.
        let acceleration_structure_count = write_descriptor_sets
            .iter()
            .filter(|write| matches!(write.info, DescriptorInfo::AccelerationStructure(_)))
            .count();
        let mut structure_handles: Vec<vk::AccelerationStructureKHR> =
            Vec::with_capacity(acceleration_structure_count);
        let mut structure_infos: Vec<vk::WriteDescriptorSetAccelerationStructureKHR> =
            Vec::with_capacity(acceleration_structure_count);

        let vk_writes: Vec<vk::WriteDescriptorSet> = write_descriptor_sets
            .iter()
            .map(|write| {
                let mut vk_write = vk::WriteDescriptorSet::builder()
                    .dst_binding(write.binding)
                    .dst_array_element(write.array_element)
                    .descriptor_type(write.info.descriptor_type())
                    .dst_set(descriptor_set);

                match &write.info {
                    DescriptorInfo::StorageBuffer(info)
                    | DescriptorInfo::UniformBufferDynamic(info) => {
                        vk_write = vk_write.buffer_info(std::slice::from_ref(info));
                    }
                    DescriptorInfo::StorageImage(info) => {
                        vk_write = vk_write.image_info(std::slice::from_ref(info));
                    }
                    DescriptorInfo::AccelerationStructure(handle) => {
                        structure_handles.push(*handle);
                        let handle_ref =
                            std::slice::from_ref(structure_handles.last().unwrap());
                        structure_infos.push(
                            vk::WriteDescriptorSetAccelerationStructureKHR::builder()
                                .acceleration_structures(handle_ref)
                                .build(),
                        );
                        vk_write.descriptor_count = 1;
                        vk_write = vk_write.push_next(structure_infos.last_mut().unwrap());
                    }
                }
                vk_write.build()
            })
            .collect();

        unsafe { device.update_descriptor_sets(&vk_writes, &[]) };
    }
}

pub struct WriteDescriptorSet {
    binding: u32,
    array_element: u32,
    info: DescriptorInfo,
}

pub enum DescriptorInfo {
    StorageBuffer(vk::DescriptorBufferInfo),
    UniformBufferDynamic(vk::DescriptorBufferInfo),
    StorageImage(vk::DescriptorImageInfo),
    AccelerationStructure(vk::AccelerationStructureKHR),
}

impl DescriptorInfo {
    pub fn descriptor_type(&self) -> vk::DescriptorType {
        match self {
            DescriptorInfo::StorageBuffer(_) => vk::DescriptorType::STORAGE_BUFFER,
            DescriptorInfo::UniformBufferDynamic(_) => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            DescriptorInfo::StorageImage(_) => vk::DescriptorType::STORAGE_IMAGE,
            DescriptorInfo::AccelerationStructure(_) => {
                vk::DescriptorType::ACCELERATION_STRUCTURE_KHR
            }
        }
    }
}

impl WriteDescriptorSet {
    pub fn storage_buffer<T>(binding: u32, buffer: &Buffer<T>) -> WriteDescriptorSet {
        Self::storage_buffer_array_element(binding, 0, buffer)
    }

    /// Write into one element of a storage buffer array binding. Used for
    /// the per-object buffers living behind a single partially bound
    /// binding.
    pub fn storage_buffer_array_element<T>(
        binding: u32,
        array_element: u32,
        buffer: &Buffer<T>,
    ) -> WriteDescriptorSet {
        let info = vk::DescriptorBufferInfo::builder()
            .buffer(buffer.inner)
            .offset(0)
            .range(vk::WHOLE_SIZE)
            .build();

        WriteDescriptorSet {
            binding,
            array_element,
            info: DescriptorInfo::StorageBuffer(info),
        }
    }

    /// Dynamic uniform buffer covering one region of `range` bytes; the
    /// per-frame offset is supplied at bind time.
    pub fn uniform_buffer_dynamic<T>(
        binding: u32,
        buffer: &Buffer<T>,
        range: vk::DeviceSize,
    ) -> WriteDescriptorSet {
        let info = vk::DescriptorBufferInfo::builder()
            .buffer(buffer.inner)
            .offset(0)
            .range(range)
            .build();

        WriteDescriptorSet {
            binding,
            array_element: 0,
            info: DescriptorInfo::UniformBufferDynamic(info),
        }
    }

    pub fn storage_image_view(binding: u32, image_view: &ImageView) -> WriteDescriptorSet {
        let info = vk::DescriptorImageInfo::builder()
            .image_view(image_view.inner)
            .image_layout(vk::ImageLayout::GENERAL)
            .build();

        WriteDescriptorSet {
            binding,
            array_element: 0,
            info: DescriptorInfo::StorageImage(info),
        }
    }

    pub fn acceleration_structure(
        binding: u32,
        acceleration_structure: &AccelerationStructure,
    ) -> WriteDescriptorSet {
        WriteDescriptorSet {
            binding,
            array_element: 0,
            info: DescriptorInfo::AccelerationStructure(acceleration_structure.inner),
        }
    }
}
