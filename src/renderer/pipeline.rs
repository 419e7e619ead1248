use std::sync::Arc;

use ash::vk;

use crate::include_shader;
use crate::vulkan::context::Context;

use super::slots;

/// The ray tracing pipeline: ray generation, miss and closest hit stages in
/// three shader groups, plus the two descriptor set layouts the renderer
/// binds against (set 0 the scene table, set 1 the per-frame constants).
pub struct RaytracingPipeline {
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    pub scene_set_layout: vk::DescriptorSetLayout,
    pub constants_set_layout: vk::DescriptorSetLayout,

    context: Arc<Context>,
}

impl RaytracingPipeline {
    pub fn new(context: &Arc<Context>) -> Self {
        let scene_set_layout = create_scene_set_layout(context);
        let constants_set_layout = create_constants_set_layout(context);

        let pipeline_layout = {
            let set_layouts = [scene_set_layout, constants_set_layout];
            let create_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
            unsafe { context.device.create_pipeline_layout(&create_info, None) }
                .expect("Could not create pipeline layout")
        };

        let mut raygen_shader = include_shader!(
            context.clone(),
            vk::ShaderStageFlags::RAYGEN_KHR,
            "/raytracing.rgen.spv"
        );
        let mut miss_shader = include_shader!(
            context.clone(),
            vk::ShaderStageFlags::MISS_KHR,
            "/raytracing.rmiss.spv"
        );
        let mut closest_hit_shader = include_shader!(
            context.clone(),
            vk::ShaderStageFlags::CLOSEST_HIT_KHR,
            "/raytracing.rchit.spv"
        );

        let stages = [
            raygen_shader.build(),
            miss_shader.build(),
            closest_hit_shader.build(),
        ];

        // Stage indices into `stages`. The group order here fixes the
        // shader binding table record order.
        let groups = [
            vk::RayTracingShaderGroupCreateInfoKHR::builder()
                .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
                .general_shader(0)
                .closest_hit_shader(vk::SHADER_UNUSED_KHR)
                .any_hit_shader(vk::SHADER_UNUSED_KHR)
                .intersection_shader(vk::SHADER_UNUSED_KHR)
                .build(),
            vk::RayTracingShaderGroupCreateInfoKHR::builder()
                .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
                .general_shader(1)
                .closest_hit_shader(vk::SHADER_UNUSED_KHR)
                .any_hit_shader(vk::SHADER_UNUSED_KHR)
                .intersection_shader(vk::SHADER_UNUSED_KHR)
                .build(),
            vk::RayTracingShaderGroupCreateInfoKHR::builder()
                .ty(vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP)
                .general_shader(vk::SHADER_UNUSED_KHR)
                .closest_hit_shader(2)
                .any_hit_shader(vk::SHADER_UNUSED_KHR)
                .intersection_shader(vk::SHADER_UNUSED_KHR)
                .build(),
        ];

        // Primary rays only; lighting is computed in the hit shader without
        // tracing further.
        let create_info = vk::RayTracingPipelineCreateInfoKHR::builder()
            .stages(&stages)
            .groups(&groups)
            .max_pipeline_ray_recursion_depth(1)
            .layout(pipeline_layout);

        let pipeline = unsafe {
            context
                .context_raytracing
                .ray_tracing_pipeline
                .create_ray_tracing_pipelines(
                    vk::DeferredOperationKHR::null(),
                    vk::PipelineCache::null(),
                    std::slice::from_ref(&create_info),
                    None,
                )
        }
        .expect("Could not create ray tracing pipeline")[0];

        Self {
            pipeline,
            pipeline_layout,
            scene_set_layout,
            constants_set_layout,
            context: context.clone(),
        }
    }
}

fn create_scene_set_layout(context: &Arc<Context>) -> vk::DescriptorSetLayout {
    let bindings = [
        vk::DescriptorSetLayoutBinding::builder()
            .binding(slots::OUTPUT_TARGET_SLOT)
            .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::RAYGEN_KHR)
            .build(),
        vk::DescriptorSetLayoutBinding::builder()
            .binding(slots::TLAS_SLOT)
            .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::RAYGEN_KHR)
            .build(),
        vk::DescriptorSetLayoutBinding::builder()
            .binding(slots::POINT_LIGHTS_SLOT)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::CLOSEST_HIT_KHR)
            .build(),
        vk::DescriptorSetLayoutBinding::builder()
            .binding(slots::MATERIALS_SLOT)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::CLOSEST_HIT_KHR)
            .build(),
        // The per-object region lives behind one array binding sized to
        // the whole table; only the occupied elements are ever written.
        vk::DescriptorSetLayoutBinding::builder()
            .binding(slots::GEOMETRY_SLOTS_START)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .descriptor_count(slots::TABLE_CAPACITY - slots::GEOMETRY_SLOTS_START)
            .stage_flags(vk::ShaderStageFlags::CLOSEST_HIT_KHR)
            .build(),
    ];

    let binding_flags = [
        vk::DescriptorBindingFlags::empty(),
        vk::DescriptorBindingFlags::empty(),
        vk::DescriptorBindingFlags::empty(),
        vk::DescriptorBindingFlags::empty(),
        vk::DescriptorBindingFlags::PARTIALLY_BOUND,
    ];
    let mut binding_flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo::builder()
        .binding_flags(&binding_flags);

    let create_info = vk::DescriptorSetLayoutCreateInfo::builder()
        .bindings(&bindings)
        .push_next(&mut binding_flags_info);

    unsafe { context.device.create_descriptor_set_layout(&create_info, None) }
        .expect("Could not create descriptor set layout")
}

fn create_constants_set_layout(context: &Arc<Context>) -> vk::DescriptorSetLayout {
    let binding = vk::DescriptorSetLayoutBinding::builder()
        .binding(0)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
        .descriptor_count(1)
        .stage_flags(vk::ShaderStageFlags::RAYGEN_KHR | vk::ShaderStageFlags::CLOSEST_HIT_KHR)
        .build();

    let create_info =
        vk::DescriptorSetLayoutCreateInfo::builder().bindings(std::slice::from_ref(&binding));

    unsafe { context.device.create_descriptor_set_layout(&create_info, None) }
        .expect("Could not create descriptor set layout")
}

impl Drop for RaytracingPipeline {
    fn drop(&mut self) {
        let device = &self.context.device;
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            device.destroy_descriptor_set_layout(self.scene_set_layout, None);
            device.destroy_descriptor_set_layout(self.constants_set_layout, None);
        }
    }
}
