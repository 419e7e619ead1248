use std::ops::Deref;

use ash::vk;

use super::command_pool::CommandPool;

/// A command buffer for the blocking one-shot submissions the scene build
/// path uses: record, submit, wait on a fence, free. Staging and scratch
/// buffers recorded into it can be dropped once `submit_and_wait` returns.
pub struct OneTimeCommands {
    inner: vk::CommandBuffer,
    pool: CommandPool,
}

impl OneTimeCommands {
    pub fn begin(pool: &CommandPool) -> Self {
        let device = &pool.context().device;

        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(**pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let command_buffer = unsafe { device.allocate_command_buffers(&allocate_info) }
            .expect("Could not allocate command buffer")[0];

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.begin_command_buffer(command_buffer, &begin_info) }
            .expect("Could not begin command buffer");

        Self {
            inner: command_buffer,
            pool: pool.clone(),
        }
    }

    pub fn submit_and_wait(self) {
        let context = self.pool.context();
        let device = &context.device;

        unsafe { device.end_command_buffer(self.inner) }.expect("Could not end command buffer");

        let fence = {
            let create_info = vk::FenceCreateInfo::builder();
            unsafe { device.create_fence(&create_info, None) }.expect("Could not create fence")
        };

        let submit_info =
            vk::SubmitInfo::builder().command_buffers(std::slice::from_ref(&self.inner));
        unsafe { device.queue_submit(context.queue, std::slice::from_ref(&submit_info), fence) }
            .expect("Could not submit command buffer");

        unsafe { device.wait_for_fences(std::slice::from_ref(&fence), true, u64::MAX) }
            .expect("Could not wait for fence");

        unsafe { device.destroy_fence(fence, None) };
        // The command buffer itself is freed by Drop.
    }
}

impl Drop for OneTimeCommands {
    fn drop(&mut self) {
        unsafe {
            self.pool
                .context()
                .device
                .free_command_buffers(*self.pool, std::slice::from_ref(&self.inner))
        };
    }
}

impl Deref for OneTimeCommands {
    type Target = vk::CommandBuffer;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
