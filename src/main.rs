mod camera;
mod config_loader;
mod loader;
mod renderer;
mod shader_types;
mod time;
mod utility;
mod vulkan;

use std::path::Path;
use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use ultraviolet::Vec4;
use winit::dpi::{self, PhysicalSize};
use winit::event::{ElementState, Event, KeyboardInput, VirtualKeyCode, WindowEvent};
use winit::event_loop::EventLoop;
use winit::window::{Window, WindowBuilder};

use camera::OrbitCamera;
use config_loader::{Config, ConfigFileLoader};
use loader::LoadedScene;
use renderer::{Renderer, FRAME_COUNT};
use shader_types::SceneConstants;
use time::Time;
use vulkan::command_pool::CommandPool;
use vulkan::context::Context;
use vulkan::swapchain::SwapchainContainer;

struct RayboxApp {
    device_state: DeviceState,

    scene: LoadedScene,
    camera: OrbitCamera,
    time: Time,
    frame_stats: FrameStats,
    config: Config,

    window: Window,
}

/// Everything that hangs off one logical device. Replaced wholesale when
/// the device is lost; the CPU-side scene survives and seeds the rebuild.
// Rust will drop these fields in the order they are declared
struct DeviceState {
    renderer: Renderer,

    command_buffers: Vec<vk::CommandBuffer>,
    present_complete_semaphores: Vec<vk::Semaphore>,
    rendering_complete_semaphores: Vec<vk::Semaphore>,
    draw_fences: Vec<vk::Fence>,

    frame_index: usize,
    should_recreate_swapchain: bool,

    swapchain: SwapchainContainer,
    command_pool: CommandPool,
    allocator: Arc<Mutex<Allocator>>,
    context: Arc<Context>,
}

impl DeviceState {
    fn new(window: &Window, scene: &LoadedScene, config: &Config) -> Self {
        let context = Arc::new(Context::new(window));

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: context.instance.clone(),
            device: context.device.clone(),
            physical_device: context.physical_device,
            debug_settings: Default::default(),
            // Acceleration structure builds and shader binding tables
            // reference buffers by device address.
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        })
        .expect("Could not create allocator");
        let allocator = Arc::new(Mutex::new(allocator));

        let swapchain = SwapchainContainer::new(
            context.clone(),
            window.inner_size(),
            config.present_mode.into(),
        );

        let command_pool = CommandPool::new(context.clone());

        let renderer = Renderer::new(
            context.clone(),
            allocator.clone(),
            command_pool.clone(),
            scene,
            swapchain.extent,
        )
        .expect("Could not build renderer");

        let device = &context.device;

        let command_buffers = {
            let allocate_info = vk::CommandBufferAllocateInfo::builder()
                .command_buffer_count(FRAME_COUNT as u32)
                .command_pool(*command_pool)
                .level(vk::CommandBufferLevel::PRIMARY);

            unsafe { device.allocate_command_buffers(&allocate_info) }
                .expect("Could not allocate command buffers")
        };

        let mut present_complete_semaphores = Vec::with_capacity(FRAME_COUNT);
        let mut rendering_complete_semaphores = Vec::with_capacity(FRAME_COUNT);
        let mut draw_fences = Vec::with_capacity(FRAME_COUNT);
        for _ in 0..FRAME_COUNT {
            let semaphore_info = vk::SemaphoreCreateInfo::builder();
            present_complete_semaphores.push(
                unsafe { device.create_semaphore(&semaphore_info, None) }
                    .expect("Could not create present semaphore"),
            );
            rendering_complete_semaphores.push(
                unsafe { device.create_semaphore(&semaphore_info, None) }
                    .expect("Could not create rendering complete semaphore"),
            );

            let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);
            draw_fences.push(
                unsafe { device.create_fence(&fence_info, None) }
                    .expect("Could not create fence"),
            );
        }

        Self {
            renderer,
            command_buffers,
            present_complete_semaphores,
            rendering_complete_semaphores,
            draw_fences,
            frame_index: 0,
            should_recreate_swapchain: false,
            swapchain,
            command_pool,
            allocator,
            context,
        }
    }
}

impl Drop for DeviceState {
    fn drop(&mut self) {
        let device = &self.context.device;

        // Fails on a lost device; the rebuild replaces everything anyway.
        let _ = unsafe { device.device_wait_idle() };

        for i in 0..FRAME_COUNT {
            unsafe { device.destroy_semaphore(self.present_complete_semaphores[i], None) };
            unsafe { device.destroy_semaphore(self.rendering_complete_semaphores[i], None) };
            unsafe { device.destroy_fence(self.draw_fences[i], None) };
        }
        unsafe { device.free_command_buffers(*self.command_pool, &self.command_buffers) };
    }
}

/// Frames-per-second and rays-per-second, reported once per second in the
/// window title.
struct FrameStats {
    frames: u32,
    last_report_seconds: f64,
}

impl FrameStats {
    fn new() -> Self {
        Self {
            frames: 0,
            last_report_seconds: 0.0,
        }
    }

    fn frame_done(&mut self, window: &Window, time: &Time, rays_per_frame: u64) {
        self.frames += 1;
        let total = time.total_seconds();
        let elapsed = total - self.last_report_seconds;
        if elapsed >= 1.0 {
            let fps = self.frames as f64 / elapsed;
            let mrays_per_second = fps * rays_per_frame as f64 / 1.0e6;
            window.set_title(&format!(
                "raybox | {fps:.0} fps | {mrays_per_second:.2} MRays/s"
            ));
            self.frames = 0;
            self.last_report_seconds = total;
        }
    }
}

impl RayboxApp {
    pub fn new(event_loop: &EventLoop<()>, config: Config) -> Self {
        let window = WindowBuilder::new()
            .with_title("raybox")
            .with_inner_size(dpi::LogicalSize {
                width: config.window_width,
                height: config.window_height,
            })
            .build(event_loop)
            .expect("Could not create window");

        let scene =
            loader::load_scene(Path::new(&config.scene_path)).expect("Could not load scene");
        log::info!(
            "Loaded scene '{}': {} objects, {} materials",
            config.scene_path,
            scene.objects.len(),
            scene.materials.len()
        );

        let window_size = window.inner_size();
        let camera = OrbitCamera::new(window_size.width as f32 / window_size.height as f32);

        let device_state = DeviceState::new(&window, &scene, &config);

        Self {
            device_state,
            scene,
            camera,
            time: Time::new(),
            frame_stats: FrameStats::new(),
            config,
            window,
        }
    }

    pub fn main_loop(mut self, event_loop: EventLoop<()>) {
        event_loop.run(move |event, _, control_flow| {
            control_flow.set_poll();

            match event {
                Event::WindowEvent { event, .. } => match event {
                    WindowEvent::CloseRequested => {
                        control_flow.set_exit();
                    }
                    WindowEvent::Resized(PhysicalSize { width, height }) => {
                        if width > 0 && height > 0 {
                            self.camera
                                .update_aspect_ratio(width as f32 / height as f32);
                        }
                        self.device_state.should_recreate_swapchain = true;
                    }
                    WindowEvent::KeyboardInput {
                        input:
                            KeyboardInput {
                                virtual_keycode: Some(VirtualKeyCode::Escape),
                                state: ElementState::Pressed,
                                ..
                            },
                        ..
                    } => {
                        control_flow.set_exit();
                    }
                    _ => {}
                },
                Event::MainEventsCleared => {
                    self.window.request_redraw();
                }
                Event::RedrawRequested(_window_id) => {
                    self.update();
                    self.draw_frame();
                }
                _ => (),
            }
        });
    }

    fn update(&mut self) {
        self.time.update();
        self.camera.update(self.time.delta_seconds());
    }

    fn draw_frame(&mut self) {
        let window_size = self.window.inner_size();
        if window_size.width == 0 || window_size.height == 0 {
            return;
        }

        let state = &mut self.device_state;
        let device = &state.context.device;
        let frame_index = state.frame_index;
        let draw_fence = state.draw_fences[frame_index];

        unsafe { device.wait_for_fences(std::slice::from_ref(&draw_fence), true, u64::MAX) }
            .expect("Could not wait for fences");
        unsafe { device.reset_fences(std::slice::from_ref(&draw_fence)) }
            .expect("Could not reset fences");

        if state.should_recreate_swapchain {
            state.swapchain.recreate(window_size);
            state.renderer.resize(state.swapchain.extent);
            state.should_recreate_swapchain = false;
        }

        let present_complete_semaphore = state.present_complete_semaphores[frame_index];
        let rendering_complete_semaphore = state.rendering_complete_semaphores[frame_index];

        let acquire_result = unsafe {
            state.swapchain.loader.acquire_next_image(
                state.swapchain.inner,
                u64::MAX,
                present_complete_semaphore,
                vk::Fence::null(),
            )
        };

        let present_index = match acquire_result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    state.should_recreate_swapchain = true;
                }
                index
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                state.should_recreate_swapchain = true;
                // The fence was reset without a submission; re-signal it so
                // the next frame's wait does not deadlock.
                resignal_fence(device, state.context.queue, draw_fence);
                return;
            }
            Err(vk::Result::ERROR_DEVICE_LOST) => {
                self.rebuild_device();
                return;
            }
            Err(e) => panic!("Could not acquire next image: {e:?}"),
        };

        // The fence wait above retired this frame's constants region.
        let constants = scene_constants(&self.camera);
        state.renderer.update_constants(frame_index, &constants);

        let command_buffer = state.command_buffers[frame_index];
        unsafe { device.reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty()) }
            .expect("Could not reset command buffer");

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.begin_command_buffer(command_buffer, &begin_info) }
            .expect("Could not begin command buffer");

        state.renderer.trace(
            command_buffer,
            frame_index,
            state.swapchain.images[present_index as usize],
        );

        unsafe { device.end_command_buffer(command_buffer) }.expect("Could not end command buffer");

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(std::slice::from_ref(&present_complete_semaphore))
            .wait_dst_stage_mask(std::slice::from_ref(&vk::PipelineStageFlags::TRANSFER))
            .command_buffers(std::slice::from_ref(&command_buffer))
            .signal_semaphores(std::slice::from_ref(&rendering_complete_semaphore))
            .build();

        let submit_result = unsafe {
            device.queue_submit(
                state.context.queue,
                std::slice::from_ref(&submit_info),
                draw_fence,
            )
        };
        match submit_result {
            Ok(()) => {}
            Err(vk::Result::ERROR_DEVICE_LOST) => {
                self.rebuild_device();
                return;
            }
            Err(e) => panic!("Could not submit to queue: {e:?}"),
        }

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(std::slice::from_ref(&rendering_complete_semaphore))
            .swapchains(std::slice::from_ref(&state.swapchain.inner))
            .image_indices(std::slice::from_ref(&present_index));

        let present_result = unsafe {
            state
                .swapchain
                .loader
                .queue_present(state.context.queue, &present_info)
        };
        match present_result {
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                state.should_recreate_swapchain = true;
            }
            Ok(false) => {}
            Err(vk::Result::ERROR_DEVICE_LOST) => {
                self.rebuild_device();
                return;
            }
            Err(e) => panic!("Could not present queue: {e:?}"),
        };

        state.frame_index = (frame_index + 1) % FRAME_COUNT;

        let rays_per_frame = state.renderer.rays_per_frame();
        self.frame_stats
            .frame_done(&self.window, &self.time, rays_per_frame);
    }

    /// The device is gone; tear down everything that lived on it and build
    /// it again from the retained CPU scene.
    fn rebuild_device(&mut self) {
        log::error!("Device lost, rebuilding the renderer from the loaded scene");
        self.device_state = DeviceState::new(&self.window, &self.scene, &self.config);
    }
}

/// Re-signals a fence that was reset but never submitted, via an empty
/// submission.
fn resignal_fence(device: &ash::Device, queue: vk::Queue, fence: vk::Fence) {
    unsafe { device.queue_submit(queue, &[], fence) }.expect("Could not re-signal fence");
}

fn scene_constants(camera: &OrbitCamera) -> SceneConstants {
    let position = camera.position();
    SceneConstants {
        projection_to_world: camera.projection_to_world(),
        camera_position: Vec4::new(position.x, position.y, position.z, 1.0),
        default_albedo: Vec4::new(1.0, 1.0, 1.0, 1.0),
        default_metal_and_roughness: Vec4::new(0.1, 0.8, 0.0, 0.0),
    }
}

fn main() {
    env_logger::init();

    let mut config_loader = ConfigFileLoader::new("config.json");
    let config = config_loader.load_config().clone();

    let event_loop = EventLoop::new();
    let app = RayboxApp::new(&event_loop, config);
    app.main_loop(event_loop);
}
