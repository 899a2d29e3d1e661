use std::sync::Arc;

use winit::window::Window;

use crate::device::{Backend, DeviceError, Extent};

use super::device::{DeviceHealth, GpuDevice};
use super::init::GpuInit;
use super::surface;
use super::swap::GpuSwap;

/// Connects wgpu to a window. Every connect creates a fresh instance,
/// surface, adapter and device.
pub struct GpuBackend {
    window: Arc<Window>,
    init: GpuInit,
}

impl GpuBackend {
    pub fn new(window: Arc<Window>, init: GpuInit) -> Self {
        Self { window, init }
    }

    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }

    async fn connect_async(&self, size: Extent, images: usize) -> Result<(Arc<GpuDevice>, GpuSwap), DeviceError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: self.init.backends,
            ..Default::default()
        });

        // The surface holds its own handle to the window, so it is 'static.
        let surface = instance
            .create_surface(Arc::clone(&self.window))
            .map_err(|e| DeviceError::creation("surface", e.to_string()))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: self.init.power_preference,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| DeviceError::NoAdapter(e.to_string()))?;

        let info = adapter.get_info();
        log::info!("using adapter '{}' ({:?})", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("tandem device"),
                required_features: self.init.required_features,
                required_limits: self.init.required_limits.clone(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| DeviceError::creation("device", e.to_string()))?;

        let health = DeviceHealth::default();
        device.set_device_lost_callback({
            let health = health.clone();
            move |reason, message| health.mark_lost(&format!("{reason:?}: {message}"))
        });

        let caps = surface.get_capabilities(&adapter);
        let format = surface::choose_surface_format(&caps.formats, self.init.prefer_srgb)
            .ok_or_else(|| DeviceError::creation("surface", "no supported surface formats"))?;
        let alpha_mode = surface::choose_alpha_mode(&caps.alpha_modes, self.init.alpha_mode);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: self.init.present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: surface::frame_latency(images, self.init.max_frame_latency),
        };
        surface.configure(&device, &config);
        log::debug!("surface configured: {format:?}, {}x{}", config.width, config.height);

        let gpu = Arc::new(GpuDevice::new(info, device.clone(), queue, format, health.clone()));
        Ok((gpu, GpuSwap::new(surface, device, health, config, images)))
    }
}

impl Backend for GpuBackend {
    type Device = GpuDevice;
    type Swap = GpuSwap;

    fn connect(&mut self, size: Extent, image_count: usize) -> Result<(Arc<GpuDevice>, GpuSwap), DeviceError> {
        pollster::block_on(self.connect_async(size, image_count))
    }
}
