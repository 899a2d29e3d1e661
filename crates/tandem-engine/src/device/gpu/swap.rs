use std::sync::Arc;

use crate::device::{DeviceError, Extent, SwapRing, SwapViews};

use super::device::{DeviceHealth, GpuTarget};
use super::surface;

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Presentation ring over a configured wgpu surface.
///
/// wgpu does not expose its swapchain images, so the ring index is a logical
/// counter advanced on every present.
pub struct GpuSwap {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    health: DeviceHealth,
    config: wgpu::SurfaceConfiguration,
    images: usize,
    index: usize,
    acquired: Option<(wgpu::SurfaceTexture, GpuTarget)>,
    depth: Option<Arc<wgpu::TextureView>>,
    views: Option<SwapViews>,
}

impl GpuSwap {
    pub(crate) fn new(
        surface: wgpu::Surface<'static>,
        device: wgpu::Device,
        health: DeviceHealth,
        config: wgpu::SurfaceConfiguration,
        images: usize,
    ) -> Self {
        Self {
            surface,
            device,
            health,
            config,
            images,
            index: 0,
            acquired: None,
            depth: None,
            views: None,
        }
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    pub fn size(&self) -> Extent {
        Extent::new(self.config.width, self.config.height)
    }

    pub fn views(&self) -> Option<SwapViews> {
        self.views
    }

    fn create_depth(&self) -> wgpu::TextureView {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("tandem depth"),
            size: wgpu::Extent3d {
                width: self.config.width,
                height: self.config.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        texture.create_view(&wgpu::TextureViewDescriptor::default())
    }
}

impl SwapRing for GpuSwap {
    type Target = GpuTarget;

    fn image_count(&self) -> usize {
        self.images
    }

    fn current_index(&self) -> usize {
        self.index
    }

    fn target(&mut self) -> Result<GpuTarget, DeviceError> {
        self.health.check()?;
        if let Some((_, target)) = &self.acquired {
            return Ok(target.clone());
        }

        let texture = self
            .surface
            .get_current_texture()
            .map_err(|e| surface::map_surface_error(&self.surface, &self.device, &self.config, e))?;
        if texture.suboptimal {
            log::debug!("surface texture is suboptimal");
        }

        let view = texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let target = GpuTarget {
            view: Arc::new(view),
            depth: self.depth.clone(),
            format: self.config.format,
            size: self.size(),
            index: self.index,
        };
        self.acquired = Some((texture, target.clone()));
        Ok(target)
    }

    fn present(&mut self) -> Result<(), DeviceError> {
        self.health.check()?;
        match self.acquired.take() {
            Some((texture, _)) => texture.present(),
            None => log::warn!("present without an acquired surface texture"),
        }
        self.index = (self.index + 1) % self.images;
        Ok(())
    }

    fn resize(&mut self, size: Extent) -> Result<(), DeviceError> {
        if size.is_empty() {
            return Err(DeviceError::SurfaceUnavailable("cannot configure a zero-area surface".into()));
        }

        self.health.check()?;
        self.acquired = None;
        self.config.width = size.width;
        self.config.height = size.height;
        self.surface.configure(&self.device, &self.config);
        self.index = 0;
        Ok(())
    }

    fn create_views(&mut self, views: &SwapViews) -> Result<(), DeviceError> {
        self.depth = Some(Arc::new(self.create_depth()));
        self.views = Some(*views);
        log::debug!(
            "bound swap views: render targets {:#x}, depth {:#x}",
            views.render_targets.raw(),
            views.depth_stencil.raw()
        );
        Ok(())
    }

    fn release_views(&mut self) {
        self.acquired = None;
        self.depth = None;
        self.views = None;
    }
}
