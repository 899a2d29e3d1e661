use crate::device::DeviceError;

pub(crate) fn choose_surface_format(
    formats: &[wgpu::TextureFormat],
    prefer_srgb: bool,
) -> Option<wgpu::TextureFormat> {
    if prefer_srgb {
        let preferred = [
            wgpu::TextureFormat::Bgra8UnormSrgb,
            wgpu::TextureFormat::Rgba8UnormSrgb,
        ];
        for f in preferred {
            if formats.contains(&f) {
                return Some(f);
            }
        }
    }

    formats.first().copied()
}

pub(crate) fn choose_alpha_mode(
    modes: &[wgpu::CompositeAlphaMode],
    requested: Option<wgpu::CompositeAlphaMode>,
) -> wgpu::CompositeAlphaMode {
    requested
        .filter(|m| modes.contains(m))
        .or_else(|| modes.first().copied())
        .unwrap_or(wgpu::CompositeAlphaMode::Auto)
}

/// Frame latency hint for a ring of `images`.
pub(crate) fn frame_latency(images: usize, max: u32) -> u32 {
    let latency = images.saturating_sub(1).max(1) as u32;
    latency.min(max.max(1))
}

/// Maps an acquire failure to the scheduler's error taxonomy.
///
/// An outdated surface is reconfigured on the spot and the frame skipped.
pub(crate) fn map_surface_error(
    surface: &wgpu::Surface<'_>,
    device: &wgpu::Device,
    config: &wgpu::SurfaceConfiguration,
    err: wgpu::SurfaceError,
) -> DeviceError {
    match err {
        wgpu::SurfaceError::Lost => DeviceError::Lost("surface lost".into()),
        wgpu::SurfaceError::OutOfMemory => DeviceError::Lost("out of memory".into()),
        wgpu::SurfaceError::Outdated => {
            surface.configure(device, config);
            DeviceError::SurfaceUnavailable("surface outdated, reconfigured".into())
        }
        wgpu::SurfaceError::Timeout => DeviceError::SurfaceUnavailable("acquire timed out".into()),
        wgpu::SurfaceError::Other => DeviceError::SurfaceUnavailable("acquire failed".into()),
    }
}
