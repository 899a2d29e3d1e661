//! wgpu back-end bound to a winit window.
//!
//! wgpu tracks texture usage and owns the swapchain images, so transitions
//! become debug markers and the ring index is logical. Fences are emulated
//! with queue completion callbacks.

mod backend;
mod device;
mod init;
mod surface;
mod swap;

pub use backend::GpuBackend;
pub use device::{GpuBlock, GpuDevice, GpuFence, GpuRecorder, GpuStorage, GpuTarget};
pub use init::GpuInit;
pub use swap::GpuSwap;
