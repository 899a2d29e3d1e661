use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use bytemuck::{Pod, Zeroable};
use tandem_engine::agent::{
    AgentConfig, AgentGroup, AgentHandler, AgentTable, BuildCtx, ResourceAgent, ResourceBuilder, ThreadingMode,
};
use tandem_engine::core::{App, AppControl};
use tandem_engine::descriptor::{DescriptorFlags, DescriptorKind, DescriptorRange};
use tandem_engine::device::gpu::{GpuBackend, GpuDevice, GpuInit};
use tandem_engine::device::Extent;
use tandem_engine::frame::{FrameConfig, FrameContext, FrameOrchestrator, FrameOutcome, StaticTable};
use tandem_engine::logging::{init_logging, LoggingConfig};
use tandem_engine::window::{RedrawMode, Runtime, RuntimeConfig};
use winit::window::Window;

const PALETTE: [[f32; 4]; 4] = [
    [0.06, 0.08, 0.12, 1.0],
    [0.10, 0.22, 0.35, 1.0],
    [0.32, 0.16, 0.38, 1.0],
    [0.12, 0.30, 0.24, 1.0],
];

/// Frames spent fading between two palette entries.
const FADE_FRAMES: u64 = 240;

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct PaletteUniform {
    colors: [[f32; 4]; 4],
}

/// Uploads the palette into one shader-visible descriptor slot.
#[derive(Default)]
struct Palette {
    slot: Option<DescriptorRange<GpuDevice>>,
}

impl ResourceBuilder<GpuDevice> for Palette {
    fn build_resources(&mut self, ctx: &mut BuildCtx<'_, GpuDevice>) -> Result<()> {
        let allocator = ctx.allocator().context("no descriptor allocator")?;
        let slot = allocator
            .allocate_scoped(DescriptorKind::Resource, 1, DescriptorFlags::SHADER_VISIBLE)
            .context("palette descriptor allocation failed")?;

        let uniform = PaletteUniform { colors: PALETTE };
        let queue = ctx.device.queue();
        allocator
            .with_block(slot.handle(), |block, offset| {
                if let Some(buffer) = block.buffer() {
                    queue.write_buffer(buffer, offset, bytemuck::bytes_of(&uniform));
                }
            })
            .context("palette descriptor has no backing block")?;

        log::info!("palette uploaded to descriptor {:#x}", slot.handle().raw());
        self.slot = Some(slot);
        Ok(())
    }

    fn release_resources(&mut self, _frame: &FrameContext<GpuDevice>) {
        self.slot = None;
    }
}

/// Clears the swap image to a color fading through the palette.
struct Backdrop;

impl Backdrop {
    fn color_at(frame: u64) -> wgpu::Color {
        let from = PALETTE[(frame / FADE_FRAMES) as usize % PALETTE.len()];
        let to = PALETTE[(frame / FADE_FRAMES + 1) as usize % PALETTE.len()];
        let t = (frame % FADE_FRAMES) as f64 / FADE_FRAMES as f64;
        let mix = |i: usize| from[i] as f64 + (to[i] as f64 - from[i] as f64) * t;
        wgpu::Color {
            r: mix(0),
            g: mix(1),
            b: mix(2),
            a: 1.0,
        }
    }
}

impl AgentHandler<GpuDevice> for Backdrop {
    fn on_build(&mut self, ctx: &mut BuildCtx<'_, GpuDevice>) -> Result<()> {
        let Some(target) = ctx.target.cloned() else {
            return Ok(());
        };
        let color = Self::color_at(ctx.frame.frame_index());
        let Some(recorder) = ctx.recorder() else {
            return Ok(());
        };

        let _pass = recorder.encoder().begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("tandem backdrop pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &target.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(color),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: target.depth.as_deref().map(|view| wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        Ok(())
    }
}

struct Studio {
    presented: u64,
    window_start: Instant,
}

impl App for Studio {
    fn create_orchestrator(&mut self, window: Arc<Window>) -> Result<FrameOrchestrator<GpuBackend>> {
        let size = window.inner_size();
        let config = FrameConfig {
            initial_size: Extent::new(size.width, size.height),
            ..Default::default()
        };
        let mut orchestrator = FrameOrchestrator::new(GpuBackend::new(window, GpuInit::default()), config);

        let palette = orchestrator.spawn_agent(
            "palette",
            AgentConfig::resource_builder(ThreadingMode::Inline),
            ResourceAgent::new(Palette::default()),
        );
        let backdrop = orchestrator.spawn_agent("backdrop", AgentConfig::default(), Backdrop);

        orchestrator.set_frame_source(StaticTable::new(
            AgentTable::new()
                .with_group(AgentGroup::of([&palette]))
                .with_group(AgentGroup::of([&backdrop])),
        ));
        Ok(orchestrator)
    }

    fn on_frame(&mut self, _orchestrator: &mut FrameOrchestrator<GpuBackend>, outcome: FrameOutcome) -> AppControl {
        match outcome {
            FrameOutcome::Presented => self.presented += 1,
            FrameOutcome::DeviceLost => log::warn!("device lost, rebuilding on next frame"),
            FrameOutcome::Skipped => {}
        }

        let elapsed = self.window_start.elapsed();
        if elapsed.as_secs() >= 5 {
            log::info!("{:.1} fps", self.presented as f64 / elapsed.as_secs_f64());
            self.presented = 0;
            self.window_start = Instant::now();
        }
        AppControl::Continue
    }
}

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());

    let config = RuntimeConfig {
        title: "tandem studio".to_string(),
        redraw: RedrawMode::Continuous,
        ..Default::default()
    };
    Runtime::run(
        config,
        Studio {
            presented: 0,
            window_start: Instant::now(),
        },
    )
}
