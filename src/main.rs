use clap::Parser;
use mandelbrot_renderer::{
    cli::{
        args::{CommandsEnum, MandelbrotRendererArgs},
        render::render_mandelbrot,
    },
    fractals::mandelbrot::RenderBackend,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: MandelbrotRendererArgs = MandelbrotRendererArgs::parse();

    let (params, backend) = match &args.command {
        Some(CommandsEnum::Render(params)) => (params, RenderBackend::WorkerPool),
        Some(CommandsEnum::RenderDirect(params)) => (params, RenderBackend::Direct),
        #[cfg(feature = "gpu")]
        Some(CommandsEnum::RenderGpu(params)) => (params, RenderBackend::Gpu),
        None => {
            println!("Default command (nothing specified!)");
            return Ok(());
        }
    };

    if let Err(error) = render_mandelbrot(&params.params_path, params.date_time_out, backend) {
        log::error!("render failed: {}", error.root_cause());
        return Err(error.into());
    }
    Ok(())
}
