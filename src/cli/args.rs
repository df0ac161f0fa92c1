use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[clap(author, version, about)]
pub struct MandelbrotRendererArgs {
    #[command(subcommand)]
    pub command: Option<CommandsEnum>,
}

#[derive(Debug, Subcommand)]
pub enum CommandsEnum {
    /// Render through the scanline worker pool.
    Render(ParameterFilePath),
    /// Render every row in place on the rayon thread pool.
    RenderDirect(ParameterFilePath),
    /// Render the whole frame with the GPU fragment program.
    #[cfg(feature = "gpu")]
    RenderGpu(ParameterFilePath),
}

#[derive(Debug, Args)]
pub struct ParameterFilePath {
    pub params_path: String,

    #[clap(long, short)]
    pub date_time_out: bool,
}
