use crate::{
    core::{
        error::RenderError,
        file_io::{
            build_output_path_with_date_time, extract_base_name, maybe_date_time_string,
            FilePrefix,
        },
    },
    fractals::mandelbrot::{self, MandelbrotParams, RenderBackend},
};

pub fn read_params(params_path: &str) -> Result<MandelbrotParams, RenderError> {
    let contents = std::fs::read_to_string(params_path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Output lands in `out/mandelbrot/<params base name>[/<date time>]/`.
pub fn render_mandelbrot(
    params_path: &str,
    date_time_out: bool,
    backend: RenderBackend,
) -> Result<FilePrefix, RenderError> {
    let params = read_params(params_path)?;
    let file_prefix = FilePrefix {
        directory_path: build_output_path_with_date_time(
            params_path,
            "mandelbrot",
            &maybe_date_time_string(date_time_out),
        )?,
        file_base: extract_base_name(params_path)?.to_owned(),
    };
    log::info!(
        "rendering `{}` into {}",
        params_path,
        file_prefix.directory_path.display()
    );
    mandelbrot::render(&params, backend, &file_prefix)?;
    Ok(file_prefix)
}
