use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::error::RenderError;

pub fn extract_base_name(path: &str) -> Result<&str, RenderError> {
    Path::new(path)
        .file_stem()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            RenderError::Configuration(format!("unable to extract base name from `{}`", path))
        })
}

/// `out/<project>/<params base name>[/<date time>]`, created if missing.
pub fn build_output_path_with_date_time(
    params_path: &str,
    project: &str,
    datetime: &Option<String>,
) -> Result<PathBuf, RenderError> {
    let mut dirs = vec!["out", project, extract_base_name(params_path)?];
    if let Some(inner_datetime_str) = datetime {
        dirs.push(inner_datetime_str);
    }

    let directory_path: PathBuf = dirs.iter().collect();
    std::fs::create_dir_all(&directory_path)?;
    Ok(directory_path)
}

pub fn date_time_string() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

pub fn maybe_date_time_string(enable: bool) -> Option<String> {
    enable.then(date_time_string)
}

/**
 * Store a path and prefix together, making it easy to generate a collection of
 * files with the same prefix but separate suffixes.
 */
pub struct FilePrefix {
    pub directory_path: PathBuf,
    pub file_base: String,
}

impl FilePrefix {
    pub fn with_suffix(&self, suffix: &str) -> PathBuf {
        self.directory_path.join(self.file_base.clone() + suffix)
    }

    pub fn create_file_with_suffix(
        &self,
        suffix: &str,
    ) -> Result<std::io::BufWriter<std::fs::File>, RenderError> {
        let file = std::fs::File::create(self.with_suffix(suffix))?;
        Ok(std::io::BufWriter::new(file))
    }
}

pub fn serialize_to_json<T: Serialize>(
    value: &T,
    file_prefix: &FilePrefix,
) -> Result<PathBuf, RenderError> {
    let path = file_prefix.with_suffix(".json");
    let writer = file_prefix.create_file_with_suffix(".json")?;
    serde_json::to_writer_pretty(writer, value)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_base_name() {
        assert_eq!(extract_base_name("params/seahorse.json").unwrap(), "seahorse");
        assert!(extract_base_name("").is_err());
    }

    #[test]
    fn test_file_prefix_suffix() {
        let prefix = FilePrefix {
            directory_path: PathBuf::from("out/mandelbrot"),
            file_base: "tiny".to_owned(),
        };
        assert_eq!(
            prefix.with_suffix("_diagnostics.txt"),
            PathBuf::from("out/mandelbrot/tiny_diagnostics.txt")
        );
    }

    #[test]
    fn test_date_time_string_shape() {
        let stamp = date_time_string();
        assert_eq!(stamp.len(), 15);
        assert_eq!(&stamp[8..9], "_");
        assert!(maybe_date_time_string(false).is_none());
    }
}
