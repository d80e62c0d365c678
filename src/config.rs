use crate::archive::Format;
use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Options a host passes to a compilation.
///
/// A `format` given here wins over `@format set` in the sources, and
/// `definitions` play the role of `-D` flags for `@condition`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOptions {
    pub definitions: BTreeSet<String>,
    pub format: Option<Format>,
    pub output: Option<PathBuf>,
    pub search_paths: Vec<PathBuf>,
}

/// The on-disk shape of [`CompileOptions`]. The format stays a string so an
/// unknown name gets its own diagnostic.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
struct RawOptions {
    definitions: Vec<String>,
    format: Option<String>,
    output: Option<PathBuf>,
    search_paths: Vec<PathBuf>,
}

impl TryFrom<RawOptions> for CompileOptions {
    type Error = ConfigError;

    fn try_from(raw: RawOptions) -> Result<Self, Self::Error> {
        let format = raw
            .format
            .map(|name| name.parse::<Format>())
            .transpose()
            .map_err(|name| ConfigError::UnknownFormat { name })?;
        Ok(CompileOptions {
            definitions: raw.definitions.into_iter().collect(),
            format,
            output: raw.output,
            search_paths: raw.search_paths,
        })
    }
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_definition(mut self, name: impl Into<String>) -> Self {
        self.definitions.insert(name.into());
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    #[must_use]
    pub fn with_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawOptions = serde_yaml::from_str(text).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        raw.try_into()
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawOptions = serde_json::from_str(text).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        raw.try_into()
    }

    /// Reads options from a `.json` file, or YAML for any other extension.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let options = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text)?,
            _ => Self::from_yaml_str(&text)?,
        };
        log::debug!("loaded compile options from {}", path.display());
        Ok(options)
    }
}
