use crate::archive::{ArchiveWriter, Format, ResourceEntry};
use crate::config::CompileOptions;
use crate::context::{Context, Metadata, Module};
use crate::encoder;
use crate::error::RdlError;
use crate::instance::ResourceInstance;
use crate::lexer::SourceFile;
use crate::parser::parse_source;
use crate::serialization::{manifest, Manifest};
use crate::types::TypeDefinition;
use serde::{Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Types every compilation starts with.
pub const PRELUDE: &str = r#"
@builtin @no_declaration
type Rect : "RECT" {
    template { DWRD top; DWRD left; DWRD bottom; DWRD right; };
    constructor(top, left, bottom, right) {
        this.top = top;
        this.left = left;
        this.bottom = bottom;
        this.right = right;
    };
};

@builtin
type StringList : "STR#" {
    template { OCNT count; LSTC start; PSTR text; LSTE end; };
    field("Str") repeatable<0, 32767, count> { text; };
};

@builtin
type StringResource : "STR " {
    template { CSTR text; HEXD data; };
    field("Str") { text; };
};
"#;

/// The result of a successful compilation: every registered type, every
/// declared resource, and the archive holding their encoded bytes.
#[derive(Debug)]
pub struct Compilation {
    pub types: Vec<Arc<TypeDefinition>>,
    pub resources: Vec<ResourceInstance>,
    pub metadata: Metadata,
    pub modules: Vec<Module>,
    pub format: Format,
    /// Where `@out` (or the host) asked the archive to go.
    pub output: Option<PathBuf>,
    pub archive: ArchiveWriter,
}

impl Serialize for Compilation {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.manifest().serialize(serializer)
    }
}

impl Compilation {
    #[must_use]
    pub fn type_named(&self, name: &str) -> Option<&Arc<TypeDefinition>> {
        self.types.iter().find(|definition| definition.name() == name)
    }

    /// The resource of type `type_name` with `id`, outside any container.
    #[must_use]
    pub fn resource(&self, type_name: &str, id: i64) -> Option<&ResourceInstance> {
        self.resources.iter().find(|resource| {
            resource.definition.name() == type_name && resource.id() == id && resource.container().is_none()
        })
    }

    /// The encoded bytes of `resource`.
    #[must_use]
    pub fn data(&self, resource: &ResourceInstance) -> Option<&[u8]> {
        let container = resource.container();
        self.archive
            .entries()
            .iter()
            .find(|entry| {
                entry.type_code == resource.type_code()
                    && entry.id == resource.id()
                    && entry.attributes.get("container").map(String::as_str) == container
            })
            .map(|entry| entry.data.as_slice())
    }

    #[must_use]
    pub fn manifest(&self) -> Manifest<'_> {
        manifest(self)
    }

    /// Lays the archive out in the active format.
    ///
    /// # Errors
    /// Returns an `ArchiveError` when the format can not hold a resource.
    pub fn to_bytes(&self) -> Result<Vec<u8>, RdlError> {
        Ok(self.archive.to_bytes()?)
    }

    /// Writes the archive to `path`. Nothing is written unless the whole
    /// archive is.
    ///
    /// # Errors
    /// Returns an `ArchiveError` if the archive can not be laid out or written.
    pub fn write(&self, path: &Path) -> Result<(), RdlError> {
        Ok(self.archive.write(path)?)
    }

    /// Writes the archive to the output path, if one was given. Returns the
    /// path written.
    ///
    /// # Errors
    /// Returns an `ArchiveError` if the archive can not be laid out or written.
    pub fn write_output(&self) -> Result<Option<&Path>, RdlError> {
        let Some(path) = self.output.as_deref() else {
            return Ok(None);
        };
        self.write(path)?;
        Ok(Some(path))
    }

    /// Serializes the manifest into a pretty-printed JSON string.
    ///
    /// # Errors
    /// Returns a `serde_json::Error` if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self)
    }

    /// Serializes the manifest into a YAML string.
    ///
    /// # Errors
    /// Returns a `serde_yaml::Error` if serialization fails.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&self)
    }
}

/// Compiles source text with default options.
///
/// # Errors
/// Returns an `RdlError` if lexing, parsing, analysis or encoding fails. When
/// more than one construct failed, the error is `RdlError::Failed` with each
/// diagnostic attached.
pub fn compile(source: &str, file_name: &str) -> Result<Compilation, RdlError> {
    compile_with_options(source, file_name, &CompileOptions::default())
}

/// Compiles source text. Relative imports resolve against the working
/// directory and `options.search_paths`.
///
/// # Errors
/// See [`compile`].
pub fn compile_with_options(
    source: &str,
    file_name: &str,
    options: &CompileOptions,
) -> Result<Compilation, RdlError> {
    let mut context = prepared_context(options)?;
    let file = SourceFile::new(file_name, source);
    if let Err(error) = parse_source(&mut context, &file) {
        context.record(error);
    }
    finish(context)
}

/// Compiles the file at `path`. Imports resolve against the file's directory
/// first, then `options.search_paths`.
///
/// # Errors
/// See [`compile`]. A file that can not be read is `RdlError::Io`.
pub fn compile_file(path: &Path, options: &CompileOptions) -> Result<Compilation, RdlError> {
    let io_error = |error: std::io::Error| RdlError::Io {
        path: path.display().to_string(),
        message: error.to_string(),
    };
    let path = std::fs::canonicalize(path).map_err(io_error)?;
    let contents = std::fs::read_to_string(&path).map_err(io_error)?;

    let mut context = prepared_context(options)?;
    let file = SourceFile::new(path.display().to_string(), contents);
    if let Err(cycle) = context.begin_import(&path) {
        return Err(RdlError::Io {
            path: path.display().to_string(),
            message: format!("import cycle {cycle}"),
        });
    }
    let outcome = parse_source(&mut context, &file);
    context.end_import();
    if let Err(error) = outcome {
        context.record(error);
    }
    finish(context)
}

fn prepared_context(options: &CompileOptions) -> Result<Context, RdlError> {
    let mut context = Context::from_options(options);
    let prelude = SourceFile::new("<prelude>", PRELUDE);
    parse_source(&mut context, &prelude)?;
    match RdlError::from_diagnostics(context.take_diagnostics()) {
        Some(error) => Err(error),
        None => Ok(context),
    }
}

/// Fails on any recorded diagnostic, then encodes every resource into the
/// archive.
fn finish(mut context: Context) -> Result<Compilation, RdlError> {
    if let Some(error) = RdlError::from_diagnostics(context.take_diagnostics()) {
        return Err(error);
    }

    let format = context.format();
    let mut archive = ArchiveWriter::new(format);
    let mut failures = Vec::new();
    for resource in &context.resources {
        let entry = encoder::encode(resource, format)
            .map_err(RdlError::from)
            .and_then(|data| {
                let entry = ResourceEntry::new(resource.type_code(), resource.id(), resource.name.as_str(), data);
                let entry = match resource.container() {
                    Some(container) => entry.with_attribute("container", container),
                    None => entry,
                };
                archive.add(entry).map_err(RdlError::from)
            });
        if let Err(error) = entry {
            failures.push(error);
        }
    }
    if let Some(error) = RdlError::from_diagnostics(failures) {
        return Err(error);
    }

    log::info!(
        "compiled {} types and {} resources ({} format)",
        context.types.len(),
        context.resources.len(),
        format
    );
    Ok(Compilation {
        types: context.types.iter().cloned().collect(),
        resources: context.resources,
        metadata: context.metadata,
        modules: context.modules,
        format,
        output: context.output,
        archive,
    })
}
