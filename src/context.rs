use crate::archive::Format;
use crate::config::CompileOptions;
use crate::error::RdlError;
use crate::instance::ResourceInstance;
use crate::interpreter::Scopes;
use crate::lexer::Lexeme;
use crate::reference::Reference;
use crate::types::{DecoratorState, Decorators, TypeDefinition};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Ids below this are reserved; automatic ids start here.
pub const FIRST_AUTOMATIC_ID: i64 = 128;

/// Registered types in definition order, shared once registered.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: Vec<Arc<TypeDefinition>>,
    by_name: HashMap<String, usize>,
}

impl TypeRegistry {
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<TypeDefinition>> {
        self.by_name.get(name).map(|&index| &self.types[index])
    }

    /// Interns `definition`. A name that is already taken is handed back.
    pub fn register(&mut self, definition: TypeDefinition) -> Result<Arc<TypeDefinition>, String> {
        if self.contains(definition.name()) {
            return Err(definition.name().to_string());
        }
        let definition = Arc::new(definition);
        self.by_name
            .insert(definition.name().to_string(), self.types.len());
        self.types.push(Arc::clone(&definition));
        Ok(definition)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<TypeDefinition>> {
        self.types.iter()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// A `module Name { ... }` block and the types it defined.
#[derive(Debug, Clone, Serialize)]
pub struct Module {
    pub name: String,
    pub types: Vec<String>,
    #[serde(skip)]
    pub decorators: Decorators,
    #[serde(skip)]
    pub origin: Lexeme,
}

impl Module {
    pub fn new(name: impl Into<String>, decorators: Decorators, origin: Lexeme) -> Self {
        Self {
            name: name.into(),
            types: Vec::new(),
            decorators,
            origin,
        }
    }
}

/// Project information recorded by the metadata directives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copyright: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

impl Metadata {
    /// Stores `value` under the directive `key`. Returns `false` for keys
    /// that are not metadata.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> bool {
        let slot = match key {
            "project" => &mut self.project,
            "author" => &mut self.author,
            "version" => &mut self.version,
            "license" => &mut self.license,
            "copyright" => &mut self.copyright,
            "email" => &mut self.email,
            "website" => &mut self.website,
            _ => return false,
        };
        *slot = Some(value.into());
        true
    }
}

/// Everything one compilation accumulates. Every sub-parser borrows the same
/// context, and imported files are parsed into it.
#[derive(Debug)]
pub struct Context {
    pub types: TypeRegistry,
    pub modules: Vec<Module>,
    pub decorators: DecoratorState,
    pub scopes: Scopes,
    pub resources: Vec<ResourceInstance>,
    pub definitions: BTreeSet<String>,
    pub metadata: Metadata,
    pub output: Option<PathBuf>,
    pub search_paths: Vec<PathBuf>,
    /// Index into `modules` of the module being parsed.
    pub current_module: Option<usize>,
    format: Format,
    /// Set when the host chose the format; `@format set` is then ignored.
    format_locked: bool,
    import_stack: Vec<PathBuf>,
    imported: HashSet<PathBuf>,
    diagnostics: Vec<RdlError>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Self {
            types: TypeRegistry::default(),
            modules: Vec::new(),
            decorators: DecoratorState::default(),
            scopes: Scopes::new(),
            resources: Vec::new(),
            definitions: BTreeSet::new(),
            metadata: Metadata::default(),
            output: None,
            search_paths: Vec::new(),
            current_module: None,
            format: Format::default(),
            format_locked: false,
            import_stack: Vec::new(),
            imported: HashSet::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn from_options(options: &CompileOptions) -> Self {
        let mut context = Self::new();
        context.definitions = options.definitions.clone();
        context.search_paths = options.search_paths.clone();
        context.output = options.output.clone();
        if let Some(format) = options.format {
            context.format = format;
            context.format_locked = true;
        }
        context
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Applies `@format set`. Returns `false` when the host's choice wins.
    pub fn set_format(&mut self, format: Format) -> bool {
        if self.format_locked {
            log::debug!("ignoring `@format set {format}`, the host selected {}", self.format);
            return false;
        }
        self.format = format;
        true
    }

    /// Registers a type and records it in the current module.
    pub fn register_type(&mut self, definition: TypeDefinition) -> Result<Arc<TypeDefinition>, String> {
        let definition = self.types.register(definition)?;
        if let Some(module) = self.current_module.and_then(|i| self.modules.get_mut(i)) {
            module.types.push(definition.name().to_string());
        }
        log::debug!("registered type {} '{}'", definition.name(), definition.code());
        Ok(definition)
    }

    pub fn type_named(&self, name: &str) -> Option<&Arc<TypeDefinition>> {
        self.types.get(name)
    }

    pub fn module(&self, name: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Adds a module and makes it current, returning the previous one.
    pub fn enter_module(&mut self, module: Module) -> Result<Option<usize>, Module> {
        if self.module(&module.name).is_some() {
            return Err(module);
        }
        self.modules.push(module);
        Ok(self.current_module.replace(self.modules.len() - 1))
    }

    pub fn leave_module(&mut self, previous: Option<usize>) {
        self.current_module = previous;
    }

    /// The smallest free id of at least [`FIRST_AUTOMATIC_ID`] for a type
    /// within a container.
    pub fn next_id(&self, type_name: &str, container: Option<&str>) -> i64 {
        let taken: BTreeSet<i64> = self
            .resources
            .iter()
            .filter(|r| r.reference.type_name() == Some(type_name) && r.container() == container)
            .map(ResourceInstance::id)
            .collect();
        let mut id = FIRST_AUTOMATIC_ID;
        while taken.contains(&id) {
            id += 1;
        }
        id
    }

    pub fn resource(&self, reference: &Reference) -> Option<&ResourceInstance> {
        self.resources.iter().find(|r| r.same_slot(reference))
    }

    /// Stores a resource, replacing the one in the same slot. Returns the
    /// replaced resource.
    pub fn store_resource(&mut self, resource: ResourceInstance) -> Option<ResourceInstance> {
        match self
            .resources
            .iter()
            .position(|r| r.same_slot(&resource.reference))
        {
            Some(index) => Some(std::mem::replace(&mut self.resources[index], resource)),
            None => {
                self.resources.push(resource);
                None
            }
        }
    }

    /// Pushes `path` on the import stack. When the file is already being
    /// parsed, the cycle is returned as `a -> b -> a`.
    pub fn begin_import(&mut self, path: &Path) -> Result<(), String> {
        if let Some(start) = self.import_stack.iter().position(|p| p == path) {
            let cycle = self.import_stack[start..]
                .iter()
                .chain(std::iter::once(&path.to_path_buf()))
                .map(|p| display_name(p))
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(cycle);
        }
        self.import_stack.push(path.to_path_buf());
        Ok(())
    }

    pub fn end_import(&mut self) {
        if let Some(path) = self.import_stack.pop() {
            self.imported.insert(path);
        }
    }

    pub fn was_imported(&self, path: &Path) -> bool {
        self.imported.contains(path)
    }

    /// The file currently being parsed, if it came from disk.
    pub fn current_file(&self) -> Option<&Path> {
        self.import_stack.last().map(PathBuf::as_path)
    }

    /// Finds an imported file next to `from`, then on the search paths.
    pub fn resolve_import(&self, from: Option<&Path>, target: &str) -> Option<PathBuf> {
        let relative = match from.and_then(Path::parent) {
            Some(directory) => directory.join(target),
            None => PathBuf::from(target),
        };
        std::iter::once(relative)
            .chain(self.search_paths.iter().map(|p| p.join(target)))
            .find(|candidate| candidate.is_file())
            .map(|found| std::fs::canonicalize(&found).unwrap_or(found))
    }

    pub fn record(&mut self, error: RdlError) {
        log::debug!("recorded diagnostic: {error}");
        self.diagnostics.push(error);
    }

    pub fn diagnostics(&self) -> &[RdlError] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<RdlError> {
        std::mem::take(&mut self.diagnostics)
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;

    fn item() -> Arc<TypeDefinition> {
        Arc::new(TypeDefinition::new("Item", "ITEM"))
    }

    fn resource(id: i64, container: Option<&str>) -> ResourceInstance {
        let mut reference = Reference::new(id).with_type_name("Item");
        if let Some(container) = container {
            reference = reference.with_container(container);
        }
        ResourceInstance::new(reference, "", item())
    }

    #[test]
    fn test_duplicate_type() {
        let mut context = Context::new();
        context.register_type(TypeDefinition::new("Item", "ITEM")).unwrap();
        assert_eq!(
            context.register_type(TypeDefinition::new("Item", "ITM2")).unwrap_err(),
            "Item"
        );
        assert_eq!(context.types.len(), 1);
        assert_eq!(context.type_named("Item").unwrap().code(), "ITEM");
    }

    #[test]
    fn test_next_id_fills_gaps_per_container() {
        let mut context = Context::new();
        assert_eq!(context.next_id("Item", None), 128);
        context.store_resource(resource(128, None));
        context.store_resource(resource(130, None));
        context.store_resource(resource(129, Some("mods")));
        assert_eq!(context.next_id("Item", None), 129);
        assert_eq!(context.next_id("Item", Some("mods")), 128);
        assert_eq!(context.next_id("Sound", None), 128);
    }

    #[test]
    fn test_store_replaces_same_slot() {
        let mut context = Context::new();
        assert!(context.store_resource(resource(128, None)).is_none());
        let mut replacement = resource(128, None);
        replacement.name = "Shield".into();
        let replaced = context.store_resource(replacement).unwrap();
        assert_eq!(replaced.name, "");
        assert_eq!(context.resources.len(), 1);
        assert_eq!(context.resources[0].name, "Shield");
    }

    #[test]
    fn test_host_format_wins() {
        let options = CompileOptions::new().with_format(Format::Classic);
        let mut context = Context::from_options(&options);
        assert!(!context.set_format(Format::Rez));
        assert_eq!(context.format(), Format::Classic);

        let mut context = Context::new();
        assert!(context.set_format(Format::Rez));
        assert_eq!(context.format(), Format::Rez);
    }

    #[test]
    fn test_import_cycle() {
        let mut context = Context::new();
        context.begin_import(Path::new("/src/a.rdl")).unwrap();
        context.begin_import(Path::new("/src/b.rdl")).unwrap();
        let cycle = context.begin_import(Path::new("/src/a.rdl")).unwrap_err();
        assert_eq!(cycle, "a.rdl -> b.rdl -> a.rdl");

        context.end_import();
        assert!(context.was_imported(Path::new("/src/b.rdl")));
        assert_eq!(context.current_file(), Some(Path::new("/src/a.rdl")));
    }

    #[test]
    fn test_modules_record_types() {
        let origin = lex("test.rdl", "module").unwrap().remove(0);
        let mut context = Context::new();
        let previous = context
            .enter_module(Module::new("Items", Decorators::default(), origin.clone()))
            .unwrap();
        context.register_type(TypeDefinition::new("Item", "ITEM")).unwrap();
        context.leave_module(previous);
        context.register_type(TypeDefinition::new("Sound", "snd ")).unwrap();

        assert_eq!(context.module("Items").unwrap().types, vec!["Item".to_string()]);
        assert!(context
            .enter_module(Module::new("Items", Decorators::default(), origin))
            .is_err());
    }

    #[test]
    fn test_metadata_keys() {
        let mut metadata = Metadata::default();
        assert!(metadata.set("author", "Tom"));
        assert!(!metadata.set("import", "x"));
        assert_eq!(metadata.author.as_deref(), Some("Tom"));
    }
}
