use super::builtins;
use super::function::Function;
use super::token::Token;
use super::InterpreterError;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Holds the builtins and top-level bindings.
    Root,
    /// A fresh child for a nested construct such as a type or resource body.
    Shadow,
    /// A child created for one function or constructor call.
    Subscope,
}

#[derive(Debug)]
struct Frame {
    parent: Option<ScopeId>,
    kind: ScopeKind,
    variables: HashMap<String, Token>,
    functions: HashMap<String, Arc<Function>>,
}

impl Frame {
    fn new(parent: Option<ScopeId>, kind: ScopeKind) -> Self {
        Self {
            parent,
            kind,
            variables: HashMap::new(),
            functions: HashMap::new(),
        }
    }
}

/// Scope frames stored in a stack-shaped arena.
///
/// Children always live above their parent, so releasing a scope drops every
/// scope created after it. Lookups walk the parent links up to the root.
#[derive(Debug)]
pub struct Scopes {
    frames: Vec<Frame>,
}

impl Default for Scopes {
    fn default() -> Self {
        Self::new()
    }
}

impl Scopes {
    /// A root scope with the builtin functions installed.
    pub fn new() -> Self {
        let mut scopes = Self {
            frames: vec![Frame::new(None, ScopeKind::Root)],
        };
        let root = scopes.root();
        for function in builtins::all() {
            scopes.add_function(root, function);
        }
        scopes
    }

    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn shadow(&mut self, parent: ScopeId) -> ScopeId {
        self.push(parent, ScopeKind::Shadow)
    }

    pub fn subscope(&mut self, parent: ScopeId) -> ScopeId {
        self.push(parent, ScopeKind::Subscope)
    }

    fn push(&mut self, parent: ScopeId, kind: ScopeKind) -> ScopeId {
        self.frames.push(Frame::new(Some(parent), kind));
        ScopeId(self.frames.len() - 1)
    }

    pub fn kind(&self, scope: ScopeId) -> Option<ScopeKind> {
        self.frames.get(scope.0).map(|frame| frame.kind)
    }

    pub fn parent(&self, scope: ScopeId) -> Option<ScopeId> {
        self.frames.get(scope.0).and_then(|frame| frame.parent)
    }

    /// Drops `scope` and everything created after it. The root is never dropped.
    pub fn release(&mut self, scope: ScopeId) {
        self.truncate(scope.0.max(1));
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn truncate(&mut self, depth: usize) {
        self.frames.truncate(depth.max(1));
    }

    pub fn define(&mut self, scope: ScopeId, name: impl Into<String>, value: Token) {
        if let Some(frame) = self.frames.get_mut(scope.0) {
            frame.variables.insert(name.into(), value);
        }
    }

    /// Binds `name` only when no scope on the chain already does.
    pub fn define_if_absent(&mut self, scope: ScopeId, name: &str, value: Token) {
        if self.lookup(scope, name).is_none() {
            self.define(scope, name, value);
        }
    }

    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<&Token> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let frame = self.frames.get(id.0)?;
            if let Some(value) = frame.variables.get(name) {
                return Some(value);
            }
            current = frame.parent;
        }
        None
    }

    pub fn resolve(&self, scope: ScopeId, name: &str) -> Result<Token, InterpreterError> {
        self.lookup(scope, name)
            .cloned()
            .ok_or_else(|| InterpreterError::UnknownVariable(name.to_string()))
    }

    /// Variables bound directly in `scope`, ignoring its ancestors.
    pub fn locals(&self, scope: ScopeId) -> impl Iterator<Item = (&String, &Token)> {
        self.frames
            .get(scope.0)
            .into_iter()
            .flat_map(|frame| frame.variables.iter())
    }

    /// Removes and returns the local bindings of `scope` whose names start
    /// with `prefix`, with the prefix stripped.
    pub fn take_locals_with_prefix(&mut self, scope: ScopeId, prefix: &str) -> Vec<(String, Token)> {
        let Some(frame) = self.frames.get_mut(scope.0) else {
            return Vec::new();
        };
        let names: Vec<String> = frame
            .variables
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect();
        let mut taken: Vec<(String, Token)> = names
            .into_iter()
            .filter_map(|name| {
                let value = frame.variables.remove(&name)?;
                Some((name[prefix.len()..].to_string(), value))
            })
            .collect();
        taken.sort_by(|a, b| a.0.cmp(&b.0));
        taken
    }

    pub fn add_function(&mut self, scope: ScopeId, function: Function) {
        if let Some(frame) = self.frames.get_mut(scope.0) {
            frame
                .functions
                .insert(function.name.clone(), Arc::new(function));
        }
    }

    pub fn function(&self, scope: ScopeId, name: &str) -> Option<Arc<Function>> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let frame = self.frames.get(id.0)?;
            if let Some(function) = frame.functions.get(name) {
                return Some(Arc::clone(function));
            }
            current = frame.parent;
        }
        None
    }

    /// Calls the function visible from `scope` named `name`.
    pub fn call(
        &mut self,
        scope: ScopeId,
        name: &str,
        arguments: &[Token],
    ) -> Result<Token, InterpreterError> {
        let function = self
            .function(scope, name)
            .ok_or_else(|| InterpreterError::UnknownFunction(name.to_string()))?;
        function.execute(self, scope, arguments)
    }
}
