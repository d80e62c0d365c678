use super::scope::{ScopeId, Scopes};
use super::statement::Statement;
use super::token::Token;
use super::InterpreterError;
use std::fmt;
use std::sync::Arc;

pub type NativeFn = dyn Fn(&[Token]) -> Result<Token, InterpreterError> + Send + Sync;

#[derive(Clone)]
pub enum FunctionBody {
    Native(Arc<NativeFn>),
    Script(Vec<Statement>),
}

impl fmt::Debug for FunctionBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionBody::Native(_) => f.write_str("Native(..)"),
            FunctionBody::Script(statements) => {
                f.debug_tuple("Script").field(&statements.len()).finish()
            }
        }
    }
}

/// A variable that a call copies back into its caller when it returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Watch {
    Exact(String),
    Prefix(String),
}

impl Watch {
    fn matches(&self, name: &str) -> bool {
        match self {
            Watch::Exact(watched) => name == watched,
            Watch::Prefix(prefix) => name.starts_with(prefix.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub parameters: Vec<String>,
    pub body: FunctionBody,
    pub watches: Vec<Watch>,
}

impl Function {
    pub fn native<F>(name: &str, parameters: &[&str], body: F) -> Self
    where
        F: Fn(&[Token]) -> Result<Token, InterpreterError> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            parameters: parameters.iter().map(ToString::to_string).collect(),
            body: FunctionBody::Native(Arc::new(body)),
            watches: Vec::new(),
        }
    }

    pub fn script(name: impl Into<String>, parameters: Vec<String>, body: Vec<Statement>) -> Self {
        Self {
            name: name.into(),
            parameters,
            body: FunctionBody::Script(body),
            watches: Vec::new(),
        }
    }

    #[must_use]
    pub fn watching(mut self, watch: Watch) -> Self {
        self.watches.push(watch);
        self
    }

    pub fn arity(&self) -> usize {
        self.parameters.len()
    }

    /// Runs the function on behalf of `caller`.
    ///
    /// Script bodies run in a fresh subscope where each parameter is bound by
    /// name and as `$1..$n`. The value of the last statement is returned, and
    /// any watched variables the body assigned are defined in `caller`.
    pub fn execute(
        &self,
        scopes: &mut Scopes,
        caller: ScopeId,
        arguments: &[Token],
    ) -> Result<Token, InterpreterError> {
        if arguments.len() < self.parameters.len() {
            return Err(InterpreterError::ArgumentCount {
                name: self.name.clone(),
                expected: self.parameters.len(),
                found: arguments.len(),
            });
        }
        let statements = match &self.body {
            FunctionBody::Native(native) => return native(arguments),
            FunctionBody::Script(statements) => statements,
        };

        let scope = scopes.subscope(caller);
        for (index, argument) in arguments.iter().enumerate() {
            if let Some(parameter) = self.parameters.get(index) {
                scopes.define(scope, parameter.clone(), argument.clone());
            }
            scopes.define(scope, (index + 1).to_string(), argument.clone());
        }

        let outcome = run(statements, scopes, scope);
        let committed: Vec<(String, Token)> = match outcome {
            Ok(_) if !self.watches.is_empty() => scopes
                .locals(scope)
                .filter(|(name, _)| self.watches.iter().any(|w| w.matches(name)))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            _ => Vec::new(),
        };
        scopes.release(scope);

        let result = outcome?;
        for (name, value) in committed {
            scopes.define(caller, name, value);
        }
        Ok(result)
    }
}

fn run(statements: &[Statement], scopes: &mut Scopes, scope: ScopeId) -> Result<Token, InterpreterError> {
    let mut last = Token::Integer(0);
    for statement in statements {
        last = statement.execute(scopes, scope)?;
    }
    Ok(last)
}
