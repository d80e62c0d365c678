use super::type_definition::unknown_type;
use super::{evaluation_error, type_error, unexpected_lexeme, Parser};
use crate::error::{RdlError, SemanticError};
use crate::instance::{ResourceInstance, ValueMap};
use crate::interpreter::{read_path, Expression, ScopeId, Token};
use crate::lexer::{Lexeme, LexemeKind};
use crate::reference::Reference;
use crate::stream::Expectation;
use crate::types::{FieldTarget, FieldValue, TypeDefinition, TypeField};
use std::sync::Arc;

/// The right-hand side of an assignment and the lexeme it starts at.
type Operand = (Expression, Lexeme);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    New,
    Override,
    Duplicate,
}

impl BlockKind {
    fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "new" => Some(BlockKind::New),
            "override" => Some(BlockKind::Override),
            "duplicate" => Some(BlockKind::Duplicate),
            _ => None,
        }
    }
}

/// What a resource block's arguments amount to once references are set aside.
enum Arguments {
    Plain {
        id: Option<(i64, Lexeme)>,
        name: Option<String>,
    },
    Constructor(Vec<Token>),
}

impl Parser<'_> {
    /// Declaration ::= "declare" [ ( Identifier | String ) "." ] Identifier
    ///                 "{" { ResourceBlock } "}" [ ";" ]
    pub(super) fn parse_declaration(&mut self) -> Result<(), RdlError> {
        if self.claim_decorators().is_none() {
            return Ok(());
        }
        self.stream.ensure(&[Expectation::keyword("declare")])?;
        let (container, type_name) = self.parse_declared_type()?;
        self.stream.ensure(&[Expectation::kind(LexemeKind::LBrace)])?;

        let definition = self
            .context
            .type_named(&type_name.text)
            .cloned()
            .ok_or_else(|| unknown_type(&type_name))?;
        if !definition.is_declarable() {
            return Err(SemanticError::NotDeclarable {
                name: type_name.text.clone(),
                src: type_name.named_source(),
                span: type_name.span(),
            }
            .into());
        }
        if definition.decorators().has("deprecated") {
            log::warn!("{}: type `{}` is deprecated", type_name.location(), type_name.text);
        }

        while !self.at_kind(LexemeKind::RBrace) {
            self.ensure_not_finished()?;
            if self.at_kind(LexemeKind::Decorator) {
                self.parse_decorator()?;
                continue;
            }
            let definition = Arc::clone(&definition);
            let container = container.clone();
            self.guarded(move |parser| parser.parse_resource_block(&definition, container.as_deref()))?;
        }
        self.close_block()
    }

    fn parse_declared_type(&mut self) -> Result<(Option<String>, Lexeme), RdlError> {
        let first = self.stream.read()?;
        match first.kind {
            LexemeKind::String => {
                self.stream.ensure(&[Expectation::kind(LexemeKind::Dot)])?;
                Ok((Some(first.text), self.stream.read_identifier()?))
            }
            LexemeKind::Identifier if self.stream.accept(&Expectation::kind(LexemeKind::Dot)) => {
                Ok((Some(first.text), self.stream.read_identifier()?))
            }
            LexemeKind::Identifier => Ok((None, first)),
            _ => Err(unexpected_lexeme(&first, "a type name").into()),
        }
    }

    /// ResourceBlock ::= ( "new" | "override" | "duplicate" ) [ Arguments ]
    ///                   "{" { Decorator | Assignment } "}" [ ";" ]
    fn parse_resource_block(
        &mut self,
        definition: &Arc<TypeDefinition>,
        container: Option<&str>,
    ) -> Result<(), RdlError> {
        if self.claim_decorators().is_none() {
            return Ok(());
        }
        let keyword = self.stream.read_identifier()?;
        let kind = BlockKind::from_keyword(&keyword.text)
            .ok_or_else(|| unexpected_lexeme(&keyword, "`new`, `override` or `duplicate`"))?;
        let root = self.context.scopes.root();
        let arguments = if self.at_kind(LexemeKind::LParen) {
            self.parse_arguments(root)?
        } else {
            Vec::new()
        };
        let (references, rest): (Vec<_>, Vec<_>) = arguments
            .into_iter()
            .partition(|(token, _)| matches!(token, Token::Reference(_)));
        let mut references = references.into_iter().filter_map(|(token, at)| match token {
            Token::Reference(reference) => Some((reference, at)),
            _ => None,
        });

        let source = match kind {
            BlockKind::Duplicate => {
                let (reference, at) = references
                    .next()
                    .ok_or_else(|| invalid_id("`duplicate` needs the id of the resource to copy", &keyword))?;
                let reference = self.slot(definition, container, Some(&reference), &at)?;
                Some((reference, at))
            }
            _ => None,
        };
        let target = references.next();
        if let Some((_, extra)) = references.next() {
            return Err(invalid_id("a resource takes a single id", &extra));
        }

        let arguments = match definition.constructor(rest.len()) {
            Some(_) => Arguments::Constructor(rest.into_iter().map(|(token, _)| token).collect()),
            None => plain_arguments(definition, rest, &keyword)?,
        };
        let (id, given_name) = match &arguments {
            Arguments::Plain { id, name } => (id.clone(), name.clone()),
            Arguments::Constructor(_) => (None, None),
        };
        let explicit = match (target, id) {
            (Some(_), Some((_, at))) => return Err(invalid_id("the id is given twice", &at)),
            (Some((reference, at)), None) => Some((reference, at)),
            (None, Some((id, at))) => Some((Reference::new(id), at)),
            (None, None) => None,
        };
        let reference = match &explicit {
            Some((reference, at)) => self.slot(definition, container, Some(reference), at)?,
            None => self.slot(definition, container, None, &keyword)?,
        };

        // The starting values and name, before the constructor and body run.
        let existing = self.context.resource(&reference).cloned();
        let (name, start) = match kind {
            BlockKind::New => {
                if existing.is_some() {
                    return Err(duplicate_resource(&reference, &keyword));
                }
                (given_name.unwrap_or_default(), None)
            }
            BlockKind::Override => match existing {
                Some(existing) => (given_name.unwrap_or(existing.name), Some(existing.values)),
                None => (given_name.unwrap_or_default(), None),
            },
            BlockKind::Duplicate => {
                let Some((source, at)) = source else {
                    return Err(invalid_id("`duplicate` needs the id of the resource to copy", &keyword));
                };
                let copied = self
                    .context
                    .resource(&source)
                    .cloned()
                    .ok_or_else(|| unknown_resource(&source, &at))?;
                if existing.is_some() {
                    return Err(duplicate_resource(&reference, &keyword));
                }
                (given_name.unwrap_or(copied.name), Some(copied.values))
            }
        };

        let scope = self.context.scopes.shadow(root);
        self.context
            .scopes
            .define(scope, "id", Token::Integer(reference.id()));
        self.context
            .scopes
            .define(scope, "name", Token::String(name.clone()));

        let mut values = match start {
            Some(values) => {
                let mut values = values;
                self.refresh_synthesized(definition, &mut values, scope);
                values
            }
            None => {
                let mut values = ValueMap::new();
                self.apply_defaults(definition, &mut values, "", scope)?;
                values
            }
        };

        if let Arguments::Constructor(tokens) = &arguments {
            self.run_constructor(definition, &mut values, tokens, scope, &keyword)?;
        }

        self.stream.ensure(&[Expectation::kind(LexemeKind::LBrace)])?;
        while !self.at_kind(LexemeKind::RBrace) {
            self.ensure_not_finished()?;
            if self.at_kind(LexemeKind::Decorator) {
                self.parse_decorator()?;
            } else {
                self.parse_assignment(definition, &mut values, scope)?;
            }
        }
        self.close_block()?;

        self.pad_repeatables(definition, &mut values, scope)?;
        let types = &self.context.types;
        values.visit_tokens_mut(&mut |token| {
            if let Token::Reference(reference) = token {
                let code = reference
                    .type_code()
                    .is_none()
                    .then(|| reference.type_name().and_then(|name| types.get(name)))
                    .flatten()
                    .map(|target| target.code().to_string());
                if let Some(code) = code {
                    *reference = reference.clone().with_type_code(code);
                }
            }
        });
        self.context.scopes.release(scope);

        let mut resource = ResourceInstance::new(reference, name, Arc::clone(definition));
        resource.values = values;
        resource.origin = Some(keyword);
        log::debug!("declared {resource}");
        self.context.store_resource(resource);
        Ok(())
    }

    /// The slot a block writes to: the declared type, the reference's
    /// container or the declaration's, and a concrete id.
    fn slot(
        &self,
        definition: &TypeDefinition,
        container: Option<&str>,
        reference: Option<&Reference>,
        at: &Lexeme,
    ) -> Result<Reference, RdlError> {
        let id = match reference {
            Some(reference) if reference.is_any() => {
                return Err(invalid_id("`#?` can not name a resource", at));
            }
            Some(reference) => {
                if let Some(type_name) = reference.type_name() {
                    if type_name != definition.name() {
                        return Err(invalid_id(
                            &format!("`{reference}` names type `{type_name}`, not `{}`", definition.name()),
                            at,
                        ));
                    }
                }
                (!reference.is_auto()).then(|| reference.id())
            }
            None => None,
        };
        let container = reference
            .and_then(Reference::container)
            .or(container)
            .map(str::to_string);
        let id = id.unwrap_or_else(|| self.context.next_id(definition.name(), container.as_deref()));

        let slot = Reference::new(id)
            .with_type_name(definition.name())
            .with_type_code(definition.code());
        Ok(match container {
            Some(container) => slot.with_container(container),
            None => slot,
        })
    }

    fn run_constructor(
        &mut self,
        definition: &TypeDefinition,
        values: &mut ValueMap,
        arguments: &[Token],
        scope: ScopeId,
        at: &Lexeme,
    ) -> Result<(), RdlError> {
        let Some(constructor) = definition.constructor(arguments.len()) else {
            return Ok(());
        };
        log::trace!("{}: running {}/{}", at.location(), definition.name(), arguments.len());
        constructor
            .function
            .execute(&mut self.context.scopes, scope, arguments)
            .map_err(|e| evaluation_error(e, at))?;
        for (path, token) in self.context.scopes.take_locals_with_prefix(scope, "this.") {
            let operand = (Expression::Literal(token), at.clone());
            self.assign(definition, values, "", &path, std::slice::from_ref(&operand), scope, at)?;
        }
        Ok(())
    }

    /// Assignment ::= Path "=" Expression { "," Expression } ";"
    fn parse_assignment(
        &mut self,
        definition: &TypeDefinition,
        values: &mut ValueMap,
        scope: ScopeId,
    ) -> Result<(), RdlError> {
        if self.claim_decorators().is_none() {
            return Ok(());
        }
        let target = self
            .stream
            .peek()
            .cloned()
            .ok_or_else(|| self.stream.unexpected("an assignment"))?;
        let path = read_path(&mut self.stream)?;
        self.stream.ensure(&[Expectation::kind(LexemeKind::Equals)])?;
        let mut operands = vec![self.parse_expression()?];
        while self.stream.accept(&Expectation::kind(LexemeKind::Comma)) {
            operands.push(self.parse_expression()?);
        }
        self.stream.ensure(&[Expectation::kind(LexemeKind::Semi)])?;
        self.assign(definition, values, "", &path, &operands, scope, &target)
    }

    /// Stores `operands` under the field or value `path` names. Values land
    /// under `prefix`, which is how nested types write `origin.x`.
    #[allow(clippy::too_many_arguments)]
    fn assign(
        &mut self,
        definition: &TypeDefinition,
        values: &mut ValueMap,
        prefix: &str,
        path: &str,
        operands: &[Operand],
        scope: ScopeId,
        at: &Lexeme,
    ) -> Result<(), RdlError> {
        let resolved = definition.field_named(path).map_err(|e| type_error(e, at))?;
        let field = resolved.target.field;
        if let Some(reason) = &field.deprecated {
            log::warn!("{}: field `{}` is deprecated. {}", at.location(), field.name, reason);
        }
        let list_key = format!("{prefix}{}", field.name);

        if let Some(nested_path) = &resolved.nested_path {
            let value = single_value(resolved.target)
                .ok_or_else(|| type_error(crate::types::TypeError::UnknownField(path.to_string()), at))?;
            let nested = definition
                .nested_type(&value.name)
                .ok_or_else(|| type_error(crate::types::TypeError::UnknownField(path.to_string()), at))?;
            if field.is_repeatable() {
                self.ensure_entry(definition, field, values, &list_key, scope)?;
                if let Some(entry) = values.last_entry_mut(&list_key) {
                    let prefix = format!("{}.", value.name);
                    self.assign(nested, entry, &prefix, nested_path, operands, scope, at)?;
                }
                return Ok(());
            }
            let prefix = format!("{prefix}{}.", value.name);
            return self.assign(nested, values, &prefix, nested_path, operands, scope, at);
        }

        match resolved.target.value {
            Some(value) => {
                let operand = single_operand(path, operands, at)?;
                if field.is_repeatable() {
                    self.ensure_entry(definition, field, values, &list_key, scope)?;
                    if let Some(entry) = values.last_entry_mut(&list_key) {
                        self.assign_value(definition, value, entry, "", operand, scope)?;
                    }
                    Ok(())
                } else {
                    self.assign_value(definition, value, values, prefix, operand, scope)
                }
            }
            None => {
                if let Some((_, extra)) = operands.get(field.values.len()) {
                    return Err(SemanticError::ValueCount {
                        field: field.name.clone(),
                        expected: field.values.len(),
                        found: operands.len(),
                        src: extra.named_source(),
                        span: extra.span(),
                    }
                    .into());
                }
                if field.is_repeatable() {
                    let mut entry = self.default_entry(definition, field, scope)?;
                    for (value, operand) in field.values.iter().zip(operands) {
                        self.assign_value(definition, value, &mut entry, "", operand, scope)?;
                    }
                    values.push_entry(list_key, entry);
                    return Ok(());
                }
                for (value, operand) in field.values.iter().zip(operands) {
                    self.assign_value(definition, value, values, prefix, operand, scope)?;
                }
                Ok(())
            }
        }
    }

    fn assign_value(
        &mut self,
        definition: &TypeDefinition,
        value: &FieldValue,
        values: &mut ValueMap,
        prefix: &str,
        (expression, at): &Operand,
        scope: ScopeId,
    ) -> Result<(), RdlError> {
        if value.joined.is_empty() {
            let key = format!("{prefix}{}", value.name);
            return self.assign_expression(definition, value, values, &key, expression, scope, at);
        }
        self.assign_joined(definition, value, values, prefix, expression, scope, at)
    }

    /// Each joined part whose symbols the expression uses is evaluated with
    /// its own symbols bound and every other part's symbols bound to 0.
    #[allow(clippy::too_many_arguments)]
    fn assign_joined(
        &mut self,
        definition: &TypeDefinition,
        value: &FieldValue,
        values: &mut ValueMap,
        prefix: &str,
        expression: &Expression,
        scope: ScopeId,
        at: &Lexeme,
    ) -> Result<(), RdlError> {
        let referenced = expression.variables();
        let uses = |part: &FieldValue| {
            part.symbols
                .iter()
                .any(|symbol| referenced.contains(&symbol.name.as_str()))
        };
        let parts: Vec<&FieldValue> = value.parts().collect();
        if !parts.iter().any(|part| uses(*part)) {
            let key = format!("{prefix}{}", value.name);
            return self.assign_expression(definition, value, values, &key, expression, scope, at);
        }

        for part in parts.iter().copied().filter(|part| uses(*part)) {
            let inner = self.context.scopes.shadow(scope);
            for other in parts.iter().filter(|other| other.name != part.name) {
                for symbol in &other.symbols {
                    self.context
                        .scopes
                        .define(inner, symbol.name.clone(), Token::Integer(0));
                }
            }
            let outcome = self
                .bind_symbols(&part.symbols, inner)
                .and_then(|()| self.evaluate(expression, inner, at));
            self.context.scopes.release(inner);
            values.set(format!("{prefix}{}", part.name), coerce(part, outcome?));
        }
        Ok(())
    }

    /// Evaluates `expression` for `value` and stores it under `key`. A call
    /// to the value's nested type runs that type's constructor instead.
    #[allow(clippy::too_many_arguments)]
    fn assign_expression(
        &mut self,
        definition: &TypeDefinition,
        value: &FieldValue,
        values: &mut ValueMap,
        key: &str,
        expression: &Expression,
        scope: ScopeId,
        at: &Lexeme,
    ) -> Result<(), RdlError> {
        if let (Some(nested), Expression::Call { name, arguments }) =
            (definition.nested_type(&value.name), expression)
        {
            if name == nested.name() {
                return self.construct_nested(nested, arguments, values, key, scope, at);
            }
        }
        let inner = self.context.scopes.shadow(scope);
        let outcome = self
            .bind_symbols(&value.symbols, inner)
            .and_then(|()| self.evaluate(expression, inner, at));
        self.context.scopes.release(inner);
        values.set(key, coerce(value, outcome?));
        Ok(())
    }

    fn construct_nested(
        &mut self,
        nested: &TypeDefinition,
        arguments: &[Expression],
        values: &mut ValueMap,
        key: &str,
        scope: ScopeId,
        at: &Lexeme,
    ) -> Result<(), RdlError> {
        let tokens = arguments
            .iter()
            .map(|argument| self.evaluate(argument, scope, at))
            .collect::<Result<Vec<_>, _>>()?;
        let constructor = nested.constructor(tokens.len()).ok_or_else(|| {
            SemanticError::ConstructorArity {
                type_name: nested.name().to_string(),
                found: tokens.len(),
                expected: expected_arities(nested),
                src: at.named_source(),
                span: at.span(),
            }
        })?;

        let inner = self.context.scopes.shadow(scope);
        let outcome = constructor
            .function
            .execute(&mut self.context.scopes, inner, &tokens)
            .map_err(|e| evaluation_error(e, at));
        let written = self.context.scopes.take_locals_with_prefix(inner, "this.");
        self.context.scopes.release(inner);
        outcome?;

        for (path, token) in written {
            let token = match nested.field_named(&path) {
                Ok(resolved) if resolved.nested_path.is_none() => match single_value(resolved.target) {
                    Some(value) => coerce(value, token),
                    None => token,
                },
                _ => token,
            };
            values.set(format!("{key}.{path}"), token);
        }
        Ok(())
    }

    /// Defaults for a fresh resource. Synthesized fields read the variable
    /// of the same name from the resource scope.
    fn apply_defaults(
        &mut self,
        definition: &TypeDefinition,
        values: &mut ValueMap,
        prefix: &str,
        scope: ScopeId,
    ) -> Result<(), RdlError> {
        for field in definition.fields() {
            if field.is_repeatable() {
                values.ensure_list(format!("{prefix}{}", field.name));
                continue;
            }
            let lookup = field.synthesized && prefix.is_empty();
            for value in field.values.iter().flat_map(FieldValue::parts) {
                self.apply_default(definition, value, values, prefix, scope, lookup)?;
            }
        }
        Ok(())
    }

    fn apply_default(
        &mut self,
        definition: &TypeDefinition,
        value: &FieldValue,
        values: &mut ValueMap,
        prefix: &str,
        scope: ScopeId,
        lookup: bool,
    ) -> Result<(), RdlError> {
        let key = format!("{prefix}{}", value.name);
        if let Some(constant) = &value.constant {
            values.set(key, constant.clone());
            return Ok(());
        }
        if let Some(default) = &value.default {
            return self.assign_expression(definition, value, values, &key, &default.expression, scope, &default.origin);
        }
        if lookup {
            if let Some(token) = self.context.scopes.lookup(scope, &value.name).cloned() {
                values.set(key, coerce(value, token));
                return Ok(());
            }
        }
        if let Some(nested) = definition.nested_type(&value.name) {
            self.apply_defaults(nested, values, &format!("{key}."), scope)?;
        }
        Ok(())
    }

    /// Copied values keep everything except what follows from the new id and name.
    fn refresh_synthesized(&self, definition: &TypeDefinition, values: &mut ValueMap, scope: ScopeId) {
        let synthesized = definition
            .fields()
            .iter()
            .filter(|field| field.synthesized && !field.is_repeatable())
            .flat_map(|field| field.values.iter());
        for value in synthesized {
            if let Some(token) = self.context.scopes.lookup(scope, &value.name) {
                values.set(value.name.clone(), coerce(value, token.clone()));
            }
        }
    }

    fn default_entry(
        &mut self,
        definition: &TypeDefinition,
        field: &TypeField,
        scope: ScopeId,
    ) -> Result<ValueMap, RdlError> {
        let mut entry = ValueMap::new();
        for value in field.values.iter().flat_map(FieldValue::parts) {
            self.apply_default(definition, value, &mut entry, "", scope, false)?;
        }
        Ok(entry)
    }

    fn ensure_entry(
        &mut self,
        definition: &TypeDefinition,
        field: &TypeField,
        values: &mut ValueMap,
        list_key: &str,
        scope: ScopeId,
    ) -> Result<(), RdlError> {
        if values.last_entry_mut(list_key).is_none() {
            let entry = self.default_entry(definition, field, scope)?;
            values.push_entry(list_key, entry);
        }
        Ok(())
    }

    /// Repeatable fields get default entries up to their lower bound.
    fn pad_repeatables(
        &mut self,
        definition: &TypeDefinition,
        values: &mut ValueMap,
        scope: ScopeId,
    ) -> Result<(), RdlError> {
        for field in definition.fields() {
            let Some(repeatable) = &field.repeatable else {
                continue;
            };
            while i64::try_from(values.list(&field.name).len()).is_ok_and(|n| n < repeatable.lower) {
                let entry = self.default_entry(definition, field, scope)?;
                values.push_entry(field.name.clone(), entry);
            }
        }
        Ok(())
    }
}

/// The value a target stands for: the one it names, or the only one its field has.
fn single_value(target: FieldTarget<'_>) -> Option<&FieldValue> {
    target.value.or(match target.field.values.as_slice() {
        [only] => Some(only),
        _ => None,
    })
}

fn single_operand<'o>(
    path: &str,
    operands: &'o [Operand],
    at: &Lexeme,
) -> Result<&'o Operand, RdlError> {
    let at = match operands {
        [operand] => return Ok(operand),
        [_, (_, extra), ..] => extra,
        [] => at,
    };
    Err(SemanticError::ValueCount {
        field: path.to_string(),
        expected: 1,
        found: operands.len(),
        src: at.named_source(),
        span: at.span(),
    }
    .into())
}

fn coerce(value: &FieldValue, token: Token) -> Token {
    match &value.descriptor {
        Some(descriptor) => descriptor.coerce(token),
        None => token,
    }
}

/// Without a matching constructor the arguments must be `[id] [, name]`.
fn plain_arguments(
    definition: &TypeDefinition,
    rest: Vec<(Token, Lexeme)>,
    keyword: &Lexeme,
) -> Result<Arguments, RdlError> {
    let found = rest.len();
    let mut rest = rest.into_iter();
    let arguments = match (rest.next(), rest.next(), rest.next()) {
        (None, None, None) => Arguments::Plain { id: None, name: None },
        (Some((Token::Integer(id), at)), None, None) => Arguments::Plain {
            id: Some((id, at)),
            name: None,
        },
        (Some((Token::String(name), _)), None, None) => Arguments::Plain {
            id: None,
            name: Some(name),
        },
        (Some((Token::Integer(id), at)), Some((Token::String(name), _)), None) => Arguments::Plain {
            id: Some((id, at)),
            name: Some(name),
        },
        _ => {
            return Err(SemanticError::ConstructorArity {
                type_name: definition.name().to_string(),
                found,
                expected: expected_arities(definition),
                src: keyword.named_source(),
                span: keyword.span(),
            }
            .into())
        }
    };
    Ok(arguments)
}

fn expected_arities(definition: &TypeDefinition) -> String {
    let arities: Vec<String> = definition
        .constructors()
        .iter()
        .map(|constructor| constructor.arity().to_string())
        .collect();
    if arities.is_empty() {
        format!("`{}` takes an optional id followed by an optional name", definition.name())
    } else {
        format!(
            "`{}` takes an optional id and name, or {} arguments for its constructor",
            definition.name(),
            arities.join(" or ")
        )
    }
}

fn invalid_id(reason: &str, at: &Lexeme) -> RdlError {
    SemanticError::InvalidResourceId {
        reason: reason.to_string(),
        src: at.named_source(),
        span: at.span(),
    }
    .into()
}

fn duplicate_resource(reference: &Reference, at: &Lexeme) -> RdlError {
    SemanticError::DuplicateResource {
        resource: reference.to_string(),
        src: at.named_source(),
        span: at.span(),
    }
    .into()
}

fn unknown_resource(reference: &Reference, at: &Lexeme) -> RdlError {
    SemanticError::UnknownResource {
        resource: reference.to_string(),
        src: at.named_source(),
        span: at.span(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use crate::context::Context;
    use crate::error::{RdlError, SemanticError};
    use crate::interpreter::Token;
    use crate::lexer::SourceFile;
    use crate::parser::parse_source;

    const ITEM: &str = r#"type Item : "ITEM" { template { DWRD id; PSTR name; DWRD damage; }; };"#;

    fn declare(source: &str) -> (Context, Vec<RdlError>) {
        let mut context = Context::new();
        let file = SourceFile::new("test.rdl", format!("{ITEM}\n{source}"));
        parse_source(&mut context, &file).unwrap();
        let diagnostics = context.take_diagnostics();
        (context, diagnostics)
    }

    #[test]
    fn test_containers_have_their_own_ids() {
        let (context, diagnostics) = declare(
            r#"
            declare Item { new { }; };
            declare mods.Item { new { }; new (#"mods".Item.129) { }; };
            declare "base game".Item { new { }; };
            "#,
        );
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        let slots: Vec<(Option<&str>, i64)> = context
            .resources
            .iter()
            .map(|r| (r.container(), r.id()))
            .collect();
        assert_eq!(
            slots,
            vec![(None, 128), (Some("mods"), 128), (Some("mods"), 129), (Some("base game"), 128)]
        );
    }

    #[test]
    fn test_resource_scope_binds_id_and_name() {
        let (context, diagnostics) = declare(r#"declare Item { new (#140, "Axe") { damage = id + length(name); }; };"#);
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        assert_eq!(context.resources[0].values.get("damage"), Some(&Token::Integer(143)));
    }

    #[test]
    fn test_override_without_existing_starts_fresh() {
        let (context, diagnostics) = declare(r#"declare Item { override (#5, "Club") { damage = 2; }; };"#);
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        assert_eq!(context.resources[0].name, "Club");
        assert_eq!(context.resources[0].values.get("id"), Some(&Token::Integer(5)));
    }

    #[test]
    fn test_duplicate_of_missing_resource() {
        let (_, diagnostics) = declare(r#"declare Item { duplicate (#1, #2) { }; };"#);
        assert!(matches!(
            diagnostics.as_slice(),
            [RdlError::Semantic(SemanticError::UnknownResource { .. })]
        ));
    }

    #[test]
    fn test_invalid_ids() {
        let (_, diagnostics) = declare(
            r#"declare Item {
                new (#?) { };
                new (#Sound.1) { };
                new (#1, 2) { };
                new (#1, #2) { };
            };"#,
        );
        assert_eq!(diagnostics.len(), 4);
        assert!(diagnostics.iter().all(|d| matches!(
            d,
            RdlError::Semantic(SemanticError::InvalidResourceId { .. })
        )));
    }

    #[test]
    fn test_too_many_values() {
        let (_, diagnostics) = declare(r#"declare Item { new { damage = 1, 2; }; };"#);
        assert!(matches!(
            diagnostics.as_slice(),
            [RdlError::Semantic(SemanticError::ValueCount { expected: 1, found: 2, .. })]
        ));
    }

    #[test]
    fn test_single_operand_without_operands() {
        let lexemes = crate::lexer::lex("test.rdl", "damage").unwrap();
        let result = super::single_operand("damage", &[], &lexemes[0]);
        assert!(matches!(
            result,
            Err(RdlError::Semantic(SemanticError::ValueCount { expected: 1, found: 0, .. }))
        ));
    }

    #[test]
    fn test_no_declaration_types() {
        let mut context = Context::new();
        let file = SourceFile::new(
            "test.rdl",
            r#"@no_declaration type Point : "PONT" { template { DWRD x; }; }; declare Point { new { }; };"#,
        );
        parse_source(&mut context, &file).unwrap();
        assert!(matches!(
            context.diagnostics(),
            [RdlError::Semantic(SemanticError::NotDeclarable { .. })]
        ));
    }

    #[test]
    fn test_rect_constructor() {
        let mut context = Context::new();
        let file = SourceFile::new(
            "test.rdl",
            r#"
            @builtin @no_declaration
            type Rect : "RECT" {
                template { DWRD top; DWRD left; DWRD bottom; DWRD right; };
                constructor(t, l, b, r) { this.top = t; this.left = l; this.bottom = b; this.right = r; };
            };
            type Window : "WIND" { template { RECT frame; }; };
            declare Window { new { frame = Rect(1, 2, 30, 40); }; };
            "#,
        );
        parse_source(&mut context, &file).unwrap();
        assert!(context.diagnostics().is_empty(), "{:?}", context.diagnostics());
        let values = &context.resources[0].values;
        assert_eq!(values.get("frame.top"), Some(&Token::Integer(1)));
        assert_eq!(values.get("frame.right"), Some(&Token::Integer(40)));
    }

    #[test]
    fn test_nested_values_in_list_entries() {
        let mut context = Context::new();
        let file = SourceFile::new(
            "test.rdl",
            r#"
            @no_declaration
            type Point : "PONT" { template { DWRD x; DWRD y; }; };
            type Path : "PATH" {
                template { OCNT count; LSTC start; Nested<Point> at; LSTE end; };
                field("points") repeatable<count> { at; };
            };
            declare Path { new { points.at.x = 4; points.at.y = 5; }; };
            "#,
        );
        parse_source(&mut context, &file).unwrap();
        assert!(context.diagnostics().is_empty(), "{:?}", context.diagnostics());
        let points = context.resources[0].values.list("points");
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].get("at.x"), Some(&Token::Integer(4)));
        assert_eq!(points[0].get("at.y"), Some(&Token::Integer(5)));
    }
}
