use super::{type_error, unexpected_lexeme, Parser};
use crate::error::{RdlError, SemanticError};
use crate::interpreter::{ScopeId, Statement, Token};
use crate::lexer::{Lexeme, LexemeKind};
use crate::stream::Expectation;
use crate::types::{
    BinaryField, BinaryTemplate, BinaryType, ByteOrder, Constructor, Decorators, FieldValue,
    Repeatable, Symbol, TypeDefinition, TypeDescriptor, TypeError, TypeField,
};

/// Largest count an `OCNT` entry can hold.
const MAX_REPEAT: i64 = u16::MAX as i64;

impl Parser<'_> {
    /// TypeDefinition ::= "type" Identifier ":" String "{" { TypeItem } "}" [ ";" ]
    pub(super) fn parse_type_definition(&mut self) -> Result<(), RdlError> {
        let Some(decorators) = self.claim_decorators() else {
            return Ok(());
        };
        self.stream.ensure(&[Expectation::keyword("type")])?;
        let name = self.stream.read_identifier()?;
        self.stream.ensure(&[Expectation::kind(LexemeKind::Colon)])?;
        let code = self.stream.read_kind(LexemeKind::String)?;
        self.stream.ensure(&[Expectation::kind(LexemeKind::LBrace)])?;

        if self.context.types.contains(&name.text) {
            return Err(duplicate_type(&name));
        }
        if code.text.len() != 4 {
            return Err(type_error(TypeError::InvalidTypeCode(code.text.clone()), &code));
        }
        log::debug!("{}: defining type {} '{}'", name.location(), name.text, code.text);

        let mut definition = TypeDefinition::new(name.text.clone(), code.text.clone())
            .with_origin(name.clone())
            .with_decorators(decorators);

        // TypeItem ::= Decorator | Template | Constructor | Field
        while !self.at_kind(LexemeKind::RBrace) {
            self.ensure_not_finished()?;
            if self.at_kind(LexemeKind::Decorator) {
                self.parse_decorator()?;
            } else if self.at_keyword("template") {
                self.parse_template(&mut definition)?;
            } else if self.at_keyword("constructor") {
                self.parse_constructor(&mut definition)?;
            } else if self.at_keyword("field") {
                self.parse_field(&mut definition)?;
            } else {
                return Err(self
                    .stream
                    .unexpected("a decorator, `template`, `constructor` or `field`")
                    .into());
            }
        }
        self.close_block()?;

        definition
            .add_implicit_fields(&name)
            .map_err(|e| type_error(e, &name))?;
        self.context
            .register_type(definition)
            .map_err(|_| duplicate_type(&name))?;
        Ok(())
    }

    /// Template ::= "template" "{" { BinaryField } "}" [ ";" ]
    fn parse_template(&mut self, definition: &mut TypeDefinition) -> Result<(), RdlError> {
        let Some(decorators) = self.claim_decorators() else {
            return Ok(());
        };
        let keyword = self.stream.read()?;
        let byte_order = byte_order(&decorators)?;
        self.stream.ensure(&[Expectation::kind(LexemeKind::LBrace)])?;

        let mut template = BinaryTemplate::new(byte_order);
        while !self.at_kind(LexemeKind::RBrace) {
            self.ensure_not_finished()?;
            let (field, label) = self.parse_binary_field()?;
            template
                .add_field(field)
                .map_err(|e| type_error(e, &label))?;
        }
        self.close_block()?;

        definition
            .set_binary_template(template)
            .map_err(|e| type_error(e, &keyword))
    }

    /// BinaryField ::= ( Identifier | "Nested" "<" Identifier ">" ) Identifier ";"
    fn parse_binary_field(&mut self) -> Result<(BinaryField, Lexeme), RdlError> {
        let tag = self.stream.read_identifier()?;
        let (binary_type, nested) = if tag.text == "Nested" {
            self.stream.ensure(&[Expectation::kind(LexemeKind::LAngle)])?;
            let name = self.stream.read_identifier()?;
            self.stream.ensure(&[Expectation::kind(LexemeKind::RAngle)])?;
            let nested = self
                .context
                .type_named(&name.text)
                .cloned()
                .ok_or_else(|| unknown_type(&name))?;
            (BinaryType::Nested(name.text), Some(nested))
        } else {
            let binary_type = BinaryType::from_code(&tag.text)
                .ok_or_else(|| type_error(TypeError::UnknownBinaryType(tag.text.clone()), &tag))?;
            let nested = match binary_type {
                BinaryType::Rect => self.context.type_named("Rect").cloned(),
                _ => None,
            };
            (binary_type, nested)
        };
        let label = self.stream.read_identifier()?;
        self.stream.ensure(&[Expectation::kind(LexemeKind::Semi)])?;
        log::trace!("{}: {} {}", label.location(), binary_type, label.text);
        Ok((BinaryField::new(label.text.clone(), binary_type, nested), label))
    }

    /// Constructor ::= "constructor" "(" [ Identifier { "," Identifier } ] ")"
    ///                 "{" { Statement ";" } "}" [ ";" ]
    fn parse_constructor(&mut self, definition: &mut TypeDefinition) -> Result<(), RdlError> {
        if self.claim_decorators().is_none() {
            return Ok(());
        }
        let keyword = self.stream.read()?;
        let parameters = self.parse_list(LexemeKind::LParen, LexemeKind::RParen, |parser| {
            Ok(parser.stream.read_identifier()?.text)
        })?;
        self.stream.ensure(&[Expectation::kind(LexemeKind::LBrace)])?;

        let mut body = Vec::new();
        while !self.at_kind(LexemeKind::RBrace) {
            self.ensure_not_finished()?;
            body.push(Statement::compile(&mut self.stream)?);
            self.stream.ensure(&[Expectation::kind(LexemeKind::Semi)])?;
        }
        self.close_block()?;

        let constructor = Constructor::new(definition.name(), parameters, body, keyword.clone());
        definition
            .add_constructor(constructor)
            .map_err(|e| type_error(e, &keyword))
    }

    /// Field ::= "field" "(" String ")" [ Repeatable ] ( ";" | "{" { FieldValue } "}" [ ";" ] )
    fn parse_field(&mut self, definition: &mut TypeDefinition) -> Result<(), RdlError> {
        let Some(decorators) = self.claim_decorators() else {
            return Ok(());
        };
        self.stream.ensure(&[
            Expectation::keyword("field"),
            Expectation::kind(LexemeKind::LParen),
        ])?;
        let name = self.stream.read_kind(LexemeKind::String)?;
        self.stream.ensure(&[Expectation::kind(LexemeKind::RParen)])?;

        let repeatable = if self.at_keyword("repeatable") {
            Some(self.parse_repeatable()?)
        } else {
            None
        };

        let mut field = if self.stream.accept(&Expectation::kind(LexemeKind::Semi)) {
            if !decorators.has("synthesize") {
                return Err(type_error(TypeError::MissingValues(name.text.clone()), &name));
            }
            TypeField::synthesize(&name.text, name.clone())
        } else {
            let mut field = TypeField::new(name.text.clone(), name.clone());
            self.stream.ensure(&[Expectation::kind(LexemeKind::LBrace)])?;
            while !self.at_kind(LexemeKind::RBrace) {
                self.ensure_not_finished()?;
                if self.at_kind(LexemeKind::Decorator) {
                    self.parse_decorator()?;
                } else if let Some(value) = self.parse_field_value()? {
                    field.values.push(value);
                }
            }
            self.close_block()?;
            field
        };
        field.repeatable = repeatable;
        if let Some(decorator) = decorators.get("deprecated") {
            field.deprecated = Some(decorator.argument(0).unwrap_or_default().to_string());
        }

        log::trace!("{}: field `{}`", name.location(), name.text);
        definition.add_field(field).map_err(|e| type_error(e, &name))
    }

    /// Repeatable ::= "repeatable" "<" [ Integer "," Integer "," ] Identifier ">"
    fn parse_repeatable(&mut self) -> Result<Repeatable, RdlError> {
        self.stream.ensure(&[
            Expectation::keyword("repeatable"),
            Expectation::kind(LexemeKind::LAngle),
        ])?;
        let (lower, upper) = if self.at_kind(LexemeKind::Identifier) && !self.inline_call_ahead() {
            (0, MAX_REPEAT)
        } else {
            let lower = self.read_integer()?;
            self.stream.ensure(&[Expectation::kind(LexemeKind::Comma)])?;
            let upper = self.read_integer()?;
            self.stream.ensure(&[Expectation::kind(LexemeKind::Comma)])?;
            (lower, upper)
        };
        let count = self.stream.read_identifier()?;
        self.stream.ensure(&[Expectation::kind(LexemeKind::RAngle)])?;
        Ok(Repeatable::new(lower, upper, count.text))
    }

    fn inline_call_ahead(&self) -> bool {
        self.stream.expect(&[
            Expectation::kind(LexemeKind::Identifier),
            Expectation::kind(LexemeKind::LParen),
        ])
    }

    /// FieldValue ::= ValuePart { "join" ValuePart } ";"
    ///
    /// Returns `None` when an `@condition` excluded the value.
    fn parse_field_value(&mut self) -> Result<Option<FieldValue>, RdlError> {
        let Some(decorators) = self.claim_decorators() else {
            return Ok(None);
        };
        let mut value = self.parse_value_part()?;
        while self.stream.accept(&Expectation::keyword("join")) {
            let part = self.parse_value_part()?;
            value.joined.push(part);
        }
        self.stream.ensure(&[Expectation::kind(LexemeKind::Semi)])?;

        if let Some(api) = decorators.get("api") {
            value.export_name = match api.argument(0) {
                None | Some("export") => Some(value.name.clone()),
                Some(name) => Some(name.to_string()),
            };
        }
        if decorators.has("constexpr") {
            value.constant = self.evaluate_constant(&value)?;
        }
        Ok(Some(value))
    }

    /// ValuePart ::= Identifier [ "as" Identifier [ "&" ] ] [ "=" Expression ]
    ///               [ "[" Symbol { "," Symbol } "]" ]
    fn parse_value_part(&mut self) -> Result<FieldValue, RdlError> {
        let name = self.stream.read_identifier()?;
        let mut value = FieldValue::new(name.text.clone(), name);

        if self.stream.accept(&Expectation::keyword("as")) {
            let descriptor = self.stream.read_identifier()?;
            let is_reference = self.stream.accept(&Expectation::kind(LexemeKind::Amp));
            value.descriptor = Some(TypeDescriptor::parse(&descriptor.text, is_reference));
        }
        if self.stream.accept(&Expectation::kind(LexemeKind::Equals)) {
            let (expression, origin) = self.parse_expression()?;
            value.default = Some(Statement {
                target: None,
                expression,
                origin,
            });
        }
        if self.at_kind(LexemeKind::LBracket) {
            value.symbols =
                self.parse_list(LexemeKind::LBracket, LexemeKind::RBracket, Self::parse_symbol)?;
        }
        Ok(value)
    }

    /// `@constexpr`: the default is evaluated once, with the value's symbols bound.
    fn evaluate_constant(&mut self, value: &FieldValue) -> Result<Option<Token>, RdlError> {
        let Some(default) = &value.default else {
            return Ok(None);
        };
        let root = self.context.scopes.root();
        let scope = self.context.scopes.shadow(root);
        let outcome = self
            .bind_symbols(&value.symbols, scope)
            .and_then(|()| self.evaluate(&default.expression, scope, &default.origin));
        self.context.scopes.release(scope);
        outcome.map(Some)
    }

    /// Evaluates each symbol and binds it in `scope`.
    pub(super) fn bind_symbols(&mut self, symbols: &[Symbol], scope: ScopeId) -> Result<(), RdlError> {
        for symbol in symbols {
            let value = self.evaluate(&symbol.value.expression, scope, &symbol.value.origin)?;
            self.context.scopes.define(scope, symbol.name.clone(), value);
        }
        Ok(())
    }
}

/// `@endian(little)` or `@endian(big)`; big-endian otherwise.
fn byte_order(decorators: &Decorators) -> Result<ByteOrder, RdlError> {
    let Some(endian) = decorators.get("endian") else {
        return Ok(ByteOrder::Big);
    };
    match endian.argument(0) {
        Some("little") => Ok(ByteOrder::Little),
        Some("big") => Ok(ByteOrder::Big),
        _ => Err(unexpected_lexeme(&endian.origin, "`@endian(little)` or `@endian(big)`").into()),
    }
}

fn duplicate_type(name: &Lexeme) -> RdlError {
    SemanticError::DuplicateType {
        name: name.text.clone(),
        src: name.named_source(),
        span: name.span(),
    }
    .into()
}

pub(super) fn unknown_type(name: &Lexeme) -> RdlError {
    SemanticError::UnknownType {
        name: name.text.clone(),
        src: name.named_source(),
        span: name.span(),
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
    use crate::types::{BinaryType, ByteOrder, TypeDescriptor, TypeError};

    fn define(source: &str) -> Context {
        let mut context = Context::new();
        let file = SourceFile::new("test.rdl", source);
        parse_source(&mut context, &file).unwrap();
        assert!(context.diagnostics().is_empty(), "{:?}", context.diagnostics());
        context
    }

    fn define_err(source: &str) -> RdlError {
        let mut context = Context::new();
        let file = SourceFile::new("test.rdl", source);
        parse_source(&mut context, &file).unwrap();
        RdlError::from_diagnostics(context.take_diagnostics()).expect("an error")
    }

    #[test]
    fn test_little_endian_template() {
        let context = define(r#"type Note : "NOTE" { @endian(little) template { HWRD pitch; }; };"#);
        let note = context.type_named("Note").unwrap();
        assert_eq!(note.template().byte_order(), ByteOrder::Little);
        assert_eq!(note.minimum_size(), 2);
    }

    #[test]
    fn test_implicit_fields_are_synthesized() {
        let context = define(
            r#"type Item : "ITEM" {
                template { DWRD id; PSTR name; DWRD damage; };
                field("damage") { damage = 1; };
            };"#,
        );
        let item = context.type_named("Item").unwrap();
        let names: Vec<&str> = item.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["damage", "id", "name"]);
        assert!(item.field("id").unwrap().synthesized);
        assert!(!item.field("damage").unwrap().synthesized);
    }

    #[test]
    fn test_synthesize_needs_decorator() {
        let context = define(
            r#"type Item : "ITEM" { template { DWRD id; }; @synthesize field("id"); };"#,
        );
        assert!(context.type_named("Item").unwrap().field("id").unwrap().synthesized);

        let error = define_err(r#"type Item : "ITEM" { template { DWRD id; }; field("id"); };"#);
        assert!(matches!(
            error,
            RdlError::Semantic(SemanticError::Type {
                reason: TypeError::MissingValues(_),
                ..
            })
        ));
    }

    #[test]
    fn test_value_decorators() {
        let context = define(
            r#"type Tone : "TONE" {
                template { DWRD pitch; DWRD volume; };
                field("pitch") {
                    @api(export) @constexpr pitch = high * 2 [ low = 1, high = 4 ];
                };
                @deprecated("use pitch") field("volume") { @api("loudness") volume; };
            };"#,
        );
        let tone = context.type_named("Tone").unwrap();
        let pitch = &tone.field("pitch").unwrap().values[0];
        assert_eq!(pitch.export_name.as_deref(), Some("pitch"));
        assert_eq!(pitch.constant, Some(Token::Integer(8)));
        assert_eq!(pitch.symbol("low").map(|s| s.name.as_str()), Some("low"));

        let volume = tone.field("volume").unwrap();
        assert_eq!(volume.deprecated.as_deref(), Some("use pitch"));
        assert_eq!(volume.values[0].export_name.as_deref(), Some("loudness"));
    }

    #[test]
    fn test_rect_links_builtin_type() {
        let context = define(
            r#"
            @builtin @no_declaration
            type Rect : "RECT" { template { DWRD top; DWRD left; DWRD bottom; DWRD right; }; };
            type Window : "WIND" { template { RECT frame; }; };
            "#,
        );
        let window = context.type_named("Window").unwrap();
        assert_eq!(window.template().fields()[0].binary_type, BinaryType::Rect);
        assert_eq!(window.nested_type("frame").unwrap().name(), "Rect");
        assert_eq!(
            window.field("frame").unwrap().values[0].descriptor,
            Some(TypeDescriptor::Rect)
        );
    }

    #[test]
    fn test_invalid_type_code() {
        let error = define_err(r#"type Item : "ITEMS" { template { DWRD id; }; };"#);
        assert!(matches!(
            error,
            RdlError::Semantic(SemanticError::Type {
                reason: TypeError::InvalidTypeCode(_),
                ..
            })
        ));
    }

    #[test]
    fn test_unknown_binary_type() {
        let error = define_err(r#"type Item : "ITEM" { template { WORD id; }; };"#);
        assert!(matches!(
            error,
            RdlError::Semantic(SemanticError::Type {
                reason: TypeError::UnknownBinaryType(ref tag),
                ..
            }) if tag == "WORD"
        ));
    }

    #[test]
    fn test_unknown_nested_type() {
        let error = define_err(r#"type Item : "ITEM" { template { Nested<Point> at; }; };"#);
        assert!(matches!(
            error,
            RdlError::Semantic(SemanticError::UnknownType { ref name, .. }) if name == "Point"
        ));
    }

    #[test]
    fn test_duplicate_constructor() {
        let error = define_err(
            r#"type Size : "SIZE" {
                template { DWRD w; };
                constructor(a) { this.w = a; };
                constructor(b) { this.w = b; };
            };"#,
        );
        assert!(matches!(
            error,
            RdlError::Semantic(SemanticError::Type {
                reason: TypeError::DuplicateConstructor(1),
                ..
            })
        ));
    }

    #[test]
    fn test_field_before_template() {
        let error = define_err(r#"type Item : "ITEM" { field("id") { id; }; template { DWRD id; }; };"#);
        assert!(matches!(
            error,
            RdlError::Semantic(SemanticError::Type {
                reason: TypeError::MissingTemplate,
                ..
            })
        ));
    }

    #[test]
    fn test_failed_type_is_not_registered() {
        let mut context = Context::new();
        let file = SourceFile::new(
            "test.rdl",
            r#"type Item : "ITEM" { template { WORD id; }; }; type Sound : "snd " { template { DWRD id; }; };"#,
        );
        parse_source(&mut context, &file).unwrap();
        assert!(context.type_named("Item").is_none());
        assert!(context.type_named("Sound").is_some());
    }
}
