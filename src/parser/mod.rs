//! Recursive-descent parsing with semantic analysis folded in. Each construct
//! is checked and applied to the shared [`Context`] as soon as it is read;
//! there is no intermediate syntax tree.

mod declaration;
mod directive;
mod list;
mod type_definition;

use crate::context::{Context, Module};
use crate::error::{ParserError, RdlError, SemanticError};
use crate::interpreter::{Expression, InterpreterError, ScopeId, Token};
use crate::lexer::{Lexeme, LexemeKind, Lexer, SourceFile};
use crate::stream::{Expectation, LexemeStream};
use crate::types::{Decorator, Decorators, TypeError};
use std::sync::Arc;

/// Lexes `source` and parses it into `context`.
///
/// # Errors
/// Returns the first lexical or syntactic error. Semantic errors are recorded
/// in the context and parsing continues with the next construct.
pub fn parse_source(context: &mut Context, source: &Arc<SourceFile>) -> Result<(), RdlError> {
    let lexemes = Lexer::new(source).lex()?;
    Parser::new(context, LexemeStream::new(Arc::clone(source), lexemes)).parse()
}

/// Parses one file's lexemes into a [`Context`].
#[derive(Debug)]
pub struct Parser<'a> {
    context: &'a mut Context,
    stream: LexemeStream,
}

impl<'a> Parser<'a> {
    pub fn new(context: &'a mut Context, stream: LexemeStream) -> Self {
        Self { context, stream }
    }

    // === Main Parsing Methods ===

    /// File ::= { Construct }
    pub fn parse(&mut self) -> Result<(), RdlError> {
        log::debug!("parsing {}", self.stream.source().name);
        while !self.stream.finished() {
            self.guarded(Self::parse_construct)?;
        }
        if let Some(error) = self.dangling_decorator() {
            self.context.decorators.take();
            self.context.record(error);
        }
        Ok(())
    }

    /// Construct ::= Directive | Decorator | Module | TypeDefinition | Declaration
    fn parse_construct(&mut self) -> Result<(), RdlError> {
        if self.at_kind(LexemeKind::Directive) {
            self.parse_directive()
        } else if self.at_kind(LexemeKind::Decorator) {
            self.parse_decorator()
        } else if self.at_keyword("module") {
            self.parse_module()
        } else if self.at_keyword("type") {
            self.parse_type_definition()
        } else if self.at_keyword("declare") {
            self.parse_declaration()
        } else {
            Err(self
                .stream
                .unexpected("a directive, a decorator, `module`, `type` or `declare`")
                .into())
        }
    }

    /// Decorator ::= "@" Identifier [ "(" DecoratorArgument { "," DecoratorArgument } ")" ]
    fn parse_decorator(&mut self) -> Result<(), RdlError> {
        let origin = self.stream.read_kind(LexemeKind::Decorator)?;
        let arguments = if self.at_kind(LexemeKind::LParen) {
            self.parse_list(
                LexemeKind::LParen,
                LexemeKind::RParen,
                Self::parse_decorator_argument,
            )?
        } else {
            Vec::new()
        };
        log::trace!("{}: pending decorator @{}", origin.location(), origin.text);
        self.context
            .decorators
            .push(Decorator::new(origin.text.clone(), arguments, origin));
        Ok(())
    }

    /// Module ::= "module" Identifier "{" { Construct } "}" [ ";" ]
    fn parse_module(&mut self) -> Result<(), RdlError> {
        let Some(decorators) = self.claim_decorators() else {
            return Ok(());
        };
        self.stream.ensure(&[Expectation::keyword("module")])?;
        let name = self.stream.read_identifier()?;
        self.stream.ensure(&[Expectation::kind(LexemeKind::LBrace)])?;

        let module = Module::new(name.text.clone(), decorators, name.clone());
        let previous = self.context.enter_module(module).map_err(|module| {
            SemanticError::DuplicateModule {
                name: module.name,
                src: name.named_source(),
                span: name.span(),
            }
        })?;
        log::debug!("{}: entering module {}", name.location(), name.text);

        // Each construct inside the module recovers on its own.
        let body = self.parse_constructs_until_brace();
        self.context.leave_module(previous);
        body?;
        self.close_block()
    }

    fn parse_constructs_until_brace(&mut self) -> Result<(), RdlError> {
        while !self.at_kind(LexemeKind::RBrace) {
            if self.stream.finished() {
                return Err(self.stream.unexpected("`}`").into());
            }
            self.guarded(Self::parse_construct)?;
        }
        Ok(())
    }

    // === Helpers ===

    /// Runs one construct. A semantic failure is recorded, the scopes and
    /// pending decorators are reset, and the stream skips to the end of the
    /// construct. Lexical and syntactic failures are returned.
    fn guarded<F>(&mut self, construct: F) -> Result<(), RdlError>
    where
        F: FnOnce(&mut Self) -> Result<(), RdlError>,
    {
        let mark = self.stream.mark();
        let depth = self.context.scopes.depth();
        match construct(self) {
            Ok(()) => Ok(()),
            Err(error) if error.is_recoverable() => {
                self.context.record(error);
                self.context.scopes.truncate(depth);
                self.context.decorators.take();
                self.stream.recover(mark);
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    /// Hands the pending decorators to the construct at the cursor. When an
    /// `@condition` excludes the construct it is skipped and `None` returned.
    fn claim_decorators(&mut self) -> Option<Decorators> {
        let decorators = self.context.decorators.take();
        if decorators.conditions_hold(&self.context.definitions) {
            return Some(decorators);
        }
        if let Some(next) = self.stream.peek() {
            log::debug!("{}: condition not met, skipping `{}`", next.location(), next);
        }
        self.stream.skip_construct();
        None
    }

    fn dangling_decorator(&self) -> Option<RdlError> {
        self.context.decorators.pending().map(|decorator| {
            SemanticError::DanglingDecorator {
                name: decorator.name.clone(),
                src: decorator.origin.named_source(),
                span: decorator.origin.span(),
            }
            .into()
        })
    }

    /// Consumes a closing `}` and its optional `;`. Decorators must not be
    /// left waiting at the end of a block.
    fn close_block(&mut self) -> Result<(), RdlError> {
        if let Some(error) = self.dangling_decorator() {
            return Err(error);
        }
        self.stream.ensure(&[Expectation::kind(LexemeKind::RBrace)])?;
        self.stream.accept(&Expectation::kind(LexemeKind::Semi));
        Ok(())
    }

    /// Fails with "unexpected end of input" once the stream runs out inside a block.
    fn ensure_not_finished(&self) -> Result<(), RdlError> {
        if self.stream.finished() {
            return Err(self.stream.unexpected("`}`").into());
        }
        Ok(())
    }

    fn at_kind(&self, kind: LexemeKind) -> bool {
        self.stream.expect(&[Expectation::kind(kind)])
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        self.stream.expect(&[Expectation::keyword(keyword)])
    }

    fn evaluate(&mut self, expression: &Expression, scope: ScopeId, at: &Lexeme) -> Result<Token, RdlError> {
        expression
            .evaluate(&mut self.context.scopes, scope)
            .map_err(|reason| evaluation_error(reason, at))
    }
}

fn type_error(reason: TypeError, at: &Lexeme) -> RdlError {
    SemanticError::Type {
        reason,
        src: at.named_source(),
        span: at.span(),
    }
    .into()
}

fn evaluation_error(reason: InterpreterError, at: &Lexeme) -> RdlError {
    SemanticError::Evaluation {
        reason,
        src: at.named_source(),
        span: at.span(),
    }
    .into()
}

#[track_caller]
fn unexpected_lexeme(lexeme: &Lexeme, expected: &str) -> ParserError {
    log::trace!("unexpected `{}` raised at {}", lexeme, std::panic::Location::caller());
    ParserError::UnexpectedLexeme {
        found: lexeme.to_string(),
        expected: expected.to_string(),
        src: lexeme.named_source(),
        span: lexeme.span(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::Format;
    use crate::interpreter::Token;
    use crate::reference::Reference;
    use crate::types::{BinaryType, TypeDescriptor};
    use miette::Report;

    const ITEM: &str = r#"
        type Item : "ITEM" {
            template { DWRD id; PSTR name; DWRD damage; };
        };
    "#;

    fn parse_into(context: &mut Context, source: &str) -> Result<(), RdlError> {
        let file = SourceFile::new("test.rdl", source);
        parse_source(context, &file)?;
        match RdlError::from_diagnostics(context.take_diagnostics()) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn parse_ok(source: &str) -> Context {
        let mut context = Context::new();
        match parse_into(&mut context, source) {
            Ok(()) => context,
            Err(err) => {
                let report = Report::from(err);
                print!("{:?}", report);

                panic!("{:#}", report);
            }
        }
    }

    fn parse_err(source: &str) -> (Context, RdlError) {
        let mut context = Context::new();
        let error = parse_into(&mut context, source).expect_err("source should not compile");
        (context, error)
    }

    fn value(context: &Context, index: usize, key: &str) -> Option<Token> {
        context.resources[index].values.get(key).cloned()
    }

    #[test]
    fn test_template_order_is_preserved() {
        let context = parse_ok(
            r#"type Mixed : "MIXD" { template { CSTR b; DBYT a; HLNG c; RSRC d; C010 e; }; };"#,
        );
        let definition = context.type_named("Mixed").unwrap();
        let labels: Vec<&str> = definition
            .template()
            .fields()
            .iter()
            .map(|f| f.label.as_str())
            .collect();
        assert_eq!(labels, vec!["b", "a", "c", "d", "e"]);
        assert_eq!(
            definition.template().fields()[4].binary_type,
            BinaryType::FixedString(16)
        );
    }

    #[test]
    fn test_declare_with_id_and_name() {
        let context = parse_ok(&format!(
            "{ITEM} declare Item {{ new(128, \"Sword\") {{ damage = 7; }} }}"
        ));
        assert_eq!(context.resources.len(), 1);
        let sword = &context.resources[0];
        assert_eq!(sword.id(), 128);
        assert_eq!(sword.name, "Sword");
        assert_eq!(value(&context, 0, "id"), Some(Token::Integer(128)));
        assert_eq!(value(&context, 0, "name"), Some(Token::String("Sword".into())));
        assert_eq!(value(&context, 0, "damage"), Some(Token::Integer(7)));
    }

    #[test]
    fn test_automatic_ids() {
        let context = parse_ok(&format!(
            "{ITEM} declare Item {{ new {{ }}; new(#130) {{ }}; new(\"Bow\") {{ }}; new(#auto) {{ }}; }};"
        ));
        let ids: Vec<i64> = context.resources.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec![128, 130, 129, 131]);
        assert_eq!(context.resources[2].name, "Bow");
    }

    #[test]
    fn test_symbols_replace_literals() {
        let context = parse_ok(
            r#"
            type Sign : "SIGN" {
                template { DWRD id; DBYT direction; };
                field("direction") { direction = 0 [ north = 0, east = 1, south = 2, west = 3 ]; };
            };
            declare Sign {
                new (#1) { direction = west; };
                new (#2) { direction = 3; };
                new (#3) { };
            };
            "#,
        );
        assert_eq!(value(&context, 0, "direction"), Some(Token::Integer(3)));
        assert_eq!(value(&context, 1, "direction"), Some(Token::Integer(3)));
        assert_eq!(value(&context, 2, "direction"), Some(Token::Integer(0)));
    }

    #[test]
    fn test_constructor_fills_fields() {
        let context = parse_ok(
            r#"
            type Size : "SIZE" {
                template { DWRD width; DWRD height; };
                constructor(w, h) { this.width = w; this.height = h; };
            };
            declare Size { new (10, 20) { }; };
            "#,
        );
        assert_eq!(value(&context, 0, "width"), Some(Token::Integer(10)));
        assert_eq!(value(&context, 0, "height"), Some(Token::Integer(20)));
        assert_eq!(context.resources[0].id(), 128);
    }

    #[test]
    fn test_body_overrides_constructor() {
        let context = parse_ok(
            r#"
            type Size : "SIZE" {
                template { DWRD width; DWRD height; };
                constructor(w, h) { this.width = w; this.height = h * 2; };
            };
            declare Size { new (10, 20) { width = 1; }; };
            "#,
        );
        assert_eq!(value(&context, 0, "width"), Some(Token::Integer(1)));
        assert_eq!(value(&context, 0, "height"), Some(Token::Integer(40)));
    }

    #[test]
    fn test_joined_values() {
        let context = parse_ok(
            r#"
            type Flags : "FLAG" {
                template { DBYT low; DBYT high; };
                field("mode") {
                    low = 1 [ fast = 1, slow = 2 ] join high = 9 [ loud = 4, quiet = 8 ];
                };
            };
            declare Flags {
                new (#1) { mode = slow; };
                new (#2) { mode = fast | loud; };
                new (#3) { mode = 5; };
            };
            "#,
        );
        assert_eq!(value(&context, 0, "low"), Some(Token::Integer(2)));
        assert_eq!(value(&context, 0, "high"), Some(Token::Integer(9)));
        assert_eq!(value(&context, 1, "low"), Some(Token::Integer(1)));
        assert_eq!(value(&context, 1, "high"), Some(Token::Integer(4)));
        assert_eq!(value(&context, 2, "low"), Some(Token::Integer(5)));
    }

    #[test]
    fn test_repeatable_fields() {
        let context = parse_ok(
            r#"
            type Menu : "MENU" {
                template { DWRD id; OCNT count; LSTC start; PSTR title; DWRD key; LSTE end; };
                field("entries") repeatable<1, 4, count> { title = "?"; key = 0; };
            };
            declare Menu {
                new (#1) {
                    entries = "Open", 79;
                    entries = "Quit";
                    entries.key = 81;
                };
                new (#2) { };
            };
            "#,
        );
        let entries = context.resources[0].values.list("entries");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].get("title"), Some(&Token::String("Open".into())));
        assert_eq!(entries[0].get("key"), Some(&Token::Integer(79)));
        assert_eq!(entries[1].get("title"), Some(&Token::String("Quit".into())));
        assert_eq!(entries[1].get("key"), Some(&Token::Integer(81)));

        let padded = context.resources[1].values.list("entries");
        assert_eq!(padded.len(), 1);
        assert_eq!(padded[0].get("title"), Some(&Token::String("?".into())));
    }

    #[test]
    fn test_nested_constructor_call() {
        let context = parse_ok(
            r#"
            @no_declaration
            type Point : "PONT" {
                template { DWRD x; DWRD y; };
                constructor(x, y) { this.x = x; this.y = y; };
            };
            type Marker : "MARK" {
                template { Nested<Point> origin; DWRD size; };
            };
            declare Marker {
                new (#1) { origin = Point(3, 4); size = 2; };
                new (#2) { origin.y = 9; };
            };
            "#,
        );
        assert_eq!(value(&context, 0, "origin.x"), Some(Token::Integer(3)));
        assert_eq!(value(&context, 0, "origin.y"), Some(Token::Integer(4)));
        assert_eq!(value(&context, 1, "origin.y"), Some(Token::Integer(9)));
        assert_eq!(value(&context, 1, "origin.x"), None);
    }

    #[test]
    fn test_reference_values() {
        let context = parse_ok(&format!(
            r#"{ITEM}
            type Shop : "SHOP" {{
                template {{ RSRC stock; }};
                field("stock") {{ stock as Item&; }};
            }};
            declare Shop {{ new (#1) {{ stock = 128; }}; }};
            "#
        ));
        let expected = Reference::new(128)
            .with_type_name("Item")
            .with_type_code("ITEM");
        assert_eq!(value(&context, 0, "stock"), Some(Token::Reference(expected)));
        let shop = context.type_named("Shop").unwrap();
        assert_eq!(
            shop.field("stock").unwrap().values[0].descriptor,
            Some(TypeDescriptor::Reference(Some("Item".into())))
        );
    }

    #[test]
    fn test_override_and_duplicate() {
        let context = parse_ok(&format!(
            r#"{ITEM}
            declare Item {{
                new (#128, "Sword") {{ damage = 5; }};
                override (#128) {{ damage = 6; }};
                duplicate (#128, #200, "Copy") {{ }};
            }};
            "#
        ));
        assert_eq!(context.resources.len(), 2);
        assert_eq!(context.resources[0].name, "Sword");
        assert_eq!(value(&context, 0, "damage"), Some(Token::Integer(6)));
        assert_eq!(context.resources[1].id(), 200);
        assert_eq!(context.resources[1].name, "Copy");
        assert_eq!(value(&context, 1, "damage"), Some(Token::Integer(6)));
        assert_eq!(value(&context, 1, "id"), Some(Token::Integer(200)));
    }

    #[test]
    fn test_conditions() {
        let source = format!(
            r#"{ITEM}
            declare Item {{
                @condition(MAC) new (#1) {{ }};
                @condition("!MAC") new (#2) {{ }};
            }};
            "#
        );
        let context = parse_ok(&source);
        let ids: Vec<i64> = context.resources.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec![2]);

        let mut context = Context::new();
        context.definitions.insert("MAC".into());
        parse_into(&mut context, &source).unwrap();
        let ids: Vec<i64> = context.resources.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn test_directives() {
        let context = parse_ok(
            r#"
            @project "Quest";
            @author "Tom";
            @define DEMO;
            @format set classic;
            @echo 1 + 2;
            @condition(DEMO) @version "1.0";
            "#,
        );
        assert_eq!(context.metadata.project.as_deref(), Some("Quest"));
        assert_eq!(context.metadata.author.as_deref(), Some("Tom"));
        assert_eq!(context.metadata.version.as_deref(), Some("1.0"));
        assert!(context.definitions.contains("DEMO"));
        assert_eq!(context.format(), Format::Classic);
    }

    #[test]
    fn test_format_requirement() {
        let (_, error) = parse_err("@format requires rez;");
        assert!(matches!(
            error,
            RdlError::Semantic(SemanticError::FormatMismatch { .. })
        ));
    }

    #[test]
    fn test_modules() {
        let context = parse_ok(&format!("module Armory {{ {ITEM} }}"));
        assert_eq!(context.module("Armory").unwrap().types, vec!["Item".to_string()]);

        let (_, error) = parse_err("module A { } module A { }");
        assert!(matches!(
            error,
            RdlError::Semantic(SemanticError::DuplicateModule { .. })
        ));
    }

    #[test]
    fn test_duplicate_type() {
        let (_, error) = parse_err(&format!("{ITEM}{ITEM}"));
        assert!(matches!(
            error,
            RdlError::Semantic(SemanticError::DuplicateType { ref name, .. }) if name == "Item"
        ));
    }

    #[test]
    fn test_unknown_type() {
        let (_, error) = parse_err("declare Weapon { new { }; };");
        assert!(matches!(
            error,
            RdlError::Semantic(SemanticError::UnknownType { ref name, .. }) if name == "Weapon"
        ));
    }

    #[test]
    fn test_repeatable_without_count_field() {
        let (_, error) = parse_err(
            r#"type Bad : "BAD " {
                template { DWRD id; DWRD value; };
                field("values") repeatable<count> { value; };
            };"#,
        );
        assert!(matches!(
            error,
            RdlError::Semantic(SemanticError::Type {
                reason: TypeError::MissingCountField { .. },
                ..
            })
        ));
    }

    #[test]
    fn test_constructor_arity() {
        let (_, error) = parse_err(
            r#"
            type Size : "SIZE" {
                template { DWRD width; DWRD height; };
                constructor(w, h) { this.width = w; this.height = h; };
            };
            declare Size { new (1, 2, 3) { }; };
            "#,
        );
        assert!(matches!(
            error,
            RdlError::Semantic(SemanticError::ConstructorArity { found: 3, .. })
        ));
    }

    #[test]
    fn test_duplicate_resource() {
        let (context, error) = parse_err(&format!(
            "{ITEM} declare Item {{ new (#128) {{ }}; new (#128) {{ }}; }};"
        ));
        assert!(matches!(
            error,
            RdlError::Semantic(SemanticError::DuplicateResource { .. })
        ));
        assert_eq!(context.resources.len(), 1);
    }

    #[test]
    fn test_recovery_collects_every_error() {
        let (context, error) = parse_err(&format!(
            r#"{ITEM}
            declare Item {{ new (#1) {{ missing = 1; }}; new (#2) {{ }}; }};
            declare Nothing {{ new {{ }}; }};
            declare Item {{ new (#3) {{ damage = unknown; }}; }};
            "#
        ));
        match error {
            RdlError::Failed { errors } => assert_eq!(errors.len(), 3),
            other => panic!("expected several errors, got {other:?}"),
        }
        let ids: Vec<i64> = context.resources.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn test_dangling_decorators() {
        let (_, error) = parse_err(&format!("{ITEM} declare Item {{ new {{ }}; @deprecated }};"));
        assert!(matches!(
            error,
            RdlError::Semantic(SemanticError::DanglingDecorator { ref name, .. }) if name == "deprecated"
        ));

        let (_, error) = parse_err("@no_declaration");
        assert!(matches!(
            error,
            RdlError::Semantic(SemanticError::DanglingDecorator { .. })
        ));
    }

    #[test]
    fn test_syntax_error_stops_the_file() {
        let mut context = Context::new();
        let error = parse_into(&mut context, &format!("{ITEM} declare Item {{ new (#1 {{ }}; }};"))
            .unwrap_err();
        assert!(matches!(error, RdlError::Parser(_)));
        assert!(context.resources.is_empty());
    }
}
