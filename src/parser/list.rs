use super::{unexpected_lexeme, Parser};
use crate::error::RdlError;
use crate::interpreter::{Expression, ScopeId, Statement, Token};
use crate::lexer::{Lexeme, LexemeKind};
use crate::stream::Expectation;
use crate::types::Symbol;

impl Parser<'_> {
    /// List ::= Open [ Item { "," Item } ] Close
    pub(super) fn parse_list<T, F>(
        &mut self,
        open: LexemeKind,
        close: LexemeKind,
        mut item: F,
    ) -> Result<Vec<T>, RdlError>
    where
        F: FnMut(&mut Self) -> Result<T, RdlError>,
    {
        self.stream.ensure(&[Expectation::kind(open)])?;
        let mut items = Vec::new();
        if self.stream.accept(&Expectation::kind(close)) {
            return Ok(items);
        }
        loop {
            items.push(item(self)?);
            if !self.stream.accept(&Expectation::kind(LexemeKind::Comma)) {
                break;
            }
        }
        self.stream.ensure(&[Expectation::kind(close)])?;
        Ok(items)
    }

    /// Compiles one expression, returning it with the lexeme it starts at.
    pub(super) fn parse_expression(&mut self) -> Result<(Expression, Lexeme), RdlError> {
        let origin = self
            .stream
            .peek()
            .cloned()
            .ok_or_else(|| self.stream.unexpected("an expression"))?;
        let expression = Expression::compile(&mut self.stream)?;
        Ok((expression, origin))
    }

    /// Arguments ::= "(" [ Expression { "," Expression } ] ")"
    ///
    /// Each argument is evaluated in `scope` as soon as it is read.
    pub(super) fn parse_arguments(&mut self, scope: ScopeId) -> Result<Vec<(Token, Lexeme)>, RdlError> {
        let expressions = self.parse_list(LexemeKind::LParen, LexemeKind::RParen, Self::parse_expression)?;
        expressions
            .into_iter()
            .map(|(expression, origin)| {
                let value = self.evaluate(&expression, scope, &origin)?;
                Ok((value, origin))
            })
            .collect()
    }

    /// DecoratorArgument ::= [ "!" ] ( Identifier | String | Integer | Decimal )
    pub(super) fn parse_decorator_argument(&mut self) -> Result<String, RdlError> {
        let negated = self.stream.accept(&Expectation::kind(LexemeKind::Exclaim));
        self.splice_inline_value()?;
        let lexeme = self.stream.read()?;
        let text = match lexeme.kind {
            LexemeKind::Identifier | LexemeKind::String => lexeme.text,
            LexemeKind::Integer | LexemeKind::Decimal => lexeme.text,
            _ => return Err(unexpected_lexeme(&lexeme, "a decorator argument").into()),
        };
        Ok(if negated { format!("!{text}") } else { text })
    }

    /// Symbol ::= Identifier "=" Expression
    pub(super) fn parse_symbol(&mut self) -> Result<Symbol, RdlError> {
        let name = self.stream.read_identifier()?;
        self.stream.ensure(&[Expectation::kind(LexemeKind::Equals)])?;
        let expression = Expression::compile(&mut self.stream)?;
        Ok(Symbol {
            name: name.text.clone(),
            value: Statement {
                target: None,
                expression,
                origin: name,
            },
        })
    }

    /// An integer literal, or a variable or call that evaluates to one.
    pub(super) fn read_integer(&mut self) -> Result<i64, RdlError> {
        self.splice_inline_value()?;
        let lexeme = self.stream.read_kind(LexemeKind::Integer)?;
        lexeme
            .integer()
            .ok_or_else(|| unexpected_lexeme(&lexeme, "an integer").into())
    }

    /// Where the grammar wants a literal, `$name` and `name(...)` are
    /// evaluated in the root scope and their value is spliced back into the
    /// stream as a literal lexeme.
    fn splice_inline_value(&mut self) -> Result<(), RdlError> {
        let inline = self.at_kind(LexemeKind::Variable)
            || self.stream.expect(&[
                Expectation::kind(LexemeKind::Identifier),
                Expectation::kind(LexemeKind::LParen),
            ]);
        if !inline {
            return Ok(());
        }
        let (expression, origin) = self.parse_expression()?;
        let root = self.context.scopes.root();
        let value = self.evaluate(&expression, root, &origin)?;
        log::trace!("{}: spliced `{}`", origin.location(), value);
        self.stream.push(value.to_lexeme(&origin));
        Ok(())
    }
}
