use crate::error::ParserError;
use crate::lexer::{Lexeme, LexemeKind, SourceFile};
use std::fmt::{self, Display};
use std::sync::Arc;

/// A predicate over a single lexeme, used for lookahead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expectation {
    kind: LexemeKind,
    text: Option<String>,
    negated: bool,
}

impl Expectation {
    pub fn kind(kind: LexemeKind) -> Self {
        Self {
            kind,
            text: None,
            negated: false,
        }
    }

    /// An identifier with exactly this text.
    pub fn keyword(text: &str) -> Self {
        Self::text(LexemeKind::Identifier, text)
    }

    pub fn text(kind: LexemeKind, text: &str) -> Self {
        Self {
            kind,
            text: Some(text.to_string()),
            negated: false,
        }
    }

    /// Inverts the predicate. A missing lexeme still fails.
    #[must_use]
    pub fn be_false(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    pub fn matches(&self, lexeme: &Lexeme) -> bool {
        let matched = lexeme.kind == self.kind
            && self.text.as_deref().map_or(true, |text| lexeme.text == text);
        matched != self.negated
    }
}

impl Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            f.write_str("anything but ")?;
        }
        match &self.text {
            Some(text) if self.kind == LexemeKind::Identifier => write!(f, "'{text}'"),
            Some(text) => write!(f, "{} '{}'", self.kind, text),
            None => write!(f, "{}", self.kind),
        }
    }
}

fn describe(expectations: &[Expectation]) -> String {
    expectations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// A forward-only cursor over the lexemes of one file.
#[derive(Debug)]
pub struct LexemeStream {
    source: Arc<SourceFile>,
    lexemes: Vec<Lexeme>,
    position: usize,
    /// Lexemes injected with [`LexemeStream::push`]; the last one is read first.
    pushed: Vec<Lexeme>,
}

impl LexemeStream {
    pub fn new(source: Arc<SourceFile>, lexemes: Vec<Lexeme>) -> Self {
        Self {
            source,
            lexemes,
            position: 0,
            pushed: Vec::new(),
        }
    }

    pub fn source(&self) -> &Arc<SourceFile> {
        &self.source
    }

    pub fn finished(&self) -> bool {
        self.pushed.is_empty() && self.position >= self.lexemes.len()
    }

    pub fn peek(&self) -> Option<&Lexeme> {
        self.peek_at(0)
    }

    pub fn peek_at(&self, offset: usize) -> Option<&Lexeme> {
        if offset < self.pushed.len() {
            return self.pushed.get(self.pushed.len() - 1 - offset);
        }
        self.lexemes.get(self.position + offset - self.pushed.len())
    }

    pub fn advance(&mut self) {
        if self.pushed.pop().is_none() && self.position < self.lexemes.len() {
            self.position += 1;
        }
    }

    pub fn read(&mut self) -> Result<Lexeme, ParserError> {
        if let Some(lexeme) = self.pushed.pop() {
            return Ok(lexeme);
        }
        match self.lexemes.get(self.position) {
            Some(lexeme) => {
                self.position += 1;
                Ok(lexeme.clone())
            }
            None => Err(self.eof_error("more input")),
        }
    }

    /// Consumes the next lexeme only if it matches.
    pub fn accept(&mut self, expectation: &Expectation) -> bool {
        if self.expect(std::slice::from_ref(expectation)) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Every expectation matches the lexeme at the same offset. Never consumes.
    pub fn expect(&self, expectations: &[Expectation]) -> bool {
        expectations
            .iter()
            .enumerate()
            .all(|(offset, e)| self.peek_at(offset).is_some_and(|l| e.matches(l)))
    }

    /// The next lexeme matches at least one expectation. Never consumes.
    pub fn expect_any(&self, expectations: &[Expectation]) -> bool {
        self.peek()
            .is_some_and(|lexeme| expectations.iter().any(|e| e.matches(lexeme)))
    }

    /// Consumes one lexeme per expectation, failing on the first mismatch.
    #[track_caller]
    pub fn ensure(&mut self, expectations: &[Expectation]) -> Result<(), ParserError> {
        for expectation in expectations {
            match self.peek() {
                Some(lexeme) if expectation.matches(lexeme) => self.advance(),
                Some(lexeme) => {
                    return Err(ParserError::UnexpectedLexeme {
                        found: lexeme.to_string(),
                        expected: expectation.to_string(),
                        src: lexeme.named_source(),
                        span: lexeme.span(),
                    })
                }
                None => return Err(self.eof_error(&describe(expectations))),
            }
        }
        Ok(())
    }

    /// Reads one lexeme of `kind`.
    pub fn read_kind(&mut self, kind: LexemeKind) -> Result<Lexeme, ParserError> {
        self.ensure_peek(&Expectation::kind(kind))?;
        self.read()
    }

    /// Reads one identifier, returning it.
    pub fn read_identifier(&mut self) -> Result<Lexeme, ParserError> {
        self.read_kind(LexemeKind::Identifier)
    }

    fn ensure_peek(&self, expectation: &Expectation) -> Result<(), ParserError> {
        match self.peek() {
            Some(lexeme) if expectation.matches(lexeme) => Ok(()),
            Some(lexeme) => Err(ParserError::UnexpectedLexeme {
                found: lexeme.to_string(),
                expected: expectation.to_string(),
                src: lexeme.named_source(),
                span: lexeme.span(),
            }),
            None => Err(self.eof_error(&expectation.to_string())),
        }
    }

    /// Error for the next lexeme, naming what the grammar wanted instead.
    pub fn unexpected(&self, expected: &str) -> ParserError {
        match self.peek() {
            Some(lexeme) => ParserError::UnexpectedLexeme {
                found: lexeme.to_string(),
                expected: expected.to_string(),
                src: lexeme.named_source(),
                span: lexeme.span(),
            },
            None => self.eof_error(expected),
        }
    }

    /// Re-injects a lexeme so that it is read next.
    pub fn push(&mut self, lexeme: Lexeme) {
        self.pushed.push(lexeme);
    }

    /// The lexeme most recently consumed from the file, if any.
    pub fn previous(&self) -> Option<&Lexeme> {
        self.position
            .checked_sub(1)
            .and_then(|index| self.lexemes.get(index))
    }

    pub fn mark(&self) -> usize {
        self.position
    }

    /// Skips the remainder of the construct that started at `mark`: the cursor
    /// moves past the first `;` (or closing `}`) that brings the brace depth
    /// back to where the construct began.
    pub fn recover(&mut self, mark: usize) {
        self.pushed.clear();
        let consumed = &self.lexemes[mark.min(self.position)..self.position];
        let mut depth: i64 = consumed.iter().map(brace_delta).sum();

        // The construct may already be complete.
        if depth <= 0 {
            match consumed.last().map(|l| l.kind) {
                Some(LexemeKind::Semi) => return,
                Some(LexemeKind::RBrace) => {
                    self.accept(&Expectation::kind(LexemeKind::Semi));
                    return;
                }
                _ => {}
            }
        }

        let mut closed_block = false;
        while let Some(lexeme) = self.lexemes.get(self.position) {
            if depth <= 0 && closed_block && !lexeme.is(LexemeKind::Semi) {
                break;
            }
            self.position += 1;
            match lexeme.kind {
                LexemeKind::Semi if depth <= 0 => break,
                LexemeKind::RBrace => {
                    depth -= 1;
                    closed_block = depth <= 0;
                }
                LexemeKind::LBrace => depth += 1,
                _ => {}
            }
        }
        log::trace!("recovered to lexeme {} of {}", self.position, self.source.name);
    }

    /// Skips one complete construct starting at the cursor without parsing it.
    pub fn skip_construct(&mut self) {
        self.recover(self.position);
    }

    fn eof_error(&self, expected: &str) -> ParserError {
        let end = self.source.contents.len();
        let span = match self.lexemes.last() {
            Some(last) => last.span(),
            None => (end, 0).into(),
        };
        ParserError::UnexpectedEof {
            expected: expected.to_string(),
            src: self.source.named_source(),
            span,
        }
    }
}

fn brace_delta(lexeme: &Lexeme) -> i64 {
    match lexeme.kind {
        LexemeKind::LBrace => 1,
        LexemeKind::RBrace => -1,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::{Lexer, LexemeValue};

    fn stream(input: &str) -> LexemeStream {
        let source = SourceFile::new("test.rdl", input);
        let lexemes = Lexer::new(&source).lex().unwrap();
        LexemeStream::new(source, lexemes)
    }

    #[test]
    fn test_expect_does_not_consume() {
        let s = stream("type Item : \"ITEM\"");
        assert!(s.expect(&[
            Expectation::keyword("type"),
            Expectation::kind(LexemeKind::Identifier),
            Expectation::kind(LexemeKind::Colon),
        ]));
        assert!(!s.expect(&[Expectation::keyword("declare")]));
        assert!(s.peek().unwrap().is_keyword("type"));
    }

    #[test]
    fn test_expect_any_and_be_false() {
        let s = stream("}");
        assert!(s.expect_any(&[
            Expectation::kind(LexemeKind::Semi),
            Expectation::kind(LexemeKind::RBrace),
        ]));
        assert!(!s.expect(&[Expectation::kind(LexemeKind::RBrace).be_false()]));
        assert!(s.expect(&[Expectation::kind(LexemeKind::Semi).be_false()]));
    }

    #[test]
    fn test_expect_past_end_is_false() {
        let s = stream("a");
        assert!(!s.expect(&[
            Expectation::kind(LexemeKind::Identifier),
            Expectation::kind(LexemeKind::Semi).be_false(),
        ]));
    }

    #[test]
    fn test_ensure_consumes_or_fails() {
        let mut s = stream("field ( \"name\" )");
        s.ensure(&[
            Expectation::keyword("field"),
            Expectation::kind(LexemeKind::LParen),
        ])
        .unwrap();
        let err = s.ensure(&[Expectation::kind(LexemeKind::RParen)]).unwrap_err();
        match err {
            ParserError::UnexpectedLexeme { found, expected, .. } => {
                assert_eq!(found, "\"name\"");
                assert_eq!(expected, "')'");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_ensure_at_end_of_input() {
        let mut s = stream("declare Item");
        s.advance();
        s.advance();
        assert!(s.finished());
        let err = s.ensure(&[Expectation::kind(LexemeKind::LBrace)]).unwrap_err();
        assert!(matches!(err, ParserError::UnexpectedEof { .. }));
    }

    #[test]
    fn test_push_is_read_first() {
        let mut s = stream("a b");
        let a = s.read().unwrap();
        let synthesized = Lexeme::synthesized(
            LexemeKind::Integer,
            "42",
            Some(LexemeValue::Integer(42)),
            &a,
        );
        s.push(synthesized);
        assert!(s.expect(&[
            Expectation::kind(LexemeKind::Integer),
            Expectation::kind(LexemeKind::Identifier),
        ]));
        assert_eq!(s.read().unwrap().integer(), Some(42));
        assert_eq!(s.read().unwrap().text, "b");
        assert!(s.finished());
    }

    #[test]
    fn test_recover_skips_rest_of_construct() {
        let mut s = stream("type A : \"AAAA\" { template { DWRD x; }; }; declare B { };");
        let mark = s.mark();
        // Fail somewhere inside the template block.
        for _ in 0..7 {
            s.advance();
        }
        s.recover(mark);
        assert!(s.peek().unwrap().is_keyword("declare"));
    }

    #[test]
    fn test_recover_without_trailing_semicolon() {
        let mut s = stream("type A : \"AAAA\" { field(\"x\") { } } declare B { }");
        let mark = s.mark();
        s.advance();
        s.recover(mark);
        assert!(s.peek().unwrap().is_keyword("declare"));
    }

    #[test]
    fn test_recover_after_complete_construct() {
        let mut s = stream("declare A { }; declare B { };");
        let mark = s.mark();
        for _ in 0..5 {
            s.advance();
        }
        s.recover(mark);
        assert!(s.peek().unwrap().is_keyword("declare"));
        assert_eq!(s.peek_at(1).unwrap().text, "B");
    }

    #[test]
    fn test_skip_construct() {
        let mut s = stream("@condition(X) type A : \"AAAA\" { template { DWRD a; }; }; type B");
        s.advance();
        s.advance();
        s.advance();
        s.advance();
        s.skip_construct();
        assert_eq!(s.peek_at(1).unwrap().text, "B");
    }

    #[test]
    fn test_recover_statement() {
        let mut s = stream("@define X; type");
        let mark = s.mark();
        s.advance();
        s.recover(mark);
        assert!(s.peek().unwrap().is_keyword("type"));
    }
}
