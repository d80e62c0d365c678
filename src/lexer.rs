use crate::error::LexerError;
use crate::reference::Reference;
use crate::utils::get_line_and_column;
use miette::{NamedSource, SourceSpan};
use std::fmt::{self, Display};
use std::sync::Arc;

/// Directive names. Every other `@name` is lexed as a decorator.
pub const DIRECTIVES: &[&str] = &[
    "import",
    "define",
    "project",
    "author",
    "version",
    "license",
    "copyright",
    "email",
    "website",
    "format",
    "out",
    "echo",
];

/// A named piece of source text. Lexemes keep a shared handle to the file
/// they were read from so diagnostics can be rendered after parsing.
#[derive(Debug, PartialEq, Eq)]
pub struct SourceFile {
    pub name: String,
    pub contents: String,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, contents: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            contents: contents.into(),
        })
    }

    #[must_use]
    pub fn named_source(&self) -> NamedSource<String> {
        NamedSource::new(self.name.clone(), self.contents.clone())
    }
}

/// The kind tag of a lexeme. Payloads live on the [`Lexeme`] itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LexemeKind {
    // == Literals ==
    Identifier,
    String,
    Integer,
    Decimal,
    Percentage,
    /// `#128`, `#Type.128`, `#Container.Type.128`, `#auto`, `#?`
    Reference,
    /// `$name` or `$1`
    Variable,
    /// `@import`, `@define`, ... (see [`DIRECTIVES`])
    Directive,
    /// Any other `@name`
    Decorator,

    // == Punctuation & Operators ==
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    LAngle,
    RAngle,
    Semi,
    Comma,
    Dot,
    Colon,
    Equals,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Exclaim,
    Question,
    LeftShift,
    RightShift,
}

impl Display for LexemeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LexemeKind::Identifier => "an identifier",
            LexemeKind::String => "a string",
            LexemeKind::Integer => "an integer",
            LexemeKind::Decimal => "a decimal",
            LexemeKind::Percentage => "a percentage",
            LexemeKind::Reference => "a resource reference",
            LexemeKind::Variable => "a variable",
            LexemeKind::Directive => "a directive",
            LexemeKind::Decorator => "a decorator",
            LexemeKind::LBrace => "'{'",
            LexemeKind::RBrace => "'}'",
            LexemeKind::LBracket => "'['",
            LexemeKind::RBracket => "']'",
            LexemeKind::LParen => "'('",
            LexemeKind::RParen => "')'",
            LexemeKind::LAngle => "'<'",
            LexemeKind::RAngle => "'>'",
            LexemeKind::Semi => "';'",
            LexemeKind::Comma => "','",
            LexemeKind::Dot => "'.'",
            LexemeKind::Colon => "':'",
            LexemeKind::Equals => "'='",
            LexemeKind::Plus => "'+'",
            LexemeKind::Minus => "'-'",
            LexemeKind::Star => "'*'",
            LexemeKind::Slash => "'/'",
            LexemeKind::Percent => "'%'",
            LexemeKind::Amp => "'&'",
            LexemeKind::Pipe => "'|'",
            LexemeKind::Caret => "'^'",
            LexemeKind::Tilde => "'~'",
            LexemeKind::Exclaim => "'!'",
            LexemeKind::Question => "'?'",
            LexemeKind::LeftShift => "'<<'",
            LexemeKind::RightShift => "'>>'",
        };
        f.write_str(text)
    }
}

/// Resolved payload of a literal lexeme.
#[derive(Debug, Clone, PartialEq)]
pub enum LexemeValue {
    Integer(i64),
    Decimal(f64),
    Reference(Reference),
}

/// A classified piece of source text with its position.
#[derive(Debug, Clone)]
pub struct Lexeme {
    pub kind: LexemeKind,
    /// Raw text for punctuation, the unescaped contents for strings, and the
    /// bare name for variables, directives and decorators.
    pub text: String,
    pub value: Option<LexemeValue>,
    pub pos_start: usize,
    pub pos_end: usize,
    pub source: Arc<SourceFile>,
}

impl Lexeme {
    /// Builds a lexeme that did not come from the source, positioned over `origin`.
    /// Used to splice evaluated values back into a stream.
    #[must_use]
    pub fn synthesized(
        kind: LexemeKind,
        text: impl Into<String>,
        value: Option<LexemeValue>,
        origin: &Lexeme,
    ) -> Self {
        Self {
            kind,
            text: text.into(),
            value,
            pos_start: origin.pos_start,
            pos_end: origin.pos_end,
            source: origin.source.clone(),
        }
    }

    pub fn is(&self, kind: LexemeKind) -> bool {
        self.kind == kind
    }

    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == LexemeKind::Identifier && self.text == keyword
    }

    pub fn integer(&self) -> Option<i64> {
        match self.value {
            Some(LexemeValue::Integer(value)) => Some(value),
            _ => None,
        }
    }

    pub fn reference(&self) -> Option<&Reference> {
        match &self.value {
            Some(LexemeValue::Reference(reference)) => Some(reference),
            _ => None,
        }
    }

    #[must_use]
    pub fn span(&self) -> SourceSpan {
        (self.pos_start, self.pos_end.saturating_sub(self.pos_start)).into()
    }

    #[must_use]
    pub fn named_source(&self) -> NamedSource<String> {
        self.source.named_source()
    }

    /// 1-based line and column of the first character.
    #[must_use]
    pub fn line_and_column(&self) -> (usize, usize) {
        get_line_and_column(&self.source.contents, self.pos_start)
    }

    /// `file:line:column`, for log output.
    #[must_use]
    pub fn location(&self) -> String {
        let (line, column) = self.line_and_column();
        format!("{}:{}:{}", self.source.name, line, column)
    }
}

impl Display for Lexeme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            LexemeKind::String => write!(f, "\"{}\"", self.text),
            LexemeKind::Variable => write!(f, "${}", self.text),
            LexemeKind::Directive | LexemeKind::Decorator => write!(f, "@{}", self.text),
            _ => f.write_str(&self.text),
        }
    }
}

pub struct Lexer<'a> {
    source: Arc<SourceFile>,
    input: &'a str,
    position: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a Arc<SourceFile>) -> Self {
        Self {
            source: source.clone(),
            input: &source.contents,
            position: 0,
        }
    }

    /// Reads the whole file. Whitespace and comments are dropped.
    pub fn lex(&mut self) -> Result<Vec<Lexeme>, LexerError> {
        let mut lexemes = Vec::new();
        while let Some(lexeme) = self.next_lexeme()? {
            lexemes.push(lexeme);
        }
        log::trace!("lexed {} lexemes from {}", lexemes.len(), self.source.name);
        Ok(lexemes)
    }

    pub fn next_lexeme(&mut self) -> Result<Option<Lexeme>, LexerError> {
        self.skip_trivia();
        let start = self.position;
        let Some(c) = self.advance() else {
            return Ok(None);
        };

        let kind = match c {
            '{' => LexemeKind::LBrace,
            '}' => LexemeKind::RBrace,
            '[' => LexemeKind::LBracket,
            ']' => LexemeKind::RBracket,
            '(' => LexemeKind::LParen,
            ')' => LexemeKind::RParen,
            ';' => LexemeKind::Semi,
            ',' => LexemeKind::Comma,
            '.' => LexemeKind::Dot,
            ':' => LexemeKind::Colon,
            '=' => LexemeKind::Equals,
            '+' => LexemeKind::Plus,
            '-' => LexemeKind::Minus,
            '*' => LexemeKind::Star,
            '/' => LexemeKind::Slash,
            '%' => LexemeKind::Percent,
            '&' => LexemeKind::Amp,
            '|' => LexemeKind::Pipe,
            '^' => LexemeKind::Caret,
            '~' => LexemeKind::Tilde,
            '!' => LexemeKind::Exclaim,
            '?' => LexemeKind::Question,
            '<' => {
                if self.peek() == Some('<') {
                    self.advance();
                    LexemeKind::LeftShift
                } else {
                    LexemeKind::LAngle
                }
            }
            '>' => {
                if self.peek() == Some('>') {
                    self.advance();
                    LexemeKind::RightShift
                } else {
                    LexemeKind::RAngle
                }
            }
            '"' | '\'' => return self.read_string(c, start).map(Some),
            '#' => return self.read_reference(start).map(Some),
            '@' => return self.read_at_name(start).map(Some),
            '$' => return self.read_variable(start).map(Some),
            c if c.is_ascii_digit() => return self.read_number(start).map(Some),
            c if is_identifier_start(c) => {
                self.read_identifier_tail();
                LexemeKind::Identifier
            }
            other => {
                return Err(LexerError::UnrecognisedCharacter {
                    character: other,
                    src: self.source.named_source(),
                    span: (start, other.len_utf8()).into(),
                })
            }
        };

        Ok(Some(self.lexeme(kind, start, None)))
    }

    fn lexeme(&self, kind: LexemeKind, start: usize, value: Option<LexemeValue>) -> Lexeme {
        self.lexeme_with_text(kind, start, self.input[start..self.position].to_string(), value)
    }

    fn lexeme_with_text(
        &self,
        kind: LexemeKind,
        start: usize,
        text: String,
        value: Option<LexemeValue>,
    ) -> Lexeme {
        Lexeme {
            kind,
            text,
            value,
            pos_start: start,
            pos_end: self.position,
            source: self.source.clone(),
        }
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.input[self.position..].chars().next()?;
        self.position += c.len_utf8();
        Some(c)
    }

    fn peek(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.input[self.position..].chars().nth(n)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('`') => self.skip_line(),
                Some('/') if self.peek_nth(1) == Some('/') => self.skip_line(),
                _ => break,
            }
        }
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.advance() {
            if c == '\n' {
                break;
            }
        }
    }

    fn read_identifier_tail(&mut self) {
        while let Some(c) = self.peek() {
            if is_identifier_part(c) {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_string(&mut self, quote: char, start: usize) -> Result<Lexeme, LexerError> {
        let mut value = String::new();
        loop {
            match self.advance() {
                None => {
                    return Err(LexerError::UnterminatedString {
                        src: self.source.named_source(),
                        span: (start, 1).into(),
                    })
                }
                Some(c) if c == quote => break,
                Some('\\') => match self.advance() {
                    Some('n') => value.push('\n'),
                    Some('r') => value.push('\r'),
                    Some('t') => value.push('\t'),
                    Some('0') => value.push('\0'),
                    Some(c @ ('\\' | '"' | '\'')) => value.push(c),
                    Some(other) => {
                        value.push('\\');
                        value.push(other);
                    }
                    None => {
                        return Err(LexerError::UnterminatedString {
                            src: self.source.named_source(),
                            span: (start, 1).into(),
                        })
                    }
                },
                Some(c) => value.push(c),
            }
        }
        Ok(self.lexeme_with_text(LexemeKind::String, start, value, None))
    }

    fn read_digits(&mut self, radix: u32) {
        while let Some(c) = self.peek() {
            if c.is_digit(radix) || c == '_' {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn parse_integer(&self, digits: &str, radix: u32, start: usize) -> Result<i64, LexerError> {
        let cleaned: String = digits.chars().filter(|c| *c != '_').collect();
        // Hex literals may use the full 64-bit range (e.g. 0xFFFFFFFFFFFFFFFF).
        let parsed = if radix == 16 {
            u64::from_str_radix(&cleaned, 16).map(|v| v as i64).ok()
        } else {
            cleaned.parse::<i64>().ok()
        };
        parsed.ok_or_else(|| LexerError::InvalidNumber {
            text: self.input[start..self.position].to_string(),
            src: self.source.named_source(),
            span: (start, self.position - start).into(),
        })
    }

    /// Decimal, `0x` hexadecimal, `1.5` decimals and `50%` percentages.
    fn read_number(&mut self, start: usize) -> Result<Lexeme, LexerError> {
        let first = &self.input[start..self.position];
        if first == "0" && matches!(self.peek(), Some('x' | 'X')) {
            self.advance();
            let digits_start = self.position;
            self.read_digits(16);
            if self.position == digits_start {
                return Err(LexerError::InvalidNumber {
                    text: self.input[start..self.position].to_string(),
                    src: self.source.named_source(),
                    span: (start, self.position - start).into(),
                });
            }
            let value = self.parse_integer(&self.input[digits_start..self.position], 16, start)?;
            return Ok(self.lexeme(LexemeKind::Integer, start, Some(LexemeValue::Integer(value))));
        }

        self.read_digits(10);
        if self.peek() == Some('.') && self.peek_nth(1).is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
            self.read_digits(10);
            let text: String = self.input[start..self.position]
                .chars()
                .filter(|c| *c != '_')
                .collect();
            let value = text.parse::<f64>().map_err(|_| LexerError::InvalidNumber {
                text: text.clone(),
                src: self.source.named_source(),
                span: (start, self.position - start).into(),
            })?;
            return Ok(self.lexeme(LexemeKind::Decimal, start, Some(LexemeValue::Decimal(value))));
        }

        let value = self.parse_integer(&self.input[start..self.position], 10, start)?;
        if self.peek() == Some('%') {
            self.advance();
            return Ok(self.lexeme(
                LexemeKind::Percentage,
                start,
                Some(LexemeValue::Integer(value)),
            ));
        }
        Ok(self.lexeme(LexemeKind::Integer, start, Some(LexemeValue::Integer(value))))
    }

    fn read_at_name(&mut self, start: usize) -> Result<Lexeme, LexerError> {
        match self.peek() {
            Some(c) if is_identifier_start(c) => {
                let name_start = self.position;
                self.read_identifier_tail();
                let name = self.input[name_start..self.position].to_string();
                let kind = if DIRECTIVES.contains(&name.as_str()) {
                    LexemeKind::Directive
                } else {
                    LexemeKind::Decorator
                };
                Ok(self.lexeme_with_text(kind, start, name, None))
            }
            _ => Err(LexerError::UnrecognisedCharacter {
                character: '@',
                src: self.source.named_source(),
                span: (start, 1).into(),
            }),
        }
    }

    fn read_variable(&mut self, start: usize) -> Result<Lexeme, LexerError> {
        let name_start = self.position;
        while let Some(c) = self.peek() {
            if is_identifier_part(c) {
                self.advance();
            } else {
                break;
            }
        }
        if self.position == name_start {
            return Err(LexerError::UnrecognisedCharacter {
                character: '$',
                src: self.source.named_source(),
                span: (start, 1).into(),
            });
        }
        let name = self.input[name_start..self.position].to_string();
        Ok(self.lexeme_with_text(LexemeKind::Variable, start, name, None))
    }

    /// `#` has already been consumed.
    fn read_reference(&mut self, start: usize) -> Result<Lexeme, LexerError> {
        if self.peek() == Some('?') {
            self.advance();
            let reference = Reference::any();
            return Ok(self.lexeme(
                LexemeKind::Reference,
                start,
                Some(LexemeValue::Reference(reference)),
            ));
        }

        let mut segments: Vec<String> = Vec::new();
        let id = loop {
            match self.peek() {
                Some(c) if c.is_ascii_digit() || c == '-' => {
                    let digits_start = self.position;
                    self.advance();
                    self.read_digits(10);
                    let digits = &self.input[digits_start..self.position];
                    if digits == "-" {
                        return Err(self.malformed_reference(start));
                    }
                    break self.parse_integer(digits, 10, start)?;
                }
                Some(c) if is_identifier_start(c) => {
                    let name_start = self.position;
                    self.read_identifier_tail();
                    let name = &self.input[name_start..self.position];
                    if name == "auto" && self.peek() != Some('.') {
                        break Reference::AUTO;
                    }
                    segments.push(name.to_string());
                }
                Some(quote @ ('"' | '\'')) => {
                    self.advance();
                    let string = self.read_string(quote, self.position - 1)?;
                    segments.push(string.text);
                }
                _ => return Err(self.malformed_reference(start)),
            }
            if self.peek() != Some('.') {
                return Err(self.malformed_reference(start));
            }
            self.advance();
        };

        let reference = match segments.len() {
            0 => Reference::new(id),
            1 => Reference::new(id).with_type_name(segments.remove(0)),
            2 => {
                let type_name = segments.remove(1);
                Reference::new(id)
                    .with_type_name(type_name)
                    .with_container(segments.remove(0))
            }
            _ => return Err(self.malformed_reference(start)),
        };
        Ok(self.lexeme(
            LexemeKind::Reference,
            start,
            Some(LexemeValue::Reference(reference)),
        ))
    }

    fn malformed_reference(&self, start: usize) -> LexerError {
        LexerError::MalformedReference {
            src: self.source.named_source(),
            span: (start, self.position.saturating_sub(start).max(1)).into(),
        }
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_identifier_part(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Convenience wrapper: lexes `contents` as a file called `name`.
pub fn lex(name: &str, contents: &str) -> Result<Vec<Lexeme>, LexerError> {
    let source = SourceFile::new(name, contents);
    Lexer::new(&source).lex()
}
