use super::scope::{ScopeId, Scopes};
use super::token::Token;
use super::InterpreterError;
use crate::error::ParserError;
use crate::lexer::{Lexeme, LexemeKind};
use crate::stream::{Expectation, LexemeStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    Xor,
    And,
    ShiftLeft,
    ShiftRight,
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
}

impl BinaryOp {
    fn from_kind(kind: LexemeKind) -> Option<Self> {
        Some(match kind {
            LexemeKind::Pipe => BinaryOp::Or,
            LexemeKind::Caret => BinaryOp::Xor,
            LexemeKind::Amp => BinaryOp::And,
            LexemeKind::LeftShift => BinaryOp::ShiftLeft,
            LexemeKind::RightShift => BinaryOp::ShiftRight,
            LexemeKind::Plus => BinaryOp::Add,
            LexemeKind::Minus => BinaryOp::Subtract,
            LexemeKind::Star => BinaryOp::Multiply,
            LexemeKind::Slash => BinaryOp::Divide,
            LexemeKind::Percent => BinaryOp::Remainder,
            _ => return None,
        })
    }

    /// Higher binds tighter.
    fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::Xor => 2,
            BinaryOp::And => 3,
            BinaryOp::ShiftLeft | BinaryOp::ShiftRight => 4,
            BinaryOp::Add | BinaryOp::Subtract => 5,
            BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Remainder => 6,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "|",
            BinaryOp::Xor => "^",
            BinaryOp::And => "&",
            BinaryOp::ShiftLeft => "<<",
            BinaryOp::ShiftRight => ">>",
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Remainder => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    BitNot,
    Not,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Negate => "-",
            UnaryOp::BitNot => "~",
            UnaryOp::Not => "!",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Token),
    Variable(String),
    Call {
        name: String,
        arguments: Vec<Expression>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
}

impl Expression {
    /// Expression ::= Unary { BinaryOp Unary }
    pub fn compile(stream: &mut LexemeStream) -> Result<Expression, ParserError> {
        Self::compile_binary(stream, 0)
    }

    fn compile_binary(stream: &mut LexemeStream, min_precedence: u8) -> Result<Self, ParserError> {
        let mut lhs = Self::compile_unary(stream)?;
        while let Some(op) = stream.peek().and_then(|l| BinaryOp::from_kind(l.kind)) {
            if op.precedence() < min_precedence {
                break;
            }
            stream.advance();
            let rhs = Self::compile_binary(stream, op.precedence() + 1)?;
            lhs = Expression::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    /// Unary ::= ( "-" | "~" | "!" ) Unary | Primary
    fn compile_unary(stream: &mut LexemeStream) -> Result<Self, ParserError> {
        let op = match stream.peek().map(|l| l.kind) {
            Some(LexemeKind::Minus) => UnaryOp::Negate,
            Some(LexemeKind::Tilde) => UnaryOp::BitNot,
            Some(LexemeKind::Exclaim) => UnaryOp::Not,
            _ => return Self::compile_primary(stream),
        };
        stream.advance();
        let operand = Self::compile_unary(stream)?;
        // Fold negative literals so `-5` stays a literal.
        if let (UnaryOp::Negate, Expression::Literal(Token::Integer(value))) = (op, &operand) {
            if let Some(negated) = value.checked_neg() {
                return Ok(Expression::Literal(Token::Integer(negated)));
            }
        }
        Ok(Expression::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    /// Primary ::= Literal | Variable | Path | Call | "(" Expression ")"
    fn compile_primary(stream: &mut LexemeStream) -> Result<Self, ParserError> {
        let Some(lexeme) = stream.peek() else {
            return Err(stream.unexpected("an expression"));
        };
        if let Some(token) = Token::from_lexeme(lexeme) {
            stream.advance();
            return Ok(Expression::Literal(token));
        }
        match lexeme.kind {
            LexemeKind::Variable => {
                let name = lexeme.text.clone();
                stream.advance();
                Ok(Expression::Variable(name))
            }
            LexemeKind::Identifier => {
                let name = read_path(stream)?;
                if stream.accept(&Expectation::kind(LexemeKind::LParen)) {
                    let arguments = compile_arguments(stream)?;
                    Ok(Expression::Call { name, arguments })
                } else {
                    Ok(Expression::Variable(name))
                }
            }
            LexemeKind::LParen => {
                stream.advance();
                let inner = Self::compile(stream)?;
                stream.ensure(&[Expectation::kind(LexemeKind::RParen)])?;
                Ok(inner)
            }
            _ => Err(stream.unexpected("an expression")),
        }
    }

    pub fn evaluate(&self, scopes: &mut Scopes, scope: ScopeId) -> Result<Token, InterpreterError> {
        match self {
            Expression::Literal(token) => Ok(token.clone()),
            Expression::Variable(name) => scopes.resolve(scope, name),
            Expression::Call { name, arguments } => {
                let values = arguments
                    .iter()
                    .map(|argument| argument.evaluate(scopes, scope))
                    .collect::<Result<Vec<_>, _>>()?;
                scopes.call(scope, name, &values)
            }
            Expression::Unary { op, operand } => operand.evaluate(scopes, scope)?.apply_unary(*op),
            Expression::Binary { op, lhs, rhs } => {
                let lhs = lhs.evaluate(scopes, scope)?;
                let rhs = rhs.evaluate(scopes, scope)?;
                lhs.apply_binary(*op, rhs)
            }
        }
    }

    /// Every variable name the expression reads.
    pub fn variables(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_variables(&mut names);
        names
    }

    fn collect_variables<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Expression::Literal(_) => {}
            Expression::Variable(name) => names.push(name),
            Expression::Call { arguments, .. } => {
                for argument in arguments {
                    argument.collect_variables(names);
                }
            }
            Expression::Unary { operand, .. } => operand.collect_variables(names),
            Expression::Binary { lhs, rhs, .. } => {
                lhs.collect_variables(names);
                rhs.collect_variables(names);
            }
        }
    }

    /// `Some(name)` when the whole expression is a call to `name`.
    pub fn called_function(&self) -> Option<&str> {
        match self {
            Expression::Call { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Path ::= Identifier { "." Identifier }
pub(crate) fn read_path(stream: &mut LexemeStream) -> Result<String, ParserError> {
    let mut path = stream.read_identifier()?.text;
    while stream.expect(&[
        Expectation::kind(LexemeKind::Dot),
        Expectation::kind(LexemeKind::Identifier),
    ]) {
        stream.advance();
        path.push('.');
        path.push_str(&stream.read_identifier()?.text);
    }
    Ok(path)
}

/// Arguments ::= [ Expression { "," Expression } ] ")"
fn compile_arguments(stream: &mut LexemeStream) -> Result<Vec<Expression>, ParserError> {
    let mut arguments = Vec::new();
    if stream.accept(&Expectation::kind(LexemeKind::RParen)) {
        return Ok(arguments);
    }
    loop {
        arguments.push(Expression::compile(stream)?);
        if !stream.accept(&Expectation::kind(LexemeKind::Comma)) {
            break;
        }
    }
    stream.ensure(&[Expectation::kind(LexemeKind::RParen)])?;
    Ok(arguments)
}

/// `[target =] expression`, compiled once and evaluated any number of times.
#[derive(Debug, Clone)]
pub struct Statement {
    pub target: Option<String>,
    pub expression: Expression,
    pub origin: Lexeme,
}

impl Statement {
    /// Statement ::= [ Path "=" ] Expression
    pub fn compile(stream: &mut LexemeStream) -> Result<Statement, ParserError> {
        let origin = stream
            .peek()
            .cloned()
            .ok_or_else(|| stream.unexpected("a statement"))?;
        let target = if assignment_ahead(stream) {
            let target = match origin.kind {
                LexemeKind::Variable => {
                    stream.advance();
                    origin.text.clone()
                }
                _ => read_path(stream)?,
            };
            stream.ensure(&[Expectation::kind(LexemeKind::Equals)])?;
            Some(target)
        } else {
            None
        };
        let expression = Expression::compile(stream)?;
        Ok(Statement {
            target,
            expression,
            origin,
        })
    }

    /// A statement that always produces `token`.
    pub fn literal(token: Token, origin: Lexeme) -> Statement {
        Statement {
            target: None,
            expression: Expression::Literal(token),
            origin,
        }
    }

    /// Evaluates the expression and, for assignments, binds the result in `scope`.
    pub fn execute(&self, scopes: &mut Scopes, scope: ScopeId) -> Result<Token, InterpreterError> {
        let value = self.expression.evaluate(scopes, scope)?;
        if let Some(target) = &self.target {
            scopes.define(scope, target.clone(), value.clone());
        }
        Ok(value)
    }
}

/// Looks past `name{.name}` or `$name` for an `=`.
fn assignment_ahead(stream: &LexemeStream) -> bool {
    match stream.peek().map(|l| l.kind) {
        Some(LexemeKind::Variable) => stream
            .peek_at(1)
            .is_some_and(|l| l.is(LexemeKind::Equals)),
        Some(LexemeKind::Identifier) => {
            let mut offset = 1;
            while stream.peek_at(offset).is_some_and(|l| l.is(LexemeKind::Dot))
                && stream
                    .peek_at(offset + 1)
                    .is_some_and(|l| l.is(LexemeKind::Identifier))
            {
                offset += 2;
            }
            stream
                .peek_at(offset)
                .is_some_and(|l| l.is(LexemeKind::Equals))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::Function;
    use crate::lexer::{Lexer, SourceFile};
    use crate::reference::Reference;

    fn stream(input: &str) -> LexemeStream {
        let source = SourceFile::new("test.rdl", input);
        let lexemes = Lexer::new(&source).lex().unwrap();
        LexemeStream::new(source, lexemes)
    }

    fn evaluate(input: &str) -> Result<Token, InterpreterError> {
        let mut s = stream(input);
        let statement = Statement::compile(&mut s).unwrap();
        assert!(s.finished(), "statement did not consume {input:?}");
        let mut scopes = Scopes::new();
        let root = scopes.root();
        statement.execute(&mut scopes, root)
    }

    #[test]
    fn test_precedence() {
        assert_eq!(evaluate("1 + 2 * 3"), Ok(Token::Integer(7)));
        assert_eq!(evaluate("(1 + 2) * 3"), Ok(Token::Integer(9)));
        assert_eq!(evaluate("1 << 2 + 1"), Ok(Token::Integer(8)));
        assert_eq!(evaluate("0x10 | 0x01 & 0x03"), Ok(Token::Integer(0x11)));
        assert_eq!(evaluate("10 - 4 - 3"), Ok(Token::Integer(3)));
    }

    #[test]
    fn test_unary_and_literals() {
        assert_eq!(evaluate("-5 + 2"), Ok(Token::Integer(-3)));
        assert_eq!(evaluate("~0"), Ok(Token::Integer(-1)));
        assert_eq!(evaluate("!false"), Ok(Token::Boolean(true)));
        assert_eq!(evaluate("50%"), Ok(Token::Percentage(50)));
        assert_eq!(evaluate("\"a\" + \"b\""), Ok(Token::String("ab".into())));
        assert_eq!(
            evaluate("#Item.128 + 1"),
            Ok(Token::Reference(Reference::new(129).with_type_name("Item")))
        );
    }

    #[test]
    fn test_builtin_calls() {
        assert_eq!(evaluate("max(3, min(10, 7))"), Ok(Token::Integer(7)));
        assert_eq!(evaluate("integer(2.9)"), Ok(Token::Integer(2)));
    }

    #[test]
    fn test_assignment_binds_in_scope() {
        let mut s = stream("this.width = w * 2");
        let statement = Statement::compile(&mut s).unwrap();
        assert_eq!(statement.target.as_deref(), Some("this.width"));

        let mut scopes = Scopes::new();
        let root = scopes.root();
        scopes.define(root, "w", Token::Integer(21));
        assert_eq!(statement.execute(&mut scopes, root), Ok(Token::Integer(42)));
        assert_eq!(scopes.resolve(root, "this.width"), Ok(Token::Integer(42)));
    }

    #[test]
    fn test_unknown_variable() {
        assert_eq!(
            evaluate("north + 1"),
            Err(InterpreterError::UnknownVariable("north".into()))
        );
    }

    #[test]
    fn test_user_function() {
        let mut s = stream("double(21)");
        let statement = Statement::compile(&mut s).unwrap();
        let mut scopes = Scopes::new();
        let root = scopes.root();
        scopes.add_function(
            root,
            Function::native("double", &["value"], |args| {
                args[0].clone().apply_binary(BinaryOp::Multiply, Token::Integer(2))
            }),
        );
        assert_eq!(statement.execute(&mut scopes, root), Ok(Token::Integer(42)));
    }

    #[test]
    fn test_expression_stops_at_non_operator() {
        let mut s = stream("0 [ north = 0 ]");
        let expression = Expression::compile(&mut s).unwrap();
        assert_eq!(expression, Expression::Literal(Token::Integer(0)));
        assert!(s.peek().unwrap().is(LexemeKind::LBracket));
    }

    #[test]
    fn test_variables() {
        let mut s = stream("north | south + $id");
        let expression = Expression::compile(&mut s).unwrap();
        assert_eq!(expression.variables(), vec!["north", "south", "id"]);
    }
}
