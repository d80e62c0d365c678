use super::function::Function;
use super::token::Token;
use super::InterpreterError;
use crate::reference::Reference;
use crate::utils::hash_name;

type Builtin = fn(&[Token]) -> Result<Token, InterpreterError>;

/// The native functions installed into every root scope.
pub(crate) fn all() -> Vec<Function> {
    let table: &[(&str, &[&str], Builtin)] = &[
        ("hash", &["value"], hash),
        ("sin", &["x"], |a| unary_decimal("sin", a, f64::sin)),
        ("cos", &["x"], |a| unary_decimal("cos", a, f64::cos)),
        ("tan", &["x"], |a| unary_decimal("tan", a, f64::tan)),
        ("sqrt", &["x"], |a| unary_decimal("sqrt", a, f64::sqrt)),
        ("radians", &["x"], |a| unary_decimal("radians", a, f64::to_radians)),
        ("degrees", &["x"], |a| unary_decimal("degrees", a, f64::to_degrees)),
        ("pow", &["base", "exponent"], pow),
        ("abs", &["x"], abs),
        ("min", &["a", "b"], |a| pick("min", a, |x, y| x <= y)),
        ("max", &["a", "b"], |a| pick("max", a, |x, y| x >= y)),
        ("floor", &["x"], |a| rounding("floor", a, f64::floor)),
        ("ceil", &["x"], |a| rounding("ceil", a, f64::ceil)),
        ("round", &["x"], |a| rounding("round", a, f64::round)),
        ("integer", &["value"], integer),
        ("decimal", &["value"], |a| Ok(Token::Decimal(decimal_arg("decimal", a, 0)?))),
        ("percentage", &["value"], |a| Ok(Token::Percentage(integer_arg("percentage", a, 0)?))),
        ("string", &["value"], |a| Ok(Token::String(a[0].to_string()))),
        ("boolean", &["value"], |a| Ok(Token::Boolean(a[0].truthy()))),
        ("reference", &["id"], reference),
        ("length", &["text"], |a| {
            Ok(Token::Integer(string_arg("length", a, 0)?.chars().count() as i64))
        }),
        ("upper", &["text"], |a| Ok(Token::String(string_arg("upper", a, 0)?.to_uppercase()))),
        ("lower", &["text"], |a| Ok(Token::String(string_arg("lower", a, 0)?.to_lowercase()))),
        ("rgb", &["red", "green", "blue"], |a| color("rgb", a, 0xFF)),
        ("rgba", &["red", "green", "blue", "alpha"], |a| {
            let alpha = component("rgba", a, 3)?;
            color("rgba", a, alpha)
        }),
    ];
    table
        .iter()
        .map(|(name, parameters, body)| Function::native(name, parameters, *body))
        .collect()
}

fn invalid(function: &str, expected: &str, found: &Token) -> InterpreterError {
    InterpreterError::InvalidArgument {
        function: function.to_string(),
        expected: expected.to_string(),
        found: found.kind_name().to_string(),
    }
}

fn integer_arg(function: &str, args: &[Token], index: usize) -> Result<i64, InterpreterError> {
    args[index]
        .as_integer()
        .ok_or_else(|| invalid(function, "an integer", &args[index]))
}

fn decimal_arg(function: &str, args: &[Token], index: usize) -> Result<f64, InterpreterError> {
    args[index]
        .as_decimal()
        .ok_or_else(|| invalid(function, "a number", &args[index]))
}

fn string_arg<'a>(function: &str, args: &'a [Token], index: usize) -> Result<&'a str, InterpreterError> {
    args[index]
        .as_str()
        .ok_or_else(|| invalid(function, "a string", &args[index]))
}

fn hash(args: &[Token]) -> Result<Token, InterpreterError> {
    let text = string_arg("hash", args, 0)?;
    // Reinterpret the 64 hash bits as a signed value.
    Ok(Token::Integer(hash_name(text) as i64))
}

fn unary_decimal(function: &str, args: &[Token], op: fn(f64) -> f64) -> Result<Token, InterpreterError> {
    Ok(Token::Decimal(op(decimal_arg(function, args, 0)?)))
}

fn pow(args: &[Token]) -> Result<Token, InterpreterError> {
    if let (Token::Integer(base), Token::Integer(exponent)) = (&args[0], &args[1]) {
        if let Ok(exponent) = u32::try_from(*exponent) {
            return base
                .checked_pow(exponent)
                .map(Token::Integer)
                .ok_or_else(|| InterpreterError::Overflow {
                    operator: "pow".to_string(),
                });
        }
    }
    let base = decimal_arg("pow", args, 0)?;
    let exponent = decimal_arg("pow", args, 1)?;
    Ok(Token::Decimal(base.powf(exponent)))
}

fn abs(args: &[Token]) -> Result<Token, InterpreterError> {
    match &args[0] {
        Token::Integer(value) => value
            .checked_abs()
            .map(Token::Integer)
            .ok_or_else(|| InterpreterError::Overflow {
                operator: "abs".to_string(),
            }),
        Token::Decimal(value) => Ok(Token::Decimal(value.abs())),
        Token::Percentage(value) => Ok(Token::Percentage(value.saturating_abs())),
        other => Err(invalid("abs", "a number", other)),
    }
}

/// Returns whichever argument `keep_first` prefers, preserving its kind.
fn pick(function: &str, args: &[Token], keep_first: fn(f64, f64) -> bool) -> Result<Token, InterpreterError> {
    let a = decimal_arg(function, args, 0)?;
    let b = decimal_arg(function, args, 1)?;
    Ok(if keep_first(a, b) {
        args[0].clone()
    } else {
        args[1].clone()
    })
}

fn rounding(function: &str, args: &[Token], op: fn(f64) -> f64) -> Result<Token, InterpreterError> {
    match &args[0] {
        Token::Integer(value) => Ok(Token::Integer(*value)),
        _ => Ok(Token::Integer(op(decimal_arg(function, args, 0)?) as i64)),
    }
}

fn integer(args: &[Token]) -> Result<Token, InterpreterError> {
    match &args[0] {
        Token::Decimal(value) => Ok(Token::Integer(value.trunc() as i64)),
        Token::Reference(reference) => Ok(Token::Integer(reference.id())),
        Token::String(text) => text
            .trim()
            .parse()
            .map(Token::Integer)
            .map_err(|_| invalid("integer", "a numeric string", &args[0])),
        _ => Ok(Token::Integer(integer_arg("integer", args, 0)?)),
    }
}

fn reference(args: &[Token]) -> Result<Token, InterpreterError> {
    match &args[0] {
        Token::Reference(reference) => Ok(Token::Reference(reference.clone())),
        _ => Ok(Token::Reference(Reference::new(integer_arg("reference", args, 0)?))),
    }
}

fn component(function: &str, args: &[Token], index: usize) -> Result<i64, InterpreterError> {
    let value = integer_arg(function, args, index)?;
    if (0..=255).contains(&value) {
        Ok(value)
    } else {
        Err(invalid(function, "a component in 0..=255", &args[index]))
    }
}

/// Packs a colour as `0xAARRGGBB`.
fn color(function: &str, args: &[Token], alpha: i64) -> Result<Token, InterpreterError> {
    let red = component(function, args, 0)?;
    let green = component(function, args, 1)?;
    let blue = component(function, args, 2)?;
    Ok(Token::Integer((alpha << 24) | (red << 16) | (green << 8) | blue))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::Scopes;

    fn call(name: &str, args: &[Token]) -> Result<Token, InterpreterError> {
        let mut scopes = Scopes::new();
        let root = scopes.root();
        scopes.call(root, name, args)
    }

    #[test]
    fn test_hash_is_stable() {
        let first = call("hash", &[Token::String("sword".into())]).unwrap();
        let second = call("hash", &[Token::String("sword".into())]).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, Token::Integer(hash_name("sword") as i64));
    }

    #[test]
    fn test_numeric_conversions() {
        assert_eq!(call("integer", &[Token::Decimal(3.9)]), Ok(Token::Integer(3)));
        assert_eq!(call("integer", &[Token::String("12".into())]), Ok(Token::Integer(12)));
        assert_eq!(call("decimal", &[Token::Integer(2)]), Ok(Token::Decimal(2.0)));
        assert_eq!(call("percentage", &[Token::Integer(40)]), Ok(Token::Percentage(40)));
        assert_eq!(call("round", &[Token::Decimal(2.5)]), Ok(Token::Integer(3)));
        assert_eq!(call("floor", &[Token::Decimal(-0.5)]), Ok(Token::Integer(-1)));
        assert_eq!(call("ceil", &[Token::Integer(4)]), Ok(Token::Integer(4)));
    }

    #[test]
    fn test_trigonometry() {
        let Token::Decimal(value) = call("sin", &[Token::Integer(0)]).unwrap() else {
            panic!("sin should return a decimal");
        };
        assert!(value.abs() < f64::EPSILON);
        let Token::Decimal(value) = call("degrees", &[Token::Decimal(std::f64::consts::PI)]).unwrap() else {
            panic!("degrees should return a decimal");
        };
        assert!((value - 180.0).abs() < 1e-9);
    }

    #[test]
    fn test_pow() {
        assert_eq!(call("pow", &[Token::Integer(2), Token::Integer(10)]), Ok(Token::Integer(1024)));
        assert_eq!(call("pow", &[Token::Decimal(2.0), Token::Integer(3)]), Ok(Token::Decimal(8.0)));
        assert!(matches!(
            call("pow", &[Token::Integer(10), Token::Integer(40)]),
            Err(InterpreterError::Overflow { .. })
        ));
    }

    #[test]
    fn test_min_max_keep_kind() {
        assert_eq!(call("min", &[Token::Integer(3), Token::Decimal(4.5)]), Ok(Token::Integer(3)));
        assert_eq!(call("max", &[Token::Integer(3), Token::Decimal(4.5)]), Ok(Token::Decimal(4.5)));
    }

    #[test]
    fn test_strings() {
        assert_eq!(call("length", &[Token::String("héllo".into())]), Ok(Token::Integer(5)));
        assert_eq!(call("upper", &[Token::String("abc".into())]), Ok(Token::String("ABC".into())));
        assert_eq!(call("string", &[Token::Integer(7)]), Ok(Token::String("7".into())));
        assert!(matches!(
            call("upper", &[Token::Integer(1)]),
            Err(InterpreterError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_colors() {
        let rgb = call("rgb", &[Token::Integer(0x12), Token::Integer(0x34), Token::Integer(0x56)]);
        assert_eq!(rgb, Ok(Token::Integer(0xFF12_3456)));
        let rgba = call(
            "rgba",
            &[Token::Integer(1), Token::Integer(2), Token::Integer(3), Token::Integer(0)],
        );
        assert_eq!(rgba, Ok(Token::Integer(0x0001_0203)));
        assert!(call("rgb", &[Token::Integer(256), Token::Integer(0), Token::Integer(0)]).is_err());
    }

    #[test]
    fn test_argument_count_is_checked() {
        assert!(matches!(
            call("max", &[Token::Integer(1)]),
            Err(InterpreterError::ArgumentCount { expected: 2, found: 1, .. })
        ));
    }

    #[test]
    fn test_reference() {
        let value = call("reference", &[Token::Integer(130)]).unwrap();
        assert_eq!(value.as_reference().map(Reference::id), Some(130));
    }
}
