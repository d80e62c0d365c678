use super::binary_template::BinaryType;
use crate::interpreter::Token;
use crate::reference::Reference;
use std::fmt::{self, Display};

/// The source-level type of a field value, written `name as Type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDescriptor {
    Integer,
    String,
    Bitmask,
    Boolean,
    Data,
    Rect,
    Nested(String),
    /// `Type&`: a reference to a resource of the named type.
    Reference(Option<String>),
}

impl TypeDescriptor {
    /// Parses a descriptor name. Anything unrecognised names a nested type.
    pub fn parse(name: &str, is_reference: bool) -> Self {
        if is_reference {
            return TypeDescriptor::Reference(Some(name.to_string()));
        }
        match name {
            "Integer" => TypeDescriptor::Integer,
            "String" => TypeDescriptor::String,
            "Bitmask" => TypeDescriptor::Bitmask,
            "Boolean" => TypeDescriptor::Boolean,
            "Data" => TypeDescriptor::Data,
            "Rect" => TypeDescriptor::Rect,
            other => TypeDescriptor::Nested(other.to_string()),
        }
    }

    /// The descriptor a value gets when none is written.
    pub fn infer(binary_type: &BinaryType) -> Self {
        match binary_type {
            BinaryType::Bool | BinaryType::Bbit => TypeDescriptor::Boolean,
            BinaryType::Pstr | BinaryType::Cstr | BinaryType::Lstr | BinaryType::FixedString(_) => {
                TypeDescriptor::String
            }
            BinaryType::Hexd => TypeDescriptor::Data,
            BinaryType::Rect => TypeDescriptor::Rect,
            BinaryType::Nested(name) => TypeDescriptor::Nested(name.clone()),
            BinaryType::Rsrc => TypeDescriptor::Reference(None),
            _ => TypeDescriptor::Integer,
        }
    }

    /// Whether values of this descriptor can be stored in `binary_type`.
    pub fn accepts(&self, binary_type: &BinaryType) -> bool {
        match self {
            TypeDescriptor::Integer | TypeDescriptor::Bitmask => {
                binary_type.is_integer() || *binary_type == BinaryType::Char
            }
            TypeDescriptor::String => binary_type.is_string() || *binary_type == BinaryType::Char,
            TypeDescriptor::Boolean => {
                matches!(binary_type, BinaryType::Bool | BinaryType::Bbit) || binary_type.is_integer()
            }
            TypeDescriptor::Data => *binary_type == BinaryType::Hexd,
            TypeDescriptor::Rect => *binary_type == BinaryType::Rect,
            TypeDescriptor::Nested(name) => {
                matches!(binary_type, BinaryType::Nested(nested) if nested == name)
            }
            TypeDescriptor::Reference(_) => {
                *binary_type == BinaryType::Rsrc || binary_type.is_integer()
            }
        }
    }

    /// Converts an evaluated value towards this descriptor. Values that can
    /// not be converted are returned unchanged for the encoder to reject.
    pub fn coerce(&self, token: Token) -> Token {
        match (self, token) {
            (TypeDescriptor::Boolean, Token::Integer(value)) => Token::Boolean(value != 0),
            (TypeDescriptor::Integer | TypeDescriptor::Bitmask, Token::Boolean(value)) => {
                Token::Integer(i64::from(value))
            }
            (TypeDescriptor::Reference(type_name), Token::Integer(id)) => {
                let reference = Reference::new(id);
                Token::Reference(match type_name {
                    Some(name) => reference.with_type_name(name.as_str()),
                    None => reference,
                })
            }
            (TypeDescriptor::Reference(Some(name)), Token::Reference(reference))
                if reference.type_name().is_none() =>
            {
                Token::Reference(reference.with_type_name(name.as_str()))
            }
            (_, token) => token,
        }
    }
}

impl Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Integer => f.write_str("Integer"),
            TypeDescriptor::String => f.write_str("String"),
            TypeDescriptor::Bitmask => f.write_str("Bitmask"),
            TypeDescriptor::Boolean => f.write_str("Boolean"),
            TypeDescriptor::Data => f.write_str("Data"),
            TypeDescriptor::Rect => f.write_str("Rect"),
            TypeDescriptor::Nested(name) => f.write_str(name),
            TypeDescriptor::Reference(Some(name)) => write!(f, "{name}&"),
            TypeDescriptor::Reference(None) => f.write_str("Reference"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(TypeDescriptor::parse("Integer", false), TypeDescriptor::Integer);
        assert_eq!(
            TypeDescriptor::parse("Point", false),
            TypeDescriptor::Nested("Point".into())
        );
        assert_eq!(
            TypeDescriptor::parse("Sprite", true),
            TypeDescriptor::Reference(Some("Sprite".into()))
        );
    }

    #[test]
    fn test_infer_and_accept_agree() {
        for code in ["DWRD", "HLNG", "PSTR", "C010", "BOOL", "BBIT", "HEXD", "RECT", "RSRC"] {
            let binary_type = BinaryType::from_code(code).unwrap();
            assert!(
                TypeDescriptor::infer(&binary_type).accepts(&binary_type),
                "inferred descriptor should accept {code}"
            );
        }
    }

    #[test]
    fn test_incompatible() {
        assert!(!TypeDescriptor::String.accepts(&BinaryType::Dwrd));
        assert!(!TypeDescriptor::Data.accepts(&BinaryType::Pstr));
        assert!(!TypeDescriptor::Nested("Point".into()).accepts(&BinaryType::Nested("Size".into())));
        assert!(TypeDescriptor::Integer.accepts(&BinaryType::Char));
    }

    #[test]
    fn test_coerce_reference() {
        let token = TypeDescriptor::Reference(Some("Sprite".into())).coerce(Token::Integer(200));
        let reference = token.as_reference().unwrap();
        assert_eq!(reference.id(), 200);
        assert_eq!(reference.type_name(), Some("Sprite"));
        assert_eq!(reference.to_string(), "#Sprite.200");
    }

    #[test]
    fn test_coerce_boolean() {
        assert_eq!(TypeDescriptor::Boolean.coerce(Token::Integer(3)), Token::Boolean(true));
        assert_eq!(
            TypeDescriptor::String.coerce(Token::Integer(3)),
            Token::Integer(3)
        );
    }
}
