// Integration tests for resdl-core using test fixtures
use miette::Report;
use resdl_core::error::{RdlError, SemanticError};
use resdl_core::interpreter::Token;
use resdl_core::{compile, compile_file, Compilation, CompileOptions};
use std::fs;
use std::path::PathBuf;

fn get_test_file_path(subdir: &str, filename: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join(subdir)
        .join(filename)
}

fn read_test_file(subdir: &str, filename: &str) -> String {
    let path = get_test_file_path(subdir, filename);
    fs::read_to_string(&path).unwrap_or_else(|_| panic!("Failed to read test file: {:?}", path))
}

fn compile_ok(filename: &str) -> Compilation {
    let source = read_test_file("ok", filename);
    match compile(&source, filename) {
        Ok(compilation) => compilation,
        Err(err) => {
            let report = Report::from(err);
            panic!("{filename} should compile:\n{report:?}");
        }
    }
}

fn compile_bad(filename: &str) -> RdlError {
    let source = read_test_file("bad", filename);
    match compile(&source, filename) {
        Ok(_) => panic!("{filename} should not compile"),
        Err(err) => err,
    }
}

// Fixtures that should compile and encode
mod ok_tests {
    use super::*;

    #[test]
    fn test_items() {
        let compilation = compile_ok("items.rdl");
        assert_eq!(compilation.metadata.project.as_deref(), Some("Armory"));
        let sword = compilation.resource("Item", 128).unwrap();
        assert_eq!(sword.name, "Sword");
        assert_eq!(
            compilation.data(sword).unwrap(),
            &[0x00, 0x80, 0x05, b'S', b'w', b'o', b'r', b'd']
        );
        let bow = compilation.resource("Item", 129).unwrap();
        assert_eq!(bow.name, "Bow");
        assert_eq!(compilation.data(bow).unwrap().len(), 6);
    }

    #[test]
    fn test_signs() {
        let compilation = compile_ok("signs.rdl");
        let by_symbol = compilation.resource("Sign", 1).unwrap();
        let by_literal = compilation.resource("Sign", 2).unwrap();
        assert_eq!(by_symbol.values.get("direction"), Some(&Token::Integer(3)));
        assert_eq!(compilation.data(by_symbol).unwrap()[2..], compilation.data(by_literal).unwrap()[2..]);
    }

    #[test]
    fn test_sizes() {
        let compilation = compile_ok("sizes.rdl");
        let size = compilation.resource("Size", 128).unwrap();
        assert_eq!(size.values.get("width"), Some(&Token::Integer(10)));
        assert_eq!(size.values.get("height"), Some(&Token::Integer(20)));
        assert_eq!(compilation.data(size).unwrap(), &[0, 10, 0, 20]);
    }

    #[test]
    fn test_samples() {
        let compilation = compile_ok("samples.rdl");
        let sample = compilation.resource("Sample", 1).unwrap();
        assert_eq!(sample.values.list("entries").len(), 2);
        assert_eq!(sample.values.get("frame.bottom"), Some(&Token::Integer(30)));
        assert_eq!(sample.values.get("origin.y"), Some(&Token::Integer(4)));
        let data = compilation.data(sample).unwrap();
        assert_eq!(&data[data.len() - 4..], &[0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_modules_and_conditions() {
        let compilation = compile_ok("modules.rdl");
        assert_eq!(compilation.modules.len(), 1);
        assert_eq!(compilation.modules[0].types, vec!["Item".to_string()]);

        let ids: Vec<(Option<&str>, i64)> = compilation
            .resources
            .iter()
            .map(|r| (r.container(), r.id()))
            .collect();
        assert_eq!(ids, vec![(None, 128), (None, 129), (Some("mods"), 128)]);
        let axe = compilation.resource("Item", 129).unwrap();
        assert_eq!(axe.values.get("damage"), Some(&Token::Integer(1)));
    }

    #[test]
    fn test_compile_file_matches_compile() {
        let path = get_test_file_path("ok", "items.rdl");
        let from_file = compile_file(&path, &CompileOptions::default()).unwrap();
        let from_text = compile_ok("items.rdl");
        assert_eq!(from_file.to_bytes().unwrap(), from_text.to_bytes().unwrap());
    }
}

// Fixtures that must be rejected
mod bad_tests {
    use super::*;

    #[test]
    fn test_unknown_type() {
        let err = compile_bad("unknown_type.rdl");
        assert!(matches!(
            err,
            RdlError::Semantic(SemanticError::UnknownType { ref name, .. }) if name == "Weapon"
        ));
    }

    #[test]
    fn test_duplicate_type() {
        let err = compile_bad("duplicate_type.rdl");
        assert!(matches!(err, RdlError::Semantic(SemanticError::DuplicateType { .. })));
    }

    #[test]
    fn test_missing_count() {
        let err = compile_bad("missing_count.rdl");
        assert!(matches!(err, RdlError::Semantic(SemanticError::Type { .. })));
    }

    #[test]
    fn test_dangling() {
        let err = compile_bad("dangling.rdl");
        assert!(matches!(
            err,
            RdlError::Semantic(SemanticError::DanglingDecorator { ref name, .. }) if name == "deprecated"
        ));
    }

    #[test]
    fn test_syntax() {
        let err = compile_bad("syntax.rdl");
        assert!(matches!(err, RdlError::Parser(_)));
    }

    #[test]
    fn test_out_of_range() {
        let err = compile_bad("out_of_range.rdl");
        assert!(matches!(err, RdlError::Encoding(_)));
    }

    #[test]
    fn test_reports_render() {
        let err = compile_bad("unknown_type.rdl");
        let rendered = format!("{:?}", Report::from(err));
        assert!(rendered.contains("Weapon"), "{rendered}");
    }
}
