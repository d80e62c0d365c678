use super::{unexpected_lexeme, Parser};
use crate::archive::Format;
use crate::error::{RdlError, SemanticError};
use crate::interpreter::Expression;
use crate::lexer::{Lexeme, LexemeKind, Lexer, SourceFile};
use crate::stream::{Expectation, LexemeStream};
use std::path::{Path, PathBuf};

impl Parser<'_> {
    /// Directive ::= "@" DirectiveName DirectiveBody ";"
    pub(super) fn parse_directive(&mut self) -> Result<(), RdlError> {
        if self.claim_decorators().is_none() {
            return Ok(());
        }
        let directive = self.stream.read_kind(LexemeKind::Directive)?;
        match directive.text.as_str() {
            "import" => self.parse_import()?,
            "define" => {
                let name = self.read_name()?;
                log::debug!("{}: defined {}", directive.location(), name);
                self.context.definitions.insert(name);
            }
            "format" => self.parse_format()?,
            "out" => self.parse_output()?,
            "echo" => {
                let expression = Expression::compile(&mut self.stream)?;
                let root = self.context.scopes.root();
                let value = self.evaluate(&expression, root, &directive)?;
                log::info!("{}: {}", directive.location(), value);
            }
            key => {
                let value = self.stream.read_kind(LexemeKind::String)?;
                if !self.context.metadata.set(key, value.text) {
                    log::warn!("{}: `@{}` is not handled", directive.location(), key);
                }
            }
        }
        self.stream.ensure(&[Expectation::kind(LexemeKind::Semi)])?;
        Ok(())
    }

    /// Name ::= Identifier | String
    fn read_name(&mut self) -> Result<String, RdlError> {
        let lexeme = self.stream.read()?;
        match lexeme.kind {
            LexemeKind::Identifier | LexemeKind::String => Ok(lexeme.text),
            _ => Err(unexpected_lexeme(&lexeme, "a name").into()),
        }
    }

    /// Import ::= "@import" String
    fn parse_import(&mut self) -> Result<(), RdlError> {
        let target = self.stream.read_kind(LexemeKind::String)?;
        let path = self
            .context
            .resolve_import(self.context.current_file(), &target.text)
            .ok_or_else(|| SemanticError::ImportNotFound {
                path: target.text.clone(),
                src: target.named_source(),
                span: target.span(),
            })?;
        if self.context.was_imported(&path) {
            log::debug!("{}: `{}` is already imported", target.location(), path.display());
            return Ok(());
        }
        self.context
            .begin_import(&path)
            .map_err(|cycle| SemanticError::CircularImport {
                cycle,
                src: target.named_source(),
                span: target.span(),
            })?;

        log::info!("importing {}", path.display());
        let outcome = self.parse_imported(&path);
        self.context.end_import();

        // A file that fails to lex or parse stops on its own; the importer goes on.
        if let Err(error) = outcome {
            self.context.record(error);
        }
        Ok(())
    }

    fn parse_imported(&mut self, path: &Path) -> Result<(), RdlError> {
        let contents = std::fs::read_to_string(path).map_err(|e| RdlError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let source = SourceFile::new(path.display().to_string(), contents);
        let lexemes = Lexer::new(&source).lex()?;
        Parser::new(&mut *self.context, LexemeStream::new(source, lexemes)).parse()
    }

    /// Format ::= "@format" [ "set" | "requires" ] ( "extended" | "classic" | "rez" )
    fn parse_format(&mut self) -> Result<(), RdlError> {
        let requires = if self.stream.accept(&Expectation::keyword("requires")) {
            true
        } else {
            self.stream.accept(&Expectation::keyword("set"));
            false
        };
        let name = self.stream.read_identifier()?;
        let format: Format = name
            .text
            .parse()
            .map_err(|_| unexpected_lexeme(&name, "`extended`, `classic` or `rez`"))?;

        if !requires {
            self.context.set_format(format);
            return Ok(());
        }
        let active = self.context.format();
        if active != format {
            return Err(format_mismatch(&name, format, active));
        }
        Ok(())
    }

    /// Output ::= "@out" String
    ///
    /// The path is relative to the file that names it. The first output path
    /// wins, and one given by the host wins over all of them.
    fn parse_output(&mut self) -> Result<(), RdlError> {
        let target = self.stream.read_kind(LexemeKind::String)?;
        if self.context.output.is_some() {
            log::debug!("{}: output path already set", target.location());
            return Ok(());
        }
        let path = match self.context.current_file().and_then(Path::parent) {
            Some(directory) => directory.join(&target.text),
            None => PathBuf::from(&target.text),
        };
        log::debug!("{}: output goes to {}", target.location(), path.display());
        self.context.output = Some(path);
        Ok(())
    }
}

fn format_mismatch(at: &Lexeme, required: Format, active: Format) -> RdlError {
    SemanticError::FormatMismatch {
        required: required.to_string(),
        active: active.to_string(),
        src: at.named_source(),
        span: at.span(),
    }
    .into()
}
