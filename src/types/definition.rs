use super::binary_template::BinaryTemplate;
use super::decorator::Decorators;
use super::descriptor::TypeDescriptor;
use super::field::{FieldValue, TypeField};
use super::TypeError;
use crate::interpreter::{Function, Statement, Watch};
use crate::lexer::Lexeme;
use std::sync::Arc;

/// A script that fills `this.*` from the arguments of a resource block or a
/// nested-type call.
#[derive(Debug, Clone)]
pub struct Constructor {
    pub function: Function,
    pub origin: Lexeme,
}

impl Constructor {
    pub fn new(type_name: &str, parameters: Vec<String>, body: Vec<Statement>, origin: Lexeme) -> Self {
        let function =
            Function::script(type_name, parameters, body).watching(Watch::Prefix("this.".into()));
        Self { function, origin }
    }

    pub fn arity(&self) -> usize {
        self.function.arity()
    }
}

/// Where a dotted path lands inside a type.
#[derive(Debug, Clone, Copy)]
pub struct FieldTarget<'a> {
    pub field: &'a TypeField,
    /// `None` when the path names the whole field.
    pub value: Option<&'a FieldValue>,
}

/// A fully resolved dotted path: the target plus the part of the path that
/// continues into the value's nested type (`x` for `origin.x`).
#[derive(Debug, Clone)]
pub struct ResolvedPath<'a> {
    pub target: FieldTarget<'a>,
    pub nested_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TypeDefinition {
    name: String,
    code: String,
    template: BinaryTemplate,
    fields: Vec<TypeField>,
    constructors: Vec<Constructor>,
    decorators: Decorators,
    origin: Option<Lexeme>,
}

impl TypeDefinition {
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
            template: BinaryTemplate::default(),
            fields: Vec::new(),
            constructors: Vec::new(),
            decorators: Decorators::default(),
            origin: None,
        }
    }

    #[must_use]
    pub fn with_origin(mut self, origin: Lexeme) -> Self {
        self.origin = Some(origin);
        self
    }

    #[must_use]
    pub fn with_decorators(mut self, decorators: Decorators) -> Self {
        self.decorators = decorators;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn template(&self) -> &BinaryTemplate {
        &self.template
    }

    pub fn fields(&self) -> &[TypeField] {
        &self.fields
    }

    pub fn constructors(&self) -> &[Constructor] {
        &self.constructors
    }

    pub fn decorators(&self) -> &Decorators {
        &self.decorators
    }

    pub fn origin(&self) -> Option<&Lexeme> {
        self.origin.as_ref()
    }

    /// `@no_declaration` types exist only to be nested.
    pub fn is_declarable(&self) -> bool {
        !self.decorators.has("no_declaration")
    }

    pub fn is_builtin(&self) -> bool {
        self.decorators.has("builtin")
    }

    pub fn minimum_size(&self) -> usize {
        self.template.minimum_size()
    }

    pub fn set_binary_template(&mut self, mut template: BinaryTemplate) -> Result<(), TypeError> {
        if !self.template.is_empty() {
            return Err(TypeError::DuplicateTemplate);
        }
        template.validate()?;
        self.template = template;
        Ok(())
    }

    pub fn add_constructor(&mut self, constructor: Constructor) -> Result<(), TypeError> {
        if self.constructor(constructor.arity()).is_some() {
            return Err(TypeError::DuplicateConstructor(constructor.arity()));
        }
        self.constructors.push(constructor);
        Ok(())
    }

    pub fn constructor(&self, arity: usize) -> Option<&Constructor> {
        self.constructors.iter().find(|c| c.arity() == arity)
    }

    pub fn field(&self, name: &str) -> Option<&TypeField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// The field that claims template label `label`.
    pub fn field_for_label(&self, label: &str) -> Option<&TypeField> {
        self.fields.iter().find(|f| f.labels().any(|l| l == label))
    }

    /// The definition behind a `Nested<T>` or `RECT` label.
    pub fn nested_type(&self, label: &str) -> Option<&Arc<TypeDefinition>> {
        self.template.field(label).and_then(|f| f.nested.as_ref())
    }

    /// Validates `field` against the template and the fields added so far,
    /// inferring descriptors for values that were not given one.
    pub fn add_field(&mut self, mut field: TypeField) -> Result<(), TypeError> {
        if self.template.is_empty() {
            return Err(TypeError::MissingTemplate);
        }
        if self.field(&field.name).is_some() {
            return Err(TypeError::DuplicateField(field.name));
        }

        for value in &mut field.values {
            self.check_value(&field.name, value)?;
            for part in &mut value.joined {
                self.check_value(&field.name, part)?;
            }
        }

        let labels: Vec<String> = field.labels().map(str::to_string).collect();
        match &field.repeatable {
            Some(repeatable) => {
                let missing = || TypeError::MissingCountField {
                    field: field.name.clone(),
                    count: repeatable.count_field.clone(),
                };
                let group = self
                    .template
                    .group_counted_by(&repeatable.count_field)
                    .ok_or_else(missing)?;
                if repeatable.lower < 0 || repeatable.lower > repeatable.upper {
                    return Err(TypeError::InvalidRepeatBounds {
                        field: field.name.clone(),
                        lower: repeatable.lower,
                        upper: repeatable.upper,
                    });
                }
                if let Some(other) = self.fields.iter().find(|f| {
                    f.repeatable
                        .as_ref()
                        .is_some_and(|r| r.count_field == repeatable.count_field)
                }) {
                    return Err(TypeError::LabelClaimed {
                        label: repeatable.count_field.clone(),
                        field: other.name.clone(),
                    });
                }
                for label in &labels {
                    let inside = self
                        .template
                        .index_of(label)
                        .is_some_and(|index| group.contains(index));
                    if !inside {
                        return Err(TypeError::ValueOutsideList {
                            field: field.name.clone(),
                            value: label.clone(),
                        });
                    }
                }
            }
            None => {
                for label in &labels {
                    let index = self.template.index_of(label);
                    if index.is_some_and(|i| self.template.group_containing(i).is_some()) {
                        return Err(TypeError::ValueInsideList {
                            field: field.name.clone(),
                            value: label.clone(),
                        });
                    }
                }
            }
        }

        log::trace!("{}: added field `{}`", self.name, field.name);
        self.fields.push(field);
        Ok(())
    }

    fn check_value(&self, field_name: &str, value: &mut FieldValue) -> Result<(), TypeError> {
        let binary = self
            .template
            .field(&value.name)
            .ok_or_else(|| TypeError::UnknownBinaryField(value.name.clone()))?;
        if binary.binary_type.is_list_marker() {
            return Err(TypeError::ListMarkerValue(value.name.clone()));
        }
        if let Some(owner) = self.field_for_label(&value.name) {
            return Err(TypeError::LabelClaimed {
                label: value.name.clone(),
                field: owner.name.clone(),
            });
        }
        match &value.descriptor {
            Some(descriptor) if !descriptor.accepts(&binary.binary_type) => {
                Err(TypeError::IncompatibleType {
                    value: format!("{field_name}.{}", value.name),
                    descriptor: descriptor.to_string(),
                    binary_type: binary.binary_type.to_string(),
                })
            }
            Some(_) => Ok(()),
            None => {
                value.descriptor = Some(TypeDescriptor::infer(&binary.binary_type));
                Ok(())
            }
        }
    }

    /// Gives every template label that no field claims an implicit
    /// single-value field. Labels inside lists are left to their list.
    pub fn add_implicit_fields(&mut self, origin: &Lexeme) -> Result<(), TypeError> {
        let unclaimed: Vec<String> = self
            .template
            .fields()
            .iter()
            .enumerate()
            .filter(|(index, binary)| {
                !binary.binary_type.is_list_marker()
                    && self.template.group_containing(*index).is_none()
                    && self.field_for_label(&binary.label).is_none()
            })
            .map(|(_, binary)| binary.label.clone())
            .collect();
        for label in unclaimed {
            self.add_field(TypeField::synthesize(&label, origin.clone()))?;
        }
        Ok(())
    }

    /// Resolves `field`, `field.value`, `label`, and paths that continue into
    /// nested types such as `origin.x` or `frame.top`.
    pub fn field_named(&self, path: &str) -> Result<ResolvedPath<'_>, TypeError> {
        let unknown = || TypeError::UnknownField(path.to_string());
        let segments: Vec<&str> = path.split('.').collect();
        let (first, rest) = segments.split_first().ok_or_else(unknown)?;

        let (field, mut value) = match self.field(first) {
            Some(field) => (field, None),
            None => {
                let field = self.field_for_label(first).ok_or_else(unknown)?;
                (field, find_value(field, first))
            }
        };

        let mut rest = rest;
        if value.is_none() {
            if let Some((name, tail)) = rest.split_first() {
                if let Some(found) = find_value(field, name) {
                    value = Some(found);
                    rest = tail;
                }
            }
        }
        if rest.is_empty() {
            return Ok(ResolvedPath {
                target: FieldTarget { field, value },
                nested_path: None,
            });
        }

        // The remainder continues into a nested type.
        let value = match value {
            Some(value) => value,
            None if field.values.len() == 1 => &field.values[0],
            None => return Err(unknown()),
        };
        let nested = self.nested_type(&value.name).ok_or_else(unknown)?;
        let nested_path = rest.join(".");
        nested.field_named(&nested_path).map_err(|_| unknown())?;
        Ok(ResolvedPath {
            target: FieldTarget {
                field,
                value: Some(value),
            },
            nested_path: Some(nested_path),
        })
    }
}

fn find_value<'a>(field: &'a TypeField, name: &str) -> Option<&'a FieldValue> {
    field
        .values
        .iter()
        .flat_map(FieldValue::parts)
        .find(|v| v.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use crate::types::{BinaryField, BinaryType, ByteOrder, Repeatable};

    fn origin() -> Lexeme {
        lex("test.rdl", "type").unwrap().remove(0)
    }

    fn template(entries: &[(&str, &str)]) -> BinaryTemplate {
        let mut template = BinaryTemplate::new(ByteOrder::Big);
        for (code, label) in entries {
            let binary_type = BinaryType::from_code(code).unwrap();
            template
                .add_field(BinaryField::new(*label, binary_type, None))
                .unwrap();
        }
        template
    }

    fn field(name: &str, values: &[&str]) -> TypeField {
        let mut field = TypeField::new(name, origin());
        for value in values {
            field.values.push(FieldValue::new(*value, origin()));
        }
        field
    }

    fn point() -> Arc<TypeDefinition> {
        let mut point = TypeDefinition::new("Point", "pnt ");
        point
            .set_binary_template(template(&[("DWRD", "x"), ("DWRD", "y")]))
            .unwrap();
        point.add_implicit_fields(&origin()).unwrap();
        Arc::new(point)
    }

    fn item() -> TypeDefinition {
        let mut item = TypeDefinition::new("Item", "ITEM");
        let mut t = template(&[
            ("DWRD", "id"),
            ("PSTR", "name"),
            ("OCNT", "count"),
            ("LSTC", "start"),
            ("DLNG", "value"),
            ("LSTE", "end"),
        ]);
        t.add_field(BinaryField::new(
            "origin",
            BinaryType::Nested("Point".into()),
            Some(point()),
        ))
        .unwrap();
        item.set_binary_template(t).unwrap();
        item
    }

    #[test]
    fn test_add_field_infers_descriptor() {
        let mut item = item();
        item.add_field(field("name", &["name"])).unwrap();
        let name = item.field("name").unwrap();
        assert_eq!(name.values[0].descriptor, Some(TypeDescriptor::String));
    }

    #[test]
    fn test_unknown_label() {
        let mut item = item();
        let err = item.add_field(field("damage", &["damage"])).unwrap_err();
        assert_eq!(err, TypeError::UnknownBinaryField("damage".into()));
    }

    #[test]
    fn test_incompatible_descriptor() {
        let mut item = item();
        let mut name = field("name", &["name"]);
        name.values[0].descriptor = Some(TypeDescriptor::Integer);
        assert!(matches!(
            item.add_field(name),
            Err(TypeError::IncompatibleType { .. })
        ));
    }

    #[test]
    fn test_label_claimed_twice() {
        let mut item = item();
        item.add_field(field("name", &["name"])).unwrap();
        let err = item.add_field(field("title", &["name"])).unwrap_err();
        assert_eq!(
            err,
            TypeError::LabelClaimed {
                label: "name".into(),
                field: "name".into()
            }
        );
    }

    #[test]
    fn test_repeatable_needs_count_field() {
        let mut item = item();
        let mut entries = field("entries", &["value"]);
        entries.repeatable = Some(Repeatable::new(0, 8, "id"));
        assert!(matches!(
            item.add_field(entries),
            Err(TypeError::MissingCountField { .. })
        ));

        let mut entries = field("entries", &["value"]);
        entries.repeatable = Some(Repeatable::new(0, 8, "count"));
        item.add_field(entries).unwrap();
    }

    #[test]
    fn test_list_values_need_repeatable() {
        let mut item = item();
        assert!(matches!(
            item.add_field(field("value", &["value"])),
            Err(TypeError::ValueInsideList { .. })
        ));
    }

    #[test]
    fn test_repeatable_values_stay_in_list() {
        let mut item = item();
        let mut entries = field("entries", &["name"]);
        entries.repeatable = Some(Repeatable::new(0, 8, "count"));
        assert!(matches!(
            item.add_field(entries),
            Err(TypeError::ValueOutsideList { .. })
        ));
    }

    #[test]
    fn test_implicit_fields() {
        let mut item = item();
        item.add_field(field("title", &["name"])).unwrap();
        item.add_implicit_fields(&origin()).unwrap();
        let id = item.field("id").unwrap();
        assert!(id.synthesized);
        assert!(item.field("origin").is_some());
        // List markers and list members get no implicit field.
        assert!(item.field("count").is_none());
        assert!(item.field("value").is_none());
    }

    #[test]
    fn test_field_named() {
        let mut item = item();
        item.add_field(field("title", &["name"])).unwrap();
        item.add_implicit_fields(&origin()).unwrap();

        let whole = item.field_named("title").unwrap();
        assert_eq!(whole.target.field.name, "title");
        assert!(whole.target.value.is_none());

        let by_value = item.field_named("title.name").unwrap();
        assert_eq!(by_value.target.value.map(|v| v.name.as_str()), Some("name"));

        let by_label = item.field_named("name").unwrap();
        assert_eq!(by_label.target.field.name, "title");

        let nested = item.field_named("origin.x").unwrap();
        assert_eq!(nested.nested_path.as_deref(), Some("x"));

        assert_eq!(
            item.field_named("origin.z").unwrap_err(),
            TypeError::UnknownField("origin.z".into())
        );
        assert!(item.field_named("damage").is_err());
    }

    #[test]
    fn test_nested_size() {
        let item = item();
        // id 2 + name 0 + count 2 + origin 4
        assert_eq!(item.minimum_size(), 8);
        assert_eq!(item.template().field("origin").unwrap().size, 4);
    }

    #[test]
    fn test_duplicate_template_and_constructor() {
        let mut item = item();
        assert_eq!(
            item.set_binary_template(template(&[("DWRD", "x")])),
            Err(TypeError::DuplicateTemplate)
        );
        let constructor = Constructor::new("Item", vec!["a".into()], Vec::new(), origin());
        item.add_constructor(constructor.clone()).unwrap();
        assert_eq!(
            item.add_constructor(constructor),
            Err(TypeError::DuplicateConstructor(1))
        );
        assert!(item.constructor(1).is_some());
        assert!(item.constructor(2).is_none());
    }
}
