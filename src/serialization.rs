use crate::api::Compilation;
use crate::archive::Format;
use crate::context::{Metadata, Module};
use crate::instance::ValueMap;
use serde::Serialize;
use std::path::Path;

/// A serializable summary of a [`Compilation`]: what was declared and how
/// large each encoded resource is. Binary data itself is left out.
#[derive(Debug, Serialize)]
pub struct Manifest<'a> {
    pub format: Format,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<&'a Path>,
    pub metadata: &'a Metadata,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    pub modules: &'a [Module],
    pub types: Vec<TypeSummary<'a>>,
    pub resources: Vec<ResourceSummary<'a>>,
}

#[derive(Debug, Serialize)]
pub struct TypeSummary<'a> {
    pub name: &'a str,
    pub code: &'a str,
    #[serde(skip_serializing_if = "is_false")]
    pub builtin: bool,
    pub fields: Vec<&'a str>,
    pub minimum_size: usize,
}

#[derive(Debug, Serialize)]
pub struct ResourceSummary<'a> {
    #[serde(rename = "type")]
    pub type_name: &'a str,
    pub code: &'a str,
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<&'a str>,
    pub size: usize,
    pub values: &'a ValueMap,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !value
}

pub(crate) fn manifest(compilation: &Compilation) -> Manifest<'_> {
    let types = compilation
        .types
        .iter()
        .map(|definition| TypeSummary {
            name: definition.name(),
            code: definition.code(),
            builtin: definition.is_builtin(),
            fields: definition.fields().iter().map(|field| field.name.as_str()).collect(),
            minimum_size: definition.minimum_size(),
        })
        .collect();

    // Every resource has exactly one archive entry, added in declaration order.
    let resources = compilation
        .resources
        .iter()
        .zip(compilation.archive.entries())
        .map(|(resource, entry)| ResourceSummary {
            type_name: resource.definition.name(),
            code: resource.type_code(),
            id: resource.id(),
            name: (!resource.name.is_empty()).then_some(resource.name.as_str()),
            container: resource.container(),
            size: entry.data.len(),
            values: &resource.values,
        })
        .collect();

    Manifest {
        format: compilation.format,
        output: compilation.output.as_deref(),
        metadata: &compilation.metadata,
        modules: &compilation.modules,
        types,
        resources,
    }
}
