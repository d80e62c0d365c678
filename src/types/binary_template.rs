use super::definition::TypeDefinition;
use super::TypeError;
use serde::Serialize;
use std::fmt::{self, Display};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
}

/// The storage tag of one template entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinaryType {
    Dbyt,
    Dwrd,
    Dlng,
    Dqwd,
    Hbyt,
    Hwrd,
    Hlng,
    Hqwd,
    Char,
    Bool,
    Bbit,
    Rect,
    Pstr,
    Cstr,
    Lstr,
    /// `Cnnn`: a NUL-padded string occupying exactly `nnn` (hex) bytes.
    FixedString(usize),
    Hexd,
    Ocnt,
    Lstc,
    Lste,
    Rsrc,
    Nested(String),
}

impl BinaryType {
    /// Parses a four-character tag. `Nested<T>` is handled by the parser.
    pub fn from_code(code: &str) -> Option<Self> {
        Some(match code {
            "DBYT" => BinaryType::Dbyt,
            "DWRD" => BinaryType::Dwrd,
            "DLNG" => BinaryType::Dlng,
            "DQWD" | "DQAD" => BinaryType::Dqwd,
            "HBYT" => BinaryType::Hbyt,
            "HWRD" => BinaryType::Hwrd,
            "HLNG" => BinaryType::Hlng,
            "HQWD" | "HQAD" => BinaryType::Hqwd,
            "CHAR" => BinaryType::Char,
            "BOOL" => BinaryType::Bool,
            "BBIT" => BinaryType::Bbit,
            "RECT" => BinaryType::Rect,
            "PSTR" => BinaryType::Pstr,
            "CSTR" => BinaryType::Cstr,
            "LSTR" => BinaryType::Lstr,
            "HEXD" => BinaryType::Hexd,
            "OCNT" => BinaryType::Ocnt,
            "LSTC" => BinaryType::Lstc,
            "LSTE" => BinaryType::Lste,
            "RSRC" => BinaryType::Rsrc,
            _ => {
                let width = code.strip_prefix('C').filter(|w| w.len() == 3)?;
                let width = usize::from_str_radix(width, 16).ok().filter(|w| *w > 0)?;
                BinaryType::FixedString(width)
            }
        })
    }

    pub fn code(&self) -> String {
        match self {
            BinaryType::Dbyt => "DBYT".into(),
            BinaryType::Dwrd => "DWRD".into(),
            BinaryType::Dlng => "DLNG".into(),
            BinaryType::Dqwd => "DQWD".into(),
            BinaryType::Hbyt => "HBYT".into(),
            BinaryType::Hwrd => "HWRD".into(),
            BinaryType::Hlng => "HLNG".into(),
            BinaryType::Hqwd => "HQWD".into(),
            BinaryType::Char => "CHAR".into(),
            BinaryType::Bool => "BOOL".into(),
            BinaryType::Bbit => "BBIT".into(),
            BinaryType::Rect => "RECT".into(),
            BinaryType::Pstr => "PSTR".into(),
            BinaryType::Cstr => "CSTR".into(),
            BinaryType::Lstr => "LSTR".into(),
            BinaryType::FixedString(width) => format!("C{width:03X}"),
            BinaryType::Hexd => "HEXD".into(),
            BinaryType::Ocnt => "OCNT".into(),
            BinaryType::Lstc => "LSTC".into(),
            BinaryType::Lste => "LSTE".into(),
            BinaryType::Rsrc => "RSRC".into(),
            BinaryType::Nested(name) => format!("Nested<{name}>"),
        }
    }

    /// Bytes a value of this tag always occupies, or 0 when that depends on
    /// the value.
    pub fn fixed_size(&self) -> usize {
        match self {
            BinaryType::Dbyt | BinaryType::Hbyt | BinaryType::Char | BinaryType::Bool => 1,
            BinaryType::Dwrd | BinaryType::Hwrd | BinaryType::Ocnt => 2,
            BinaryType::Dlng | BinaryType::Hlng => 4,
            BinaryType::Dqwd | BinaryType::Hqwd | BinaryType::Rect => 8,
            BinaryType::Rsrc => 9,
            BinaryType::Bbit
            | BinaryType::Pstr
            | BinaryType::Cstr
            | BinaryType::Lstr
            | BinaryType::FixedString(_)
            | BinaryType::Hexd
            | BinaryType::Lstc
            | BinaryType::Lste
            | BinaryType::Nested(_) => 0,
        }
    }

    /// Width in bytes and signedness of the integer tags.
    pub fn integer_layout(&self) -> Option<(usize, bool)> {
        match self {
            BinaryType::Dbyt => Some((1, true)),
            BinaryType::Dwrd => Some((2, true)),
            BinaryType::Dlng => Some((4, true)),
            BinaryType::Dqwd => Some((8, true)),
            BinaryType::Hbyt => Some((1, false)),
            BinaryType::Hwrd | BinaryType::Ocnt => Some((2, false)),
            BinaryType::Hlng => Some((4, false)),
            BinaryType::Hqwd => Some((8, false)),
            _ => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        self.integer_layout().is_some()
    }

    pub fn is_string(&self) -> bool {
        matches!(
            self,
            BinaryType::Pstr | BinaryType::Cstr | BinaryType::Lstr | BinaryType::FixedString(_)
        )
    }

    /// Tags that structure a template rather than hold a value.
    pub fn is_list_marker(&self) -> bool {
        matches!(self, BinaryType::Ocnt | BinaryType::Lstc | BinaryType::Lste)
    }
}

impl Display for BinaryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code())
    }
}

/// One labelled entry of a template.
#[derive(Debug, Clone)]
pub struct BinaryField {
    pub label: String,
    pub binary_type: BinaryType,
    /// The definition behind `Nested<T>` and `RECT`.
    pub nested: Option<Arc<TypeDefinition>>,
    pub size: usize,
}

impl BinaryField {
    pub fn new(
        label: impl Into<String>,
        binary_type: BinaryType,
        nested: Option<Arc<TypeDefinition>>,
    ) -> Self {
        let size = match (&binary_type, &nested) {
            (BinaryType::Nested(_), Some(definition)) => definition.minimum_size(),
            _ => binary_type.fixed_size(),
        };
        Self {
            label: label.into(),
            binary_type,
            nested,
            size,
        }
    }
}

/// An `OCNT` / `LSTC` / `LSTE` triple. Indices point into the template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListGroup {
    pub count: usize,
    pub start: usize,
    pub end: usize,
}

impl ListGroup {
    /// Indices of the entries repeated for each list element.
    pub fn members(&self) -> std::ops::Range<usize> {
        self.start + 1..self.end
    }

    pub fn contains(&self, index: usize) -> bool {
        self.members().contains(&index)
    }
}

/// The ordered byte layout of a type.
#[derive(Debug, Clone, Default)]
pub struct BinaryTemplate {
    fields: Vec<BinaryField>,
    byte_order: ByteOrder,
    groups: Vec<ListGroup>,
}

impl BinaryTemplate {
    pub fn new(byte_order: ByteOrder) -> Self {
        Self {
            fields: Vec::new(),
            byte_order,
            groups: Vec::new(),
        }
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn fields(&self) -> &[BinaryField] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn groups(&self) -> &[ListGroup] {
        &self.groups
    }

    pub fn add_field(&mut self, field: BinaryField) -> Result<(), TypeError> {
        if self.index_of(&field.label).is_some() {
            return Err(TypeError::DuplicateLabel(field.label));
        }
        self.fields.push(field);
        Ok(())
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.label == label)
    }

    pub fn field(&self, label: &str) -> Option<&BinaryField> {
        self.fields.iter().find(|f| f.label == label)
    }

    /// The list group whose `OCNT` entry is `label`.
    pub fn group_counted_by(&self, label: &str) -> Option<ListGroup> {
        let index = self.index_of(label)?;
        self.groups.iter().copied().find(|g| g.count == index)
    }

    /// The list group repeating the entry at `index`.
    pub fn group_containing(&self, index: usize) -> Option<ListGroup> {
        self.groups.iter().copied().find(|g| g.contains(index))
    }

    /// Pairs every `OCNT` with the `LSTC ... LSTE` run that follows it.
    pub fn validate(&mut self) -> Result<(), TypeError> {
        let mut groups = Vec::new();
        let mut open: Option<(usize, usize)> = None;
        for (index, field) in self.fields.iter().enumerate() {
            match field.binary_type {
                BinaryType::Ocnt => {
                    let next = self.fields.get(index + 1).map(|f| &f.binary_type);
                    if open.is_some() || next != Some(&BinaryType::Lstc) {
                        return Err(TypeError::ListGroup(format!(
                            "`{}` must be immediately followed by an LSTC entry",
                            field.label
                        )));
                    }
                }
                BinaryType::Lstc => {
                    let counted = index
                        .checked_sub(1)
                        .filter(|i| self.fields[*i].binary_type == BinaryType::Ocnt);
                    match (open, counted) {
                        (Some(_), _) => {
                            return Err(TypeError::ListGroup(format!(
                                "`{}` opens a list inside another list",
                                field.label
                            )))
                        }
                        (None, None) => {
                            return Err(TypeError::ListGroup(format!(
                                "`{}` must directly follow an OCNT entry",
                                field.label
                            )))
                        }
                        (None, Some(count)) => open = Some((count, index)),
                    }
                }
                BinaryType::Lste => match open.take() {
                    Some((count, start)) => groups.push(ListGroup {
                        count,
                        start,
                        end: index,
                    }),
                    None => {
                        return Err(TypeError::ListGroup(format!(
                            "`{}` closes a list that was never opened",
                            field.label
                        )))
                    }
                },
                _ => {}
            }
        }
        if let Some((_, start)) = open {
            return Err(TypeError::ListGroup(format!(
                "`{}` is never closed by an LSTE entry",
                self.fields[start].label
            )));
        }
        self.groups = groups;
        Ok(())
    }

    /// Bytes the template occupies when every variable entry is empty and
    /// every list has no elements. Consecutive `BBIT` entries pack eight to
    /// a byte.
    pub fn minimum_size(&self) -> usize {
        let mut size = 0;
        let mut bits = 0;
        for (index, field) in self.fields.iter().enumerate() {
            if self.group_containing(index).is_some() {
                continue;
            }
            if field.binary_type == BinaryType::Bbit {
                if bits % 8 == 0 {
                    size += 1;
                }
                bits += 1;
                continue;
            }
            bits = 0;
            size += field.size;
        }
        size
    }
}
