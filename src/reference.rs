//! Resource references and their compact binary encoding.
//!
//! ```text
//! u8      flags        0x01 = container present, 0x02 = type code present
//! pstr    container    only when 0x01 is set
//! [u8; 4] type code    only when 0x02 is set
//! i64     id           big-endian
//! ```

use crate::error::EncodingError;
use byteorder::{BigEndian, ReadBytesExt};
use serde::Serialize;
use std::fmt::{self, Display};
use std::io::Cursor;

const HAS_CONTAINER: u8 = 0x01;
const HAS_TYPE: u8 = 0x02;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Reference {
    id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    type_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    type_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    container: Option<String>,
}

impl Reference {
    /// Sentinel id: assign the next free id when the resource is declared.
    pub const AUTO: i64 = i64::MIN;
    /// Sentinel id: matches any resource. Only meaningful inside field values.
    pub const ANY: i64 = i64::MIN + 1;

    pub fn new(id: i64) -> Self {
        Self {
            id,
            type_name: None,
            type_code: None,
            container: None,
        }
    }

    pub fn auto() -> Self {
        Self::new(Self::AUTO)
    }

    pub fn any() -> Self {
        Self::new(Self::ANY)
    }

    #[must_use]
    pub fn with_type_name(mut self, name: impl Into<String>) -> Self {
        self.type_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_type_code(mut self, code: impl Into<String>) -> Self {
        self.type_code = Some(code.into());
        self
    }

    #[must_use]
    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    #[must_use]
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }

    pub fn type_code(&self) -> Option<&str> {
        self.type_code.as_deref()
    }

    pub fn container(&self) -> Option<&str> {
        self.container.as_deref()
    }

    pub fn is_auto(&self) -> bool {
        self.id == Self::AUTO
    }

    pub fn is_any(&self) -> bool {
        self.id == Self::ANY
    }

    /// Appends the compact encoding to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), EncodingError> {
        let mut flags = 0;
        if self.container.is_some() {
            flags |= HAS_CONTAINER;
        }
        if self.type_code.is_some() {
            flags |= HAS_TYPE;
        }
        out.push(flags);

        if let Some(container) = &self.container {
            let bytes = container.as_bytes();
            let length =
                u8::try_from(bytes.len()).map_err(|_| EncodingError::ContainerTooLong {
                    container: container.clone(),
                })?;
            out.push(length);
            out.extend_from_slice(bytes);
        }
        if let Some(code) = &self.type_code {
            let mut padded = [b' '; 4];
            for (slot, byte) in padded.iter_mut().zip(code.bytes()) {
                *slot = byte;
            }
            out.extend_from_slice(&padded);
        }
        out.extend_from_slice(&self.id.to_be_bytes());
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        let mut out = Vec::with_capacity(9);
        self.encode_into(&mut out)?;
        Ok(out)
    }

    /// Decodes one reference from the front of `bytes`, returning it and the
    /// number of bytes consumed.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), EncodingError> {
        let truncated = || EncodingError::Truncated {
            field: "reference".to_string(),
        };
        let mut cursor = Cursor::new(bytes);
        let flags = cursor.read_u8().map_err(|_| truncated())?;

        let container = if flags & HAS_CONTAINER != 0 {
            let length = cursor.read_u8().map_err(|_| truncated())? as usize;
            let start = cursor.position() as usize;
            let raw = bytes.get(start..start + length).ok_or_else(truncated)?;
            cursor.set_position((start + length) as u64);
            Some(String::from_utf8_lossy(raw).into_owned())
        } else {
            None
        };

        let type_code = if flags & HAS_TYPE != 0 {
            let start = cursor.position() as usize;
            let raw = bytes.get(start..start + 4).ok_or_else(truncated)?;
            cursor.set_position((start + 4) as u64);
            Some(String::from_utf8_lossy(raw).into_owned())
        } else {
            None
        };

        let id = cursor.read_i64::<BigEndian>().map_err(|_| truncated())?;
        let reference = Reference {
            id,
            type_name: None,
            type_code,
            container,
        };
        Ok((reference, cursor.position() as usize))
    }
}

impl Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("#")?;
        if let Some(container) = &self.container {
            write!(f, "{container}.")?;
        }
        if let Some(name) = self.type_name.as_deref().or(self.type_code.as_deref()) {
            write!(f, "{name}.")?;
        }
        match self.id {
            Self::AUTO => f.write_str("auto"),
            Self::ANY => f.write_str("?"),
            id => write!(f, "{id}"),
        }
    }
}
