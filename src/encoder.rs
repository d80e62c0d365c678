//! Serializes resolved resource values in template order, and reads them back.

use crate::archive::Format;
use crate::error::EncodingError;
use crate::instance::{ResourceInstance, ValueMap};
use crate::interpreter::Token;
use crate::reference::Reference;
use crate::types::{BinaryField, BinaryType, ByteOrder, TypeDefinition};
use byteorder::{BigEndian, ByteOrder as _, LittleEndian, ReadBytesExt};
use miette::{NamedSource, SourceSpan};
use std::io::{Cursor, Read};
use std::ops::Range;

/// Id written for an `RSRC` entry that was never assigned.
const NULL_REFERENCE_ID: i64 = -1;
/// Entry counts are stored in an unsigned 16-bit `OCNT`.
const MAX_LIST_ENTRIES: usize = u16::MAX as usize;

const RECT_SIDES: [&str; 4] = ["top", "left", "bottom", "right"];

/// An append-only buffer that writes integers in a chosen byte order.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buffer: Vec<u8>,
    order: ByteOrder,
}

impl ByteWriter {
    pub fn new(order: ByteOrder) -> Self {
        Self {
            buffer: Vec::new(),
            order,
        }
    }

    /// Switches byte order, returning the previous one.
    pub fn set_order(&mut self, order: ByteOrder) -> ByteOrder {
        std::mem::replace(&mut self.order, order)
    }

    /// Writes the low `width` bytes of `value`.
    pub fn write_integer(&mut self, value: i64, width: usize) {
        let mut bytes = [0u8; 8];
        let bits = if width >= 8 {
            value as u64
        } else {
            (value as u64) & ((1u64 << (width * 8)) - 1)
        };
        match self.order {
            ByteOrder::Big => BigEndian::write_uint(&mut bytes, bits, width),
            ByteOrder::Little => LittleEndian::write_uint(&mut bytes, bits, width),
        }
        self.buffer.extend_from_slice(&bytes[..width]);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }
}

/// Encodes `resource` following its type's binary template.
pub fn encode(resource: &ResourceInstance, format: Format) -> Result<Vec<u8>, EncodingError> {
    let definition = &resource.definition;
    let mut encoder = Encoder {
        resource,
        format,
        writer: ByteWriter::new(definition.template().byte_order()),
    };
    let count = definition.template().fields().len();
    encoder.encode_fields(definition, 0..count, &resource.values, "")?;
    log::trace!(
        "encoded {} as {} bytes",
        resource,
        encoder.writer.len()
    );
    Ok(encoder.writer.into_inner())
}

struct Encoder<'a> {
    resource: &'a ResourceInstance,
    format: Format,
    writer: ByteWriter,
}

impl Encoder<'_> {
    fn location(&self) -> (NamedSource<String>, SourceSpan) {
        match &self.resource.origin {
            Some(origin) => (origin.named_source(), origin.span()),
            None => (NamedSource::new("<resource>", String::new()), (0, 0).into()),
        }
    }

    fn type_mismatch(&self, key: &str, expected: &str, found: &Token) -> EncodingError {
        let (src, span) = self.location();
        EncodingError::TypeMismatch {
            resource: self.resource.to_string(),
            field: key.to_string(),
            expected: expected.to_string(),
            found: found.kind_name().to_string(),
            src,
            span,
        }
    }

    fn out_of_range(&self, key: &str, value: i64, binary_type: &BinaryType) -> EncodingError {
        let (src, span) = self.location();
        EncodingError::ValueOutOfRange {
            resource: self.resource.to_string(),
            field: key.to_string(),
            value: value.to_string(),
            binary_type: binary_type.code(),
            src,
            span,
        }
    }

    fn too_long(&self, key: &str, length: usize, limit: usize) -> EncodingError {
        let (src, span) = self.location();
        EncodingError::StringTooLong {
            resource: self.resource.to_string(),
            field: key.to_string(),
            length,
            limit,
            src,
            span,
        }
    }

    fn encode_fields(
        &mut self,
        definition: &TypeDefinition,
        range: Range<usize>,
        values: &ValueMap,
        prefix: &str,
    ) -> Result<(), EncodingError> {
        let template = definition.template();
        let previous = self.writer.set_order(template.byte_order());
        let fields = template.fields();
        let mut bits = BitPacker::default();
        let mut index = range.start;

        while index < range.end {
            let field = &fields[index];
            let key = format!("{prefix}{}", field.label);

            if field.binary_type == BinaryType::Bbit {
                let value = match values.get(&key) {
                    None => false,
                    Some(Token::Boolean(value)) => *value,
                    Some(token @ Token::Integer(_)) => token.truthy(),
                    Some(other) => return Err(self.type_mismatch(&key, "a boolean", other)),
                };
                if let Some(byte) = bits.push(value) {
                    self.writer.write_u8(byte);
                }
                index += 1;
                continue;
            }
            if let Some(byte) = bits.flush() {
                self.writer.write_u8(byte);
            }

            match &field.binary_type {
                BinaryType::Ocnt => {
                    let Some(group) = template.group_counted_by(&field.label) else {
                        index += 1;
                        continue;
                    };
                    let owner = definition.fields().iter().find(|f| {
                        f.repeatable
                            .as_ref()
                            .is_some_and(|r| r.count_field == field.label)
                    });
                    let entries = owner
                        .map(|owner| values.list(&format!("{prefix}{}", owner.name)))
                        .unwrap_or_default();
                    let (lower, upper) = owner
                        .and_then(|o| o.repeatable.as_ref())
                        .map_or((0, MAX_LIST_ENTRIES as i64), |r| (r.lower, r.upper));
                    let allowed = i64::try_from(entries.len())
                        .is_ok_and(|n| (lower..=upper).contains(&n));
                    if !allowed || entries.len() > MAX_LIST_ENTRIES {
                        let (src, span) = self.location();
                        return Err(EncodingError::RepeatCount {
                            resource: self.resource.to_string(),
                            field: owner.map_or(key.clone(), |o| o.name.clone()),
                            count: entries.len(),
                            lower,
                            upper,
                            src,
                            span,
                        });
                    }
                    self.writer.write_integer(entries.len() as i64, 2);
                    for entry in entries {
                        self.encode_fields(definition, group.members(), entry, "")?;
                    }
                    index = group.end + 1;
                    continue;
                }
                BinaryType::Lstc | BinaryType::Lste => {}
                _ => self.encode_value(field, &key, values)?,
            }
            index += 1;
        }
        if let Some(byte) = bits.flush() {
            self.writer.write_u8(byte);
        }
        self.writer.set_order(previous);
        Ok(())
    }

    fn encode_value(&mut self, field: &BinaryField, key: &str, values: &ValueMap) -> Result<(), EncodingError> {
        let token = values.get(key);
        match &field.binary_type {
            binary_type @ (BinaryType::Dbyt
            | BinaryType::Dwrd
            | BinaryType::Dlng
            | BinaryType::Dqwd
            | BinaryType::Hbyt
            | BinaryType::Hwrd
            | BinaryType::Hlng
            | BinaryType::Hqwd) => {
                let value = match token {
                    None => 0,
                    Some(Token::Reference(reference)) => reference.id(),
                    Some(token) => token
                        .as_integer()
                        .ok_or_else(|| self.type_mismatch(key, "an integer", token))?,
                };
                let (width, signed) = binary_type.integer_layout().unwrap_or((8, true));
                if !fits(value, width, signed) {
                    return Err(self.out_of_range(key, value, binary_type));
                }
                self.writer.write_integer(value, width);
            }
            BinaryType::Char => {
                let value = match token {
                    None => 0,
                    Some(Token::String(text)) if text.len() == 1 => i64::from(text.as_bytes()[0]),
                    Some(token) => token
                        .as_integer()
                        .ok_or_else(|| self.type_mismatch(key, "a character", token))?,
                };
                let byte = u8::try_from(value)
                    .map_err(|_| self.out_of_range(key, value, &field.binary_type))?;
                self.writer.write_u8(byte);
            }
            BinaryType::Bool => {
                let value = match token {
                    None => false,
                    Some(token @ (Token::Boolean(_) | Token::Integer(_))) => token.truthy(),
                    Some(other) => return Err(self.type_mismatch(key, "a boolean", other)),
                };
                self.writer.write_u8(u8::from(value));
            }
            BinaryType::Pstr | BinaryType::Cstr | BinaryType::Lstr | BinaryType::FixedString(_) => {
                let text = match token {
                    None => "",
                    Some(Token::String(text)) => text.as_str(),
                    Some(other) => return Err(self.type_mismatch(key, "a string", other)),
                };
                self.encode_string(&field.binary_type, key, text.as_bytes())?;
            }
            BinaryType::Hexd => {
                let text = match token {
                    None => "",
                    Some(Token::String(text)) => text.as_str(),
                    Some(other) => return Err(self.type_mismatch(key, "hexadecimal data", other)),
                };
                let bytes = parse_hex(text).ok_or_else(|| {
                    let (src, span) = self.location();
                    EncodingError::InvalidHexData {
                        resource: self.resource.to_string(),
                        field: key.to_string(),
                        src,
                        span,
                    }
                })?;
                self.writer.write_bytes(&bytes);
            }
            BinaryType::Rect | BinaryType::Nested(_) => match &field.nested {
                Some(nested) => {
                    let count = nested.template().fields().len();
                    let prefix = format!("{key}.");
                    self.encode_fields(nested, 0..count, values, &prefix)?;
                }
                None => {
                    for side in RECT_SIDES {
                        let side_key = format!("{key}.{side}");
                        let value = match values.get(&side_key) {
                            None => 0,
                            Some(token) => token
                                .as_integer()
                                .ok_or_else(|| self.type_mismatch(&side_key, "an integer", token))?,
                        };
                        if !fits(value, 2, true) {
                            return Err(self.out_of_range(&side_key, value, &BinaryType::Dwrd));
                        }
                        self.writer.write_integer(value, 2);
                    }
                }
            },
            BinaryType::Rsrc => {
                let reference = match token {
                    None => Reference::new(NULL_REFERENCE_ID),
                    Some(Token::Reference(reference)) => reference.clone(),
                    Some(Token::Integer(id)) => Reference::new(*id),
                    Some(other) => return Err(self.type_mismatch(key, "a reference", other)),
                };
                match self.format {
                    Format::Extended => {
                        let mut bytes = Vec::with_capacity(9);
                        reference.encode_into(&mut bytes)?;
                        self.writer.write_bytes(&bytes);
                    }
                    Format::Classic | Format::Rez => {
                        if !fits(reference.id(), 2, true) {
                            return Err(self.out_of_range(key, reference.id(), &field.binary_type));
                        }
                        self.writer.write_integer(reference.id(), 2);
                    }
                }
            }
            BinaryType::Bbit | BinaryType::Ocnt | BinaryType::Lstc | BinaryType::Lste => {}
        }
        Ok(())
    }

    fn encode_string(&mut self, binary_type: &BinaryType, key: &str, bytes: &[u8]) -> Result<(), EncodingError> {
        match binary_type {
            BinaryType::Pstr => {
                let length = u8::try_from(bytes.len())
                    .map_err(|_| self.too_long(key, bytes.len(), u8::MAX as usize))?;
                self.writer.write_u8(length);
                self.writer.write_bytes(bytes);
            }
            BinaryType::Cstr => {
                self.writer.write_bytes(bytes);
                self.writer.write_u8(0);
            }
            BinaryType::Lstr => {
                let length = u32::try_from(bytes.len())
                    .map_err(|_| self.too_long(key, bytes.len(), u32::MAX as usize))?;
                self.writer.write_integer(i64::from(length), 4);
                self.writer.write_bytes(bytes);
            }
            BinaryType::FixedString(width) => {
                // One byte is always left for the terminator.
                if bytes.len() >= *width {
                    return Err(self.too_long(key, bytes.len(), width - 1));
                }
                self.writer.write_bytes(bytes);
                self.writer.write_bytes(&vec![0; width - bytes.len()]);
            }
            _ => {}
        }
        Ok(())
    }
}

/// Packs booleans MSB-first, eight to a byte.
#[derive(Default)]
struct BitPacker {
    byte: u8,
    count: u8,
}

impl BitPacker {
    fn push(&mut self, bit: bool) -> Option<u8> {
        if bit {
            self.byte |= 0x80 >> self.count;
        }
        self.count += 1;
        if self.count == 8 {
            return self.flush();
        }
        None
    }

    fn flush(&mut self) -> Option<u8> {
        if self.count == 0 {
            return None;
        }
        let byte = self.byte;
        *self = Self::default();
        Some(byte)
    }
}

/// Signed tags take their two's complement range. Unsigned tags also accept
/// negative values of the same width, stored as their bit pattern.
fn fits(value: i64, width: usize, signed: bool) -> bool {
    if width >= 8 {
        return true;
    }
    let bits = (width * 8) as u32;
    let value = i128::from(value);
    let min = -(1i128 << (bits - 1));
    let max = if signed {
        (1i128 << (bits - 1)) - 1
    } else {
        (1i128 << bits) - 1
    };
    (min..=max).contains(&value)
}

fn parse_hex(text: &str) -> Option<Vec<u8>> {
    let digits: Vec<u8> = text
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect::<Vec<_>>()
        .chunks(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair).ok()?;
            if pair.len() != 2 {
                return None;
            }
            u8::from_str_radix(pair, 16).ok()
        })
        .collect::<Option<Vec<_>>>()?;
    Some(digits)
}

/// Reads bytes produced by [`encode`] back into a value map.
///
/// `HEXD` entries take every remaining byte, so they only round-trip as the
/// last entry of a template.
pub fn decode(bytes: &[u8], definition: &TypeDefinition, format: Format) -> Result<ValueMap, EncodingError> {
    let mut decoder = Decoder {
        cursor: Cursor::new(bytes),
        format,
    };
    let mut values = ValueMap::new();
    let count = definition.template().fields().len();
    decoder.decode_fields(definition, 0..count, &mut values, "")?;
    Ok(values)
}

struct Decoder<'a> {
    cursor: Cursor<&'a [u8]>,
    format: Format,
}

impl Decoder<'_> {
    fn read_integer(&mut self, order: ByteOrder, width: usize, signed: bool, key: &str) -> Result<i64, EncodingError> {
        let truncated = |_| EncodingError::Truncated {
            field: key.to_string(),
        };
        match (order, signed) {
            (ByteOrder::Big, true) => self.cursor.read_int::<BigEndian>(width).map_err(truncated),
            (ByteOrder::Little, true) => self.cursor.read_int::<LittleEndian>(width).map_err(truncated),
            (ByteOrder::Big, false) => self
                .cursor
                .read_uint::<BigEndian>(width)
                .map(|v| v as i64)
                .map_err(truncated),
            (ByteOrder::Little, false) => self
                .cursor
                .read_uint::<LittleEndian>(width)
                .map(|v| v as i64)
                .map_err(truncated),
        }
    }

    fn read_bytes(&mut self, length: usize, key: &str) -> Result<Vec<u8>, EncodingError> {
        let mut bytes = vec![0; length];
        self.cursor
            .read_exact(&mut bytes)
            .map_err(|_| EncodingError::Truncated {
                field: key.to_string(),
            })?;
        Ok(bytes)
    }

    fn decode_fields(
        &mut self,
        definition: &TypeDefinition,
        range: Range<usize>,
        values: &mut ValueMap,
        prefix: &str,
    ) -> Result<(), EncodingError> {
        let template = definition.template();
        let order = template.byte_order();
        let fields = template.fields();
        let mut bit: Option<(u8, u8)> = None;
        let mut index = range.start;

        while index < range.end {
            let field = &fields[index];
            let key = format!("{prefix}{}", field.label);

            if field.binary_type == BinaryType::Bbit {
                let (byte, position) = match bit {
                    Some((byte, position)) if position < 8 => (byte, position),
                    _ => (self.read_integer(order, 1, false, &key)? as u8, 0),
                };
                values.set(key, Token::Boolean(byte & (0x80 >> position) != 0));
                bit = Some((byte, position + 1));
                index += 1;
                continue;
            }
            bit = None;

            match &field.binary_type {
                BinaryType::Ocnt => {
                    let count = self.read_integer(order, 2, false, &key)?;
                    let Some(group) = template.group_counted_by(&field.label) else {
                        index += 1;
                        continue;
                    };
                    let list = definition
                        .fields()
                        .iter()
                        .find(|f| f.repeatable.as_ref().is_some_and(|r| r.count_field == field.label))
                        .map_or_else(|| key.clone(), |owner| format!("{prefix}{}", owner.name));
                    values.ensure_list(list.clone());
                    for _ in 0..count {
                        let mut entry = ValueMap::new();
                        self.decode_fields(definition, group.members(), &mut entry, "")?;
                        values.push_entry(list.clone(), entry);
                    }
                    index = group.end + 1;
                    continue;
                }
                BinaryType::Lstc | BinaryType::Lste => {}
                BinaryType::Char => {
                    let value = self.read_integer(order, 1, false, &key)?;
                    values.set(key, Token::Integer(value));
                }
                BinaryType::Bool => {
                    let value = self.read_integer(order, 1, false, &key)?;
                    values.set(key, Token::Boolean(value != 0));
                }
                BinaryType::Pstr => {
                    let length = self.read_integer(order, 1, false, &key)? as usize;
                    let bytes = self.read_bytes(length, &key)?;
                    values.set(key, Token::String(String::from_utf8_lossy(&bytes).into_owned()));
                }
                BinaryType::Lstr => {
                    let length = self.read_integer(order, 4, false, &key)? as usize;
                    let bytes = self.read_bytes(length, &key)?;
                    values.set(key, Token::String(String::from_utf8_lossy(&bytes).into_owned()));
                }
                BinaryType::Cstr => {
                    let mut bytes = Vec::new();
                    loop {
                        match self.read_integer(order, 1, false, &key)? as u8 {
                            0 => break,
                            byte => bytes.push(byte),
                        }
                    }
                    values.set(key, Token::String(String::from_utf8_lossy(&bytes).into_owned()));
                }
                BinaryType::FixedString(width) => {
                    let bytes = self.read_bytes(*width, &key)?;
                    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
                    values.set(key, Token::String(String::from_utf8_lossy(&bytes[..end]).into_owned()));
                }
                BinaryType::Hexd => {
                    let mut bytes = Vec::new();
                    self.cursor
                        .read_to_end(&mut bytes)
                        .map_err(|_| EncodingError::Truncated { field: key.clone() })?;
                    values.set(key, Token::String(crate::utils::hex_groups(&bytes).replace(' ', "")));
                }
                BinaryType::Rect | BinaryType::Nested(_) => match &field.nested {
                    Some(nested) => {
                        let count = nested.template().fields().len();
                        let prefix = format!("{key}.");
                        self.decode_fields(nested, 0..count, values, &prefix)?;
                    }
                    None => {
                        for side in RECT_SIDES {
                            let side_key = format!("{key}.{side}");
                            let value = self.read_integer(order, 2, true, &side_key)?;
                            values.set(side_key, Token::Integer(value));
                        }
                    }
                },
                BinaryType::Rsrc => {
                    let reference = match self.format {
                        Format::Extended => {
                            let start = self.cursor.position() as usize;
                            let remaining = &self.cursor.get_ref()[start..];
                            let (reference, consumed) = Reference::decode(remaining)?;
                            self.cursor.set_position((start + consumed) as u64);
                            reference
                        }
                        Format::Classic | Format::Rez => {
                            Reference::new(self.read_integer(order, 2, true, &key)?)
                        }
                    };
                    values.set(key, Token::Reference(reference));
                }
                integer => {
                    let (width, signed) = integer.integer_layout().unwrap_or((8, true));
                    let value = self.read_integer(order, width, signed, &key)?;
                    values.set(key, Token::Integer(value));
                }
            }
            index += 1;
        }
        Ok(())
    }
}
