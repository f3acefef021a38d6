//! dBASE III/IV attribute tables (`.dbf`).
//!
//! Text is kept as raw bytes until a caller picks an encoding, so one parse
//! of the file structure can be decoded strictly under several candidates.

use std::borrow::Cow;
use std::path::Path;

use encoding_rs::Encoding;
use time::{Date, Month};

use super::{Field, FieldKind, FieldValue, LayerError};

const HEADER_LEN: usize = 32;
const DESCRIPTOR_LEN: usize = 32;
const HEADER_TERMINATOR: u8 = 0x0D;
const DELETED_FLAG: u8 = b'*';

#[derive(Debug, Clone)]
struct RawField {
    name: Vec<u8>,
    field_type: u8,
    length: usize,
    decimals: u8,
}

/// Structurally parsed `.dbf`, text still undecoded.
#[derive(Debug)]
pub struct DbfTable {
    fields: Vec<RawField>,
    records: Vec<RawRecord>,
    language_driver: u8,
}

#[derive(Debug)]
struct RawRecord {
    deleted: bool,
    data: Vec<u8>,
}

/// How text bytes are turned into strings.
#[derive(Debug, Clone, Copy)]
pub enum TextDecoding {
    /// Malformed input fails the whole read.
    Strict(&'static Encoding),
    /// Malformed input is replaced.
    Lossy(&'static Encoding),
}

impl TextDecoding {
    fn decode<'b>(&self, bytes: &'b [u8]) -> Result<Cow<'b, str>, LayerError> {
        match *self {
            TextDecoding::Strict(encoding) => encoding
                .decode_without_bom_handling_and_without_replacement(bytes)
                .ok_or(LayerError::Decode {
                    encoding: encoding.name(),
                }),
            TextDecoding::Lossy(encoding) => Ok(encoding.decode_without_bom_handling(bytes).0),
        }
    }
}

#[derive(Debug)]
pub struct DecodedTable {
    pub fields: Vec<Field>,
    /// `None` for records flagged as deleted.
    pub rows: Vec<Option<Vec<FieldValue>>>,
}

impl DbfTable {
    pub fn read(path: &Path) -> Result<Self, LayerError> {
        let bytes = std::fs::read(path)?;
        Self::parse(&bytes)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, LayerError> {
        if bytes.len() < HEADER_LEN {
            return Err(LayerError::Dbf("file shorter than header".into()));
        }
        let record_count = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        let record_len = u16::from_le_bytes([bytes[10], bytes[11]]) as usize;
        let language_driver = bytes[29];

        if header_len < HEADER_LEN + 1 || header_len > bytes.len() {
            return Err(LayerError::Dbf(format!("invalid header length {header_len}")));
        }

        let mut fields = Vec::new();
        let mut offset = HEADER_LEN;
        while offset + DESCRIPTOR_LEN <= header_len && bytes[offset] != HEADER_TERMINATOR {
            let desc = &bytes[offset..offset + DESCRIPTOR_LEN];
            let name_end = desc[..11].iter().position(|&b| b == 0).unwrap_or(11);
            fields.push(RawField {
                name: trim_ascii(&desc[..name_end]).to_vec(),
                field_type: desc[11].to_ascii_uppercase(),
                length: desc[16] as usize,
                decimals: desc[17],
            });
            offset += DESCRIPTOR_LEN;
        }

        let data_len: usize = 1 + fields.iter().map(|f| f.length).sum::<usize>();
        if record_len < data_len {
            return Err(LayerError::Dbf(format!(
                "record length {record_len} smaller than field widths {data_len}"
            )));
        }

        // The header's record count is only trusted once the bytes back it.
        if record_count
            .checked_mul(record_len)
            .and_then(|n| n.checked_add(header_len))
            .is_none_or(|end| end > bytes.len())
        {
            let available = (bytes.len() - header_len) / record_len;
            return Err(LayerError::Dbf(format!(
                "header declares {record_count} records but the file holds {available}"
            )));
        }

        let mut records = Vec::with_capacity(record_count);
        for i in 0..record_count {
            let start = header_len + i * record_len;
            let raw = &bytes[start..start + record_len];
            records.push(RawRecord {
                deleted: raw[0] == DELETED_FLAG,
                data: raw[1..data_len].to_vec(),
            });
        }

        Ok(Self {
            fields,
            records,
            language_driver,
        })
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Encoding named by the header's language driver byte, if known.
    pub fn declared_encoding(&self) -> Option<&'static Encoding> {
        language_driver_encoding(self.language_driver)
    }

    pub fn decode(&self, decoding: TextDecoding) -> Result<DecodedTable, LayerError> {
        let fields = self
            .fields
            .iter()
            .map(|f| {
                Ok(Field {
                    name: decoding.decode(&f.name)?.into_owned(),
                    kind: field_kind(f),
                })
            })
            .collect::<Result<Vec<_>, LayerError>>()?;

        let mut rows = Vec::with_capacity(self.records.len());
        for record in &self.records {
            if record.deleted {
                rows.push(None);
                continue;
            }
            let mut values = Vec::with_capacity(self.fields.len());
            let mut offset = 0;
            for (raw, field) in self.fields.iter().zip(&fields) {
                let cell = &record.data[offset..offset + raw.length];
                offset += raw.length;
                values.push(parse_value(cell, raw.field_type, field.kind, decoding)?);
            }
            rows.push(Some(values));
        }

        Ok(DecodedTable { fields, rows })
    }
}

fn field_kind(field: &RawField) -> FieldKind {
    match field.field_type {
        b'N' if field.decimals == 0 && field.length <= 18 => FieldKind::Integer,
        b'N' | b'F' | b'O' => FieldKind::Float,
        b'I' | b'+' => FieldKind::Integer,
        b'L' => FieldKind::Boolean,
        b'D' => FieldKind::Date,
        _ => FieldKind::Text,
    }
}

fn parse_value(
    cell: &[u8],
    field_type: u8,
    kind: FieldKind,
    decoding: TextDecoding,
) -> Result<FieldValue, LayerError> {
    let value = match (field_type, kind) {
        (b'I', _) if cell.len() == 4 => {
            FieldValue::Integer(i64::from(i32::from_le_bytes([cell[0], cell[1], cell[2], cell[3]])))
        }
        (b'O', _) if cell.len() == 8 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(cell);
            FieldValue::Float(f64::from_le_bytes(raw))
        }
        (_, FieldKind::Integer) => ascii_number(cell)
            .and_then(|s| s.parse::<i64>().ok())
            .map_or(FieldValue::Null, FieldValue::Integer),
        (_, FieldKind::Float) => ascii_number(cell)
            .and_then(|s| s.parse::<f64>().ok())
            .map_or(FieldValue::Null, FieldValue::Float),
        (_, FieldKind::Boolean) => match trim_ascii(cell).first() {
            Some(b'T' | b't' | b'Y' | b'y') => FieldValue::Boolean(true),
            Some(b'F' | b'f' | b'N' | b'n') => FieldValue::Boolean(false),
            _ => FieldValue::Null,
        },
        (_, FieldKind::Date) => parse_date(cell).map_or(FieldValue::Null, FieldValue::Date),
        (_, FieldKind::Text) => {
            let text = decoding.decode(cell)?;
            let text = text.trim_end_matches([' ', '\0']);
            if text.is_empty() {
                FieldValue::Null
            } else {
                FieldValue::Text(text.to_string())
            }
        }
    };
    Ok(value)
}

fn ascii_number(cell: &[u8]) -> Option<&str> {
    let s = std::str::from_utf8(trim_ascii(cell)).ok()?;
    // Overflowed numeric fields are written as asterisks.
    if s.is_empty() || s.starts_with('*') {
        None
    } else {
        Some(s)
    }
}

fn parse_date(cell: &[u8]) -> Option<Date> {
    let s = std::str::from_utf8(trim_ascii(cell)).ok()?;
    if s.len() != 8 {
        return None;
    }
    let year: i32 = s[0..4].parse().ok()?;
    let month: u8 = s[4..6].parse().ok()?;
    let day: u8 = s[6..8].parse().ok()?;
    Date::from_calendar_date(year, Month::try_from(month).ok()?, day).ok()
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace() && *b != 0)
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace() && *b != 0)
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

/// Code pages for the language driver IDs that encoding_rs can decode.
fn language_driver_encoding(ldid: u8) -> Option<&'static Encoding> {
    let encoding = match ldid {
        0x03 | 0x57 | 0x58 | 0x59 => encoding_rs::WINDOWS_1252,
        0x13 | 0x7B => encoding_rs::SHIFT_JIS,
        0x4D | 0x7A => encoding_rs::GBK,
        0x4E | 0x79 => encoding_rs::EUC_KR,
        0x4F | 0x78 => encoding_rs::BIG5,
        0x50 | 0x7C => encoding_rs::WINDOWS_874,
        0x65 | 0x26 => encoding_rs::IBM866,
        0xC8 => encoding_rs::WINDOWS_1250,
        0xC9 => encoding_rs::WINDOWS_1251,
        0xCA => encoding_rs::WINDOWS_1254,
        0xCB => encoding_rs::WINDOWS_1253,
        0xCC => encoding_rs::WINDOWS_1257,
        0x7D => encoding_rs::WINDOWS_1255,
        0x7E => encoding_rs::WINDOWS_1256,
        _ => return None,
    };
    Some(encoding)
}
