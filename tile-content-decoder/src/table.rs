use byteorder::{ByteOrder, LittleEndian};
use serde_json::{Map, Number, Value};

use crate::DecodeError;

/// A feature table or batch table: a JSON header plus a binary body that
/// properties may point into with `byteOffset`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub json: Map<String, Value>,
    pub binary: Vec<u8>,
}

pub type FeatureTable = Table;
pub type BatchTable = Table;

impl Table {
    pub fn parse(
        section: &'static str,
        json_bytes: &[u8],
        binary: &[u8],
    ) -> Result<Self, DecodeError> {
        let json = parse_json_object(section, json_bytes)?;
        Ok(Self {
            json,
            binary: binary.to_vec(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.json.is_empty() && self.binary.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.json.contains_key(name)
    }

    fn byte_offset(&self, name: &str) -> Option<usize> {
        let offset = self.json.get(name)?.get("byteOffset")?.as_u64()?;
        usize::try_from(offset).ok()
    }

    fn binary_slice(
        &self,
        section: &'static str,
        offset: usize,
        len: usize,
    ) -> Result<&[u8], DecodeError> {
        self.binary
            .get(offset..offset.saturating_add(len))
            .ok_or(DecodeError::Truncated {
                section,
                needed: offset.saturating_add(len),
                available: self.binary.len(),
            })
    }

    /// A global integer such as `POINTS_LENGTH`, stored either inline in the
    /// JSON or as a `UNSIGNED_INT` in the binary body.
    pub fn get_u32(&self, name: &'static str) -> Result<Option<u32>, DecodeError> {
        let Some(value) = self.json.get(name) else {
            return Ok(None);
        };
        if let Some(n) = value.as_u64() {
            return Ok(u32::try_from(n).ok());
        }
        match self.byte_offset(name) {
            Some(offset) => Ok(Some(LittleEndian::read_u32(
                self.binary_slice(name, offset, 4)?,
            ))),
            None => Ok(None),
        }
    }

    /// A global `VEC3` such as `RTC_CENTER`, inline as a JSON array or as
    /// three `FLOAT`s in the binary body.
    pub fn get_vec3(&self, name: &'static str) -> Result<Option<[f64; 3]>, DecodeError> {
        let Some(value) = self.json.get(name) else {
            return Ok(None);
        };
        if let Some(array) = value.as_array() {
            return match array.as_slice() {
                [x, y, z] => Ok(x
                    .as_f64()
                    .zip(y.as_f64())
                    .zip(z.as_f64())
                    .map(|((x, y), z)| [x, y, z])),
                _ => Ok(None),
            };
        }
        Ok(self
            .read_f32_array(name, 3)?
            .map(|v| [f64::from(v[0]), f64::from(v[1]), f64::from(v[2])]))
    }

    /// `count` consecutive little-endian floats at the property's
    /// `byteOffset`.
    pub fn read_f32_array(
        &self,
        name: &'static str,
        count: usize,
    ) -> Result<Option<Vec<f32>>, DecodeError> {
        let Some(offset) = self.byte_offset(name) else {
            return Ok(None);
        };
        let bytes = self.binary_slice(name, offset, count.saturating_mul(4))?;
        let mut values = vec![0f32; count];
        LittleEndian::read_f32_into(bytes, &mut values);
        Ok(Some(values))
    }

    pub fn read_u8_array(
        &self,
        name: &'static str,
        count: usize,
    ) -> Result<Option<&[u8]>, DecodeError> {
        let Some(offset) = self.byte_offset(name) else {
            return Ok(None);
        };
        self.binary_slice(name, offset, count).map(Some)
    }

    /// Value of property `name` for the feature with `batch_id`. JSON arrays
    /// are indexed directly; binary properties are read according to their
    /// `componentType` and `type`.
    pub fn property(&self, batch_id: usize, name: &str) -> Option<Value> {
        let value = self.json.get(name)?;
        if let Some(array) = value.as_array() {
            return array.get(batch_id).cloned();
        }
        let offset = usize::try_from(value.get("byteOffset")?.as_u64()?).ok()?;
        let component_type = ComponentType::parse(value.get("componentType")?.as_str()?)?;
        let components = match value.get("type").and_then(Value::as_str).unwrap_or("SCALAR") {
            "SCALAR" => 1,
            "VEC2" => 2,
            "VEC3" => 3,
            "VEC4" => 4,
            _ => return None,
        };
        let stride = component_type.size() * components;
        let start = offset.checked_add(batch_id.checked_mul(stride)?)?;
        let bytes = self.binary.get(start..start.checked_add(stride)?)?;
        let mut values = bytes
            .chunks_exact(component_type.size())
            .map(|chunk| component_type.read(chunk))
            .collect::<Option<Vec<Value>>>()?;
        if components == 1 {
            values.pop()
        } else {
            Some(Value::Array(values))
        }
    }

    /// Every property of one feature, keyed by property name.
    pub fn feature(&self, batch_id: usize) -> Map<String, Value> {
        self.json
            .keys()
            .filter(|name| !matches!(name.as_str(), "extensions" | "extras"))
            .filter_map(|name| Some((name.clone(), self.property(batch_id, name)?)))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ComponentType {
    Byte,
    UnsignedByte,
    Short,
    UnsignedShort,
    Int,
    UnsignedInt,
    Float,
    Double,
}

impl ComponentType {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "BYTE" => Self::Byte,
            "UNSIGNED_BYTE" => Self::UnsignedByte,
            "SHORT" => Self::Short,
            "UNSIGNED_SHORT" => Self::UnsignedShort,
            "INT" => Self::Int,
            "UNSIGNED_INT" => Self::UnsignedInt,
            "FLOAT" => Self::Float,
            "DOUBLE" => Self::Double,
            _ => return None,
        })
    }

    fn size(self) -> usize {
        match self {
            Self::Byte | Self::UnsignedByte => 1,
            Self::Short | Self::UnsignedShort => 2,
            Self::Int | Self::UnsignedInt | Self::Float => 4,
            Self::Double => 8,
        }
    }

    fn read(self, bytes: &[u8]) -> Option<Value> {
        let first = *bytes.first()?;
        Some(match self {
            Self::Byte => Value::from(first as i8),
            Self::UnsignedByte => Value::from(first),
            Self::Short => Value::from(LittleEndian::read_i16(bytes)),
            Self::UnsignedShort => Value::from(LittleEndian::read_u16(bytes)),
            Self::Int => Value::from(LittleEndian::read_i32(bytes)),
            Self::UnsignedInt => Value::from(LittleEndian::read_u32(bytes)),
            Self::Float => Value::Number(Number::from_f64(f64::from(LittleEndian::read_f32(bytes)))?),
            Self::Double => Value::Number(Number::from_f64(LittleEndian::read_f64(bytes))?),
        })
    }
}

/// Parses a JSON header section. Empty sections are an empty object; the
/// space or NUL padding used for 8-byte alignment is ignored.
pub(crate) fn parse_json_object(
    section: &'static str,
    bytes: &[u8],
) -> Result<Map<String, Value>, DecodeError> {
    let end = bytes
        .iter()
        .rposition(|b| !matches!(b, b' ' | b'\0' | b'\n' | b'\r' | b'\t'))
        .map_or(0, |i| i + 1);
    let trimmed = bytes.get(..end).unwrap_or_default();
    if trimmed.is_empty() {
        return Ok(Map::new());
    }
    serde_json::from_slice(trimmed).map_err(|source| DecodeError::Json { section, source })
}
