use std::io::{Read, Write};
use std::ops::Range;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::{DecodeError, TileFormat};

/// The fixed little-endian header in front of every b3dm, i3dm and pnts tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileHeader {
    pub magic: [u8; 4],
    pub version: u32,
    pub byte_length: u32,
    pub feature_table_json_byte_length: u32,
    pub feature_table_binary_byte_length: u32,
    pub batch_table_json_byte_length: u32,
    pub batch_table_binary_byte_length: u32,
    /// i3dm only: 1 when the glb is embedded, 0 when the body is a url.
    pub gltf_format: Option<u32>,
}

/// Byte ranges of the sections that follow the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionOffsets {
    pub feature_table_json: Range<usize>,
    pub feature_table_binary: Range<usize>,
    pub batch_table_json: Range<usize>,
    pub batch_table_binary: Range<usize>,
    pub body_start: usize,
}

impl TileHeader {
    pub const LENGTH: usize = 28;
    pub const INSTANCED_LENGTH: usize = 32;

    /// Reads the header of a tile declared as `format`. The magic is checked
    /// before anything else is read, and composite tiles are rejected right
    /// after it since their header is laid out differently.
    pub fn read(mut rdr: impl Read, format: TileFormat) -> Result<Self, DecodeError> {
        let mut magic = [0u8; 4];
        rdr.read_exact(&mut magic)?;
        if &magic != format.magic() {
            return Err(DecodeError::InvalidMagic {
                expected: format.as_str().to_string(),
                actual: String::from_utf8_lossy(&magic).into_owned(),
            });
        }
        if format == TileFormat::Composite {
            return Err(DecodeError::UnsupportedFormat(format.as_str().to_string()));
        }
        let version = rdr.read_u32::<LittleEndian>()?;
        let byte_length = rdr.read_u32::<LittleEndian>()?;
        let feature_table_json_byte_length = rdr.read_u32::<LittleEndian>()?;
        let feature_table_binary_byte_length = rdr.read_u32::<LittleEndian>()?;
        let batch_table_json_byte_length = rdr.read_u32::<LittleEndian>()?;
        let batch_table_binary_byte_length = rdr.read_u32::<LittleEndian>()?;
        let gltf_format = match format {
            TileFormat::Instanced3dModel => Some(rdr.read_u32::<LittleEndian>()?),
            _ => None,
        };
        Ok(Self {
            magic,
            version,
            byte_length,
            feature_table_json_byte_length,
            feature_table_binary_byte_length,
            batch_table_json_byte_length,
            batch_table_binary_byte_length,
            gltf_format,
        })
    }

    pub fn length(&self) -> usize {
        if self.gltf_format.is_some() {
            Self::INSTANCED_LENGTH
        } else {
            Self::LENGTH
        }
    }

    pub fn sections(&self) -> SectionOffsets {
        let mut offset = self.length();
        let mut next = |len: u32| {
            let range = offset..offset + len as usize;
            offset = range.end;
            range
        };
        let feature_table_json = next(self.feature_table_json_byte_length);
        let feature_table_binary = next(self.feature_table_binary_byte_length);
        let batch_table_json = next(self.batch_table_json_byte_length);
        let batch_table_binary = next(self.batch_table_binary_byte_length);
        SectionOffsets {
            body_start: batch_table_binary.end,
            feature_table_json,
            feature_table_binary,
            batch_table_json,
            batch_table_binary,
        }
    }

    pub fn write_to(&self, mut wtr: impl Write) -> std::io::Result<()> {
        wtr.write_all(&self.magic)?;
        wtr.write_u32::<LittleEndian>(self.version)?;
        wtr.write_u32::<LittleEndian>(self.byte_length)?;
        wtr.write_u32::<LittleEndian>(self.feature_table_json_byte_length)?;
        wtr.write_u32::<LittleEndian>(self.feature_table_binary_byte_length)?;
        wtr.write_u32::<LittleEndian>(self.batch_table_json_byte_length)?;
        wtr.write_u32::<LittleEndian>(self.batch_table_binary_byte_length)?;
        if let Some(gltf_format) = self.gltf_format {
            wtr.write_u32::<LittleEndian>(gltf_format)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.length());
        bytes.extend_from_slice(&self.magic);
        for word in [
            self.version,
            self.byte_length,
            self.feature_table_json_byte_length,
            self.feature_table_binary_byte_length,
            self.batch_table_json_byte_length,
            self.batch_table_binary_byte_length,
        ]
        .into_iter()
        .chain(self.gltf_format)
        {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(format: TileFormat) -> TileHeader {
        TileHeader {
            magic: *format.magic(),
            version: 1,
            byte_length: 1234,
            feature_table_json_byte_length: 40,
            feature_table_binary_byte_length: 12,
            batch_table_json_byte_length: 16,
            batch_table_binary_byte_length: 8,
            gltf_format: match format {
                TileFormat::Instanced3dModel => Some(1),
                _ => None,
            },
        }
    }

    #[test]
    fn round_trip_reproduces_bytes_and_offsets() {
        for format in [
            TileFormat::Batched3dModel,
            TileFormat::Instanced3dModel,
            TileFormat::PointCloud,
        ] {
            let original = header(format);
            let bytes = original.to_bytes();
            assert_eq!(bytes.len(), original.length());
            let mut written = vec![];
            original.write_to(&mut written).unwrap();
            assert_eq!(written, bytes);
            let decoded = TileHeader::read(bytes.as_slice(), format).unwrap();
            assert_eq!(decoded, original);
            assert_eq!(decoded.to_bytes(), bytes);
            assert_eq!(decoded.sections(), original.sections());
        }
    }

    #[test]
    fn section_offsets_follow_header() {
        let sections = header(TileFormat::PointCloud).sections();
        assert_eq!(sections.feature_table_json, 28..68);
        assert_eq!(sections.feature_table_binary, 68..80);
        assert_eq!(sections.batch_table_json, 80..96);
        assert_eq!(sections.batch_table_binary, 96..104);
        assert_eq!(sections.body_start, 104);

        let instanced = header(TileFormat::Instanced3dModel).sections();
        assert_eq!(instanced.feature_table_json.start, 32);
        assert_eq!(instanced.body_start, 108);
    }

    #[test]
    fn field_offsets_are_fixed() {
        let bytes = header(TileFormat::Instanced3dModel).to_bytes();
        assert_eq!(&bytes[0..4], b"i3dm");
        assert_eq!(bytes[4], 1);
        assert_eq!(u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]), 1234);
        assert_eq!(bytes[12], 40);
        assert_eq!(bytes[16], 12);
        assert_eq!(bytes[20], 16);
        assert_eq!(bytes[24], 8);
        assert_eq!(bytes[28], 1);
    }

    #[test]
    fn magic_mismatch_is_reported() {
        let bytes = header(TileFormat::Batched3dModel).to_bytes();
        match TileHeader::read(bytes.as_slice(), TileFormat::PointCloud) {
            Err(DecodeError::InvalidMagic { expected, actual }) => {
                assert_eq!(expected, "pnts");
                assert_eq!(actual, "b3dm");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn short_header_is_io_error() {
        let bytes = header(TileFormat::PointCloud).to_bytes();
        let result = TileHeader::read(&bytes[..20], TileFormat::PointCloud);
        assert!(matches!(result, Err(DecodeError::Io(_))));
    }
}
