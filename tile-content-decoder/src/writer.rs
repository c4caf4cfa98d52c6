use crate::{TileFormat, TileHeader};

/// Assembles a tile in memory. JSON sections are padded with spaces and
/// binary sections with zeros so that every section starts on an 8-byte
/// boundary.
#[derive(Debug, Clone)]
pub struct TileBuilder {
    format: TileFormat,
    gltf_format: u32,
    feature_table_json: Vec<u8>,
    feature_table_binary: Vec<u8>,
    batch_table_json: Vec<u8>,
    batch_table_binary: Vec<u8>,
    body: Vec<u8>,
}

fn pad(mut bytes: Vec<u8>, offset: usize, fill: u8) -> Vec<u8> {
    while (offset + bytes.len()) % 8 != 0 {
        bytes.push(fill);
    }
    bytes
}

fn len_u32(bytes: &[u8]) -> u32 {
    u32::try_from(bytes.len()).unwrap_or(u32::MAX)
}

impl TileBuilder {
    pub fn new(format: TileFormat) -> Self {
        Self {
            format,
            gltf_format: 1,
            feature_table_json: vec![],
            feature_table_binary: vec![],
            batch_table_json: vec![],
            batch_table_binary: vec![],
            body: vec![],
        }
    }

    /// i3dm only.
    pub fn gltf_format(mut self, gltf_format: u32) -> Self {
        self.gltf_format = gltf_format;
        self
    }

    pub fn feature_table(mut self, json: &[u8], binary: &[u8]) -> Self {
        self.feature_table_json = json.to_vec();
        self.feature_table_binary = binary.to_vec();
        self
    }

    pub fn batch_table(mut self, json: &[u8], binary: &[u8]) -> Self {
        self.batch_table_json = json.to_vec();
        self.batch_table_binary = binary.to_vec();
        self
    }

    pub fn body(mut self, body: &[u8]) -> Self {
        self.body = body.to_vec();
        self
    }

    pub fn build(self) -> Vec<u8> {
        let header_length = match self.format {
            TileFormat::Instanced3dModel => TileHeader::INSTANCED_LENGTH,
            _ => TileHeader::LENGTH,
        };
        let mut offset = header_length;
        let mut sections = vec![];
        for (bytes, fill) in [
            (self.feature_table_json, b' '),
            (self.feature_table_binary, 0),
            (self.batch_table_json, b' '),
            (self.batch_table_binary, 0),
        ] {
            let padded = if bytes.is_empty() {
                bytes
            } else {
                pad(bytes, offset, fill)
            };
            offset += padded.len();
            sections.push(padded);
        }
        let [feature_table_json, feature_table_binary, batch_table_json, batch_table_binary] =
            <[Vec<u8>; 4]>::try_from(sections).unwrap_or_default();

        let header = TileHeader {
            magic: *self.format.magic(),
            version: 1,
            byte_length: u32::try_from(offset + self.body.len()).unwrap_or(u32::MAX),
            feature_table_json_byte_length: len_u32(&feature_table_json),
            feature_table_binary_byte_length: len_u32(&feature_table_binary),
            batch_table_json_byte_length: len_u32(&batch_table_json),
            batch_table_binary_byte_length: len_u32(&batch_table_binary),
            gltf_format: match self.format {
                TileFormat::Instanced3dModel => Some(self.gltf_format),
                _ => None,
            },
        };

        let mut bytes = header.to_bytes();
        bytes.extend(feature_table_json);
        bytes.extend(feature_table_binary);
        bytes.extend(batch_table_json);
        bytes.extend(batch_table_binary);
        bytes.extend(self.body);
        bytes
    }
}
