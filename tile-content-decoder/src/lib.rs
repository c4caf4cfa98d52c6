#![warn(
    clippy::unwrap_used,
    clippy::cast_lossless,
    clippy::unimplemented,
    clippy::indexing_slicing,
    clippy::expect_used
)]
//https://github.com/CesiumGS/3d-tiles/tree/main/specification/TileFormats
//! Decoder for the binary tile formats of 3D Tiles 1.0: Batched 3D Model
//! (b3dm), Instanced 3D Model (i3dm) and Point Cloud (pnts). Composite tiles
//! (cmpt) are recognised but not decoded.

mod error;
mod header;
mod table;
mod writer;

pub use error::*;
pub use header::*;
pub use table::*;
pub use writer::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileFormat {
    Batched3dModel,
    Instanced3dModel,
    PointCloud,
    Composite,
}

impl TileFormat {
    pub fn magic(&self) -> &'static [u8; 4] {
        match self {
            TileFormat::Batched3dModel => b"b3dm",
            TileFormat::Instanced3dModel => b"i3dm",
            TileFormat::PointCloud => b"pnts",
            TileFormat::Composite => b"cmpt",
        }
    }
    pub fn as_str(&self) -> &'static str {
        match self {
            TileFormat::Batched3dModel => "b3dm",
            TileFormat::Instanced3dModel => "i3dm",
            TileFormat::PointCloud => "pnts",
            TileFormat::Composite => "cmpt",
        }
    }
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "b3dm" => Some(TileFormat::Batched3dModel),
            "i3dm" => Some(TileFormat::Instanced3dModel),
            "pnts" => Some(TileFormat::PointCloud),
            "cmpt" => Some(TileFormat::Composite),
            _ => None,
        }
    }
    /// Guesses the format from the first four bytes of a payload.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        let magic = bytes.get(..4)?;
        [
            TileFormat::Batched3dModel,
            TileFormat::Instanced3dModel,
            TileFormat::PointCloud,
            TileFormat::Composite,
        ]
        .into_iter()
        .find(|format| format.magic().as_slice() == magic)
    }
}

impl std::fmt::Display for TileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the glTF of an instanced tile lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GltfSource {
    Embedded(Vec<u8>),
    /// Url, relative to the tile, of a glb shared by many tiles.
    External(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Batched3dModel {
    pub batch_length: u32,
    pub rtc_center: Option<[f64; 3]>,
    pub glb: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstancedModel {
    pub instances_length: u32,
    /// xyz per instance.
    pub positions: Vec<f32>,
    pub normal_right: Vec<f32>,
    pub normal_up: Vec<f32>,
    pub rtc_center: Option<[f64; 3]>,
    pub gltf: GltfSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PointColors {
    /// Four floats in `[0, 1]` per point.
    Rgba(Vec<f32>),
    /// Three floats in `[0, 1]` per point.
    Rgb(Vec<f32>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud {
    pub points_length: u32,
    /// xyz per point, relative to `rtc_center` when present.
    pub positions: Vec<f32>,
    pub colors: Option<PointColors>,
    pub rtc_center: Option<[f64; 3]>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TileBody {
    Model(Batched3dModel),
    Instanced(InstancedModel),
    Points(PointCloud),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TileContent {
    pub format: TileFormat,
    pub header: TileHeader,
    pub feature_table: FeatureTable,
    pub batch_table: BatchTable,
    pub body: TileBody,
    pub warnings: Vec<DecodeWarning>,
}

fn section<'a>(
    buffer: &'a [u8],
    name: &'static str,
    range: std::ops::Range<usize>,
) -> Result<&'a [u8], DecodeError> {
    let needed = range.end;
    buffer.get(range).ok_or(DecodeError::Truncated {
        section: name,
        needed,
        available: buffer.len(),
    })
}

/// Decodes one tile that was declared (by its url) as `declared`.
pub fn decode(buffer: &[u8], declared: TileFormat) -> Result<TileContent, DecodeError> {
    let header = TileHeader::read(buffer, declared)?;
    let sections = header.sections();
    let feature_table = Table::parse(
        "feature table",
        section(buffer, "feature table JSON", sections.feature_table_json)?,
        section(buffer, "feature table binary", sections.feature_table_binary)?,
    )?;
    let batch_table = Table::parse(
        "batch table",
        section(buffer, "batch table JSON", sections.batch_table_json)?,
        section(buffer, "batch table binary", sections.batch_table_binary)?,
    )?;

    // byteLength is trusted only when it is consistent with the buffer
    let byte_length = header.byte_length as usize;
    let body_end = if byte_length >= sections.body_start && byte_length <= buffer.len() {
        byte_length
    } else {
        buffer.len()
    };
    let payload = section(buffer, "body", sections.body_start..body_end.max(sections.body_start))?;

    let mut warnings = vec![];
    let body = match declared {
        TileFormat::Batched3dModel => TileBody::Model(Batched3dModel {
            batch_length: feature_table.get_u32("BATCH_LENGTH")?.unwrap_or(0),
            rtc_center: feature_table.get_vec3("RTC_CENTER")?,
            glb: payload.to_vec(),
        }),
        TileFormat::Instanced3dModel => TileBody::Instanced(decode_instanced(
            &feature_table,
            header.gltf_format.unwrap_or(1),
            payload,
        )?),
        TileFormat::PointCloud => {
            TileBody::Points(decode_points(&feature_table, &mut warnings)?)
        }
        TileFormat::Composite => {
            return Err(DecodeError::UnsupportedFormat(declared.as_str().to_string()))
        }
    };

    Ok(TileContent {
        format: declared,
        header,
        feature_table,
        batch_table,
        body,
        warnings,
    })
}

fn decode_instanced(
    feature_table: &FeatureTable,
    gltf_format: u32,
    payload: &[u8],
) -> Result<InstancedModel, DecodeError> {
    let instances_length = feature_table
        .get_u32("INSTANCES_LENGTH")?
        .ok_or(DecodeError::MissingProperty("INSTANCES_LENGTH"))?;
    let count = instances_length as usize * 3;
    let positions = feature_table
        .read_f32_array("POSITION", count)?
        .ok_or(DecodeError::MissingProperty("POSITION"))?;
    let normal_right = feature_table
        .read_f32_array("NORMAL_RIGHT", count)?
        .ok_or(DecodeError::MissingProperty("NORMAL_RIGHT"))?;
    let normal_up = feature_table
        .read_f32_array("NORMAL_UP", count)?
        .ok_or(DecodeError::MissingProperty("NORMAL_UP"))?;

    let gltf = if gltf_format == 0 {
        let url = std::str::from_utf8(payload).map_err(|_| DecodeError::InvalidUrl)?;
        let url = url.trim_end_matches(|c: char| c == '\0' || c.is_whitespace());
        if url.is_empty() {
            return Err(DecodeError::InvalidUrl);
        }
        GltfSource::External(url.to_string())
    } else {
        GltfSource::Embedded(payload.to_vec())
    };

    Ok(InstancedModel {
        instances_length,
        positions,
        normal_right,
        normal_up,
        rtc_center: feature_table.get_vec3("RTC_CENTER")?,
        gltf,
    })
}

fn decode_points(
    feature_table: &FeatureTable,
    warnings: &mut Vec<DecodeWarning>,
) -> Result<PointCloud, DecodeError> {
    let points_length = feature_table
        .get_u32("POINTS_LENGTH")?
        .ok_or(DecodeError::MissingProperty("POINTS_LENGTH"))?;
    let count = points_length as usize;
    let positions = feature_table
        .read_f32_array("POSITION", count * 3)?
        .ok_or(DecodeError::MissingProperty("POSITION"))?;

    let normalize = |bytes: &[u8]| bytes.iter().map(|b| f32::from(*b) / 255.0).collect();
    let colors = if let Some(rgba) = feature_table.read_u8_array("RGBA", count * 4)? {
        Some(PointColors::Rgba(normalize(rgba)))
    } else if let Some(rgb) = feature_table.read_u8_array("RGB", count * 3)? {
        Some(PointColors::Rgb(normalize(rgb)))
    } else {
        if feature_table.contains("RGB565") {
            warnings.push(DecodeWarning::Rgb565Unsupported);
        }
        None
    };

    Ok(PointCloud {
        points_length,
        positions,
        colors,
        rtc_center: feature_table.get_vec3("RTC_CENTER")?,
    })
}
