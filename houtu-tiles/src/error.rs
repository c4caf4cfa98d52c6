use tile_content_decoder::DecodeError;

#[derive(thiserror::Error, Debug)]
pub enum TilesetError {
    #[error("failed to fetch {url}: {reason}")]
    Network { url: String, reason: String },
    #[error("failed to parse {url}: {reason}")]
    Parse { url: String, reason: String },
    #[error("{url}: invalid magic, expected {expected:?} but found {actual:?}")]
    InvalidMagic {
        url: String,
        expected: String,
        actual: String,
    },
    #[error("{url}: {format} content is not supported")]
    UnsupportedFormat { url: String, format: String },
    #[error("transform must have 16 elements, found {len}")]
    MalformedTransform { len: usize },
    #[error("failed to decode {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: DecodeError,
    },
    #[error("invalid tileset options: {0}")]
    Options(String),
}

impl TilesetError {
    pub fn network(url: &str, reason: impl ToString) -> Self {
        Self::Network {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn parse(url: &str, reason: impl ToString) -> Self {
        Self::Parse {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Attaches `url` to a decoder error, lifting the variants callers match
    /// on to the top level.
    pub fn decode(url: &str, source: DecodeError) -> Self {
        match source {
            DecodeError::InvalidMagic { expected, actual } => Self::InvalidMagic {
                url: url.to_string(),
                expected,
                actual,
            },
            DecodeError::UnsupportedFormat(format) => Self::UnsupportedFormat {
                url: url.to_string(),
                format,
            },
            source => Self::Decode {
                url: url.to_string(),
                source,
            },
        }
    }
}
