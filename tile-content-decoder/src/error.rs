use std::io;

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("invalid magic: expected {expected:?}, found {actual:?}")]
    InvalidMagic { expected: String, actual: String },
    #[error("{section} needs {needed} bytes but only {available} are available")]
    Truncated {
        section: &'static str,
        needed: usize,
        available: usize,
    },
    #[error("{section} is not valid JSON: {source}")]
    Json {
        section: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("feature table is missing {0}")]
    MissingProperty(&'static str),
    #[error("{0} tiles are not supported")]
    UnsupportedFormat(String),
    #[error("external glTF reference is not a valid UTF-8 url")]
    InvalidUrl,
    #[error("{0}")]
    Io(#[from] io::Error),
}

/// Problems that do not stop a tile from being used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeWarning {
    /// `RGB565` point colors are not decoded; the points carry no color.
    Rgb565Unsupported,
}

impl std::fmt::Display for DecodeWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeWarning::Rgb565Unsupported => {
                write!(f, "RGB565 point colors are not supported, no color applied")
            }
        }
    }
}
