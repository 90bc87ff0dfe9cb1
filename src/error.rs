use thiserror::Error;

use crate::components::layers::LayerId;

/// Errors surfaced by editor operations.
///
/// Refused tool input (locked layer, out-of-bounds pointer, empty undo stack)
/// is not an error; those calls are silent no-ops.
#[derive(Debug, Error)]
pub enum EditorError {
    #[error("cannot remove the last remaining layer")]
    LastLayer,

    #[error("no layer with id {0}")]
    UnknownLayer(LayerId),

    #[error("layer index {index} out of range (stack has {len} layers)")]
    LayerIndex { index: usize, len: usize },

    #[error("{width}x{height} is below the minimum of {min}x{min} pixels")]
    DegenerateRect { width: u32, height: u32, min: u32 },

    #[error("{width}x{height} exceeds the maximum canvas size")]
    CanvasTooLarge { width: u32, height: u32 },

    #[error("invalid color '{0}'")]
    InvalidColor(String),

    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("could not encode image: {0}")]
    Encode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image generation failed: {0}")]
    Generation(String),

    #[error("invalid project file: {0}")]
    Project(String),

    #[error("font error: {0}")]
    Font(String),

    #[error("settings error: {0}")]
    Settings(String),
}

impl From<Box<bincode::ErrorKind>> for EditorError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        EditorError::Project(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EditorError>;
