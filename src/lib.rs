//! Layered raster image editing core.
//!
//! An [`EditorSession`] owns one [`Document`] (a stack of RGBA layers), the
//! undo history and the current tool state. Everything the editor can do is
//! a method on the session; the modules below hold the pieces it is built
//! from.

#![allow(clippy::too_many_arguments)]
#![allow(clippy::type_complexity)]

pub mod canvas;
pub mod components;
pub mod error;
pub mod io;
pub mod logger;
pub mod ops;
pub mod session;
pub mod settings;

pub use canvas::{Document, PixelBuffer};
pub use components::layers::{Layer, LayerId};
pub use components::tools::Tool;
pub use error::{EditorError, Result};
pub use ops::compositor::BlendMode;
pub use session::EditorSession;
pub use settings::{EditorSettings, KeyCombo};
