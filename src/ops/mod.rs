pub mod brush;
pub mod canvas_ops;
pub mod compositor;
pub mod fill;
pub mod generate;
pub mod shapes;
pub mod text;
