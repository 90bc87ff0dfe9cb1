pub mod colors;
pub mod history;
pub mod layers;
pub mod selection;
pub mod tools;
