//! CLI policy shared by the workspace binaries.

mod color;

pub use color::ColorWhen;
