pub mod engine;
pub mod faces;
pub mod overlay;
