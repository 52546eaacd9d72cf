pub mod captioner;
pub mod detector;
pub mod engine;
pub mod labels;
pub mod pipeline;
