pub mod passes;
pub mod runner;
