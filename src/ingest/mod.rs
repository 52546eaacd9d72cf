pub mod acquirer;
pub mod scanner;
