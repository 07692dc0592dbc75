/// Batch traversal and the bounded worker pool
pub mod scanner;
pub mod walker;

pub use scanner::{BatchScanner, ScanProgress};
pub use walker::discover;
