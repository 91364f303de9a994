//! Error classification

mod category;

pub use category::ErrorCategory;
