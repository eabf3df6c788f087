pub mod signal;
pub mod upload;
