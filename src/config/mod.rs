pub mod env;
pub mod settings;
