pub mod error;
pub mod ladder;
pub mod playlist;
pub mod probe;
pub mod processor;
pub mod scheduler;
pub mod transcoder;
pub mod workspace;
