//! Error taxonomy shared by the kstore crates.

pub mod errors;

pub type Result<T, E = errors::WithBacktrace> = core::result::Result<T, E>;
