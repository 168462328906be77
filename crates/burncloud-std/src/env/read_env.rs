use std::env;

/// Read a single environment variable.
///
/// Configuration loaders take `&impl ReadEnv` instead of calling
/// `std::env::var` so they can be driven from an [`InMemoryEnv`](super::InMemoryEnv)
/// in tests.
pub trait ReadEnv {
    fn var(&self, key: &str) -> Result<String, env::VarError>;
}
