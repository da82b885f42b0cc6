//! Security utilities for Funcbox

pub mod path;

pub use path::{resolve_within, SafePath};
