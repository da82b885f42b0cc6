//! Utility modules for Funcbox.

pub mod fs;
