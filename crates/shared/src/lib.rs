//! Hubbub Shared Types and Utilities
//!
//! Identifier types and database helpers shared by the Hubbub billing crates.

pub mod db;
pub mod types;

pub use db::*;
pub use types::*;
