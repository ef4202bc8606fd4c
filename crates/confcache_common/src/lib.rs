//! Shared foundational types used across the configuration cache.
//!
//! This crate provides the project path identifier and content hashing.

#![warn(missing_docs)]

pub mod hash;
pub mod path;

pub use hash::ContentHash;
pub use path::{PathParseError, ProjectPath};
