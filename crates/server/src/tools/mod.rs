//! MCP tool implementations.
//!
//! This module contains all tools exposed by the vitrine server.

pub mod cache;
pub mod image;

#[cfg(test)]
pub(crate) mod testing;
