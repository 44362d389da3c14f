//! Client code for vitrine.
//!
//! This crate provides the HTTP fetcher the image cache delegates network
//! retrieval to.

pub mod fetch;

pub use fetch::{FetchClient, FetchConfig, FetchResponse, UrlError, canonicalize};
