//! # DocIntel Core
//!
//! Shared, WASM-safe logic for DocIntel: data models, chunking, vector
//! similarity and search, context budgeting, prompt rendering, and the
//! store abstraction.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies. It compiles to both native targets and
//! `wasm32-unknown-unknown`.

pub mod budget;
pub mod chunk;
pub mod embedding;
pub mod models;
pub mod prompt;
pub mod search;
pub mod store;
