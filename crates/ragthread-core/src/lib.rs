//! # ragthread core
//!
//! Pure logic shared by the ragthread store and services: the data model,
//! error taxonomy, text chunker, embedder trait, flat nearest-neighbour
//! index with its binary codec, and context assembly.
//!
//! This crate performs no filesystem I/O and pulls in no async runtime.
//! Persistence, extraction and concrete model backends live in the
//! `ragthread` crate.

pub mod chunk;
pub mod context;
pub mod embedding;
pub mod error;
pub mod index;
pub mod models;

pub use error::{RagError, Result};
