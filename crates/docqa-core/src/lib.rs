//! docqa-core - Core types and traits for the document QA pipeline
//!
//! This crate provides the data model, collaborator traits, configuration
//! and error handling shared by the chunker, the indexes and the retrieval
//! engine.

pub mod config;
pub mod error;
pub mod forest;
pub mod text;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::{DocQaError, Provider, Result};
pub use forest::ChunkForest;
pub use traits::*;
pub use types::*;
