//! # annotation-collector
//!
//! Indexes Java annotations across a source tree into a compiled artifact
//! that can be queried by annotation kind without re-scanning source.
//!
//! ## Architecture
//!
//! - **store**: Fingerprint-keyed memoization shared by the pipeline stages
//! - **cache**: Durable store backed by LMDB in the cache directory
//! - **scan**: Source file discovery under include roots
//! - **parse**: Header scanning for declared types, package and on-demand imports
//! - **resolver**: Path-to-type resolution
//! - **introspect**: Declaration introspection using tree-sitter AST parsing
//! - **filter**: Named predicate chain discarding unusable types
//! - **extract**: Annotation records for types, methods and properties
//! - **collector**: Per-run aggregate grouped by annotation kind
//! - **render**: Deterministic artifact rendering and atomic writes
//! - **collection**: Artifact reader with lazy annotation materialization
//! - **pipeline**: Regeneration entry point

pub mod cache;
pub mod cli;
pub mod collection;
pub mod collector;
pub mod config;
pub mod extract;
pub mod filter;
pub mod introspect;
pub mod logging;
pub mod parse;
pub mod pipeline;
pub mod render;
pub mod resolver;
pub mod scan;
pub mod store;
