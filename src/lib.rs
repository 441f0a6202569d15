//! # decomprag — Decompilation Retrieval Engine
//!
//! Indexes a decompilation workspace into a function-level knowledge base
//! (assembly bodies, recovered source, call graph, embedding vectors) and
//! answers similarity queries used to pick few-shot examples for
//! machine-assisted translation.
//!
//! ## Architecture
//!
//! - **[`config`]** — Workspace configuration: paths, architecture,
//!   embedding provider, search tuning
//! - **[`scanner`]** — ARM/MIPS lexical scanners: function splitting,
//!   call extraction, comment stripping
//! - **[`db`]** — Function Registry: records + vectors, snapshot
//!   persistence, cosine similarity search
//! - **[`embedder`]** — Embedding provider trait, remote HTTP client,
//!   deterministic mock
//! - **[`indexer`]** — Four-phase workspace indexing pass and the batch
//!   embedding pipeline
//! - **[`matcher`]** / **[`correlate`]** — Boundaries to the structural
//!   source matcher and the build-output correlator
//! - **[`context`]** — Translation-context assembly: declarations, type
//!   definitions, caller and similar-function examples

pub mod config;
pub mod context;
pub mod correlate;
pub mod db;
pub mod embedder;
pub mod indexer;
pub mod matcher;
pub mod scanner;
