// SPDX-License-Identifier: MIT

//! Packaged flows built on the graph engine
//!
//! - `providers` - collaborator traits for search, directory, and model access
//! - `research` - two-branch person research with a reflection loop
//! - `document` - document transcription with an embedded human-review graph

pub mod document;
pub mod providers;
pub mod research;

pub use document::{document_graph, document_review_graph, DocumentProviders};
pub use providers::{
    Analyst, DocumentAnalyzer, DocumentReader, ProfileDirectory, ProfileRecord, QueryWriter,
    Reflection, SearchResult, WebSearcher,
};
pub use research::{research_graph, ResearchProviders};
