//! Collaborator traits the packaged flows call out to
//!
//! Search, model, OCR, and directory access all sit behind these seams.
//! Implementations own their transport and prompt details; the flows only
//! see typed inputs and outputs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::error::EngineError;

/// One source returned by a web search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub title: String,
    pub content: String,
}

/// One record returned by a professional-network directory lookup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub name: String,
    pub headline: String,
    pub url: String,
    pub summary: String,
}

/// Verdict from reviewing gathered research against the extraction goal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reflection {
    pub is_satisfactory: bool,
    #[serde(default)]
    pub missing_fields: Vec<String>,
    /// Replacement queries to close the gaps, empty when satisfied
    #[serde(default)]
    pub search_queries: Vec<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// Writes search queries for a research subject
#[async_trait]
pub trait QueryWriter: Send + Sync {
    async fn write_queries(
        &self,
        person_name: &str,
        company: Option<&str>,
        count: i64,
    ) -> Result<Vec<String>, EngineError>;
}

/// Runs one search query against the web
#[async_trait]
pub trait WebSearcher: Send + Sync {
    async fn search(&self, query: &str, max_results: i64)
        -> Result<Vec<SearchResult>, EngineError>;
}

/// Looks a subject up in a professional-network directory
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    async fn lookup(
        &self,
        person_name: &str,
        company: Option<&str>,
        max_results: i64,
    ) -> Result<Vec<ProfileRecord>, EngineError>;
}

/// Model-backed analysis over gathered material
#[async_trait]
pub trait Analyst: Send + Sync {
    /// Condense raw search sources into one research note
    async fn summarize_sources(
        &self,
        person_name: &str,
        sources: &[SearchResult],
    ) -> Result<String, EngineError>;

    /// Condense one directory record into a research note
    async fn summarize_profile(
        &self,
        person_name: &str,
        profile: &ProfileRecord,
    ) -> Result<String, EngineError>;

    /// Extract structured info from accumulated notes
    async fn extract(&self, person_name: &str, notes: &[String]) -> Result<Value, EngineError>;

    /// Judge whether the extracted info is complete enough to stop
    async fn reflect(&self, info: &Value, queries: &[String]) -> Result<Reflection, EngineError>;
}

/// Loads a document file into an encoded payload for model input
#[async_trait]
pub trait DocumentReader: Send + Sync {
    async fn read(&self, file_path: &str) -> Result<String, EngineError>;
}

/// Model-backed document transcription and review
#[async_trait]
pub trait DocumentAnalyzer: Send + Sync {
    /// Transcribe an encoded document into extraction-schema-shaped JSON
    /// text, honoring reviewer feedback when present. The returned text may
    /// be wrapped in a markdown code fence.
    async fn analyze(
        &self,
        file_base64: &str,
        extraction_schema: &Value,
        feedback: Option<&str>,
    ) -> Result<String, EngineError>;

    /// Produce a short review of the transcription for a human to judge
    async fn review(&self, document: &str) -> Result<String, EngineError>;
}

/// Drop repeated sources, keeping the first occurrence of each URL
pub fn dedupe_sources(sources: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen = std::collections::HashSet::new();
    sources
        .into_iter()
        .filter(|source| seen.insert(source.url.clone()))
        .collect()
}

/// Parse model output as JSON, tolerating a ```json fence around it
pub fn parse_json_block(text: &str) -> Result<Value, String> {
    let stripped = strip_code_fences(text);
    serde_json::from_str(stripped).map_err(|err| format!("invalid JSON: {err}"))
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}
