//! Person-research flow
//!
//! Two branches fan out from the start: a web branch that writes search
//! queries, runs them through the shared rate limiter, and condenses the
//! sources into notes, and a directory branch that looks the subject up on a
//! professional network, taking one note per profile found. Each branch
//! extracts structured info from its own notes, the directory branch one
//! record per note. A reflection gate judges the web extraction and loops
//! back to `research_person` with replacement queries until satisfied or the
//! reflection budget runs out.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Value};

use crate::engine::error::EngineError;
use crate::engine::graph::{
    bounded_retry, CompiledGraph, GraphBuilder, Node, NodeOutput, RunContext, END,
};
use crate::engine::limiter::RateLimiter;
use crate::engine::state::{FieldType, FlowState, ReducerType, StateSchema, StateUpdate};
use crate::flows::providers::{
    dedupe_sources, Analyst, ProfileDirectory, QueryWriter, WebSearcher,
};

/// Config keys the research flow reads, with their defaults
pub mod limits {
    pub const MAX_SEARCH_QUERIES: &str = "max_search_queries";
    pub const MAX_SEARCH_RESULTS: &str = "max_search_results";
    pub const MAX_REFLECTION_STEPS: &str = "max_reflection_steps";
    pub const MAX_PROFILE_RESULTS: &str = "max_profile_results";

    pub const DEFAULT_SEARCH_QUERIES: i64 = 3;
    pub const DEFAULT_SEARCH_RESULTS: i64 = 3;
    pub const DEFAULT_REFLECTION_STEPS: i64 = 1;
    pub const DEFAULT_PROFILE_RESULTS: i64 = 3;
}

/// Everything the research graph needs to talk to the outside world
#[derive(Clone)]
pub struct ResearchProviders {
    pub query_writer: Arc<dyn QueryWriter>,
    pub searcher: Arc<dyn WebSearcher>,
    pub directory: Arc<dyn ProfileDirectory>,
    pub analyst: Arc<dyn Analyst>,
    pub limiter: Arc<RateLimiter>,
}

/// State layout shared by every node in the research graph
pub fn research_schema() -> StateSchema {
    StateSchema::new()
        .field("person_name", FieldType::String, ReducerType::Overwrite)
        .field("company", FieldType::String, ReducerType::Overwrite)
        .field("search_queries", FieldType::Array, ReducerType::Overwrite)
        .field("completed_web_notes", FieldType::Array, ReducerType::Append)
        .field(
            "completed_profile_notes",
            FieldType::Array,
            ReducerType::Append,
        )
        .field("info", FieldType::Array, ReducerType::Append)
        .field_with_default(
            "is_satisfactory",
            FieldType::Boolean,
            ReducerType::Overwrite,
            json!(false),
        )
        .field_with_default(
            "reflection_steps_taken",
            FieldType::Number,
            ReducerType::Overwrite,
            json!(0),
        )
}

/// Assemble and compile the person-research graph
pub fn research_graph(providers: ResearchProviders) -> Result<CompiledGraph, EngineError> {
    let ResearchProviders {
        query_writer,
        searcher,
        directory,
        analyst,
        limiter,
    } = providers;

    GraphBuilder::new("person_research", research_schema())
        .add_node("generate_queries", Arc::new(GenerateQueries::new(query_writer)))
        .add_node(
            "research_person",
            Arc::new(ResearchPerson::new(searcher, Arc::clone(&analyst), limiter)),
        )
        .add_node(
            "extract_web_info",
            Arc::new(ExtractWebInfo::new(Arc::clone(&analyst))),
        )
        .add_node("reflect", Arc::new(Reflect::new(Arc::clone(&analyst))))
        .add_node(
            "research_profiles",
            Arc::new(ResearchProfiles::new(directory, Arc::clone(&analyst))),
        )
        .add_node(
            "extract_profile_info",
            Arc::new(ExtractProfileInfo::new(analyst)),
        )
        .set_entry("generate_queries")
        .set_entry("research_profiles")
        .add_edge("generate_queries", "research_person")
        .add_edge("research_person", "extract_web_info")
        .add_edge("extract_web_info", "reflect")
        .add_conditional(
            "reflect",
            vec!["research_person".to_string(), END.to_string()],
            bounded_retry(
                "is_satisfactory",
                "reflection_steps_taken",
                limits::MAX_REFLECTION_STEPS,
                limits::DEFAULT_REFLECTION_STEPS,
                "research_person",
            ),
        )
        .add_edge("research_profiles", "extract_profile_info")
        .add_edge("extract_profile_info", END)
        .input_keys(["person_name", "company"])
        .output_keys(["info", "completed_web_notes", "completed_profile_notes"])
        .compile()
}

/// Writes the initial search queries for the subject
pub struct GenerateQueries {
    query_writer: Arc<dyn QueryWriter>,
}

impl GenerateQueries {
    pub fn new(query_writer: Arc<dyn QueryWriter>) -> Self {
        Self { query_writer }
    }
}

#[async_trait]
impl Node for GenerateQueries {
    async fn run(&self, state: &FlowState, ctx: &RunContext) -> Result<NodeOutput, EngineError> {
        let person_name = required_str(state, "person_name")?;
        let company = state.get_str("company");
        let count = ctx
            .config
            .limit_or(limits::MAX_SEARCH_QUERIES, limits::DEFAULT_SEARCH_QUERIES);

        let queries = self
            .query_writer
            .write_queries(person_name, company, count)
            .await?;
        log::info!(
            "Generated {} search queries for {}",
            queries.len(),
            person_name
        );

        let mut update = StateUpdate::new();
        update.insert("search_queries".to_string(), json!(queries));
        Ok(NodeOutput::Update(update))
    }
}

/// Runs every pending query against the web and condenses the sources
///
/// All searches run concurrently through the shared limiter. Any single
/// failure fails the whole node; sources are deduplicated by URL before
/// the analyst sees them.
pub struct ResearchPerson {
    searcher: Arc<dyn WebSearcher>,
    analyst: Arc<dyn Analyst>,
    limiter: Arc<RateLimiter>,
}

impl ResearchPerson {
    pub fn new(
        searcher: Arc<dyn WebSearcher>,
        analyst: Arc<dyn Analyst>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            searcher,
            analyst,
            limiter,
        }
    }
}

#[async_trait]
impl Node for ResearchPerson {
    async fn run(&self, state: &FlowState, ctx: &RunContext) -> Result<NodeOutput, EngineError> {
        let person_name = required_str(state, "person_name")?;
        let queries = string_array(state, "search_queries");
        let max_results = ctx
            .config
            .limit_or(limits::MAX_SEARCH_RESULTS, limits::DEFAULT_SEARCH_RESULTS);

        let searches = queries.iter().map(|query| {
            let searcher = Arc::clone(&self.searcher);
            let limiter = Arc::clone(&self.limiter);
            async move {
                limiter.acquire().await;
                searcher.search(query, max_results).await
            }
        });

        let mut sources = Vec::new();
        for outcome in join_all(searches).await {
            sources.extend(outcome?);
        }
        let sources = dedupe_sources(sources);
        log::info!(
            "Collected {} unique sources for {} across {} queries",
            sources.len(),
            person_name,
            queries.len()
        );

        let note = self.analyst.summarize_sources(person_name, &sources).await?;
        let mut update = StateUpdate::new();
        update.insert("completed_web_notes".to_string(), json!([note]));
        Ok(NodeOutput::Update(update))
    }
}

/// Looks the subject up in the profile directory and takes one note per
/// record found
pub struct ResearchProfiles {
    directory: Arc<dyn ProfileDirectory>,
    analyst: Arc<dyn Analyst>,
}

impl ResearchProfiles {
    pub fn new(directory: Arc<dyn ProfileDirectory>, analyst: Arc<dyn Analyst>) -> Self {
        Self { directory, analyst }
    }
}

#[async_trait]
impl Node for ResearchProfiles {
    async fn run(&self, state: &FlowState, ctx: &RunContext) -> Result<NodeOutput, EngineError> {
        let person_name = required_str(state, "person_name")?;
        let company = state.get_str("company");
        let max_results = ctx
            .config
            .limit_or(limits::MAX_PROFILE_RESULTS, limits::DEFAULT_PROFILE_RESULTS);

        let profiles = self
            .directory
            .lookup(person_name, company, max_results)
            .await?;
        log::info!(
            "Directory lookup returned {} profiles for {}",
            profiles.len(),
            person_name
        );

        let summaries = profiles.iter().map(|profile| {
            let analyst = Arc::clone(&self.analyst);
            async move { analyst.summarize_profile(person_name, profile).await }
        });

        let mut notes = Vec::new();
        for outcome in join_all(summaries).await {
            notes.push(outcome?);
        }

        let mut update = StateUpdate::new();
        update.insert("completed_profile_notes".to_string(), json!(notes));
        Ok(NodeOutput::Update(update))
    }
}

/// Extracts structured info from the accumulated web notes
pub struct ExtractWebInfo {
    analyst: Arc<dyn Analyst>,
}

impl ExtractWebInfo {
    pub fn new(analyst: Arc<dyn Analyst>) -> Self {
        Self { analyst }
    }
}

#[async_trait]
impl Node for ExtractWebInfo {
    async fn run(&self, state: &FlowState, _ctx: &RunContext) -> Result<NodeOutput, EngineError> {
        let person_name = required_str(state, "person_name")?;
        let notes = string_array(state, "completed_web_notes");
        let extracted = self.analyst.extract(person_name, &notes).await?;

        let mut update = StateUpdate::new();
        update.insert("info".to_string(), json!([extracted]));
        Ok(NodeOutput::Update(update))
    }
}

/// Extracts one structured record per directory note
pub struct ExtractProfileInfo {
    analyst: Arc<dyn Analyst>,
}

impl ExtractProfileInfo {
    pub fn new(analyst: Arc<dyn Analyst>) -> Self {
        Self { analyst }
    }
}

#[async_trait]
impl Node for ExtractProfileInfo {
    async fn run(&self, state: &FlowState, _ctx: &RunContext) -> Result<NodeOutput, EngineError> {
        let person_name = required_str(state, "person_name")?;
        let notes = string_array(state, "completed_profile_notes");

        let extractions = notes.iter().map(|note| {
            let analyst = Arc::clone(&self.analyst);
            async move { analyst.extract(person_name, std::slice::from_ref(note)).await }
        });

        let mut extracted = Vec::new();
        for outcome in join_all(extractions).await {
            extracted.push(outcome?);
        }

        let mut update = StateUpdate::new();
        update.insert("info".to_string(), json!(extracted));
        Ok(NodeOutput::Update(update))
    }
}

/// Judges the extraction and queues follow-up queries when it falls short
///
/// The step counter only advances on an unsatisfied verdict, so the loop
/// budget counts retries rather than visits.
pub struct Reflect {
    analyst: Arc<dyn Analyst>,
}

impl Reflect {
    pub fn new(analyst: Arc<dyn Analyst>) -> Self {
        Self { analyst }
    }
}

#[async_trait]
impl Node for Reflect {
    async fn run(&self, state: &FlowState, ctx: &RunContext) -> Result<NodeOutput, EngineError> {
        let empty = Value::Array(Vec::new());
        let info = state.get("info").unwrap_or(&empty);
        let queries = string_array(state, "search_queries");

        let verdict = self.analyst.reflect(info, &queries).await?;
        let mut update = StateUpdate::new();
        update.insert("is_satisfactory".to_string(), json!(verdict.is_satisfactory));

        if verdict.is_satisfactory {
            log::info!("Research for run {} judged satisfactory", ctx.run_id);
        } else {
            let taken = state.get_i64("reflection_steps_taken").unwrap_or(0);
            update.insert("reflection_steps_taken".to_string(), json!(taken + 1));
            if !verdict.search_queries.is_empty() {
                update.insert("search_queries".to_string(), json!(verdict.search_queries));
            }
            log::info!(
                "Research incomplete (missing {:?}), queued {} follow-up queries",
                verdict.missing_fields,
                verdict.search_queries.len()
            );
        }

        Ok(NodeOutput::Update(update))
    }
}

fn required_str<'a>(state: &'a FlowState, key: &str) -> Result<&'a str, EngineError> {
    state
        .get_str(key)
        .ok_or_else(|| EngineError::config(format!("run input is missing required field '{key}'")))
}

fn string_array(state: &FlowState, key: &str) -> Vec<String> {
    state
        .get(key)
        .and_then(|value| value.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::RunConfig;
    use crate::engine::graph::RunId;
    use crate::flows::providers::{ProfileRecord, Reflection, SearchResult};
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;

    struct ScriptedWriter {
        queries: Vec<String>,
    }

    #[async_trait]
    impl QueryWriter for ScriptedWriter {
        async fn write_queries(
            &self,
            _person_name: &str,
            _company: Option<&str>,
            count: i64,
        ) -> Result<Vec<String>, EngineError> {
            Ok(self
                .queries
                .iter()
                .take(count as usize)
                .cloned()
                .collect())
        }
    }

    struct ScriptedSearcher {
        pages: HashMap<String, Vec<SearchResult>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl WebSearcher for ScriptedSearcher {
        async fn search(
            &self,
            query: &str,
            max_results: i64,
        ) -> Result<Vec<SearchResult>, EngineError> {
            if self.fail_on.as_deref() == Some(query) {
                return Err(EngineError::provider("tavily", "request timed out"));
            }
            let mut results = self.pages.get(query).cloned().unwrap_or_default();
            results.truncate(max_results as usize);
            Ok(results)
        }
    }

    struct ScriptedDirectory {
        records: Vec<ProfileRecord>,
    }

    #[async_trait]
    impl ProfileDirectory for ScriptedDirectory {
        async fn lookup(
            &self,
            _person_name: &str,
            _company: Option<&str>,
            max_results: i64,
        ) -> Result<Vec<ProfileRecord>, EngineError> {
            let mut records = self.records.clone();
            records.truncate(max_results as usize);
            Ok(records)
        }
    }

    struct ScriptedAnalyst {
        verdicts: Mutex<VecDeque<Reflection>>,
        summarized_counts: Mutex<Vec<usize>>,
    }

    impl ScriptedAnalyst {
        fn satisfied() -> Self {
            Self {
                verdicts: Mutex::new(VecDeque::new()),
                summarized_counts: Mutex::new(Vec::new()),
            }
        }

        fn with_verdicts(verdicts: Vec<Reflection>) -> Self {
            Self {
                verdicts: Mutex::new(verdicts.into()),
                summarized_counts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Analyst for ScriptedAnalyst {
        async fn summarize_sources(
            &self,
            person_name: &str,
            sources: &[SearchResult],
        ) -> Result<String, EngineError> {
            self.summarized_counts.lock().unwrap().push(sources.len());
            Ok(format!("web notes on {person_name} ({} sources)", sources.len()))
        }

        async fn summarize_profile(
            &self,
            person_name: &str,
            profile: &ProfileRecord,
        ) -> Result<String, EngineError> {
            Ok(format!("profile notes on {person_name}: {}", profile.headline))
        }

        async fn extract(
            &self,
            person_name: &str,
            notes: &[String],
        ) -> Result<Value, EngineError> {
            Ok(json!({ "name": person_name, "notes_used": notes.len() }))
        }

        async fn reflect(
            &self,
            _info: &Value,
            _queries: &[String],
        ) -> Result<Reflection, EngineError> {
            Ok(self
                .verdicts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Reflection {
                    is_satisfactory: true,
                    missing_fields: Vec::new(),
                    search_queries: Vec::new(),
                    reasoning: None,
                }))
        }
    }

    fn test_limiter() -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(100.0, 100.0, Duration::from_millis(1)))
    }

    fn ctx() -> RunContext {
        RunContext::new(RunId::new("run-test"), RunConfig::new())
    }

    fn source(url: &str) -> SearchResult {
        SearchResult {
            url: url.to_string(),
            title: "title".to_string(),
            content: "content".to_string(),
        }
    }

    fn record(name: &str, headline: &str) -> ProfileRecord {
        ProfileRecord {
            name: name.to_string(),
            headline: headline.to_string(),
            url: format!("https://directory.example/{name}"),
            summary: "summary".to_string(),
        }
    }

    fn state_with(pairs: &[(&str, Value)]) -> FlowState {
        let mut state = FlowState::from_schema(&research_schema());
        for (key, value) in pairs {
            state.update(key, value.clone());
        }
        state
    }

    #[tokio::test]
    async fn test_research_person_dedupes_before_summarizing() {
        let mut pages = HashMap::new();
        pages.insert(
            "q1".to_string(),
            vec![source("https://a.example"), source("https://b.example")],
        );
        pages.insert(
            "q2".to_string(),
            vec![source("https://b.example"), source("https://c.example")],
        );
        let analyst = Arc::new(ScriptedAnalyst::satisfied());
        let node = ResearchPerson::new(
            Arc::new(ScriptedSearcher {
                pages,
                fail_on: None,
            }),
            Arc::clone(&analyst) as Arc<dyn Analyst>,
            test_limiter(),
        );

        let state = state_with(&[
            ("person_name", json!("Ada Lovelace")),
            ("search_queries", json!(["q1", "q2"])),
        ]);
        let output = node.run(&state, &ctx()).await.unwrap();

        match output {
            NodeOutput::Update(update) => {
                let notes = update.get("completed_web_notes").unwrap();
                assert_eq!(notes.as_array().unwrap().len(), 1);
            }
            other => panic!("expected update, got {other:?}"),
        }
        assert_eq!(*analyst.summarized_counts.lock().unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn test_research_person_fails_when_any_search_fails() {
        let mut pages = HashMap::new();
        pages.insert("q1".to_string(), vec![source("https://a.example")]);
        let node = ResearchPerson::new(
            Arc::new(ScriptedSearcher {
                pages,
                fail_on: Some("q2".to_string()),
            }),
            Arc::new(ScriptedAnalyst::satisfied()),
            test_limiter(),
        );

        let state = state_with(&[
            ("person_name", json!("Ada Lovelace")),
            ("search_queries", json!(["q1", "q2"])),
        ]);
        let err = node.run(&state, &ctx()).await.unwrap_err();
        assert!(matches!(err, EngineError::Provider { .. }));
    }

    #[tokio::test]
    async fn test_research_profiles_notes_each_record() {
        let node = ResearchProfiles::new(
            Arc::new(ScriptedDirectory {
                records: vec![
                    record("Ada Lovelace", "Analyst at Babbage & Co"),
                    record("Ada Lovelace", "Lecturer in computing"),
                ],
            }),
            Arc::new(ScriptedAnalyst::satisfied()),
        );
        let state = state_with(&[("person_name", json!("Ada Lovelace"))]);

        let output = node.run(&state, &ctx()).await.unwrap();
        match output {
            NodeOutput::Update(update) => {
                assert_eq!(
                    update.get("completed_profile_notes").unwrap(),
                    &json!([
                        "profile notes on Ada Lovelace: Analyst at Babbage & Co",
                        "profile notes on Ada Lovelace: Lecturer in computing"
                    ])
                );
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_extract_profile_info_extracts_per_note() {
        let node = ExtractProfileInfo::new(Arc::new(ScriptedAnalyst::satisfied()));
        let state = state_with(&[
            ("person_name", json!("Ada Lovelace")),
            (
                "completed_profile_notes",
                json!(["first profile note", "second profile note"]),
            ),
        ]);

        let output = node.run(&state, &ctx()).await.unwrap();
        match output {
            NodeOutput::Update(update) => {
                let info = update.get("info").unwrap().as_array().unwrap().clone();
                assert_eq!(info.len(), 2);
                assert_eq!(info[0], json!({ "name": "Ada Lovelace", "notes_used": 1 }));
                assert_eq!(info[1], json!({ "name": "Ada Lovelace", "notes_used": 1 }));
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_generate_queries_passes_config_limit() {
        let node = GenerateQueries::new(Arc::new(ScriptedWriter {
            queries: vec!["a".into(), "b".into(), "c".into(), "d".into()],
        }));
        let state = state_with(&[("person_name", json!("Ada Lovelace"))]);
        let ctx = RunContext::new(
            RunId::new("run-test"),
            RunConfig::new().with(limits::MAX_SEARCH_QUERIES, 2),
        );

        let output = node.run(&state, &ctx).await.unwrap();
        match output {
            NodeOutput::Update(update) => {
                assert_eq!(update.get("search_queries").unwrap(), &json!(["a", "b"]));
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reflect_unsatisfied_advances_counter_and_swaps_queries() {
        let node = Reflect::new(Arc::new(ScriptedAnalyst::with_verdicts(vec![Reflection {
            is_satisfactory: false,
            missing_fields: vec!["role".to_string()],
            search_queries: vec!["follow-up".to_string()],
            reasoning: Some("role unknown".to_string()),
        }])));
        let state = state_with(&[
            ("person_name", json!("Ada Lovelace")),
            ("search_queries", json!(["stale"])),
            ("info", json!([{ "name": "Ada Lovelace" }])),
        ]);

        let output = node.run(&state, &ctx()).await.unwrap();
        match output {
            NodeOutput::Update(update) => {
                assert_eq!(update.get("is_satisfactory").unwrap(), &json!(false));
                assert_eq!(update.get("reflection_steps_taken").unwrap(), &json!(1));
                assert_eq!(update.get("search_queries").unwrap(), &json!(["follow-up"]));
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reflect_satisfied_leaves_counter_alone() {
        let node = Reflect::new(Arc::new(ScriptedAnalyst::satisfied()));
        let state = state_with(&[
            ("person_name", json!("Ada Lovelace")),
            ("info", json!([{ "name": "Ada Lovelace" }])),
        ]);

        let output = node.run(&state, &ctx()).await.unwrap();
        match output {
            NodeOutput::Update(update) => {
                assert_eq!(update.get("is_satisfactory").unwrap(), &json!(true));
                assert!(update.get("reflection_steps_taken").is_none());
                assert!(update.get("search_queries").is_none());
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_research_graph_compiles() {
        let analyst: Arc<dyn Analyst> = Arc::new(ScriptedAnalyst::satisfied());
        let graph = research_graph(ResearchProviders {
            query_writer: Arc::new(ScriptedWriter {
                queries: vec!["q".into()],
            }),
            searcher: Arc::new(ScriptedSearcher {
                pages: HashMap::new(),
                fail_on: None,
            }),
            directory: Arc::new(ScriptedDirectory {
                records: Vec::new(),
            }),
            analyst,
            limiter: test_limiter(),
        })
        .unwrap();
        assert_eq!(graph.name, "person_research");
        assert!(graph.has_node("reflect"));
    }
}
