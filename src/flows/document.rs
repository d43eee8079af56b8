//! Document-processing flow
//!
//! An inner review graph encodes a file, transcribes it against a
//! caller-supplied extraction schema, checks the transcription, and holds it
//! at a human gate. The outer pipeline embeds that graph as a single node,
//! then fans the approved sections out to per-section formatting before the
//! merged results reach the end.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::engine::error::EngineError;
use crate::engine::graph::{
    CompiledGraph, GraphBuilder, GraphRunner, InterruptRequest, Next, Node, NodeOutput,
    ResumeValue, RunContext, SubgraphNode, END,
};
use crate::engine::state::{FieldType, FlowState, ReducerType, StateSchema, StateUpdate};
use crate::flows::providers::{parse_json_block, DocumentAnalyzer, DocumentReader};

/// Sections every accepted transcription must carry
const REQUIRED_SECTIONS: [&str; 4] = ["document", "entities", "details", "cargo"];

/// Sections an extraction may populate; only `individuals` is optional
const EXTRACTION_SECTIONS: [&str; 5] = ["document", "entities", "individuals", "details", "cargo"];

/// Collaborators the document graphs call out to
#[derive(Clone)]
pub struct DocumentProviders {
    pub reader: Arc<dyn DocumentReader>,
    pub analyzer: Arc<dyn DocumentAnalyzer>,
}

/// State layout of the inner review graph
pub fn review_schema() -> StateSchema {
    StateSchema::new()
        .field("file_path", FieldType::String, ReducerType::Overwrite)
        .field("extraction_schema", FieldType::Object, ReducerType::Overwrite)
        .field("file_base64", FieldType::String, ReducerType::Overwrite)
        .field("document", FieldType::String, ReducerType::Overwrite)
        .field("entities", FieldType::Array, ReducerType::Overwrite)
        .field("individuals", FieldType::Array, ReducerType::Overwrite)
        .field("details", FieldType::Object, ReducerType::Overwrite)
        .field("cargo", FieldType::Array, ReducerType::Overwrite)
        .field("review_report", FieldType::String, ReducerType::Overwrite)
        .field("feedback_on_extraction", FieldType::Any, ReducerType::Overwrite)
}

/// State layout of the outer pipeline
pub fn document_schema() -> StateSchema {
    StateSchema::new()
        .field("file_path", FieldType::String, ReducerType::Overwrite)
        .field("extraction_schema", FieldType::Object, ReducerType::Overwrite)
        .field("document", FieldType::String, ReducerType::Overwrite)
        .field("entities", FieldType::Array, ReducerType::Overwrite)
        .field("individuals", FieldType::Array, ReducerType::Overwrite)
        .field("details", FieldType::Object, ReducerType::Overwrite)
        .field("cargo", FieldType::Array, ReducerType::Overwrite)
        .field("results", FieldType::Object, ReducerType::Merge)
}

/// Assemble and compile the inner review graph
pub fn document_review_graph(
    providers: &DocumentProviders,
) -> Result<CompiledGraph, EngineError> {
    GraphBuilder::new("document_review", review_schema())
        .add_node(
            "encode_file",
            Arc::new(EncodeFile::new(Arc::clone(&providers.reader))),
        )
        .add_node(
            "analyze_document",
            Arc::new(AnalyzeDocument::new(Arc::clone(&providers.analyzer))),
        )
        .add_node(
            "review_quality",
            Arc::new(ReviewQuality::new(Arc::clone(&providers.analyzer))),
        )
        .add_node("human_review", Arc::new(HumanReview))
        .set_entry("encode_file")
        .add_edge("encode_file", "analyze_document")
        .add_edge("analyze_document", "review_quality")
        .add_edge("review_quality", "human_review")
        .input_keys(["file_path", "extraction_schema"])
        .output_keys(["document", "entities", "individuals", "details", "cargo"])
        .compile()
}

/// Assemble and compile the outer document pipeline
///
/// The review graph is embedded as the `document_processing` node, so a
/// pipeline run suspends at the inner human gate and resumes through it.
pub fn document_graph(providers: &DocumentProviders) -> Result<CompiledGraph, EngineError> {
    let review = document_review_graph(providers)?;
    let review_runner = GraphRunner::new(Arc::new(review));

    GraphBuilder::new("document_pipeline", document_schema())
        .add_node(
            "document_processing",
            Arc::new(SubgraphNode::new(review_runner)),
        )
        .add_node("proxy", Arc::new(Proxy))
        .add_node("format_entities", Arc::new(FormatSection::new("entities")))
        .add_node(
            "format_individuals",
            Arc::new(FormatSection::new("individuals")),
        )
        .add_node("format_cargo", Arc::new(FormatSection::new("cargo")))
        .set_entry("document_processing")
        .add_edge("document_processing", "proxy")
        .add_edge("proxy", "format_entities")
        .add_edge("proxy", "format_individuals")
        .add_edge("proxy", "format_cargo")
        .add_edge("format_entities", END)
        .add_edge("format_individuals", END)
        .add_edge("format_cargo", END)
        .input_keys(["file_path", "extraction_schema"])
        .output_keys(["document", "results"])
        .compile()
}

/// Loads the document file into an encoded payload
pub struct EncodeFile {
    reader: Arc<dyn DocumentReader>,
}

impl EncodeFile {
    pub fn new(reader: Arc<dyn DocumentReader>) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl Node for EncodeFile {
    async fn run(&self, state: &FlowState, _ctx: &RunContext) -> Result<NodeOutput, EngineError> {
        let file_path = state.get_str("file_path").ok_or_else(|| {
            EngineError::config("run input is missing required field 'file_path'")
        })?;

        let encoded = self.reader.read(file_path).await?;
        log::info!("Encoded {} ({} bytes of payload)", file_path, encoded.len());

        let mut update = StateUpdate::new();
        update.insert("file_base64".to_string(), json!(encoded));
        Ok(NodeOutput::Update(update))
    }
}

/// Transcribes the encoded document into schema-shaped sections
///
/// Reviewer feedback from an earlier pass rides along on re-extraction.
/// The analyzer answers with JSON text, possibly fenced; anything that
/// fails to parse as an object is malformed.
pub struct AnalyzeDocument {
    analyzer: Arc<dyn DocumentAnalyzer>,
}

impl AnalyzeDocument {
    pub fn new(analyzer: Arc<dyn DocumentAnalyzer>) -> Self {
        Self { analyzer }
    }
}

#[async_trait]
impl Node for AnalyzeDocument {
    async fn run(&self, state: &FlowState, _ctx: &RunContext) -> Result<NodeOutput, EngineError> {
        let file_base64 = state.get_str("file_base64").ok_or_else(|| {
            EngineError::malformed_output("encode_file", "no encoded payload in state")
        })?;
        let fallback_schema = Value::Null;
        let extraction_schema = state.get("extraction_schema").unwrap_or(&fallback_schema);
        let feedback = match state.get("feedback_on_extraction") {
            Some(Value::String(text)) => Some(text.as_str()),
            _ => None,
        };
        if let Some(text) = feedback {
            log::info!("Re-extracting with reviewer feedback: {text}");
        }

        let raw = self
            .analyzer
            .analyze(file_base64, extraction_schema, feedback)
            .await?;
        let parsed = parse_json_block(&raw)
            .map_err(|reason| EngineError::malformed_output("analyze_document", reason))?;
        let sections = match parsed {
            Value::Object(map) => map,
            other => {
                return Err(EngineError::malformed_output(
                    "analyze_document",
                    format!("expected a JSON object, got {other}"),
                ))
            }
        };

        let mut update = StateUpdate::new();
        for (key, value) in sections {
            if EXTRACTION_SECTIONS.contains(&key.as_str()) {
                update.insert(key, value);
            }
        }
        Ok(NodeOutput::Update(update))
    }
}

/// Checks the transcription is complete and writes the review report
pub struct ReviewQuality {
    analyzer: Arc<dyn DocumentAnalyzer>,
}

impl ReviewQuality {
    pub fn new(analyzer: Arc<dyn DocumentAnalyzer>) -> Self {
        Self { analyzer }
    }
}

#[async_trait]
impl Node for ReviewQuality {
    async fn run(&self, state: &FlowState, _ctx: &RunContext) -> Result<NodeOutput, EngineError> {
        for section in REQUIRED_SECTIONS {
            if state.get(section).is_none() {
                return Err(EngineError::malformed_output(
                    "analyze_document",
                    format!("extraction is missing required section '{section}'"),
                ));
            }
        }
        let document = state.get_str("document").ok_or_else(|| {
            EngineError::malformed_output("analyze_document", "'document' is not text")
        })?;

        let report = self.analyzer.review(document).await?;
        let mut update = StateUpdate::new();
        update.insert("review_report".to_string(), json!(report));
        Ok(NodeOutput::Update(update))
    }
}

/// Holds the transcription for a human verdict
///
/// Approval ends the review graph. Any other accepted value is kept as
/// feedback and sends the run back to `analyze_document`.
pub struct HumanReview;

#[async_trait]
impl Node for HumanReview {
    async fn run(&self, state: &FlowState, _ctx: &RunContext) -> Result<NodeOutput, EngineError> {
        let review = state
            .get_str("review_report")
            .unwrap_or("No review report was produced.");
        Ok(NodeOutput::Interrupt(InterruptRequest::new(format!(
            "Is this document extraction acceptable? {review}"
        ))))
    }

    async fn resume(
        &self,
        _state: &FlowState,
        ctx: &RunContext,
        value: ResumeValue,
    ) -> Result<NodeOutput, EngineError> {
        let mut update = StateUpdate::new();
        match value {
            ResumeValue::Approve(true) => {
                log::info!("Extraction approved for run {}", ctx.run_id);
                update.insert("feedback_on_extraction".to_string(), json!(true));
                Ok(NodeOutput::Command {
                    update,
                    next: Next::End,
                })
            }
            ResumeValue::Approve(false) => {
                log::info!("Extraction rejected for run {}, re-analyzing", ctx.run_id);
                update.insert("feedback_on_extraction".to_string(), json!(false));
                Ok(NodeOutput::Command {
                    update,
                    next: Next::single("analyze_document"),
                })
            }
            ResumeValue::Feedback(text) => {
                log::info!("Extraction sent back for run {} with feedback", ctx.run_id);
                update.insert("feedback_on_extraction".to_string(), json!(text));
                Ok(NodeOutput::Command {
                    update,
                    next: Next::single("analyze_document"),
                })
            }
        }
    }
}

/// Normalizes the approved extraction before the formatting fan-out
pub struct Proxy;

#[async_trait]
impl Node for Proxy {
    async fn run(&self, state: &FlowState, _ctx: &RunContext) -> Result<NodeOutput, EngineError> {
        let mut update = StateUpdate::new();
        for section in ["entities", "individuals", "cargo"] {
            if state.get(section).is_none() {
                update.insert(section.to_string(), json!([]));
            }
        }
        Ok(NodeOutput::Update(update))
    }
}

/// Copies one section of the extraction into the merged results object
pub struct FormatSection {
    section: &'static str,
}

impl FormatSection {
    pub fn new(section: &'static str) -> Self {
        Self { section }
    }
}

#[async_trait]
impl Node for FormatSection {
    async fn run(&self, state: &FlowState, _ctx: &RunContext) -> Result<NodeOutput, EngineError> {
        let fallback = json!([]);
        let items = state.get(self.section).unwrap_or(&fallback);
        log::info!(
            "Formatted {} {} entries",
            items.as_array().map_or(0, Vec::len),
            self.section
        );

        let mut section = serde_json::Map::new();
        section.insert(self.section.to_string(), items.clone());

        let mut update = StateUpdate::new();
        update.insert("results".to_string(), Value::Object(section));
        Ok(NodeOutput::Update(update))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::RunConfig;
    use crate::engine::graph::RunId;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedReader;

    #[async_trait]
    impl DocumentReader for ScriptedReader {
        async fn read(&self, _file_path: &str) -> Result<String, EngineError> {
            Ok("ZG9jdW1lbnQ=".to_string())
        }
    }

    struct ScriptedAnalyzer {
        responses: Mutex<VecDeque<String>>,
        feedback_seen: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedAnalyzer {
        fn with_responses(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().map(str::to_string).collect()),
                feedback_seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DocumentAnalyzer for ScriptedAnalyzer {
        async fn analyze(
            &self,
            _file_base64: &str,
            _extraction_schema: &Value,
            feedback: Option<&str>,
        ) -> Result<String, EngineError> {
            self.feedback_seen
                .lock()
                .unwrap()
                .push(feedback.map(str::to_string));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| EngineError::provider("gemini", "no scripted response left"))
        }

        async fn review(&self, document: &str) -> Result<String, EngineError> {
            Ok(format!("Transcription covers: {document}"))
        }
    }

    fn ctx() -> RunContext {
        RunContext::new(RunId::new("run-test"), RunConfig::new())
    }

    fn review_state(pairs: &[(&str, Value)]) -> FlowState {
        let mut state = FlowState::from_schema(&review_schema());
        for (key, value) in pairs {
            state.update(key, value.clone());
        }
        state
    }

    const GOOD_EXTRACTION: &str = r#"```json
{"document": "cargo manifest", "entities": [{"name": "Acme"}], "individuals": [], "details": {"vessel_name": "MV Aurora"}, "cargo": [{"sku": "X1"}]}
```"#;

    #[tokio::test]
    async fn test_analyze_document_parses_fenced_sections() {
        let analyzer = Arc::new(ScriptedAnalyzer::with_responses(vec![GOOD_EXTRACTION]));
        let node = AnalyzeDocument::new(analyzer);
        let state = review_state(&[("file_base64", json!("ZG9jdW1lbnQ="))]);

        let output = node.run(&state, &ctx()).await.unwrap();
        match output {
            NodeOutput::Update(update) => {
                assert_eq!(update.get("document").unwrap(), &json!("cargo manifest"));
                assert_eq!(
                    update.get("entities").unwrap(),
                    &json!([{ "name": "Acme" }])
                );
                assert_eq!(
                    update.get("details").unwrap(),
                    &json!({ "vessel_name": "MV Aurora" })
                );
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_analyze_document_rejects_unparseable_output() {
        let analyzer = Arc::new(ScriptedAnalyzer::with_responses(vec!["not json at all"]));
        let node = AnalyzeDocument::new(analyzer);
        let state = review_state(&[("file_base64", json!("ZG9jdW1lbnQ="))]);

        let err = node.run(&state, &ctx()).await.unwrap_err();
        assert!(matches!(err, EngineError::MalformedOutput { .. }));
    }

    #[tokio::test]
    async fn test_analyze_document_forwards_reviewer_feedback() {
        let analyzer = Arc::new(ScriptedAnalyzer::with_responses(vec![
            GOOD_EXTRACTION,
            GOOD_EXTRACTION,
        ]));
        let node = AnalyzeDocument::new(Arc::clone(&analyzer) as Arc<dyn DocumentAnalyzer>);

        let first = review_state(&[("file_base64", json!("ZG9jdW1lbnQ="))]);
        node.run(&first, &ctx()).await.unwrap();

        let second = review_state(&[
            ("file_base64", json!("ZG9jdW1lbnQ=")),
            ("feedback_on_extraction", json!("container count is wrong")),
        ]);
        node.run(&second, &ctx()).await.unwrap();

        assert_eq!(
            *analyzer.feedback_seen.lock().unwrap(),
            vec![None, Some("container count is wrong".to_string())]
        );
    }

    #[tokio::test]
    async fn test_review_quality_requires_every_section() {
        let analyzer = Arc::new(ScriptedAnalyzer::with_responses(vec![]));
        let node = ReviewQuality::new(analyzer);
        let state = review_state(&[
            ("document", json!("cargo manifest")),
            ("entities", json!([])),
            ("details", json!({ "vessel_name": "MV Aurora" })),
        ]);

        let err = node.run(&state, &ctx()).await.unwrap_err();
        match err {
            EngineError::MalformedOutput { node, message } => {
                assert_eq!(node, "analyze_document");
                assert!(message.contains("cargo"));
            }
            other => panic!("expected malformed output, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_review_quality_accepts_missing_individuals() {
        let analyzer = Arc::new(ScriptedAnalyzer::with_responses(vec![]));
        let node = ReviewQuality::new(analyzer);
        let state = review_state(&[
            ("document", json!("cargo manifest")),
            ("entities", json!([{ "name": "Acme" }])),
            ("details", json!({ "vessel_name": "MV Aurora" })),
            ("cargo", json!([{ "sku": "X1" }])),
        ]);

        let output = node.run(&state, &ctx()).await.unwrap();
        match output {
            NodeOutput::Update(update) => {
                assert!(update
                    .get("review_report")
                    .and_then(Value::as_str)
                    .unwrap()
                    .contains("cargo manifest"));
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_human_review_surfaces_review_report() {
        let state = review_state(&[("review_report", json!("looks plausible"))]);
        let output = HumanReview.run(&state, &ctx()).await.unwrap();
        match output {
            NodeOutput::Interrupt(request) => {
                assert!(request.payload.contains("looks plausible"));
                assert!(request.payload.contains("acceptable?"));
            }
            other => panic!("expected interrupt, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_human_review_approval_ends_graph() {
        let state = review_state(&[]);
        let output = HumanReview
            .resume(&state, &ctx(), ResumeValue::Approve(true))
            .await
            .unwrap();
        match output {
            NodeOutput::Command { update, next } => {
                assert_eq!(next, Next::End);
                assert_eq!(update.get("feedback_on_extraction").unwrap(), &json!(true));
            }
            other => panic!("expected command, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_human_review_feedback_loops_to_analysis() {
        let state = review_state(&[]);
        let output = HumanReview
            .resume(
                &state,
                &ctx(),
                ResumeValue::Feedback("recheck the port codes".to_string()),
            )
            .await
            .unwrap();
        match output {
            NodeOutput::Command { update, next } => {
                assert_eq!(next, Next::single("analyze_document"));
                assert_eq!(
                    update.get("feedback_on_extraction").unwrap(),
                    &json!("recheck the port codes")
                );
            }
            other => panic!("expected command, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_format_section_nests_items_under_results() {
        let mut state = FlowState::from_schema(&document_schema());
        state.update("cargo", json!([{ "sku": "X1" }]));

        let output = FormatSection::new("cargo").run(&state, &ctx()).await.unwrap();
        match output {
            NodeOutput::Update(update) => {
                assert_eq!(
                    update.get("results").unwrap(),
                    &json!({ "cargo": [{ "sku": "X1" }] })
                );
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_document_graphs_compile() {
        let providers = DocumentProviders {
            reader: Arc::new(ScriptedReader),
            analyzer: Arc::new(ScriptedAnalyzer::with_responses(vec![])),
        };
        let review = document_review_graph(&providers).unwrap();
        assert!(review.has_node("human_review"));

        let pipeline = document_graph(&providers).unwrap();
        assert_eq!(pipeline.name, "document_pipeline");
        assert!(pipeline.has_node("document_processing"));
    }
}
