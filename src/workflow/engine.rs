//! State machine driving one invocation from classification to the final answer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::Instrument;
use uuid::Uuid;

use super::classifier::Classifier;
use super::policy::RoutingPolicy;
use super::router::{Route, route};
use super::state::{AnalysisResult, Intent, Request, TextResult, WorkflowResult, WorkflowState};
use super::synthesizer::Synthesizer;
use crate::agents::{
    AgentError, AgentOutput, AudioAgent, AudioAgentHandle, AudioRequest, CapabilityAgent,
    CapabilityKind, ImageAgent, ImageAgentHandle, ImageRequest, TextAgent, TextAgentHandle,
    TextRequest,
};
use crate::config::Config;
use crate::embedding::{EmbeddingClientError, get_embedding_client};
use crate::llm::{LanguageModel, LanguageModelError, OpenAiChatClient};
use crate::metrics::{MetricsSnapshot, WorkflowMetrics};
use crate::qdrant::{QdrantError, QdrantService};
use crate::retrieval::QdrantRetriever;
use crate::transcription::{OpenAiTranscriber, TranscriptionError};

/// Collaborators the workflow depends on, built once at startup.
pub struct WorkflowServices {
    /// Chat model used for classification and fusion.
    pub llm: Arc<dyn LanguageModel>,
    /// Model name used for classification.
    pub classifier_model: String,
    /// Model name used for fusion.
    pub synthesis_model: String,
    /// Text path agent.
    pub text_agent: TextAgentHandle,
    /// Image path agent.
    pub image_agent: ImageAgentHandle,
    /// Audio path agent.
    pub audio_agent: AudioAgentHandle,
}

/// Failure while wiring the workflow from configuration.
#[derive(Debug, Error)]
pub enum InitError {
    /// Chat client could not be built.
    #[error("Failed to initialize language model client: {0}")]
    Model(#[from] LanguageModelError),
    /// Transcription client could not be built.
    #[error("Failed to initialize transcription client: {0}")]
    Transcription(#[from] TranscriptionError),
    /// Embedding client could not be built.
    #[error("Failed to initialize embedding client: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Qdrant client could not be built.
    #[error("Failed to initialize Qdrant client: {0}")]
    Qdrant(#[from] QdrantError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    Classify,
    Dispatch(Route),
    Synthesize,
    End,
}

/// Runs requests through classification, routing, agents, and synthesis.
pub struct Orchestrator {
    classifier: Classifier,
    synthesizer: Synthesizer,
    text_agent: TextAgentHandle,
    image_agent: ImageAgentHandle,
    audio_agent: AudioAgentHandle,
    policy: RoutingPolicy,
    metrics: WorkflowMetrics,
}

impl Orchestrator {
    /// Assemble a workflow from explicit collaborators.
    pub fn new(services: WorkflowServices, policy: RoutingPolicy) -> Self {
        let WorkflowServices {
            llm,
            classifier_model,
            synthesis_model,
            text_agent,
            image_agent,
            audio_agent,
        } = services;
        Self {
            classifier: Classifier::new(
                llm.clone(),
                classifier_model,
                policy.multi_modal_query_threshold,
                policy.step_timeout,
            ),
            synthesizer: Synthesizer::new(llm, synthesis_model, policy.step_timeout),
            text_agent,
            image_agent,
            audio_agent,
            policy,
            metrics: WorkflowMetrics::new(),
        }
    }

    /// Build every client and agent from `config`.
    pub fn from_config(config: &Config) -> Result<Self, InitError> {
        let http_timeout = Duration::from_secs(config.llm_request_timeout_secs);
        let llm: Arc<dyn LanguageModel> = Arc::new(OpenAiChatClient::new(
            config.llm_base_url.clone(),
            config.llm_api_key.clone(),
            http_timeout,
        )?);
        let transcriber = Arc::new(OpenAiTranscriber::new(
            config.llm_base_url.clone(),
            config.llm_api_key.clone(),
            config.transcription_model.clone(),
            http_timeout,
        )?);
        let retriever = Arc::new(QdrantRetriever::new(
            get_embedding_client(config)?,
            QdrantService::new(
                &config.qdrant_url,
                config.qdrant_api_key.clone(),
                http_timeout,
            )?,
            config.qdrant_collection_name.clone(),
            config.embedding_dimension,
            config.retrieval_score_threshold,
        ));

        let services = WorkflowServices {
            llm: llm.clone(),
            classifier_model: config.classifier_model.clone(),
            synthesis_model: config.synthesis_model.clone(),
            text_agent: Arc::new(TextAgent::new(
                llm.clone(),
                retriever,
                config.agent_model.clone(),
            )),
            image_agent: Arc::new(ImageAgent::new(llm.clone(), config.vision_model.clone())),
            audio_agent: Arc::new(AudioAgent::new(
                transcriber,
                llm,
                config.agent_model.clone(),
            )),
        };
        tracing::info!(
            classifier_model = %config.classifier_model,
            synthesis_model = %config.synthesis_model,
            collection = %config.qdrant_collection_name,
            concurrent_fanout = config.concurrent_fanout,
            "Workflow initialized"
        );
        Ok(Self::new(services, RoutingPolicy::from_config(config)))
    }

    /// Active routing policy.
    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    /// Current workflow counters.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Run one request to completion. Failures are reported inside the result.
    pub async fn process(&self, request: Request) -> WorkflowResult {
        let request_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("workflow", request_id = %request_id);
        self.run(request, request_id).instrument(span).await
    }

    async fn run(&self, request: Request, request_id: String) -> WorkflowResult {
        let started = Instant::now();
        let mut state = WorkflowState::new(request);
        tracing::info!(
            query_chars = state.query().chars().count(),
            flags = ?state.flags(),
            "Starting workflow"
        );

        let mut node = Node::Classify;
        loop {
            node = match node {
                Node::Classify => {
                    self.classify(&mut state).await;
                    let target = route(state.query_type(), state.error().is_some());
                    self.metrics.record_route(target);
                    tracing::info!(route = ?target, "Routing request");
                    match target {
                        Route::Error => Node::End,
                        other => Node::Dispatch(other),
                    }
                }
                Node::Dispatch(target) => match target {
                    Route::Text => {
                        self.run_text(&mut state).await;
                        Node::Synthesize
                    }
                    Route::Image => {
                        self.run_image(&mut state).await;
                        Node::Synthesize
                    }
                    Route::Audio => {
                        self.run_audio(&mut state).await;
                        Node::Synthesize
                    }
                    Route::MultiModal => {
                        self.run_multi_modal(&mut state).await;
                        Node::Synthesize
                    }
                    Route::Error => Node::End,
                },
                Node::Synthesize => {
                    self.synthesize(&mut state).await;
                    Node::End
                }
                Node::End => break,
            };
        }

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let completed_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        let result = state.into_result(request_id, elapsed_ms, completed_at);
        self.metrics.record_completion(result.success);
        tracing::info!(
            success = result.success,
            steps = result.metadata.processing_steps.len(),
            elapsed_ms,
            "Workflow completed"
        );
        result
    }

    async fn classify(&self, state: &mut WorkflowState) {
        let query = state.query().to_string();
        match self.classifier.classify(&query, state.flags()).await {
            Ok(classification) => {
                if let Err(error) = state.set_classification(&classification) {
                    tracing::error!(error = %error, "Classification recorded twice");
                }
                state.record_step(classification.trace_entry());
            }
            Err(error) => {
                tracing::error!(error = %error, "Classification failed");
                state.record_step(format!("Classification failed: {error}"));
                state.fail_classification(error.to_string());
            }
        }
    }

    async fn run_text(&self, state: &mut WorkflowState) {
        let input = self.text_input(state);
        let outcome = self.invoke(&self.text_agent, input).await;
        self.apply(state, CapabilityKind::Text, outcome);
    }

    async fn run_image(&self, state: &mut WorkflowState) {
        let input = self.image_input(state);
        let outcome = self.invoke(&self.image_agent, input).await;
        self.apply(state, CapabilityKind::Image, outcome);
    }

    async fn run_audio(&self, state: &mut WorkflowState) {
        let input = self.audio_input(state);
        let outcome = self.invoke(&self.audio_agent, input).await;
        self.apply(state, CapabilityKind::Audio, outcome);
    }

    /// Image (when attached), audio (when attached), then text. Results are applied in that
    /// order even when the calls run concurrently.
    async fn run_multi_modal(&self, state: &mut WorkflowState) {
        let flags = state.flags();
        let image_input = flags.has_image.then(|| self.image_input(state));
        let audio_input = flags.has_audio.then(|| self.audio_input(state));
        let text_input = self.text_input(state);
        tracing::info!(
            image = flags.has_image,
            audio = flags.has_audio,
            concurrent = self.policy.concurrent_fanout,
            "Processing multi-modal request"
        );

        if self.policy.concurrent_fanout {
            let image = async {
                match image_input {
                    Some(input) => Some(self.invoke(&self.image_agent, input).await),
                    None => None,
                }
            };
            let audio = async {
                match audio_input {
                    Some(input) => Some(self.invoke(&self.audio_agent, input).await),
                    None => None,
                }
            };
            let text = self.invoke(&self.text_agent, text_input);
            let (image, audio, text) = tokio::join!(image, audio, text);

            if let Some(outcome) = image {
                self.apply(state, CapabilityKind::Image, outcome);
            }
            if let Some(outcome) = audio {
                self.apply(state, CapabilityKind::Audio, outcome);
            }
            self.apply(state, CapabilityKind::Text, text);
        } else {
            if let Some(input) = image_input {
                let outcome = self.invoke(&self.image_agent, input).await;
                self.apply(state, CapabilityKind::Image, outcome);
            }
            if let Some(input) = audio_input {
                let outcome = self.invoke(&self.audio_agent, input).await;
                self.apply(state, CapabilityKind::Audio, outcome);
            }
            let outcome = self.invoke(&self.text_agent, text_input).await;
            self.apply(state, CapabilityKind::Text, outcome);
        }

        state.record_step("Multi-modal processing completed");
        state.stamp_agent("multi_modal");
    }

    async fn synthesize(&self, state: &mut WorkflowState) {
        let synthesis = self.synthesizer.synthesize(state).await;
        if synthesis.fused {
            self.metrics.record_fusion();
        }
        if let Some(error) = synthesis.error {
            state.set_error(error);
        }
        if let Err(error) = state.finalize(synthesis.answer) {
            tracing::error!(error = %error, "Final response written twice");
        }
        state.record_step("Response synthesized");
    }

    fn intent(state: &WorkflowState) -> Intent {
        state.intent().unwrap_or(Intent::Question)
    }

    fn text_input(&self, state: &WorkflowState) -> TextRequest {
        let request = state.request();
        TextRequest {
            query: request.query.clone(),
            use_rag: request.use_rag.unwrap_or(self.policy.use_rag_by_default),
            top_k: self.policy.retrieval_top_k,
            document: request.document.clone(),
        }
    }

    fn image_input(&self, state: &WorkflowState) -> ImageRequest {
        let analysis = self.policy.image_analysis.get(Self::intent(state));
        let request = state.request();
        ImageRequest {
            image: request.image.clone(),
            analysis,
            query: analysis.uses_query().then(|| request.query.clone()),
        }
    }

    fn audio_input(&self, state: &WorkflowState) -> AudioRequest {
        let analysis = self.policy.audio_analysis.get(Self::intent(state));
        let request = state.request();
        AudioRequest {
            audio: request.audio.clone(),
            analysis,
            query: analysis.uses_query().then(|| request.query.clone()),
            language: request.language.clone(),
            translate_to: request.translate_to.clone(),
        }
    }

    async fn invoke<I>(
        &self,
        agent: &Arc<dyn CapabilityAgent<Input = I>>,
        input: I,
    ) -> Result<AgentOutput, AgentError>
    where
        I: Send + 'static,
    {
        let budget = self.policy.step_timeout;
        tracing::debug!(agent = %agent.kind(), "Calling agent");
        tokio::time::timeout(budget, agent.process(input))
            .await
            .unwrap_or(Err(AgentError::Timeout(budget)))
    }

    fn apply(
        &self,
        state: &mut WorkflowState,
        kind: CapabilityKind,
        outcome: Result<AgentOutput, AgentError>,
    ) {
        state.enter_agent(kind.as_str());
        let stored = outcome.map_err(|error| error.to_string()).and_then(|output| {
            let stored = match kind {
                CapabilityKind::Text => {
                    let documents_used = output
                        .metadata
                        .get("documents_retrieved")
                        .cloned()
                        .unwrap_or_else(|| Value::from(output.sources.len()));
                    state.insert_metadata("documents_used", documents_used);
                    state.set_text_result(TextResult {
                        response: output.response,
                        sources: output.sources,
                    })
                }
                CapabilityKind::Image => state.set_image_result(analysis_result(kind, output)),
                CapabilityKind::Audio => state.set_audio_result(analysis_result(kind, output)),
            };
            stored.map_err(|error| error.to_string())
        });

        match stored {
            Ok(()) => {
                tracing::info!(agent = %kind, "Agent processed");
                state.record_step(format!("{} agent processed", kind.label()));
            }
            Err(message) => {
                tracing::warn!(agent = %kind, error = %message, "Agent failed");
                state.record_step(format!("{} agent failed: {message}", kind.label()));
                state.set_error(message);
            }
        }
    }
}

fn analysis_result(kind: CapabilityKind, output: AgentOutput) -> AnalysisResult {
    AnalysisResult {
        response: output.response,
        analysis_type: output
            .analysis_type
            .unwrap_or_else(|| kind.as_str().to_string()),
        metadata: output.metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::Source;
    use crate::agents::{AudioAnalysis, ImageAnalysis};
    use crate::llm::testing::ScriptedModel;
    use crate::workflow::policy::IntentMap;
    use crate::workflow::state::QueryType;
    use crate::workflow::synthesizer::NO_RESULT_MESSAGE;
    use async_trait::async_trait;
    use serde_json::Map;
    use std::sync::Mutex;

    type CallLog = Arc<Mutex<Vec<&'static str>>>;

    struct StubAgent<I> {
        kind: CapabilityKind,
        reply: Result<String, String>,
        sources: Vec<Source>,
        delay: Duration,
        log: CallLog,
        inputs: Mutex<Vec<I>>,
    }

    impl<I> StubAgent<I> {
        fn new(kind: CapabilityKind, log: &CallLog, reply: Result<&str, &str>) -> Self {
            Self {
                kind,
                reply: reply.map(str::to_string).map_err(str::to_string),
                sources: Vec::new(),
                delay: Duration::ZERO,
                log: log.clone(),
                inputs: Mutex::new(Vec::new()),
            }
        }

        fn with_sources(mut self, sources: Vec<Source>) -> Self {
            self.sources = sources;
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    impl<I: Clone> StubAgent<I> {
        fn inputs(&self) -> Vec<I> {
            self.inputs.lock().expect("inputs lock").clone()
        }
    }

    #[async_trait]
    impl<I> CapabilityAgent for StubAgent<I>
    where
        I: Send + 'static,
    {
        type Input = I;

        fn kind(&self) -> CapabilityKind {
            self.kind
        }

        async fn process(&self, input: I) -> Result<AgentOutput, AgentError> {
            self.inputs.lock().expect("inputs lock").push(input);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.log.lock().expect("log lock").push(self.kind.as_str());
            match &self.reply {
                Ok(response) => Ok(AgentOutput {
                    response: response.clone(),
                    analysis_type: match self.kind {
                        CapabilityKind::Text => None,
                        _ => Some("stub".into()),
                    },
                    sources: self.sources.clone(),
                    metadata: Map::new(),
                }),
                Err(message) => Err(AgentError::InvalidInput(message.clone())),
            }
        }
    }

    struct Harness {
        llm: Arc<ScriptedModel>,
        log: CallLog,
        text: Arc<StubAgent<TextRequest>>,
        image: Arc<StubAgent<ImageRequest>>,
        audio: Arc<StubAgent<AudioRequest>>,
    }

    impl Harness {
        fn new(classification: &str) -> Self {
            let log = CallLog::default();
            Self {
                llm: Arc::new(ScriptedModel::replying(&[classification])),
                text: Arc::new(StubAgent::new(
                    CapabilityKind::Text,
                    &log,
                    Ok("Text agent answer."),
                )),
                image: Arc::new(StubAgent::new(
                    CapabilityKind::Image,
                    &log,
                    Ok("Image agent answer."),
                )),
                audio: Arc::new(StubAgent::new(
                    CapabilityKind::Audio,
                    &log,
                    Ok("Audio agent answer."),
                )),
                log,
            }
        }

        fn orchestrator(&self, policy: RoutingPolicy) -> Orchestrator {
            Orchestrator::new(
                WorkflowServices {
                    llm: self.llm.clone(),
                    classifier_model: "classifier".into(),
                    synthesis_model: "synthesizer".into(),
                    text_agent: self.text.clone(),
                    image_agent: self.image.clone(),
                    audio_agent: self.audio.clone(),
                },
                policy,
            )
        }

        fn calls(&self) -> Vec<&'static str> {
            self.log.lock().expect("log lock").clone()
        }
    }

    #[tokio::test]
    async fn text_only_query_passes_text_answer_through() {
        let harness = Harness::new("Type: text\nIntent: question\nReasoning: plain question");
        let orchestrator = harness.orchestrator(RoutingPolicy::default());

        let result = orchestrator.process(Request::new("What is the system?")).await;

        assert!(result.success, "unexpected error: {:?}", result.error);
        assert_eq!(result.response.as_deref(), Some("Text agent answer."));
        assert_eq!(result.metadata.query_type, Some(QueryType::Text));
        assert_eq!(result.metadata.intent, Some(Intent::Question));
        assert_eq!(harness.calls(), vec!["text"]);
        assert_eq!(harness.llm.call_count(), 1);
        assert_eq!(
            result.metadata.processing_steps,
            vec![
                "Classified as text with intent question",
                "Text agent processed",
                "Response synthesized",
            ]
        );
        assert_eq!(result.metadata.current_agent.as_deref(), Some("text"));
        assert_eq!(result.metadata.extra["documents_used"], 0);

        let inputs = harness.text.inputs();
        assert_eq!(
            inputs,
            vec![TextRequest {
                query: "What is the system?".into(),
                use_rag: true,
                top_k: 5,
                document: None,
            }]
        );
    }

    #[tokio::test]
    async fn attached_image_overrides_model_answer() {
        let harness = Harness::new("Type: text\nIntent: process");
        let orchestrator = harness.orchestrator(RoutingPolicy::default());

        let result = orchestrator
            .process(Request::new("What is this?").with_image("/tmp/receipt.png"))
            .await;

        assert_eq!(result.metadata.query_type, Some(QueryType::Image));
        assert_eq!(result.response.as_deref(), Some("Image agent answer."));
        assert_eq!(harness.calls(), vec!["image"]);
        assert_eq!(harness.llm.call_count(), 1);
        assert_eq!(
            harness.image.inputs(),
            vec![ImageRequest {
                image: Some("/tmp/receipt.png".into()),
                analysis: ImageAnalysis::Ocr,
                query: None,
            }]
        );
    }

    #[tokio::test]
    async fn multi_modal_runs_image_then_text_and_fuses_once() {
        let harness = Harness::new("Type: multi_modal\nIntent: analyze");
        harness.llm.push_reply("Fused answer.");
        let text = Arc::new(
            StubAgent::new(CapabilityKind::Text, &harness.log, Ok("Contract says net 30."))
                .with_sources(vec![Source::preview("chunk-1", 0.91, "Payment terms: net 30")]),
        );
        let harness = Harness { text, ..harness };
        let orchestrator = harness.orchestrator(RoutingPolicy::default());

        let query = "Compare this invoice against the contract terms";
        let result = orchestrator
            .process(
                Request::new(query)
                    .with_image("/tmp/invoice.png")
                    .with_document("contract.pdf"),
            )
            .await;

        assert!(result.success, "unexpected error: {:?}", result.error);
        assert_eq!(result.metadata.query_type, Some(QueryType::MultiModal));
        assert_eq!(harness.calls(), vec!["image", "text"]);
        assert_eq!(harness.llm.call_count(), 2);
        assert_eq!(result.response.as_deref(), Some("Fused answer."));
        assert_eq!(result.sources.len(), 1);
        assert_eq!(result.sources[0].id, "chunk-1");
        assert_eq!(result.metadata.agents_used, vec!["image", "text"]);
        assert_eq!(result.metadata.current_agent.as_deref(), Some("multi_modal"));
        assert_eq!(
            result.metadata.processing_steps,
            vec![
                "Classified as multi_modal with intent analyze",
                "Image agent processed",
                "Text agent processed",
                "Multi-modal processing completed",
                "Response synthesized",
            ]
        );

        let image_inputs = harness.image.inputs();
        assert_eq!(image_inputs[0].analysis, ImageAnalysis::Analyze);
        assert_eq!(image_inputs[0].query, None);
        assert_eq!(harness.text.inputs()[0].query, query);
        assert_eq!(
            harness.text.inputs()[0].document.as_deref(),
            Some("contract.pdf")
        );

        let fusion = harness.llm.requests()[1].messages[0].text();
        assert!(fusion.contains("**Document Analysis:**\nContract says net 30."));
        assert!(fusion.contains("**Image Analysis (stub):**\nImage agent answer."));
        assert_eq!(orchestrator.metrics_snapshot().fusions, 1);
    }

    #[tokio::test]
    async fn question_intent_forwards_query_to_image_agent() {
        let harness = Harness::new("Type: image\nIntent: question");
        let orchestrator = harness.orchestrator(RoutingPolicy::default());

        orchestrator
            .process(Request::new("Who signed this?").with_image("/tmp/contract.png"))
            .await;

        let inputs = harness.image.inputs();
        assert_eq!(inputs[0].analysis, ImageAnalysis::Question);
        assert_eq!(inputs[0].query.as_deref(), Some("Who signed this?"));
    }

    #[tokio::test]
    async fn empty_classifier_reply_runs_text_path() {
        let harness = Harness::new("unused");
        let llm = Arc::new(ScriptedModel::new());
        llm.push_empty();
        let harness = Harness { llm, ..harness };
        let orchestrator = harness.orchestrator(RoutingPolicy::default());

        let result = orchestrator.process(Request::new("What is the system?")).await;

        assert!(result.success, "unexpected error: {:?}", result.error);
        assert_eq!(result.metadata.query_type, Some(QueryType::Text));
        assert_eq!(result.metadata.intent, Some(Intent::Question));
        assert_eq!(result.response.as_deref(), Some("Text agent answer."));
        assert_eq!(harness.calls(), vec!["text"]);
    }

    #[tokio::test]
    async fn unparseable_classification_defaults_to_text_question() {
        let harness = Harness::new("The user seems curious about cats.");
        let orchestrator = harness.orchestrator(RoutingPolicy::default());

        let result = orchestrator.process(Request::new("Tell me about cats")).await;

        assert_eq!(result.metadata.query_type, Some(QueryType::Text));
        assert_eq!(result.metadata.intent, Some(Intent::Question));
        assert_eq!(harness.calls(), vec!["text"]);
    }

    #[tokio::test]
    async fn classification_failure_is_terminal() {
        let harness = Harness::new("unused");
        let llm = Arc::new(ScriptedModel::new());
        llm.push_failure("provider returned 503");
        let harness = Harness { llm, ..harness };
        let orchestrator = harness.orchestrator(RoutingPolicy::default());

        let result = orchestrator
            .process(Request::new("hello").with_image("/tmp/a.png"))
            .await;

        assert!(!result.success);
        assert_eq!(result.response, None);
        assert_eq!(result.metadata.query_type, Some(QueryType::Error));
        assert!(harness.calls().is_empty());
        assert_eq!(result.metadata.processing_steps.len(), 1);
        assert!(result.metadata.processing_steps[0].starts_with("Classification failed:"));
        assert!(
            result
                .error
                .as_deref()
                .is_some_and(|error| error.contains("503"))
        );
        let metrics = orchestrator.metrics_snapshot();
        assert_eq!(metrics.routes.error, 1);
        assert_eq!(metrics.failures, 1);
    }

    #[tokio::test]
    async fn every_agent_failing_yields_no_result_message() {
        let harness = Harness::new("Type: multi_modal\nIntent: search");
        let text = Arc::new(StubAgent::new(
            CapabilityKind::Text,
            &harness.log,
            Err("retrieval exploded"),
        ));
        let image = Arc::new(StubAgent::new(
            CapabilityKind::Image,
            &harness.log,
            Err("unreadable image"),
        ));
        let harness = Harness {
            text,
            image,
            ..harness
        };
        let orchestrator = harness.orchestrator(RoutingPolicy::default());

        let result = orchestrator
            .process(
                Request::new("Summarize")
                    .with_image("/tmp/a.png")
                    .with_document("doc.pdf"),
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.response.as_deref(), Some(NO_RESULT_MESSAGE));
        assert_eq!(harness.calls(), vec!["image", "text"]);
        assert_eq!(harness.llm.call_count(), 1);
        assert_eq!(result.error.as_deref(), Some("retrieval exploded"));
        assert!(
            result
                .metadata
                .processing_steps
                .contains(&"Image agent failed: unreadable image".to_string())
        );
    }

    #[tokio::test]
    async fn failed_sibling_leaves_surviving_answer_verbatim() {
        let harness = Harness::new("Type: multi_modal\nIntent: question");
        let image = Arc::new(StubAgent::new(
            CapabilityKind::Image,
            &harness.log,
            Err("vision model offline"),
        ));
        let harness = Harness { image, ..harness };
        let orchestrator = harness.orchestrator(RoutingPolicy::default());

        let result = orchestrator
            .process(
                Request::new("What does the chart show?")
                    .with_image("/tmp/chart.png")
                    .with_document("report.pdf"),
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("vision model offline"));
        assert_eq!(result.response.as_deref(), Some("Text agent answer."));
        assert_eq!(harness.calls(), vec!["image", "text"]);
        assert_eq!(harness.llm.call_count(), 1);
    }

    #[tokio::test]
    async fn fusion_failure_is_reported_in_the_answer() {
        let harness = Harness::new("Type: multi_modal\nIntent: analyze");
        harness.llm.push_failure("context window exceeded");
        let orchestrator = harness.orchestrator(RoutingPolicy::default());

        let result = orchestrator
            .process(
                Request::new("Compare")
                    .with_image("/tmp/a.png")
                    .with_document("b.pdf"),
            )
            .await;

        assert!(!result.success);
        assert!(
            result
                .response
                .as_deref()
                .is_some_and(|response| response.starts_with("Error: "))
        );
        assert_eq!(
            result.metadata.processing_steps.last().map(String::as_str),
            Some("Response synthesized")
        );
    }

    #[tokio::test]
    async fn concurrent_fanout_keeps_trace_order() {
        let harness = Harness::new("Type: multi_modal\nIntent: search");
        harness.llm.push_reply("Fused.");
        let image = Arc::new(
            StubAgent::new(CapabilityKind::Image, &harness.log, Ok("slow image"))
                .with_delay(Duration::from_millis(50)),
        );
        let harness = Harness { image, ..harness };
        let orchestrator = harness.orchestrator(RoutingPolicy {
            concurrent_fanout: true,
            ..RoutingPolicy::default()
        });

        let result = orchestrator
            .process(
                Request::new("Find the logo")
                    .with_image("/tmp/a.png")
                    .with_document("brand.pdf"),
            )
            .await;

        // the text stub finishes first, but results apply in fixed order
        assert_eq!(harness.calls(), vec!["text", "image"]);
        assert_eq!(
            result.metadata.processing_steps[1..3],
            ["Image agent processed", "Text agent processed"]
        );
        assert_eq!(result.response.as_deref(), Some("Fused."));
    }

    #[tokio::test]
    async fn slow_agent_times_out_as_failure() {
        let harness = Harness::new("Type: text\nIntent: question");
        let text = Arc::new(
            StubAgent::new(CapabilityKind::Text, &harness.log, Ok("too late"))
                .with_delay(Duration::from_millis(500)),
        );
        let harness = Harness { text, ..harness };
        let orchestrator = harness.orchestrator(RoutingPolicy {
            step_timeout: Duration::from_millis(20),
            ..RoutingPolicy::default()
        });

        let result = orchestrator.process(Request::new("hello")).await;

        assert!(!result.success);
        assert_eq!(result.response.as_deref(), Some(NO_RESULT_MESSAGE));
        assert!(
            result
                .error
                .as_deref()
                .is_some_and(|error| error.starts_with("Timed out"))
        );
    }

    #[tokio::test]
    async fn audio_attachment_routes_to_audio_agent() {
        let harness = Harness::new("Type: text\nIntent: question");
        let orchestrator = harness.orchestrator(RoutingPolicy::default());

        let result = orchestrator
            .process(Request::new("What was decided?").with_audio("/tmp/meeting.wav"))
            .await;

        assert_eq!(result.metadata.query_type, Some(QueryType::Audio));
        assert_eq!(result.response.as_deref(), Some("Audio agent answer."));
        assert_eq!(harness.calls(), vec!["audio"]);
        let inputs = harness.audio.inputs();
        assert_eq!(inputs[0].analysis, AudioAnalysis::Analyze);
        assert_eq!(inputs[0].query.as_deref(), Some("What was decided?"));
    }

    #[tokio::test]
    async fn custom_audio_policy_reaches_translation_with_language_hints() {
        let harness = Harness::new("Type: audio\nIntent: process");
        let policy = RoutingPolicy {
            audio_analysis: IntentMap {
                process: AudioAnalysis::Translate,
                ..RoutingPolicy::default().audio_analysis
            },
            ..RoutingPolicy::default()
        };
        let orchestrator = harness.orchestrator(policy);

        orchestrator
            .process(
                Request::new("Translate the voicemail")
                    .with_audio("/tmp/voicemail.ogg")
                    .with_language("es")
                    .with_translate_to("French"),
            )
            .await;

        let inputs = harness.audio.inputs();
        assert_eq!(inputs[0].analysis, AudioAnalysis::Translate);
        assert_eq!(inputs[0].query, None);
        assert_eq!(inputs[0].language.as_deref(), Some("es"));
        assert_eq!(inputs[0].translate_to.as_deref(), Some("French"));
    }

    #[tokio::test]
    async fn request_can_disable_retrieval() {
        let harness = Harness::new("Type: text\nIntent: search");
        let orchestrator = harness.orchestrator(RoutingPolicy {
            retrieval_top_k: 9,
            ..RoutingPolicy::default()
        });

        orchestrator
            .process(Request::new("hello").with_use_rag(false))
            .await;

        let inputs = harness.text.inputs();
        assert!(!inputs[0].use_rag);
        assert_eq!(inputs[0].top_k, 9);
    }

    #[tokio::test]
    async fn result_carries_request_metadata() {
        let harness = Harness::new("Type: text\nIntent: question");
        let orchestrator = harness.orchestrator(RoutingPolicy::default());

        let result = orchestrator.process(Request::new("hello")).await;

        assert!(Uuid::parse_str(&result.metadata.request_id).is_ok());
        assert!(OffsetDateTime::parse(&result.metadata.completed_at, &Rfc3339).is_ok());
        let metrics = orchestrator.metrics_snapshot();
        assert_eq!(metrics.invocations, 1);
        assert_eq!(metrics.routes.text, 1);
        assert_eq!(metrics.fusions, 0);
    }
}
