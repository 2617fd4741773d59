//! The reasoning agent: controller, grader, refiner, humanizer, retry
//! orchestrator and trace recorder, plus a facade that wires them to the
//! stores.

mod controller;
mod grader;
mod humanizer;
mod orchestrator;
pub mod prompts;
mod react;
mod refiner;
mod tracer;

pub use controller::{AttemptRun, Controller, ControllerConfig, ToolCallRecord};
pub use grader::{AnswerGrader, GradeScores, GradeVerdict, QuestionType};
pub use humanizer::Humanizer;
pub use orchestrator::{AttemptRecord, CancelToken, QueryOutcome, RetryOrchestrator};
pub use refiner::QueryRefiner;
pub use tracer::{AttemptTrace, ReasoningTrace, TraceDoc, TraceRecorder, TraceToolCall};

use std::sync::Arc;

use crate::alias::AliasResolver;
use crate::config::Settings;
use crate::embedding::{Embedder, HttpEmbedder};
use crate::error::Result;
use crate::graph::{GraphQuery, Neo4jGraph};
use crate::llm::{ChatMessage, ClientConfig, GeminiClient, LlmClient};
use crate::tools::{
    BreadthBudget, FindConnection, GetCharacterEvents, LookupKnowledge, SearchMemory,
    ToolCatalog, TrackJourney,
};
use crate::trajectory::EventSink;
use crate::vector::{QdrantStore, VectorSearch};

/// The assembled question-answering agent.
///
/// Construction is the only place the concrete store/model clients meet
/// the loop; everything below runs against trait objects, so tests wire
/// the same machine to in-memory fakes.
pub struct RetrievalAgent {
    orchestrator: RetryOrchestrator,
}

impl RetrievalAgent {
    /// Wire an agent from already-constructed collaborators.
    pub fn from_parts(
        settings: Settings,
        graph: Arc<dyn GraphQuery>,
        vector: Arc<dyn VectorSearch>,
        embedder: Arc<dyn Embedder>,
        reasoning_llm: Arc<dyn LlmClient>,
        fast_llm: Arc<dyn LlmClient>,
    ) -> Result<Self> {
        let resolver = Arc::new(AliasResolver::from_path(
            graph.clone(),
            settings.alias_table_path.as_deref(),
        )?);

        let breadth = BreadthBudget::new(settings.limit_for_attempt(1));
        let catalog = Arc::new(
            ToolCatalog::new()
                .register(Arc::new(LookupKnowledge::new(
                    graph.clone(),
                    resolver.clone(),
                )))
                .register(Arc::new(FindConnection::new(
                    graph.clone(),
                    resolver.clone(),
                )))
                .register(Arc::new(TrackJourney::new(graph.clone(), resolver.clone())))
                .register(Arc::new(SearchMemory::new(
                    vector,
                    embedder,
                    resolver.clone(),
                    breadth.clone(),
                )))
                .register(Arc::new(GetCharacterEvents::new(graph, resolver))),
        );

        let controller = Controller::new(
            reasoning_llm,
            catalog,
            ControllerConfig::new(settings.reasoning_model.clone()),
        );
        let grader = AnswerGrader::new(
            fast_llm.clone(),
            settings.fast_model.clone(),
            settings.thresholds,
        );
        let refiner = QueryRefiner::new(fast_llm.clone(), settings.fast_model.clone());
        let humanizer = settings
            .enable_humanizer
            .then(|| Humanizer::new(fast_llm, settings.fast_model.clone()));
        let tracer = TraceRecorder::new(settings.trace_dir.clone());

        Ok(Self {
            orchestrator: RetryOrchestrator::new(
                settings, controller, grader, refiner, humanizer, breadth, tracer,
            ),
        })
    }

    /// Connect to the production stores and models described by
    /// `settings`.
    pub async fn connect(settings: Settings) -> Result<Self> {
        let api_key = settings.require_api_key()?.to_string();

        let graph: Arc<dyn GraphQuery> = Arc::new(Neo4jGraph::connect(&settings).await?);
        let vector: Arc<dyn VectorSearch> = Arc::new(QdrantStore::new(&settings)?);
        let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(
            settings.embedding_endpoint.clone(),
            settings.embedding_model.clone(),
            settings.embedding_dim,
        ));

        let mut reasoning_config =
            ClientConfig::new(api_key.clone()).with_default_model(settings.reasoning_model.clone());
        let mut fast_config =
            ClientConfig::new(api_key).with_default_model(settings.fast_model.clone());
        if let Some(base_url) = &settings.llm_base_url {
            reasoning_config = reasoning_config.with_base_url(base_url.clone());
            fast_config = fast_config.with_base_url(base_url.clone());
        }
        let reasoning_llm: Arc<dyn LlmClient> = Arc::new(GeminiClient::new(reasoning_config));
        let fast_llm: Arc<dyn LlmClient> = Arc::new(GeminiClient::new(fast_config));

        Self::from_parts(settings, graph, vector, embedder, reasoning_llm, fast_llm)
    }

    /// Answer a single stateless question.
    pub async fn ask(&self, question: &str) -> Result<QueryOutcome> {
        self.orchestrator
            .answer(question, &[], &EventSink::disabled(), &CancelToken::new())
            .await
    }

    /// Answer with live events and cooperative cancellation.
    pub async fn ask_streaming(
        &self,
        question: &str,
        events: &EventSink,
        cancel: &CancelToken,
    ) -> Result<QueryOutcome> {
        self.orchestrator.answer(question, &[], events, cancel).await
    }

    /// Start a multi-turn session over this agent.
    pub fn session(self: &Arc<Self>) -> Session {
        Session {
            id: uuid::Uuid::new_v4(),
            agent: self.clone(),
            history: Vec::new(),
        }
    }

    pub fn orchestrator(&self) -> &RetryOrchestrator {
        &self.orchestrator
    }
}

/// Multi-turn conversation state.
///
/// The session history is the persistent context handed to every attempt;
/// attempt-local state still resets inside the retry loop. Sessions are
/// independent of each other and never shared.
pub struct Session {
    id: uuid::Uuid,
    agent: Arc<RetrievalAgent>,
    history: Vec<ChatMessage>,
}

impl Session {
    /// Ask within the session, carrying prior turns as context.
    pub async fn ask(&mut self, question: &str) -> Result<QueryOutcome> {
        tracing::info!(session = %self.id, turn = self.history.len() / 2, "session ask");
        let outcome = self
            .agent
            .orchestrator
            .answer(
                question,
                &self.history,
                &EventSink::disabled(),
                &CancelToken::new(),
            )
            .await?;

        self.history.push(ChatMessage::user(question));
        self.history.push(ChatMessage::assistant(outcome.answer.clone()));
        Ok(outcome)
    }

    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    /// Drop accumulated turns.
    pub fn reset(&mut self) {
        self.history.clear();
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }
}
