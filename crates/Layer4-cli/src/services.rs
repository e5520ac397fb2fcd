//! Services bundle - every long-lived component, built once from config

use async_trait::async_trait;
use crew_agent::{CompletionEngine, CompletionEvent, Orchestrator, Planner, TaskAgent};
use crew_foundation::{CrewConfig, SandboxLimits};
use crew_provider::{
    Message, OpenAiProvider, Provider, ProviderError, ProviderResponse, ToolDef,
};
use crew_sandbox::{ContainerDriver, DockerCli, TemplateCatalog, ToolCatalog, WorkspaceRegistry};
use crew_task::{OperationLedger, ProjectStore};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

pub struct Services {
    pub config: CrewConfig,
    pub templates: Arc<TemplateCatalog>,
    pub tools: Arc<ToolCatalog>,
    pub registry: Arc<WorkspaceRegistry>,
    pub projects: Arc<ProjectStore>,
    pub ledger: Arc<OperationLedger>,
}

impl Services {
    /// Open every store under the data dir with the real container runtime
    pub fn open(config: CrewConfig) -> anyhow::Result<Self> {
        let limits = SandboxLimits::load()?;
        let driver: Arc<dyn ContainerDriver> = Arc::new(DockerCli::new(&limits));
        Self::with_driver(config, limits, driver)
    }

    pub fn with_driver(
        config: CrewConfig,
        limits: SandboxLimits,
        driver: Arc<dyn ContainerDriver>,
    ) -> anyhow::Result<Self> {
        let store = config.data_store()?;
        debug!(dir = %store.base_dir().display(), "Opening state");

        let templates = Arc::new(TemplateCatalog::open(store.clone())?);
        let tools = Arc::new(ToolCatalog::open(store.clone())?);
        let registry = Arc::new(WorkspaceRegistry::open(
            store.clone(),
            driver,
            limits,
            templates.clone(),
        )?);
        let projects = Arc::new(ProjectStore::open(store.clone())?);
        let ledger = Arc::new(OperationLedger::open(store)?);

        Ok(Self {
            config,
            templates,
            tools,
            registry,
            projects,
            ledger,
        })
    }

    /// Wire up the orchestrator; tool activity goes to `events` when given
    pub fn orchestrator(&self, events: Option<mpsc::Sender<CompletionEvent>>) -> Orchestrator {
        let provider = self.provider(None);
        let planner_provider = match &self.config.agent.planner_model {
            Some(model) => self.provider(Some(model)),
            None => provider.clone(),
        };

        let mut engine = CompletionEngine::new(provider)
            .with_max_iterations(self.config.agent.effective_max_iterations());
        if let Some(tx) = events {
            engine = engine.with_events(tx);
        }
        let planner = Planner::new(Arc::new(CompletionEngine::new(planner_provider)));
        let agent = TaskAgent::new(Arc::new(engine), self.registry.clone());

        Orchestrator::new(
            self.registry.clone(),
            self.projects.clone(),
            self.ledger.clone(),
            planner,
            agent,
        )
    }

    /// The configured provider, or a stand-in that reports why there is none
    fn provider(&self, model: Option<&str>) -> Arc<dyn Provider> {
        match OpenAiProvider::from_settings(&self.config.provider) {
            Ok(provider) => match model {
                Some(model) => Arc::new(provider.with_model(model)),
                None => Arc::new(provider),
            },
            Err(ProviderError::NotConfigured(reason)) => Arc::new(Unconfigured { reason }),
            Err(e) => Arc::new(Unconfigured {
                reason: e.to_string(),
            }),
        }
    }
}

/// Provider used when no API key is configured
///
/// Commands that never talk to the model still work; the others fail with
/// the configuration error.
struct Unconfigured {
    reason: String,
}

#[async_trait]
impl Provider for Unconfigured {
    fn id(&self) -> &str {
        "unconfigured"
    }

    fn model(&self) -> &str {
        ""
    }

    async fn complete(
        &self,
        _messages: Vec<Message>,
        _tools: Vec<ToolDef>,
        _system_prompt: Option<String>,
    ) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::NotConfigured(self.reason.clone()))
    }

    fn is_available(&self) -> bool {
        false
    }
}
