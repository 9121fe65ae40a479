// Agentops API server
//
// The composition root: every service is constructed here and injected down.
// The HTTP surface is intentionally thin - research, compliance, tools, and
// observability endpoints over the substrate crates.

mod common;
mod compliance;
mod hooks;
mod modules;
mod observability;
mod research;
mod tools;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use agentops_compliance::ComplianceReporter;
use agentops_core::config::ObservabilitySettings;
use agentops_core::llm::{ChatModel, MockChatModel};
use agentops_dispatch::{ToolDispatcher, ToolRegistry};
use agentops_graph::{
    bootstrap_canonical_graph, AgentSelfModify, GraphHydrator, GraphStateStore, InMemoryGraphStore,
    Neo4jGraphStore,
};
use agentops_kernel::KernelLoader;
use agentops_observability::{
    execute_recovery, BreakerRegistry, CircuitBreakerConfig, CompositeExporter, ConsoleExporter,
    JsonFileExporter, MemoryMetrics, ObservabilityService, SpanExporter, SubstrateExporter,
    SubstrateIngestor,
};
use agentops_research::{
    LlmCritic, LlmPlanner, LlmResearcher, ResearchGraph, ResearchGraphConfig, ResearchRuntime,
};
use agentops_storage::{InMemoryPacketStore, PacketStore, PostgresPacketStore};

use crate::hooks::EscalationHooks;
use crate::modules::{ModuleDefinition, ModuleRegistry, ModuleStatus};
use crate::tools::SelfModifyTool;

/// Embedding dimension of the semantic index.
const EMBEDDING_DIMENSION: usize = 1536;

/// App state shared across routes
#[derive(Clone)]
pub struct AppState {
    pub ingestor: Arc<SubstrateIngestor>,
    pub metrics: Arc<MemoryMetrics>,
    pub observability: Arc<ObservabilityService>,
    pub dispatcher: Arc<ToolDispatcher>,
    pub research: Arc<ResearchRuntime>,
    pub reporter: Arc<ComplianceReporter>,
    pub modules: Arc<ModuleRegistry>,
    pub breakers: Arc<BreakerRegistry>,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        research::run_research,
        research::resume_research,
        research::research_status,
        compliance::compliance_report,
        compliance::compliance_export,
        tools::dispatch_tool,
        observability::metrics,
        observability::modules_status,
        observability::health,
    ),
    components(schemas(
        research::RunResearchRequest,
        research::RunResearchResponse,
        research::ResumeResearchRequest,
        research::ResearchStatusResponse,
        compliance::ComplianceRangeParams,
        tools::DispatchToolRequest,
    )),
    tags(
        (name = "research", description = "Research orchestration endpoints"),
        (name = "compliance", description = "Audit aggregation endpoints"),
        (name = "tools", description = "Audited tool dispatch"),
        (name = "observability", description = "Metrics and module status")
    ),
    info(
        title = "Agentops API",
        version = "0.2.0",
        description = "Agent operations substrate: audited tool dispatch, governed agent state, research orchestration"
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn")),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let settings = ObservabilitySettings::from_env();
    let metrics = Arc::new(MemoryMetrics::new());
    let modules = Arc::new(ModuleRegistry::new());

    // Packet store: Postgres when a DSN is configured, in-memory otherwise.
    let store: Arc<dyn PacketStore> = match std::env::var("MEMORY_DSN")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(dsn) => {
            let store = PostgresPacketStore::connect(&dsn, EMBEDDING_DIMENSION)
                .await
                .context("failed to connect to the packet store")?;
            store.migrate().await.context("packet store migration failed")?;
            info!("packet store: postgres");
            Arc::new(store)
        }
        Err(_) => {
            warn!("MEMORY_DSN not set; packet store is in-memory and non-durable");
            Arc::new(InMemoryPacketStore::new())
        }
    };
    let ingestor = Arc::new(SubstrateIngestor::new(store.clone(), metrics.clone()));
    ingestor.probe_health().await;

    // TTL-driven pruning; immutable packets are never touched.
    {
        let store = store.clone();
        let ingestor = ingestor.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(3600));
            loop {
                interval.tick().await;
                match store.prune_expired(chrono::Utc::now()).await {
                    Ok(removed) if removed > 0 => info!(removed, "pruned expired packets"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "packet pruning failed"),
                }
                ingestor.probe_health().await;
            }
        });
    }

    // Span export pipeline.
    let mut exporters: Vec<Arc<dyn SpanExporter>> = Vec::new();
    for name in &settings.exporters {
        match name.as_str() {
            "console" => exporters.push(Arc::new(ConsoleExporter)),
            "file" => exporters.push(Arc::new(JsonFileExporter::new(&settings.file_export_path))),
            "substrate" => exporters.push(Arc::new(SubstrateExporter::new(store.clone()))),
            other => warn!(exporter = %other, "unknown exporter, skipping"),
        }
    }
    let observability = ObservabilityService::new(
        settings.clone(),
        CompositeExporter::new(exporters),
        metrics.clone(),
    );
    observability.spawn_flusher();

    // Recovery engine consuming the failure-signal stream.
    let mut failure_rx = observability.failure_signals();
    let recovery_hooks = EscalationHooks::new(ingestor.clone());
    tokio::spawn(async move {
        while let Some(signal) = failure_rx.recv().await {
            let _ = execute_recovery(&recovery_hooks, &signal).await;
        }
    });

    let breakers = Arc::new(BreakerRegistry::new(
        CircuitBreakerConfig::new("default")
            .with_failure_threshold(settings.circuit_breaker_threshold)
            .with_window(Duration::from_secs(settings.circuit_breaker_window_sec))
            .with_reset_timeout(Duration::from_secs(settings.circuit_breaker_reset_timeout_sec)),
    ));

    // Agent state graph: Bolt when configured, in-memory otherwise.
    let graph: Arc<dyn GraphStateStore> = match std::env::var("NEO4J_URI") {
        Ok(uri) => {
            let user = std::env::var("NEO4J_USER").unwrap_or_else(|_| "neo4j".to_string());
            let password = std::env::var("NEO4J_PASSWORD").unwrap_or_default();
            let graph = Neo4jGraphStore::connect(&uri, &user, &password)
                .await
                .context("failed to connect to the graph store")?;
            info!("graph store: bolt");
            Arc::new(graph)
        }
        Err(_) => {
            warn!("NEO4J_URI not set; agent graph is in-memory and non-durable");
            Arc::new(InMemoryGraphStore::new())
        }
    };
    bootstrap_canonical_graph(graph.as_ref())
        .await
        .context("canonical graph bootstrap failed")?;

    let hydrator = Arc::new(GraphHydrator::new(graph.clone()));

    // Kernel stack: two-phase load + activate, integrity-gated.
    let kernel_root =
        std::env::var("KERNEL_PATH").unwrap_or_else(|_| "kernels".to_string());
    let kernel_override = std::env::var("KERNEL_INTEGRITY_OVERRIDE")
        .map(|v| v == "true")
        .unwrap_or(false);
    let loader = KernelLoader::new(&kernel_root);
    let kernel_status = if loader.root().exists() {
        match loader.load_and_activate(&mut [], kernel_override) {
            Ok((stack, activations)) => {
                info!(kernels = activations.len(), "kernel stack activated");
                hydrator.set_kernels(Arc::new(stack));
                ModuleStatus {
                    module_id: "kernel".to_string(),
                    enabled: true,
                    available: true,
                    initialized: true,
                    notes: None,
                }
            }
            Err(e) => {
                warn!(error = %e, "kernel activation refused");
                ModuleStatus {
                    module_id: "kernel".to_string(),
                    enabled: true,
                    available: true,
                    initialized: false,
                    notes: Some(e.to_string()),
                }
            }
        }
    } else {
        warn!(path = %kernel_root, "kernel directory not found, running without kernel law");
        ModuleStatus {
            module_id: "kernel".to_string(),
            enabled: false,
            available: false,
            initialized: false,
            notes: Some(format!("kernel directory not found: {kernel_root}")),
        }
    };

    // Tool dispatch with the governed self-modify protocol registered.
    let self_modify = Arc::new(AgentSelfModify::new(
        graph.clone(),
        store.clone(),
        hydrator.clone(),
    ));
    let registry = Arc::new(ToolRegistry::with_builtins());
    registry.register(Arc::new(SelfModifyTool::new(self_modify)));
    let dispatcher = Arc::new(ToolDispatcher::new(
        registry.clone(),
        store.clone(),
        metrics.clone(),
    ));

    // Research orchestration. Without a provider configured the chat seam is
    // the deterministic mock.
    let chat_model: Arc<dyn ChatModel> = Arc::new(MockChatModel::new());
    warn!("no LLM provider wired in-process; research agents run on the deterministic mock");
    let research_graph = ResearchGraph::new(
        Arc::new(LlmPlanner::new(chat_model.clone())),
        Arc::new(LlmResearcher::new(chat_model.clone())),
        Arc::new(LlmCritic::new(chat_model)),
        registry.clone(),
        ingestor.clone(),
        ResearchGraphConfig::default(),
    );
    let research = Arc::new(ResearchRuntime::new(research_graph, ingestor.clone()));

    let reporter = Arc::new(ComplianceReporter::new(store.clone()));

    register_modules(&modules, kernel_status);

    let state = AppState {
        ingestor,
        metrics,
        observability,
        dispatcher,
        research,
        reporter,
        modules,
        breakers,
    };

    let app = Router::new()
        .route("/health", get(observability::health))
        .route("/metrics", get(observability::metrics))
        .route("/modules/status", get(observability::modules_status))
        .route("/research/run", post(research::run_research))
        .route("/research/resume", post(research::resume_research))
        .route("/research/:thread_id/status", get(research::research_status))
        .route("/compliance/report", get(compliance::compliance_report))
        .route("/compliance/export", get(compliance::compliance_export))
        .route("/tools/dispatch", post(tools::dispatch_tool))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state);

    let bind = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(%bind, "agentops api listening");
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

fn register_modules(modules: &ModuleRegistry, kernel_status: ModuleStatus) {
    let definitions = [
        ("packet_store", "Packet Store", None),
        ("semantic_index", "Semantic Index", None),
        ("graph_state", "Agent Graph State", None),
        ("kernel", "Kernel Loader", None),
        ("observability", "Observability Plane", Some("/metrics")),
        ("dispatch", "Tool Dispatch", Some("/tools")),
        ("research", "Research Orchestrator", Some("/research")),
        ("compliance", "Compliance Reporter", Some("/compliance")),
    ];

    for (module_id, display_name, route_prefix) in definitions {
        modules.register(ModuleDefinition {
            module_id: module_id.to_string(),
            display_name: display_name.to_string(),
            route_prefix: route_prefix.map(String::from),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        });
        if module_id != "kernel" {
            modules.set_status(ModuleStatus {
                module_id: module_id.to_string(),
                enabled: true,
                available: true,
                initialized: true,
                notes: None,
            });
        }
    }

    modules.set_status(kernel_status);
}
