use aegis_core::{
    config::Config,
    notify::{EmailChannel, NotificationService, SlackChannel, WebhookChannel},
    orchestrator::{PerformanceConfig, ScanOrchestrator},
    plugins::PluginManager,
    policy::HttpPolicyClient,
    scanners,
    store::FsOutputStore,
    tenant::TenantConfigService,
    workflow::{
        config::ConfigDocument,
        registry::{builtin_workflows, WorkflowRegistry},
        WorkflowEngine,
    },
};
use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Multi-tenant artifact security scanning orchestration service
#[derive(Parser, Debug)]
#[command(name = "aegis-core", version, about)]
struct Args {
    /// Path to the workflow configuration document (JSON). Falls back to
    /// AEGIS_WORKFLOW_CONFIG, then to built-in workflows.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("Starting Aegis Core scan orchestration service");

    let args = Args::parse();
    let config = Config::load()?;

    // Scanner adapters register only when their binaries answer the probe.
    let plugins = Arc::new(PluginManager::new());
    let adapters: Vec<Arc<dyn scanners::ScannerAdapter>> = vec![
        Arc::new(scanners::TrivyAdapter::new()),
        Arc::new(scanners::GrypeAdapter::new()),
        Arc::new(scanners::SyftAdapter::new()),
        Arc::new(scanners::BanditAdapter::new()),
        Arc::new(scanners::TruffleHogAdapter::new()),
        Arc::new(scanners::GitleaksAdapter::new()),
        Arc::new(scanners::SemgrepAdapter::new()),
        Arc::new(scanners::OsvScannerAdapter::new()),
        Arc::new(scanners::NpmAuditAdapter::new()),
    ];
    let known_scanner_ids: Vec<String> =
        adapters.iter().map(|a| a.metadata().id).collect();
    let mut registered = 0usize;
    for adapter in adapters {
        if plugins.register_adapter(adapter).await {
            registered += 1;
        }
    }
    info!("Registered {} scanner adapters", registered);

    // Workflows: configuration document when provided, built-ins otherwise.
    let workflows = Arc::new(WorkflowRegistry::new());
    let tenants = Arc::new(TenantConfigService::new());
    let config_path = args
        .config
        .or_else(|| config.orchestrator.workflow_config_path.clone());
    match config_path {
        Some(path) => {
            let document = ConfigDocument::load(&path).await?;
            tenants.replace(document.tenants.clone()).await;
            for workflow in document.to_workflows()? {
                workflows.register(workflow).await?;
            }
        }
        None => {
            warn!("No workflow configuration document; using built-in workflows");
            for workflow in builtin_workflows() {
                workflows.register(workflow).await?;
            }
        }
    }
    // Validate against the full adapter roster: a workflow naming a scanner
    // that merely is not installed must not be a fatal configuration error.
    workflows.validate_scanners(&known_scanner_ids).await?;

    let engine = Arc::new(WorkflowEngine::new(Arc::clone(&workflows), Arc::clone(&plugins)));

    let policy = Arc::new(HttpPolicyClient::with_timeout(
        &config.policy.base_url,
        Duration::from_secs(config.policy.timeout_seconds),
    )?);

    let mut notifications = NotificationService::new();
    if let Some(url) = &config.notifications.slack_webhook_url {
        notifications.register(Arc::new(SlackChannel::new(url.as_str())));
    }
    if let Some(url) = &config.notifications.webhook_url {
        notifications.register(Arc::new(WebhookChannel::new(url.as_str())));
    }
    if let (Some(gateway), Some(recipient)) = (
        &config.notifications.email_gateway_url,
        &config.notifications.email_recipient,
    ) {
        notifications.register(Arc::new(EmailChannel::new(
            gateway.as_str(),
            recipient.as_str(),
        )));
    }

    let store = Arc::new(FsOutputStore::new(&config.orchestrator.output_dir));

    let orchestrator = Arc::new(
        ScanOrchestrator::new(
            engine,
            tenants,
            policy,
            Arc::new(notifications),
            store,
        )
        .with_performance(PerformanceConfig {
            max_concurrent_scans: config.orchestrator.max_concurrent_scans,
            cache_ttl: Duration::from_secs(config.orchestrator.cache_ttl_seconds),
            max_retries: config.orchestrator.max_retries,
            ..PerformanceConfig::default()
        })
        .with_default_policy_path(config.policy.default_path.as_str()),
    );

    orchestrator.start_background_tasks().await;
    info!("Aegis Core ready; awaiting shutdown signal");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    orchestrator.shutdown().await;

    Ok(())
}
