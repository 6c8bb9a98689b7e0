//! CLI command handlers.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use cascade_core::{Tier, WorkItemKey, WorkerId};
use cascade_orchestrator::collaborators::{
    GitWorktrees, HttpCollaborator, MemoryIssueTracker, WorktreeManager,
};
use cascade_orchestrator::config::{CONFIG_ENV, CascadeConfig};
use cascade_orchestrator::persistence::{WorkItemStore, WorkerStore};
use cascade_orchestrator::tier::{
    CollaboratorProcessor, ExecutionProcessor, IntakeProcessor, ReportedRiskScorer,
};
use cascade_orchestrator::{
    CascadeOrchestrator, CascadeRequest, CleanupManager, Dispatcher, StateStore,
    SurrealStateStore, SyncSweep, TierProcessors,
};
use tracing::{info, warn};

use crate::cli::{Commands, TargetKind};

/// Execute a CLI command.
pub async fn execute_command(config_path: Option<PathBuf>, command: Commands) -> Result<()> {
    let config = load_config(config_path).await?;

    match command {
        Commands::Run {
            repo,
            branch,
            kind,
            id,
            name,
            payload,
            payload_file,
        } => {
            let payload = read_payload(payload, payload_file.as_deref()).await?;
            let request = match kind {
                TargetKind::Epic => CascadeRequest::epic(repo, branch, id, name, payload),
                TargetKind::Assessment => {
                    CascadeRequest::assessment(repo, branch, id, name, payload)
                }
            };
            cmd_run(&config, request).await
        }
        Commands::Keys => cmd_keys(&config).await,
        Commands::Show { key } => cmd_show(&config, &key).await,
        Commands::Sync => cmd_sync(&config).await,
        Commands::Cleanup { worker_id } => cmd_cleanup(&config, &worker_id).await,
        Commands::Purge => cmd_purge(&config).await,
        Commands::ParseKey { key } => cmd_parse_key(&key),
    }
}

/// Resolve the config path from the flag, then the environment.
async fn load_config(path: Option<PathBuf>) -> Result<CascadeConfig> {
    let path = path.or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
    match path {
        Some(path) => {
            info!(path = %path.display(), "loading configuration");
            CascadeConfig::load(&path)
                .await
                .with_context(|| format!("Invalid configuration in {}", path.display()))
        }
        None => Ok(CascadeConfig::default()),
    }
}

async fn read_payload(inline: Option<String>, file: Option<&Path>) -> Result<serde_json::Value> {
    let text = match (inline, file) {
        (Some(text), _) => text,
        (None, Some(path)) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read payload file {}", path.display()))?,
        (None, None) => return Ok(serde_json::json!({})),
    };
    serde_json::from_str(&text).context("Payload is not valid JSON")
}

/// Connect to the configured state store and make sure it answers.
async fn connect_store(config: &CascadeConfig) -> Result<Arc<dyn StateStore>> {
    let store = SurrealStateStore::connect(config.store.store_config())
        .await
        .context("Failed to connect to the state store")?;
    store
        .initialize_schema()
        .await
        .context("Failed to initialize the state store schema")?;
    store
        .health_check()
        .await
        .context("State store health check failed")?;
    Ok(Arc::new(store))
}

fn worktrees(config: &CascadeConfig) -> Option<Arc<dyn WorktreeManager>> {
    if !config.worktree.enabled {
        return None;
    }
    let repo_dir = config.worktree.repo_dir.clone()?;
    let worktrees = GitWorktrees::new(repo_dir, config.workspace_root.join("worktrees"));
    Some(Arc::new(worktrees))
}

fn collaborator(name: &str, url: Option<&str>, config: &CascadeConfig) -> Result<HttpCollaborator> {
    let Some(url) = url else {
        bail!("collaborators.{name}_url is not set");
    };
    HttpCollaborator::new(name, url, config.collaborators.request_timeout())
        .with_context(|| format!("Failed to build the {name} collaborator"))
}

/// Tier processors backed by the configured HTTP collaborators.
fn processors(config: &CascadeConfig) -> Result<TierProcessors> {
    let gate = config.validation.gate()?;
    let collaborators = &config.collaborators;

    let intake = IntakeProcessor::new(gate, Arc::new(ReportedRiskScorer::default().or_default(0.0)));
    let specification = CollaboratorProcessor::new(
        Tier::Specification,
        Arc::new(collaborator("semantic", collaborators.semantic_url.as_deref(), config)?),
    );
    let synthesis = CollaboratorProcessor::new(
        Tier::Synthesis,
        Arc::new(collaborator("synthesis", collaborators.synthesis_url.as_deref(), config)?),
    );
    let execution = ExecutionProcessor::new(
        Arc::new(collaborator("execution", collaborators.execution_url.as_deref(), config)?),
        gate,
        Arc::new(ReportedRiskScorer::default()),
    );

    Ok(TierProcessors::new(
        Arc::new(intake),
        Arc::new(specification),
        Arc::new(synthesis),
        Arc::new(execution),
    )?)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to render output")?;
    println!("{text}");
    Ok(())
}

async fn cmd_run(config: &CascadeConfig, request: CascadeRequest) -> Result<()> {
    let store = connect_store(config).await?;

    let mut builder = CascadeOrchestrator::builder(Arc::clone(&store), processors(config)?)
        .worker_timeout(config.worker_timeout())
        .worker_ttl(config.worker_ttl())
        .workspace_root(&config.workspace_root);
    if let Some(worktrees) = worktrees(config) {
        builder = builder.worktrees(worktrees);
    }
    let orchestrator = builder.build();

    let dispatcher = Dispatcher::start(orchestrator, store, &config.dispatch);
    let outcome = dispatcher.run(request).await;
    dispatcher.shutdown().await;
    let outcome = outcome.context("Dispatch failed")?;

    print_json(&outcome)?;
    if let Some(failure) = outcome.failure() {
        bail!("cascade failed at {} ({}): {}", failure.tier, failure.kind, failure.reason);
    }
    Ok(())
}

async fn cmd_keys(config: &CascadeConfig) -> Result<()> {
    let items = WorkItemStore::new(connect_store(config).await?);
    for key in items.list_keys().await.context("Failed to list work items")? {
        println!("{key}");
    }
    Ok(())
}

async fn cmd_show(config: &CascadeConfig, key: &str) -> Result<()> {
    let items = WorkItemStore::new(connect_store(config).await?);
    let record = items
        .get_by_str(key)
        .await
        .with_context(|| format!("Failed to read work item {key}"))?;
    match record {
        Some(record) => print_json(&record),
        None => bail!("no work item under {key}"),
    }
}

async fn cmd_sync(config: &CascadeConfig) -> Result<()> {
    let items = WorkItemStore::new(connect_store(config).await?);
    // No tracker adapter is configured, so the sweep runs against an
    // in-process tracker and reports what it would write.
    warn!("no issue tracker configured, running sync as a dry run");
    let report = SyncSweep::new(items, Arc::new(MemoryIssueTracker::new()))
        .run()
        .await
        .context("Sync sweep failed")?;
    print_json(&report)
}

async fn cmd_cleanup(config: &CascadeConfig, worker_id: &str) -> Result<()> {
    let worker_id: WorkerId = worker_id
        .parse()
        .with_context(|| format!("Invalid worker id {worker_id}"))?;
    let workers = WorkerStore::new(connect_store(config).await?, config.worker_ttl());
    let report = CleanupManager::new(workers, worktrees(config))
        .cleanup(&worker_id)
        .await;
    print_json(&report)
}

async fn cmd_purge(config: &CascadeConfig) -> Result<()> {
    let store = connect_store(config).await?;
    let purged = store
        .purge_expired()
        .await
        .context("Failed to purge expired state")?;
    info!(purged, "expired state purged");
    println!("{purged}");
    Ok(())
}

fn cmd_parse_key(key: &str) -> Result<()> {
    let key: WorkItemKey = key.parse().context("Invalid cascade key")?;
    print_json(&serde_json::json!({
        "key": key.to_string(),
        "kind": key.kind(),
        "repo": key.repo(),
        "branch": key.branch(),
        "target": key.target(),
        "parent": key.parent_epic().map(|parent| parent.to_string()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processors_require_collaborator_urls() {
        let config = CascadeConfig::default();
        let result = processors(&config);
        assert!(result.is_err());
        assert!(
            result
                .err()
                .is_some_and(|e| e.to_string().contains("semantic_url"))
        );
    }

    #[test]
    fn test_worktrees_disabled_by_default() {
        assert!(worktrees(&CascadeConfig::default()).is_none());
    }

    #[tokio::test]
    async fn test_read_payload_sources() {
        let inline = read_payload(Some(r#"{"task": "t"}"#.to_string()), None).await.ok();
        assert_eq!(inline, Some(serde_json::json!({"task": "t"})));

        let empty = read_payload(None, None).await.ok();
        assert_eq!(empty, Some(serde_json::json!({})));

        assert!(read_payload(Some("not json".to_string()), None).await.is_err());
    }

    #[tokio::test]
    async fn test_payload_file() {
        let Ok(dir) = tempfile::tempdir() else {
            return;
        };
        let path = dir.path().join("payload.json");
        if tokio::fs::write(&path, r#"{"risk_score": 3}"#).await.is_err() {
            return;
        }
        let payload = read_payload(None, Some(&path)).await.ok();
        assert_eq!(payload, Some(serde_json::json!({"risk_score": 3})));
    }

    #[test]
    fn test_parse_key_rejects_garbage() {
        assert!(cmd_parse_key("not-a-key").is_err());
        assert!(cmd_parse_key("repo-acme_branch-main_epics-EP1-demo").is_ok());
    }
}
