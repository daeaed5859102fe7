//! CLI command handlers.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};
use userop_persistence::SurrealPersistence;
use userop_reconciler::{
    BackendId, InMemoryResourceStore, PersistenceGateway, Reconciler, Requeue, ResourceKey,
};

use crate::cli::Commands;
use crate::config::AppConfig;
use crate::manifest;

/// Execute a CLI command.
pub async fn execute_command(command: Commands) -> Result<()> {
    match command {
        Commands::Reconcile {
            manifest,
            config,
            max_passes,
        } => cmd_reconcile(&manifest, config.as_deref(), max_passes).await,

        Commands::InitSchema { config } => cmd_init_schema(config.as_deref()).await,

        Commands::Get { backend_id, config } => cmd_get(backend_id, config.as_deref()).await,
    }
}

/// Result of driving one resource through a run.
#[derive(Debug)]
pub struct PassReport {
    pub key: ResourceKey,
    pub passes: usize,
    pub outcome: Result<Requeue>,
}

/// Run passes for `key` while the reconciler asks for an immediate requeue,
/// up to `max_passes`.
pub async fn run_passes(reconciler: &Reconciler, key: &ResourceKey, max_passes: usize) -> PassReport {
    let max_passes = max_passes.max(1);
    let mut passes: usize = 0;

    let outcome = loop {
        passes = passes.saturating_add(1);
        match reconciler.reconcile_once(key).await {
            Ok(Requeue::Immediately) if passes < max_passes => {}
            Ok(requeue) => break Ok(requeue),
            Err(e) => break Err(anyhow::Error::from(e)),
        }
    };

    PassReport {
        key: key.clone(),
        passes,
        outcome,
    }
}

async fn connect(config: &AppConfig) -> Result<SurrealPersistence> {
    let store = SurrealPersistence::connect(config.database.clone())
        .await
        .with_context(|| format!("Failed to connect to {}", config.database.url))?;

    store
        .health_check()
        .await
        .context("Database health check failed")?;

    Ok(store)
}

async fn cmd_reconcile(manifest_path: &Path, config: Option<&Path>, max_passes: usize) -> Result<()> {
    let config = AppConfig::load(config)?;
    let resources = manifest::load(manifest_path)?;
    info!(
        manifest = %manifest_path.display(),
        resources = resources.len(),
        "Loaded manifest"
    );

    let persistence = connect(&config).await?;
    persistence
        .init_schema()
        .await
        .context("Failed to initialize schema")?;

    let keys: Vec<ResourceKey> = resources.iter().map(|r| r.key.clone()).collect();
    let store = Arc::new(InMemoryResourceStore::with_resources(resources));
    let reconciler = Reconciler::new(store.clone(), Arc::new(persistence), config.reconciler);

    let mut failed = 0usize;
    for key in &keys {
        let report = run_passes(&reconciler, key, max_passes).await;
        let status = store.status(key).await.unwrap_or_default();
        let backend_id = status
            .backend_id
            .as_ref()
            .map_or("-", BackendId::as_str)
            .to_string();

        match &report.outcome {
            Ok(requeue) => println!(
                "{}\t{}\t{}\trequeue {} after {} pass(es)",
                report.key, status.state, backend_id, requeue, report.passes
            ),
            Err(e) => {
                failed = failed.saturating_add(1);
                warn!(resource = %report.key, error = %e, "Reconciliation failed");
                println!(
                    "{}\t{}\t{}\terror: {}",
                    report.key, status.state, backend_id, e
                );
            }
        }
    }

    manifest::save(manifest_path, &store.snapshot().await)?;
    info!(manifest = %manifest_path.display(), "Wrote statuses back");

    if failed > 0 {
        bail!("{failed} of {} resources failed to reconcile", keys.len());
    }
    Ok(())
}

async fn cmd_init_schema(config: Option<&Path>) -> Result<()> {
    let config = AppConfig::load(config)?;
    let persistence = connect(&config).await?;
    persistence
        .init_schema()
        .await
        .context("Failed to initialize schema")?;

    println!("Schema ready at {}", config.database.url);
    Ok(())
}

async fn cmd_get(backend_id: String, config: Option<&Path>) -> Result<()> {
    let config = AppConfig::load(config)?;
    let persistence = connect(&config).await?;
    let id = BackendId::new(backend_id);

    match persistence.get(&id).await? {
        Some(record) => {
            println!("id:         {}", record.id);
            println!("owner:      {}", record.owner);
            println!("first_name: {}", record.first_name);
            println!("last_name:  {}", record.last_name);
            println!("age:        {}", record.age);
            println!("address:    {}", record.address);
            println!("email:      {}", record.email);
            Ok(())
        }
        None => bail!("No user record with id {id}"),
    }
}
