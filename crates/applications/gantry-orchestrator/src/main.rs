//! Gantry - resource provisioning daemon for compute marketplaces
//!
//! ## Usage
//!
//! ```bash
//! # Run the daemon against a config file
//! gantry run
//! gantry --config /etc/gantry/gantry.toml run
//!
//! # Apply a provision plan at startup, then keep serving
//! gantry run --plan deployments.json
//!
//! # Check a deployment manifest without provisioning anything
//! gantry validate deployment.json
//! ```

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gantry_core::{Manifest, ResourceState};
use gantry_orchestrator::{
    AdapterSet, GantryConfig, LoggingSink, MemoryLedger, Orchestrator, ProvisionRequest,
    Reconciler, UsageEmitter,
};
use gantry_scheduler::JobScheduler;

use ansible_provider::AnsibleAdapter;
use openstack_provider::{LabCloud, OpenStackAdapter};
use vsphere_provider::{SimVim, VSphereAdapter};

/// Gantry: resource provisioning for compute marketplace deployments
#[derive(Parser)]
#[command(name = "gantry")]
#[command(about = "Resource provisioning engine for compute marketplaces", long_about = None)]
struct Cli {
    /// Path to the daemon configuration file
    #[arg(long, global = true, default_value = "gantry.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the provisioning daemon until interrupted
    Run {
        /// Provision plan (JSON list of requests) applied at startup
        #[arg(long)]
        plan: Option<String>,
    },

    /// Validate a deployment manifest without provisioning
    Validate {
        /// Manifest file (JSON)
        manifest: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gantry=info,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { plan } => run_daemon(cli.config, plan).await,
        Commands::Validate { manifest } => validate_manifest(manifest),
    }
}

/// Build the adapter set the configuration asks for.
///
/// The OpenStack and vSphere adapters run against their in-process lab
/// backends until the real SDK ports are wired in; the Ansible backend
/// drives actual playbook runs.
fn build_adapters(config: &GantryConfig) -> anyhow::Result<AdapterSet> {
    let mut adapters = AdapterSet::new();

    if let Some(os) = &config.openstack {
        let lab = Arc::new(LabCloud::new());
        let adapter = OpenStackAdapter::new(os.clone(), lab.clone(), lab.clone(), lab)?;
        info!("🌩️  OpenStack backend ready ({})", os.provider_tag);
        adapters.register(os.provider_tag.clone(), Arc::new(adapter));
    }

    if let Some(vs) = &config.vsphere {
        let adapter = VSphereAdapter::new(vs.clone(), Arc::new(SimVim::new()))?;
        info!("🏢 vSphere backend ready ({})", vs.provider_tag);
        adapters.register(vs.provider_tag.clone(), Arc::new(adapter));
    }

    if let Some(an) = &config.ansible {
        let adapter = AnsibleAdapter::new(an.clone())?;
        info!("📗 Ansible backend ready ({} hosts)", an.hosts.len());
        adapters.register(an.provider_tag.clone(), Arc::new(adapter));
    }

    Ok(adapters)
}

/// Run the daemon until Ctrl+C
async fn run_daemon(config_path: String, plan: Option<String>) -> anyhow::Result<()> {
    info!("🚀 Gantry starting (config: {})", config_path);
    let config = GantryConfig::load(&config_path)?;
    config.validate()?;

    let adapters = build_adapters(&config)?;
    info!("Backends registered: {:?}", adapters.kinds());

    let emitter = Arc::new(UsageEmitter::new(
        Arc::new(MemoryLedger::new()),
        Arc::new(LoggingSink),
    ));

    // Job pipeline. Submissions come from the HPC intake collaborator;
    // terminal transitions land on the same emitter as VM deletions.
    let scheduler = Arc::new(JobScheduler::new().with_sink(emitter.clone()));
    info!("📊 Job scheduler ready");

    let cancel = CancellationToken::new();
    let engine = Arc::new(Orchestrator::new(
        adapters,
        emitter,
        &config.engine,
        cancel.clone(),
    ));

    let reconciler = Reconciler::new(
        engine.clone(),
        config.engine.reconcile_interval(),
        cancel.clone(),
    )
    .spawn();

    if let Some(path) = plan {
        apply_plan(&engine, &path).await?;
    }

    info!("✅ Gantry ready");
    tokio::signal::ctrl_c().await?;
    info!("🛑 Shutdown requested");

    cancel.cancel();
    engine.shutdown().await;
    let _ = reconciler.await;

    let leftovers = engine
        .statuses()
        .await
        .into_iter()
        .filter(|s| s.state != ResourceState::Deleted)
        .count();
    if leftovers > 0 {
        warn!("⚠️  {} resources still provisioned at exit", leftovers);
    }
    info!("{} jobs tracked this run", scheduler.job_count().await);

    info!("👋 Gantry stopped");
    Ok(())
}

/// Submit every request in a plan file for parallel provisioning
async fn apply_plan(engine: &Arc<Orchestrator>, path: &str) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(path)?;
    let requests: Vec<ProvisionRequest> = serde_json::from_str(&text)?;
    info!("🏗️  Applying provision plan: {} deployments", requests.len());
    for req in requests {
        engine.spawn_provision(req).await;
    }
    Ok(())
}

/// Parse and validate a manifest, reporting what it would provision
fn validate_manifest(path: String) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&path)?;
    let manifest: Manifest = serde_json::from_str(&text)?;
    manifest.validate()?;

    let total = manifest.aggregate_resources();
    println!("✅ {} is valid", path);
    println!(
        "   services: {}, networks: {}, volumes: {}",
        manifest.services.len(),
        manifest.networks.len(),
        manifest.volumes.len()
    );
    println!(
        "   aggregate: {} cores, {:.1} GiB memory, {} GPUs",
        total.cpu_millis as f64 / 1000.0,
        total.memory_bytes as f64 / (1024.0 * 1024.0 * 1024.0),
        total.gpu_units
    );
    Ok(())
}
