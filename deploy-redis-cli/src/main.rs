//! deploy-redis - push index files to Redis and switch the live revision
//!
//! Lightning-style deploys: every build's `index.html` is stored under a
//! revision key and a single pointer key decides which one is served.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use deploy_redis_core::{
    DeployConfigFile, DeployContext, DeployPlugin, MemoryStore, PluginConfig, RevisionData,
    RevisionRecord,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "deploy-redis")]
#[command(author = "deploy-redis Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Upload, activate and list index.html revisions stored in Redis", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalOpts,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct GlobalOpts {
    /// Config file (TOML); missing file means all defaults
    #[arg(short, long, global = true, default_value = "config/deploy.toml")]
    config: PathBuf,

    /// Project name used for the default key prefix
    #[arg(short, long, global = true)]
    project: Option<String>,

    /// Build output directory
    #[arg(long, global = true, default_value = "dist")]
    dist_dir: PathBuf,

    /// Local port of an SSH tunnel to Redis
    #[arg(long, global = true)]
    tunnel_port: Option<u16>,

    /// Storage backend
    #[arg(long, global = true, value_enum, default_value_t = Backend::Redis)]
    backend: Backend,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Backend {
    Redis,
    /// Throwaway in-process store, useful for dry runs
    Memory,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upload index files as a new revision
    Upload {
        /// Deploy target (selects `[targets.<name>]` in the config)
        target: String,

        #[arg(short, long)]
        revision: Option<String>,

        /// Extra revision data as a JSON object
        #[arg(long)]
        revision_data: Option<String>,
    },

    /// Make an uploaded revision the active one
    Activate {
        target: String,

        #[arg(short, long)]
        revision: String,
    },

    /// List recent revisions, newest first
    List {
        target: String,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Upload, optionally activate, then report
    Deploy {
        target: String,

        #[arg(short, long)]
        revision: Option<String>,

        /// Activate the revision right after uploading it
        #[arg(short, long)]
        activate: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = if cli.global.debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    match cli.command {
        Commands::Upload {
            target,
            revision,
            revision_data,
        } => {
            let mut context = build_context(&cli.global, &target);
            if let Some(json) = revision_data {
                let data: RevisionData =
                    serde_json::from_str(&json).context("--revision-data must be a JSON object")?;
                context.revision_data.merge(data);
            }
            context.command_revision = revision;

            let plugin = build_plugin(&cli.global, &context).await?;
            let uploaded = plugin.upload().await?;
            for file in &uploaded {
                println!("Uploaded {} -> {}", file.path, file.redis_key);
            }
        }

        Commands::Activate { target, revision } => {
            let mut context = build_context(&cli.global, &target);
            context.command_revision = Some(revision);

            let plugin = build_plugin(&cli.global, &context).await?;
            let previous = plugin.will_activate().await?;
            let activated = plugin.activate().await?;

            println!(
                "Activated {} (previous: {})",
                activated.activated_revision_key.as_deref().unwrap_or("-"),
                previous.previous_revision_key.as_deref().unwrap_or("none"),
            );
        }

        Commands::List { target, json } => {
            let context = build_context(&cli.global, &target);
            let plugin = build_plugin(&cli.global, &context).await?;
            let revisions = plugin.fetch_revisions().await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&revisions)?);
            } else {
                print_revisions(plugin.config().key_prefix.value(), &revisions);
            }
        }

        Commands::Deploy {
            target,
            revision,
            activate,
        } => {
            let mut context = build_context(&cli.global, &target);
            context.command_revision = revision.clone();
            context.revision_data.revision_key = revision;

            let plugin = build_plugin(&cli.global, &context).await?;
            let initial = plugin.fetch_initial_revisions().await?;
            debug!("{} revisions before deploy", initial.len());

            plugin.upload().await?;

            if activate {
                let previous = plugin.will_activate().await?;
                context.revision_data.merge(previous);
                let activated = plugin.activate().await?;
                context.revision_data.merge(activated);
            }

            if let Some(message) = plugin.did_deploy(&context) {
                print!("{}", message);
            }
        }
    }

    Ok(())
}

/// Deploy context from the global flags
fn build_context(global: &GlobalOpts, target: &str) -> DeployContext {
    let project = global.project.clone().unwrap_or_else(default_project_name);
    let mut context = DeployContext::new(project, target);
    context.dist_dir = global.dist_dir.clone();
    context.tunnel_port = global.tunnel_port;
    context
}

/// Resolve the config for the context's target and open the backend
async fn build_plugin(global: &GlobalOpts, context: &DeployContext) -> Result<DeployPlugin> {
    let config = load_config(&global.config, &context.deploy_target)?;
    let resolved = DeployPlugin::configure(&config, context)
        .with_context(|| format!("Invalid config for target `{}`", context.deploy_target))?;

    match global.backend {
        Backend::Memory => {
            info!("Using in-memory backend");
            Ok(DeployPlugin::with_store(resolved, Arc::new(MemoryStore::new())))
        }
        Backend::Redis => DeployPlugin::connect(resolved)
            .await
            .context("Failed to connect to Redis"),
    }
}

fn load_config(path: &Path, target: &str) -> Result<PluginConfig> {
    if !path.exists() {
        debug!("No config file at {}, using defaults", path.display());
        return Ok(PluginConfig::default());
    }

    let file = DeployConfigFile::load(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    Ok(file.for_target(target)?)
}

/// Name of the current directory, the usual project name
fn default_project_name() -> String {
    std::env::current_dir()
        .ok()
        .and_then(|dir| dir.file_name().map(|name| name.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "app".to_string())
}

fn print_revisions(key_prefix: &str, revisions: &[RevisionRecord]) {
    if revisions.is_empty() {
        println!("No revisions found under {}", key_prefix);
        return;
    }

    println!("Revisions under {}", key_prefix);
    println!("   {:<40} {}", "REVISION", "DATA");
    for record in revisions {
        let marker = if record.active { "=>" } else { "  " };
        let data = record
            .revision_data
            .as_ref()
            .map(|value| value.to_string())
            .unwrap_or_default();
        println!("{} {:<40} {}", marker, record.revision, data);
    }
}
