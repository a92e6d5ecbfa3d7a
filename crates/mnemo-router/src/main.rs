//! Mnemo Router - route memory operations to tiers from the command line

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use mnemo_router::MemoryOrchestrator;
use mnemo_router::config::Config;
use mnemo_router::error::Result;
use mnemo_router::memory::{ConsistencyLevel, OperationKind, RoutingContext, Tier, Urgency};
use mnemo_router::store::{InMemoryTierStore, TierStore, TierStores};

/// Mnemo Router - decides which memory tier serves an operation
#[derive(Parser)]
#[command(name = "mnemo-router")]
#[command(about = "Tier routing, policy evaluation and admission control for Mnemo memory")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Route one operation and print the decision as JSON
    Route {
        /// Operation kind (store, retrieve, search, update, delete, compress, health, stats)
        operation: OperationKind,

        /// Content to store, or the query to search for
        #[arg(long)]
        content: Option<String>,

        /// Storage key the operation targets
        #[arg(long)]
        key: Option<String>,

        /// Preferred tier hint
        #[arg(long)]
        tier: Option<Tier>,

        #[arg(long, value_enum)]
        urgency: Option<UrgencyArg>,

        #[arg(long, value_enum)]
        consistency: Option<ConsistencyArg>,

        #[arg(long)]
        user: Option<String>,

        #[arg(long)]
        session: Option<String>,

        /// Content type used for retention (e.g. conversation, fact)
        #[arg(long)]
        content_type: Option<String>,
    },

    /// Load and validate the configuration
    #[command(name = "check-config")]
    CheckConfig,

    /// Run sample operations against in-memory stores and print metrics (default command)
    Demo,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum UrgencyArg {
    Low,
    Normal,
    High,
    Critical,
}

impl From<UrgencyArg> for Urgency {
    fn from(arg: UrgencyArg) -> Self {
        match arg {
            UrgencyArg::Low => Urgency::Low,
            UrgencyArg::Normal => Urgency::Normal,
            UrgencyArg::High => Urgency::High,
            UrgencyArg::Critical => Urgency::Critical,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ConsistencyArg {
    Eventual,
    Strong,
}

impl From<ConsistencyArg> for ConsistencyLevel {
    fn from(arg: ConsistencyArg) -> Self {
        match arg {
            ConsistencyArg::Eventual => ConsistencyLevel::Eventual,
            ConsistencyArg::Strong => ConsistencyLevel::Strong,
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = load_config(cli.config)?;

    match cli.command {
        Some(Command::Route {
            operation,
            content,
            key,
            tier,
            urgency,
            consistency,
            user,
            session,
            content_type,
        }) => {
            let mut ctx = RoutingContext::new(operation);
            ctx.content = content;
            ctx.hints.preferred_tier = tier;
            ctx.hints.urgency = urgency.map(Urgency::from);
            ctx.hints.consistency = consistency.map(ConsistencyLevel::from);
            ctx.metadata.key = key;
            ctx.metadata.user_id = user;
            ctx.metadata.session_id = session;
            ctx.metadata.content_type = content_type;
            route(config, ctx).await
        }
        Some(Command::CheckConfig) => check_config(&config),
        None | Some(Command::Demo) => demo(config).await,
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,mnemo_router=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    if let Some(path) = config_path {
        tracing::info!("Loading config from: {}", path.display());
        return Config::from_file(&path);
    }

    let default_paths = [
        dirs::home_dir().map(|h| h.join(".mnemo").join("router.toml")),
        dirs::config_dir().map(|c| c.join("mnemo").join("router.toml")),
        Some(PathBuf::from("router.toml")),
    ];

    for path in default_paths.iter().flatten() {
        if path.exists() {
            tracing::info!("Loading config from: {}", path.display());
            return Config::from_file(path);
        }
    }

    tracing::info!("No config file found, using defaults");
    let config = Config::default();
    config.validate()?;
    Ok(config)
}

async fn route(config: Config, ctx: RoutingContext) -> Result<()> {
    let orchestrator = MemoryOrchestrator::new(config)?;
    orchestrator.initialize()?;

    let decision = orchestrator.route(&ctx).await?;
    println!("{}", serde_json::to_string_pretty(&decision)?);

    orchestrator.shutdown()
}

fn check_config(config: &Config) -> Result<()> {
    config.validate()?;
    let orchestrator = &config.orchestrator;
    let functions: Vec<&str> = orchestrator
        .scoring
        .iter()
        .filter(|f| f.enabled)
        .map(|f| f.name.as_str())
        .collect();

    println!("Configuration is valid");
    println!("  routing enabled:   {}", orchestrator.enabled);
    println!("  algorithm:         {}", orchestrator.algorithm.as_str());
    println!("  default tier:      {}", orchestrator.default_tier);
    println!("  scoring functions: {}", functions.join(", "));
    println!("  acquire timeout:   {}ms", orchestrator.acquire_timeout_ms);
    println!("  policy enabled:    {}", config.policy.enabled);
    println!("  analysis enabled:  {}", config.analysis.enabled);
    println!(
        "  idempotency:       {} (ttl {}s, {} entries)",
        config.idempotency.enabled, config.idempotency.ttl_secs, config.idempotency.max_entries
    );
    Ok(())
}

async fn demo(config: Config) -> Result<()> {
    tracing::info!("Starting demo against in-memory stores");

    let orchestrator = MemoryOrchestrator::new(config)?;
    orchestrator.initialize()?;

    let stores: TierStores = Tier::ALL
        .into_iter()
        .map(|tier| (tier, Arc::new(InMemoryTierStore::new(tier)) as Arc<dyn TierStore>))
        .collect();

    let requests = [
        RoutingContext::new(OperationKind::Store)
            .with_key("standup")
            .with_content("Standup moved to 10am on Tuesdays")
            .with_session("demo"),
        RoutingContext::new(OperationKind::Store)
            .with_key("project-notes")
            .with_content(
                "Mnemo stores facts in the semantic tier and events in the episodic tier. \
                 Working memory holds the scratch state of the current conversation and is \
                 dropped when the session ends.",
            )
            .with_content_type("fact")
            .with_preferred_tier(Tier::Semantic),
        // Duplicate of the first request; replayed from the idempotency cache
        RoutingContext::new(OperationKind::Store)
            .with_key("standup")
            .with_content("Standup moved to 10am on Tuesdays")
            .with_session("demo"),
        RoutingContext::new(OperationKind::Search).with_content("semantic"),
        RoutingContext::new(OperationKind::Retrieve)
            .with_key("standup")
            .with_preferred_tier(Tier::Working),
        RoutingContext::new(OperationKind::Stats).with_urgency(Urgency::High),
    ];

    for ctx in &requests {
        match orchestrator.execute(ctx, &stores).await {
            Ok(execution) => tracing::info!(
                operation = %ctx.operation,
                served_by = %execution.served_by(),
                success = execution.result.success,
                replayed = execution.replayed,
                "Demo operation finished"
            ),
            Err(e) => tracing::warn!(operation = %ctx.operation, error = %e, "Demo operation failed"),
        }
    }

    println!("{}", serde_json::to_string_pretty(&orchestrator.get_metrics())?);
    orchestrator.shutdown()
}
