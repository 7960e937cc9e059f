mod batch;
mod display;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use mergewise_core::{BusinessRule, ConfigFile};
use mergewise_host::{DeploymentManager, RuleEngine};
use mergewise_rules::{SmartAnalyzer, default_catalog_config};
use mergewise_store::{JsonStore, RuleStore};
use mergewise_sync::ReviewClient;
use tracing_subscriber::EnvFilter;

/// Mergewise: business-rule adjudication of candidate duplicate records.
#[derive(Parser)]
#[command(name = "mergewise", version)]
struct Cli {
    /// Engine and catalog configuration (TOML)
    #[arg(short, long, env = "MERGEWISE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding rules, statistics, and deployments
    #[arg(short, long, env = "MERGEWISE_STORE", default_value = "mergewise-data")]
    store: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the heuristic catalog over a pairs file and summarise
    Analyze {
        /// JSON array of {id1, id2, fuzzy_score, record1, record2}
        pairs: PathBuf,
        /// Print results as JSON instead of cards
        #[arg(long)]
        json: bool,
        /// Send review-band pairs to this scoring service
        #[arg(long, env = "MERGEWISE_REVIEW_URL")]
        escalate: Option<String>,
        /// Concurrent escalation requests
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
    },
    /// Evaluate a pairs file against the deployed dynamic rules
    Evaluate {
        pairs: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Show the heuristic catalog after configuration patches
    Catalog,
    /// List active dynamic rules
    Rules,
    /// Add a sign-off to a rule file (rewritten in place)
    Approve {
        rule: PathBuf,
        #[arg(long)]
        approver: String,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Validate, test, and deploy a rule file
    Deploy {
        rule: PathBuf,
        #[arg(long, default_value = "cli")]
        by: String,
    },
    /// Restore a rule's previous version
    Rollback {
        id: String,
        #[arg(long, default_value = "cli")]
        by: String,
    },
    /// Re-enable a disabled rule
    Enable { id: String },
    /// Disable a rule without removing it
    Disable { id: String },
    /// Per-rule execution statistics
    Stats {
        /// Only this rule
        id: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    tracing::debug!("mergewise v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(cli).await {
        tracing::error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => ConfigFile::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ConfigFile::default(),
    };

    match cli.command {
        Commands::Analyze {
            pairs,
            json,
            escalate,
            concurrency,
        } => cmd_analyze(&config, &pairs, json, escalate, concurrency).await,
        Commands::Evaluate { pairs, json } => {
            let engine = open_engine(&cli.store, &config).await?;
            let pairs = batch::load_pairs(&pairs)?;
            let decisions =
                batch::evaluate_all(&engine, &pairs, &config.engine.environment).await;
            engine.shutdown().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&decisions)?);
            } else {
                for (pair, decision) in pairs.iter().zip(&decisions) {
                    display::print_decision_card(pair, decision);
                }
            }
            Ok(())
        }
        Commands::Catalog => {
            let catalog = default_catalog_config()
                .with_updates(&config.rules)
                .context("applying [rules] patches")?;
            display::print_catalog(&catalog);
            Ok(())
        }
        Commands::Rules => {
            let store = open_store(&cli.store).await?;
            let rules = store.list_active_rules().await?;
            display::print_rules(&rules);
            Ok(())
        }
        Commands::Approve {
            rule,
            approver,
            comment,
        } => {
            let mut payload = read_rule(&rule)?;
            let manager = open_manager(&cli.store, &config).await?;
            manager.approve(&mut payload, &approver, comment.as_deref())?;
            std::fs::write(&rule, serde_json::to_string_pretty(&payload)?)
                .with_context(|| format!("writing {}", rule.display()))?;
            eprintln!(
                "{} now has {} approval(s)",
                payload.id,
                payload.approvals.len()
            );
            Ok(())
        }
        Commands::Deploy { rule, by } => {
            let payload = read_rule(&rule)?;
            let manager = open_manager(&cli.store, &config).await?;
            let status = manager
                .deploy(payload, &by)
                .await
                .with_context(|| format!("deploying {}", rule.display()))?;
            display::print_deployment(&status);
            Ok(())
        }
        Commands::Rollback { id, by } => {
            let manager = open_manager(&cli.store, &config).await?;
            let status = manager
                .rollback(&id, &by)
                .await
                .with_context(|| format!("rolling back {id}"))?;
            display::print_deployment(&status);
            Ok(())
        }
        Commands::Enable { id } => {
            let manager = open_manager(&cli.store, &config).await?;
            let rule = manager.enable(&id).await?;
            eprintln!("{} v{} enabled", rule.id, rule.version);
            Ok(())
        }
        Commands::Disable { id } => {
            let manager = open_manager(&cli.store, &config).await?;
            let rule = manager.disable(&id).await?;
            eprintln!("{} v{} disabled", rule.id, rule.version);
            Ok(())
        }
        Commands::Stats { id } => {
            let store = open_store(&cli.store).await?;
            let mut stats = store.load_statistics().await?;
            if let Some(id) = &id {
                stats.retain(|s| &s.rule_id == id);
            }
            stats.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));
            display::print_statistics(&stats);
            Ok(())
        }
    }
}

async fn cmd_analyze(
    config: &ConfigFile,
    pairs_path: &Path,
    json: bool,
    escalate: Option<String>,
    concurrency: usize,
) -> anyhow::Result<()> {
    let catalog = default_catalog_config()
        .with_updates(&config.rules)
        .context("applying [rules] patches")?;
    let analyzer = SmartAnalyzer::new(&catalog).context("building rule catalog")?;

    let pairs = batch::load_pairs(pairs_path)?;
    eprintln!("  Read {} pairs from {}", pairs.len(), pairs_path.display());
    let (analyses, stats) = batch::analyze_all(&analyzer, &pairs);

    let reviews = match escalate {
        Some(url) => {
            let client = ReviewClient::new(url);
            let results = batch::escalate_all(&client, &pairs, &analyses, concurrency).await;
            results
                .into_iter()
                .zip(&pairs)
                .map(|(r, pair)| {
                    r.unwrap_or_else(|e| {
                        tracing::warn!(id1 = %pair.id1, id2 = %pair.id2, error = %e, "escalation failed");
                        None
                    })
                })
                .collect()
        }
        None => vec![None; pairs.len()],
    };

    let (summary, blocks) = batch::summarize(&pairs, &analyses);
    if json {
        let out = serde_json::json!({
            "analyses": analyses,
            "reviews": reviews,
            "summary": summary,
            "blocks": blocks,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }
    for ((pair, analysis), review) in pairs.iter().zip(&analyses).zip(&reviews) {
        display::print_analysis_card(pair, analysis, review.as_ref());
    }
    display::print_summary(&summary, &blocks, &stats);
    Ok(())
}

fn read_rule(path: &Path) -> anyhow::Result<BusinessRule> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing rule {}", path.display()))
}

async fn open_store(root: &Path) -> anyhow::Result<Arc<JsonStore>> {
    let store = JsonStore::open(root)
        .await
        .with_context(|| format!("opening store {}", root.display()))?;
    Ok(Arc::new(store))
}

async fn open_engine(root: &Path, config: &ConfigFile) -> anyhow::Result<Arc<RuleEngine>> {
    let store = open_store(root).await?;
    let engine = RuleEngine::new(store, config.engine.clone());
    let loaded = engine.initialize().await.context("loading active rules")?;
    tracing::info!(rules = loaded, "engine ready");
    Ok(Arc::new(engine))
}

async fn open_manager(root: &Path, config: &ConfigFile) -> anyhow::Result<DeploymentManager> {
    let store = open_store(root).await?;
    let engine = RuleEngine::new(store.clone(), config.engine.clone());
    engine.initialize().await.context("loading active rules")?;
    Ok(DeploymentManager::new(Arc::new(engine), store))
}
