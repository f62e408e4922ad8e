#![forbid(unsafe_code)]

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scout_review::config::{GlobalConfig, PipelineStagesConfig, ReviewConfig, TabConfig};
use scout_review::cost_tracker::CostTracker;
use scout_review::history::{HistoryStore, Rating};
use scout_review::personality::Catalog;
use scout_review::pipeline::{CompletedMatch, ProgressEvent};
use scout_review::service::{GenerateParams, HttpClientFactory, ReviewService};
use scout_review::store::{ConfigStore, Database};

#[derive(Parser)]
#[command(name = "scout-review", version, about = "Generate and manage match reviews")]
struct Cli {
    /// SQLite database (defaults to SCOUT_REVIEW_DB or .scout_review.sqlite)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a review for a finished match
    Generate {
        /// Raw match-v5 JSON
        #[arg(long)]
        raw_match: PathBuf,
        /// Raw match-v5 timeline JSON
        #[arg(long)]
        raw_timeline: PathBuf,
        /// Pre-extracted match facts; otherwise derived from --raw-match and --player
        #[arg(long = "match")]
        match_file: Option<PathBuf>,
        /// Player puuid or Riot ID game name
        #[arg(long)]
        player: Option<String>,
        /// Personality id; defaults to the tab or global setting
        #[arg(long)]
        personality: Option<String>,
        /// Directory with personalities/ and art-styles/
        #[arg(long)]
        catalog: PathBuf,
        /// Stage configuration JSON; defaults to the tab or global setting
        #[arg(long)]
        stages: Option<PathBuf>,
        /// Tab whose saved settings apply
        #[arg(long)]
        tab: Option<String>,
        /// Where to write the generated image (PNG)
        #[arg(long)]
        image_out: Option<PathBuf>,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Browse and annotate saved reviews
    History {
        #[command(subcommand)]
        command: HistoryCommands,
    },
    /// Accumulated provider costs
    Costs {
        #[command(subcommand)]
        command: CostCommands,
    },
    /// Saved global and per-tab settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum HistoryCommands {
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    Show {
        id: String,
    },
    Rate {
        id: String,
        /// 1-4
        rating: u8,
        #[arg(long)]
        notes: Option<String>,
    },
    Delete {
        id: String,
    },
    Clear,
}

#[derive(Subcommand)]
enum CostCommands {
    Show,
    Export {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    Clear,
}

#[derive(Subcommand)]
enum ConfigCommands {
    Show {
        #[arg(long)]
        tab: Option<String>,
    },
    SetPersonality {
        id: String,
        #[arg(long)]
        tab: Option<String>,
    },
    SetStages {
        file: PathBuf,
        #[arg(long)]
        tab: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scout_review=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    let mut config = ReviewConfig::from_env()?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    let db = Database::open(&config.db_path)?;

    let mut history = HistoryStore::new(db.clone(), config.max_history_entries);
    if let Some(path) = &config.legacy_history_path {
        history = history.with_legacy_source(path);
    }
    let history = Arc::new(history);
    let costs = Arc::new(CostTracker::new(db.clone()));
    let config_store = ConfigStore::new(db);

    match cli.command {
        Commands::Generate {
            raw_match,
            raw_timeline,
            match_file,
            player,
            personality,
            catalog,
            stages,
            tab,
            image_out,
            json,
        } => {
            let global = config_store.global().await;
            let tab_config = match &tab {
                Some(id) => config_store.tab(id).await,
                None => TabConfig::default(),
            };
            let (saved_personality, saved_stages) = global.resolve(&tab_config);

            let raw_match: serde_json::Value = read_json(&raw_match)?;
            let raw_timeline: serde_json::Value = read_json(&raw_timeline)?;
            let game: CompletedMatch = match (match_file, player) {
                (Some(path), _) => read_json(&path)?,
                (None, Some(player)) => CompletedMatch::from_raw(&raw_match, &player)?,
                (None, None) => return Err("either --match or --player is required".into()),
            };
            let stages: PipelineStagesConfig = match stages {
                Some(path) => read_json(&path)?,
                None => saved_stages,
            };

            let catalog = Catalog::load_dir(&catalog)?;
            let personality_id = personality
                .or(saved_personality)
                .ok_or("no personality given and none saved")?;
            let personality = catalog.personality(&personality_id)?.clone();

            let params = GenerateParams {
                game,
                raw_match: Some(raw_match),
                raw_timeline: Some(raw_timeline),
                personality,
                art_styles: catalog.art_styles().to_vec(),
                stages,
                openai_api_key: config.openai_api_key.clone().or(global.openai_api_key),
                gemini_api_key: config.gemini_api_key.clone().or(global.gemini_api_key),
            };

            let service = ReviewService::new(
                Arc::new(HttpClientFactory::from_config(&config)),
                history,
                costs,
            )
            .with_progress(Arc::new(|id: &str, event: &ProgressEvent| {
                eprintln!("{}", progress_line(id, event));
            }));

            let (id, mut handle) = service.start_generation(params)?;
            let mut ticks = service.ticker().subscribe();
            let result = loop {
                tokio::select! {
                    joined = &mut handle => break joined?,
                    Some(_) = ticks.tick() => {
                        if let Some(g) = service.active_generations().into_iter().find(|g| g.id == id) {
                            eprintln!("[{id}] {}s elapsed", g.elapsed.as_secs());
                        }
                    }
                }
            };
            drop(ticks);

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if let Some(err) = &result.error {
                eprintln!("generation failed: {err}");
            } else {
                println!("{}", result.text);
                if let Some(cost) = &result.metadata.cost {
                    eprintln!("cost: ${:.6}", cost.total.total_cost());
                }
            }

            if let (Some(path), Some(image)) = (image_out, &result.image) {
                let bytes = base64::engine::general_purpose::STANDARD.decode(image)?;
                std::fs::write(&path, bytes)?;
                eprintln!("image written to {}", path.display());
            }
            eprintln!("saved as {id}");
        }
        Commands::History { command } => match command {
            HistoryCommands::List { limit } => {
                for entry in history.load_all().await.into_iter().take(limit) {
                    let preview: String = entry.result.text.chars().take(60).collect();
                    println!(
                        "{}  {}  {:<8}  {}  {}",
                        entry.id,
                        entry.timestamp.format("%Y-%m-%d %H:%M"),
                        entry.status.as_str(),
                        entry
                            .rating
                            .map(|r| format!("{}/4", r.get()))
                            .unwrap_or_else(|| "-".into()),
                        preview.replace('\n', " "),
                    );
                }
            }
            HistoryCommands::Show { id } => match history.get(&id).await {
                Some(entry) => println!("{}", serde_json::to_string_pretty(&entry)?),
                None => return Err(format!("no history entry {id}").into()),
            },
            HistoryCommands::Rate { id, rating, notes } => {
                let rating = Rating::try_from(rating)?;
                history.update_rating(&id, rating, notes).await;
            }
            HistoryCommands::Delete { id } => {
                if !history.delete(&id).await {
                    eprintln!("no history entry {id}");
                }
            }
            HistoryCommands::Clear => history.clear().await,
        },
        Commands::Costs { command } => match command {
            CostCommands::Show => {
                let snap = costs.load_snapshot().await;
                println!(
                    "{} generations, ${:.6} total",
                    snap.count,
                    snap.total.total_cost()
                );
            }
            CostCommands::Export { out } => {
                let report = costs.export().await;
                match out {
                    Some(path) => std::fs::write(path, report)?,
                    None => io::stdout().write_all(report.as_bytes())?,
                }
            }
            CostCommands::Clear => costs.clear().await,
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show { tab } => {
                let global = config_store.global().await;
                let redacted = GlobalConfig {
                    openai_api_key: global.openai_api_key.as_ref().map(|_| "***".into()),
                    gemini_api_key: global.gemini_api_key.as_ref().map(|_| "***".into()),
                    ..global
                };
                println!("{}", serde_json::to_string_pretty(&redacted)?);
                if let Some(tab) = tab {
                    let tab_config = config_store.tab(&tab).await;
                    println!("{}", serde_json::to_string_pretty(&tab_config)?);
                }
            }
            ConfigCommands::SetPersonality { id, tab } => match tab {
                Some(tab) => {
                    let mut tab_config = config_store.tab(&tab).await;
                    tab_config.personality = Some(id);
                    config_store.save_tab(&tab, &tab_config).await?;
                }
                None => {
                    let mut global = config_store.global().await;
                    global.default_personality = Some(id);
                    config_store.save_global(&global).await?;
                }
            },
            ConfigCommands::SetStages { file, tab } => {
                let stages: PipelineStagesConfig = read_json(&file)?;
                match tab {
                    Some(tab) => {
                        let mut tab_config = config_store.tab(&tab).await;
                        tab_config.stages = Some(stages);
                        config_store.save_tab(&tab, &tab_config).await?;
                    }
                    None => {
                        let mut global = config_store.global().await;
                        global.stages = Some(stages);
                        config_store.save_global(&global).await?;
                    }
                }
            }
        },
    }

    Ok(())
}

fn progress_line(id: &str, event: &ProgressEvent) -> String {
    let stage = match (event.current_stage, event.total_stages) {
        (Some(c), Some(t)) => format!(" [{c}/{t}]"),
        _ => String::new(),
    };
    format!("[{id}]{stage} {}", event.message)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    Ok(serde_json::from_str(&raw).map_err(|e| format!("invalid JSON in {}: {e}", path.display()))?)
}
