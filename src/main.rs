use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use ragkit::config::{load_repo_config, IndexOptions, SearchOptions};
use ragkit::indexer::{clear_folder, get_status, Indexer};
use ragkit::provider_model2vec::{StaticModelProvider, DEFAULT_EMBED_MODEL};
use ragkit::searcher::Searcher;
use ragkit::types::IndexPhase;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ragkit")]
#[command(version)]
#[command(about = "Incremental RAG indexing and similarity search for source trees")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scan, chunk, and embed a folder into its local index
    Index {
        /// Folder to index (defaults to the current directory)
        path: Option<PathBuf>,

        /// HuggingFace model repo ID for the local embedding model
        #[arg(long, value_name = "MODEL_ID")]
        model: Option<String>,

        /// Redirect the .rag-ts storage directory to another folder
        #[arg(long, value_name = "DIR")]
        output: Option<PathBuf>,

        /// Concurrent file-processing tasks
        #[arg(long)]
        concurrency: Option<usize>,

        /// Texts per embedding request
        #[arg(long)]
        batch_size: Option<usize>,

        /// Skip files larger than this many bytes
        #[arg(long)]
        max_file_size: Option<u64>,
    },

    /// Rank indexed chunks against a query
    Search {
        query: String,

        /// Folder to search (defaults to the current directory)
        #[arg(long, short = 'p')]
        path: Option<PathBuf>,

        #[arg(long, value_name = "MODEL_ID")]
        model: Option<String>,

        #[arg(long, value_name = "DIR")]
        output: Option<PathBuf>,

        /// Number of matches to return
        #[arg(long, short = 'k')]
        top_k: Option<usize>,

        /// Print the raw JSON result instead of a listing
        #[arg(long)]
        json: bool,
    },

    /// Print a ready-to-paste context block for a query
    Context {
        query: String,

        #[arg(long, short = 'p')]
        path: Option<PathBuf>,

        #[arg(long, value_name = "MODEL_ID")]
        model: Option<String>,

        #[arg(long, value_name = "DIR")]
        output: Option<PathBuf>,

        #[arg(long, short = 'k')]
        top_k: Option<usize>,
    },

    /// Show index freshness and drift for a folder
    Status {
        path: Option<PathBuf>,

        #[arg(long, value_name = "DIR")]
        output: Option<PathBuf>,
    },

    /// Drop the folder's index and its storage directory
    Clear {
        path: Option<PathBuf>,

        #[arg(long, value_name = "DIR")]
        output: Option<PathBuf>,
    },
}

fn folder_or_cwd(path: Option<PathBuf>) -> Result<PathBuf> {
    match path {
        Some(p) => Ok(p),
        None => std::env::current_dir().context("Failed to get current dir"),
    }
}

fn load_provider(folder: &std::path::Path, cli_model: Option<&str>) -> Result<Arc<StaticModelProvider>> {
    let repo_cfg = load_repo_config(folder);
    let model_id = cli_model
        .or(repo_cfg.embed_model.as_deref())
        .unwrap_or(DEFAULT_EMBED_MODEL);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} loading embedding model...")
            .expect("static template"),
    );
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));
    let provider = StaticModelProvider::load(model_id)
        .with_context(|| format!("Failed to load embedding model {model_id}"))?;
    spinner.finish_with_message("model ready");
    Ok(Arc::new(provider))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Index {
            path,
            model,
            output,
            concurrency,
            batch_size,
            max_file_size,
        } => {
            let folder = folder_or_cwd(path)?;
            let repo_cfg = load_repo_config(&folder);
            let provider = load_provider(&folder, model.as_deref())?;
            let indexer = Indexer::new(provider);

            let bar = ProgressBar::new(0);
            bar.set_style(
                ProgressStyle::with_template("{spinner} {msg} [{bar:30}] {pos}/{len}")
                    .expect("static template"),
            );
            let bar_for_progress = bar.clone();
            let options = IndexOptions {
                include_extensions: repo_cfg.include_extensions,
                exclude_folders: repo_cfg.exclude_folders,
                max_file_size: max_file_size.or(repo_cfg.max_file_size),
                concurrency,
                embed_batch_size: batch_size,
                output_folder: output,
                cancel: None,
                on_progress: Some(Arc::new(move |status| {
                    bar_for_progress.set_length(status.files_to_embed.max(1) as u64);
                    bar_for_progress.set_position(status.embedded_files as u64);
                    bar_for_progress.set_message(format!("{:?}", status.phase).to_lowercase());
                })),
            };

            let status = indexer.index(&folder, options).await;
            bar.finish_and_clear();

            println!("{}", serde_json::to_string_pretty(&status)?);
            if status.phase == IndexPhase::Error {
                anyhow::bail!(
                    "indexing failed: {}",
                    status.message.as_deref().unwrap_or("unknown error")
                );
            }
        }

        Command::Search {
            query,
            path,
            model,
            output,
            top_k,
            json,
        } => {
            let folder = folder_or_cwd(path)?;
            let provider = load_provider(&folder, model.as_deref())?;
            let searcher = Searcher::new(provider);
            let options = SearchOptions {
                top_k,
                output_folder: output,
            };
            let result = searcher.search(&folder, &query, &options).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                if result.matches.is_empty() {
                    eprintln!("no matches ({} chunks searched)", result.total_chunks);
                }
                for m in &result.matches {
                    println!("{:.3}  {}", m.score, m.file_path);
                }
            }
        }

        Command::Context {
            query,
            path,
            model,
            output,
            top_k,
        } => {
            let folder = folder_or_cwd(path)?;
            let provider = load_provider(&folder, model.as_deref())?;
            let searcher = Searcher::new(provider);
            let options = SearchOptions {
                top_k,
                output_folder: output,
            };
            let block = searcher
                .get_context_for_query(&folder, &query, &options)
                .await?;
            print!("{block}");
        }

        Command::Status { path, output } => {
            let folder = folder_or_cwd(path)?;
            let status = get_status(&folder, output.as_deref()).await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }

        Command::Clear { path, output } => {
            let folder = folder_or_cwd(path)?;
            clear_folder(&folder, output.as_deref()).await;
            eprintln!("cleared index for {}", folder.display());
        }
    }

    Ok(())
}
