//! Kura asset library CLI
//!
//! Manage the asset library and run semantic lookups against it from the
//! command line. Embedding and arbitration go through an Ollama server.

mod table;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use kura::ollama::{OllamaArbiter, OllamaConfig, OllamaEmbedder};
use kura::{
    AssetId, AssetPatch, DEFAULT_THRESHOLD, DEFAULT_TOP_K, LibraryConfig, LibraryManager,
    NewAsset, ReconcileMode, RetrievalConfig, Retriever,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Default library directory
fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("kura")
}

/// CLI arguments
#[derive(Parser)]
#[command(name = "kura")]
#[command(about = "Semantic asset library and retrieval cache")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Library directory
    #[arg(short = 'D', long, env = "KURA_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// JSON library configuration file
    #[arg(short, long, env = "KURA_CONFIG")]
    config: Option<PathBuf>,

    /// Ollama server URL
    #[arg(long, env = "KURA_OLLAMA_URL", default_value = kura::ollama::DEFAULT_BASE_URL)]
    ollama_url: String,

    /// Embedding model
    #[arg(long, env = "KURA_EMBED_MODEL", default_value = kura::ollama::DEFAULT_EMBED_MODEL)]
    embed_model: String,

    /// Arbitration model
    #[arg(long, env = "KURA_ARBITER_MODEL", default_value = kura::ollama::DEFAULT_ARBITER_MODEL)]
    arbiter_model: String,

    /// Similarity threshold for coarse recall
    #[arg(short, long, env = "KURA_THRESHOLD", default_value_t = DEFAULT_THRESHOLD)]
    threshold: f32,

    /// Number of neighbours considered during coarse recall
    #[arg(short = 'k', long, env = "KURA_TOP_K", default_value_t = DEFAULT_TOP_K)]
    top_k: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// List every asset
    List,
    /// Show one asset
    Get {
        /// Asset id
        id: AssetId,
    },
    /// Add an asset
    Add {
        name: String,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(short, long)]
        image: Option<String>,
        #[arg(short, long)]
        mesh: Option<String>,
    },
    /// Change fields of an asset
    Update {
        id: AssetId,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(short, long)]
        image: Option<String>,
        #[arg(short, long)]
        mesh: Option<String>,
    },
    /// Delete an asset
    Delete { id: AssetId },
    /// Find an asset matching a description
    Find { description: String },
    /// Import one asset per sub-directory of PATH
    Import { path: PathBuf },
    /// Compare the record store with the similarity index
    Reconcile {
        /// Re-embed missing or stale entries and drop orphans
        #[arg(short, long)]
        repair: bool,
    },
    /// Delete every asset
    Clear {
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

impl Cli {
    fn library_config(&self) -> Result<LibraryConfig> {
        let mut config = match &self.config {
            Some(path) => LibraryConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => LibraryConfig::new(default_data_dir()),
        };
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        // An explicit reconcile replaces the one run on open.
        if matches!(self.command, Commands::Reconcile { .. }) {
            config.reconcile_on_open = false;
        }
        Ok(config)
    }

    fn ollama_config(&self) -> OllamaConfig {
        OllamaConfig::new()
            .with_base_url(self.ollama_url.clone())
            .with_embed_model(self.embed_model.clone())
            .with_arbiter_model(self.arbiter_model.clone())
    }

    fn retrieval_config(&self) -> RetrievalConfig {
        RetrievalConfig::new()
            .with_top_k(self.top_k)
            .with_threshold(self.threshold)
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N]: ");
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let library_config = cli.library_config()?;
    let ollama_config = cli.ollama_config();
    let retrieval_config = cli.retrieval_config();

    let embedder = Arc::new(
        OllamaEmbedder::new(ollama_config.clone()).context("Failed to build HTTP client")?,
    );
    let library = LibraryManager::open(&library_config, embedder)
        .await
        .with_context(|| {
            format!(
                "Failed to open library at {}",
                library_config.data_dir.display()
            )
        })?;
    let library = Arc::new(library);

    match cli.command {
        Commands::List => {
            let assets = library.list_assets()?;
            print!("{}", table::render(&assets));
        }
        Commands::Get { id } => match library.get_asset_by_id(id).await? {
            Some(record) => println!("{record}"),
            None => bail!("Asset {id} not found"),
        },
        Commands::Add {
            name,
            description,
            image,
            mesh,
        } => {
            let asset = NewAsset {
                name,
                description,
                image_path: image,
                mesh_path: mesh,
            };
            let id = library.add_asset(asset).await.context("Failed to add asset")?;
            println!("{id}");
        }
        Commands::Update {
            id,
            name,
            description,
            image,
            mesh,
        } => {
            let patch = AssetPatch {
                name,
                description,
                image_path: image,
                mesh_path: mesh,
            };
            let record = library
                .update_asset(id, patch)
                .await
                .with_context(|| format!("Failed to update asset {id}"))?;
            println!("{record}");
        }
        Commands::Delete { id } => {
            if !library.delete_asset_by_id(id).await? {
                bail!("Asset {id} not found");
            }
            info!(id, "Deleted");
        }
        Commands::Find { description } => {
            let arbiter = Arc::new(
                OllamaArbiter::new(ollama_config).context("Failed to build HTTP client")?,
            );
            let retriever = Retriever::new(Arc::clone(&library), arbiter, retrieval_config)?;
            match retriever.find_by_description(&description).await? {
                Some(id) => println!("{id}"),
                None => println!("no match"),
            }
        }
        Commands::Import { path } => {
            let report = library
                .import_directory(&path)
                .await
                .with_context(|| format!("Failed to import {}", path.display()))?;
            println!("{report}");
        }
        Commands::Reconcile { repair } => {
            let mode = if repair {
                ReconcileMode::Repair
            } else {
                ReconcileMode::Detect
            };
            let report = library.reconcile(mode).await?;
            println!("{report}");
        }
        Commands::Clear { yes } => {
            if !yes && !confirm("This will delete every asset in the library. Are you sure?")? {
                info!("Clear cancelled");
                return Ok(());
            }
            let removed = library.clear_database()?;
            info!(removed, "Library cleared");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_data_dir() {
        let dir = default_data_dir();
        assert!(dir.ends_with("kura"));
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_add_arguments() {
        let cli = Cli::try_parse_from([
            "kura",
            "--data-dir",
            "/tmp/lib",
            "add",
            "cube1",
            "-d",
            "a red cube",
            "--mesh",
            "cube.glb",
        ])
        .unwrap();

        assert_eq!(cli.library_config().unwrap().data_dir, PathBuf::from("/tmp/lib"));
        match cli.command {
            Commands::Add {
                name,
                description,
                image,
                mesh,
            } => {
                assert_eq!(name, "cube1");
                assert_eq!(description.as_deref(), Some("a red cube"));
                assert_eq!(image, None);
                assert_eq!(mesh.as_deref(), Some("cube.glb"));
            }
            _ => panic!("expected add"),
        }
    }

    #[test]
    fn test_retrieval_overrides_are_clamped() {
        let cli = Cli::try_parse_from(["kura", "-t", "1.5", "-k", "0", "find", "a red cube"]).unwrap();
        let config = cli.retrieval_config();
        assert_eq!(config.threshold, 1.0);
        assert_eq!(config.top_k, 1);
    }

    #[test]
    fn test_reconcile_skips_reconcile_on_open() {
        let cli = Cli::try_parse_from(["kura", "-D", "/tmp/lib", "reconcile", "--repair"]).unwrap();
        assert!(!cli.library_config().unwrap().reconcile_on_open);

        let cli = Cli::try_parse_from(["kura", "-D", "/tmp/lib", "list"]).unwrap();
        assert!(cli.library_config().unwrap().reconcile_on_open);
    }
}
