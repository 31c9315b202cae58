use clap::{Args, Parser, Subcommand};
use ragstore::Result;
use ragstore::commands::{
    ConfigOverrides, add_document, check_consistency, clear_all, configure, delete_document, init,
    list_documents, query_document, query_root, show_config, show_info,
};
use ragstore::config::get_config_dir;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ragstore")]
#[command(about = "Two-level vector retrieval store for document summaries and chunks")]
#[command(version)]
struct Cli {
    /// Configuration directory (defaults to the platform config dir)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Default)]
struct SettingsArgs {
    /// Directory holding the indexes and metadata
    #[arg(long)]
    data_root: Option<PathBuf>,
    /// Length of every summary and chunk vector
    #[arg(long)]
    embedding_length: Option<usize>,
    /// Default number of documents returned by root queries
    #[arg(long)]
    top_k_documents: Option<usize>,
    /// Default number of chunks returned per document
    #[arg(long)]
    top_k_chunks: Option<usize>,
}

impl From<SettingsArgs> for ConfigOverrides {
    fn from(args: SettingsArgs) -> Self {
        Self {
            data_root: args.data_root,
            embedding_length: args.embedding_length,
            top_k_documents: args.top_k_documents,
            top_k_chunks: args.top_k_chunks,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Write the configuration and create the data root
    Init {
        #[command(flatten)]
        settings: SettingsArgs,
    },
    /// Change stored settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
        #[command(flatten)]
        settings: SettingsArgs,
    },
    /// List all indexed documents
    List,
    /// Show stored info for one document, or all of them
    Info {
        document_id: Option<String>,
    },
    /// Add a document from a JSON request file ("-" for stdin)
    Add {
        request: PathBuf,
    },
    /// Delete a document and all of its chunks
    Delete {
        document_id: String,
    },
    /// Remove every document
    Clear,
    /// Find the documents whose summaries are nearest to a query vector
    QueryRoot {
        request: PathBuf,
    },
    /// Find the nearest chunks within the given documents
    QueryDocument {
        request: PathBuf,
    },
    /// Check that the vector index and metadata store agree
    Check {
        /// Remove orphaned vectors, sub-indexes and chunk tables
        #[arg(long)]
        repair: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => get_config_dir().map_err(|e| ragstore::EngineError::Config(e.to_string()))?,
    };

    match cli.command {
        Commands::Init { settings } => {
            init(&config_dir, &settings.into())?;
        }
        Commands::Config { show, settings } => {
            if show {
                show_config(&config_dir)?;
            } else {
                configure(&config_dir, &settings.into())?;
            }
        }
        Commands::List => {
            list_documents(&config_dir).await?;
        }
        Commands::Info { document_id } => {
            show_info(&config_dir, document_id.as_deref()).await?;
        }
        Commands::Add { request } => {
            add_document(&config_dir, &request).await?;
        }
        Commands::Delete { document_id } => {
            delete_document(&config_dir, &document_id).await?;
        }
        Commands::Clear => {
            clear_all(&config_dir).await?;
        }
        Commands::QueryRoot { request } => {
            query_root(&config_dir, &request).await?;
        }
        Commands::QueryDocument { request } => {
            query_document(&config_dir, &request).await?;
        }
        Commands::Check { repair } => {
            check_consistency(&config_dir, repair).await?;
        }
    }

    Ok(())
}
