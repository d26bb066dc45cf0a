//! # Galaxy CLI (`galaxy`)
//!
//! The `galaxy` binary drives the ingestion and knowledge-mapping pipeline:
//! database initialization, document registration, single and batch
//! ingestion, framework mapping, and inspection.
//!
//! ## Usage
//!
//! ```bash
//! galaxy --config ./config/galaxy.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `galaxy init` | Create the SQLite database and run schema migrations |
//! | `galaxy register <path>` | Store file bytes and create a PENDING document |
//! | `galaxy ingest <id>` | Run the pipeline for one document, then map it |
//! | `galaxy run` | Ingest all PENDING documents concurrently |
//! | `galaxy map <id>` | Map a transcribed document onto frameworks |
//! | `galaxy status <id>` | Show a document's state, error, and tags |
//! | `galaxy url <id>` | Print a presigned download URL |
//! | `galaxy remove <id>` | Delete the blob object, remote file, and row |
//! | `galaxy framework add/list` | Manage the framework registry |
//! | `galaxy category add/list` | Manage metadata categories |
//!
//! ## Environment
//!
//! `GEMINI_API_KEY` for the model adapter; `AWS_ACCESS_KEY_ID`,
//! `AWS_SECRET_ACCESS_KEY`, and optionally `AWS_SESSION_TOKEN` for the blob
//! store. All are read once at startup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use galaxy_ingest::blob::{BlobStore, S3BlobStore};
use galaxy_ingest::config::{self, Config};
use galaxy_ingest::ingest::{self, PipelineContext};
use galaxy_ingest::model::{GeminiClient, ModelClient, RemoteRef};
use galaxy_ingest::models::{MappingOutcome, NewDocument};
use galaxy_ingest::store::RecordStore;
use galaxy_ingest::{db, mapper, migrate, runner};

/// Galaxy: a document ingestion and knowledge-mapping pipeline.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/galaxy.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "galaxy",
    about = "Document ingestion and knowledge-mapping pipeline",
    version,
    long_about = "Galaxy ingests heterogeneous documents from blob storage, transcribes and \
    classifies them with a generative model, and maps them onto typed analytical frameworks \
    as consolidated knowledge instances."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/galaxy.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Idempotent.
    Init,

    /// Store a local file in the blob store and register it as a PENDING
    /// document. Stand-in for the upload API.
    Register {
        /// Path to the file to register.
        path: PathBuf,

        /// Organizational scope (department) to attach to the document.
        #[arg(long)]
        scope: Option<String>,
    },

    /// Run the ingestion pipeline for one document, then map it.
    ///
    /// Mapping failures are reported but never affect the document's state.
    Ingest {
        /// Document id.
        id: String,

        /// Re-run a FAILED document or reclaim a run stuck in PROCESSING.
        #[arg(long)]
        force: bool,
    },

    /// Ingest every PENDING document, bounded by `pipeline.max_concurrent`,
    /// mapping each success on a background queue.
    Run {
        /// Also re-run FAILED documents.
        #[arg(long)]
        force: bool,
    },

    /// Run the framework mapper for an already-transcribed document.
    Map {
        /// Document id.
        id: String,
    },

    /// Show a document's state, last stage error, and derived tags.
    Status {
        /// Document id.
        id: String,
    },

    /// Print a presigned download URL for the stored object.
    Url {
        /// Document id.
        id: String,

        /// URL validity in seconds.
        #[arg(long, default_value_t = 3600)]
        ttl: u64,
    },

    /// Delete the blob object, the remote model file, and the document row.
    Remove {
        /// Document id.
        id: String,
    },

    /// Manage the knowledge framework registry.
    Framework {
        #[command(subcommand)]
        action: FrameworkAction,
    },

    /// Manage the document category list fed to the metadata prompt.
    Category {
        #[command(subcommand)]
        action: CategoryAction,
    },
}

/// Framework registry subcommands.
#[derive(Subcommand)]
enum FrameworkAction {
    /// Register an analytical framework.
    Add {
        /// Stable framework code (e.g. `swot`, `persona`).
        code: String,
        /// Human-readable name (e.g. `SWOT Analysis`).
        name: String,
        /// Short description shown to the selection prompt.
        #[arg(long, default_value = "")]
        description: String,
        /// Path to a JSON file declaring the framework's field schema.
        #[arg(long)]
        schema: Option<PathBuf>,
    },
    /// List registered frameworks.
    List,
}

/// Category list subcommands.
#[derive(Subcommand)]
enum CategoryAction {
    /// Add a category name.
    Add { name: String },
    /// List known categories.
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Register { path, scope } => {
            run_register(&cfg, &path, scope).await?;
        }
        Commands::Ingest { id, force } => {
            let ctx = build_context(&cfg).await?;
            let state = ingest::ingest_document(&ctx, &id, force).await?;
            println!("Document {id}: {state}");

            if state == galaxy_ingest::models::DocumentState::NeedsReview {
                match mapper::map_document(&ctx, &id).await {
                    Ok(outcome) => print_mapping_outcome(&outcome)?,
                    Err(err) => eprintln!("Mapping failed (document state unaffected): {err:#}"),
                }
            }
        }
        Commands::Run { force } => {
            let ctx = Arc::new(build_context(&cfg).await?);
            let summary = runner::run_pending(ctx, force).await?;
            println!(
                "Ingested: {}  Failed: {}  Instances created: {}  merged: {}  Mapping failures: {}",
                summary.ingested,
                summary.failed,
                summary.instances_created,
                summary.instances_merged,
                summary.mapping_failures
            );
        }
        Commands::Map { id } => {
            let ctx = build_context(&cfg).await?;
            let outcome = mapper::map_document(&ctx, &id).await?;
            print_mapping_outcome(&outcome)?;
        }
        Commands::Status { id } => {
            run_status(&cfg, &id).await?;
        }
        Commands::Url { id, ttl } => {
            let store = open_store(&cfg).await?;
            let Some(doc) = store.get_document(&id).await? else {
                bail!("document not found: {id}");
            };
            let blob = S3BlobStore::new(&cfg.blob)?;
            let disposition = format!("attachment; filename=\"{}\"", doc.filename);
            let url = blob.signed_url(
                &doc.storage_key,
                std::time::Duration::from_secs(ttl),
                Some(&disposition),
            )?;
            println!("{url}");
        }
        Commands::Remove { id } => {
            run_remove(&cfg, &id).await?;
        }
        Commands::Framework { action } => {
            let store = open_store(&cfg).await?;
            match action {
                FrameworkAction::Add {
                    code,
                    name,
                    description,
                    schema,
                } => {
                    let schema_json = match schema {
                        Some(path) => {
                            let raw = std::fs::read_to_string(&path).with_context(|| {
                                format!("reading schema file {}", path.display())
                            })?;
                            // Validate before storing.
                            let _: serde_json::Value = serde_json::from_str(&raw)
                                .with_context(|| "schema file is not valid JSON")?;
                            raw
                        }
                        None => "{}".to_string(),
                    };
                    let fw_id = store
                        .create_framework(&code, &name, &description, &schema_json)
                        .await?;
                    println!("Framework registered: {code} ({fw_id})");
                }
                FrameworkAction::List => {
                    for fw in store.list_frameworks().await? {
                        println!("{}  {}  {}", fw.code, fw.name, fw.description);
                    }
                }
            }
        }
        Commands::Category { action } => {
            let store = open_store(&cfg).await?;
            match action {
                CategoryAction::Add { name } => {
                    store.add_category(&name).await?;
                    println!("Category added: {name}");
                }
                CategoryAction::List => {
                    for name in store.list_categories().await? {
                        println!("{name}");
                    }
                }
            }
        }
    }

    Ok(())
}

async fn open_store(cfg: &Config) -> Result<RecordStore> {
    let pool = db::connect(cfg).await?;
    migrate::run_migrations(&pool).await?;
    Ok(RecordStore::new(pool))
}

async fn build_context(cfg: &Config) -> Result<PipelineContext> {
    let store = open_store(cfg).await?;
    let blob = Arc::new(S3BlobStore::new(&cfg.blob)?);
    let model = Arc::new(GeminiClient::new(&cfg.model)?);
    Ok(PipelineContext {
        config: cfg.clone(),
        store,
        blob,
        model,
    })
}

async fn run_register(cfg: &Config, path: &Path, scope: Option<String>) -> Result<()> {
    let store = open_store(cfg).await?;
    let blob = S3BlobStore::new(&cfg.blob)?;

    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .context("path has no usable file name")?
        .to_string();
    let mime_type = mime_from_extension(path).to_string();
    let storage_key = format!("documents/{}/{}", Uuid::new_v4(), filename);

    blob.put(&storage_key, &bytes, &mime_type).await?;

    let id = store
        .create_document(&NewDocument {
            filename,
            mime_type,
            size_bytes: bytes.len() as i64,
            storage_key,
            owner_scope: scope,
        })
        .await?;

    println!("Registered document: {id}");
    Ok(())
}

async fn run_status(cfg: &Config, id: &str) -> Result<()> {
    let store = open_store(cfg).await?;
    let Some(doc) = store.get_document(id).await? else {
        bail!("document not found: {id}");
    };

    println!("Document:   {}", doc.id);
    println!("Filename:   {}", doc.filename);
    println!("MIME type:  {}", doc.mime_type);
    println!("Size:       {} bytes", doc.size_bytes);
    println!("State:      {}", doc.state);
    println!("Scope:      {}", doc.owner_scope.as_deref().unwrap_or("-"));
    println!(
        "Remote ref: {}",
        doc.remote_file_ref.as_deref().unwrap_or("-")
    );
    println!(
        "Transcript: {}",
        match &doc.transcript {
            Some(t) => format!("{} chars", t.chars().count()),
            None => "-".to_string(),
        }
    );
    println!(
        "Embedding:  {}",
        match &doc.embedding {
            Some(v) => format!("{} dims", v.len()),
            None => "-".to_string(),
        }
    );
    if let Some(err) = &doc.error {
        println!("Error:      [{}] {}", err.stage, err.message);
    }

    let tags = store.document_tags(id).await?;
    if !tags.is_empty() {
        println!("Tags:");
        for (key, value) in tags {
            println!("  {key}: {value}");
        }
    }
    Ok(())
}

async fn run_remove(cfg: &Config, id: &str) -> Result<()> {
    let store = open_store(cfg).await?;
    let Some(doc) = store.get_document(id).await? else {
        bail!("document not found: {id}");
    };

    let blob = S3BlobStore::new(&cfg.blob)?;
    blob.delete(&doc.storage_key).await?;

    // The remote file expires on its own; deletion is best effort.
    if let Some(uri) = &doc.remote_file_ref {
        let model = GeminiClient::new(&cfg.model)?;
        if let Err(err) = model.delete_file(&RemoteRef::new(uri.clone())).await {
            eprintln!("Could not delete remote model file: {err}");
        }
    }

    store.delete_document(id).await?;
    println!("Removed document: {id}");
    Ok(())
}

fn print_mapping_outcome(outcome: &MappingOutcome) -> Result<()> {
    match outcome {
        MappingOutcome::NotReady => println!("Document has no transcript yet; nothing to map."),
        MappingOutcome::Completed(report) => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
    }
    Ok(())
}

/// Best-effort MIME type from the file extension; the model adapter needs
/// one for uploads.
fn mime_from_extension(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .as_deref()
    {
        Some("pdf") => "application/pdf",
        Some("md") | Some("markdown") => "text/markdown",
        Some("txt") => "text/plain",
        Some("csv") => "text/csv",
        Some("html") | Some("htm") => "text/html",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Some("pptx") => {
            "application/vnd.openxmlformats-officedocument.presentationml.presentation"
        }
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}
