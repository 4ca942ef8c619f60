//! # facematch CLI
//!
//! ## Usage
//!
//! ```bash
//! facematch --config ./config/facematch.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `facematch run` | Provision the collection, index base images, match game-time images, write the report |
//! | `facematch collection create` | Create the face collection |
//! | `facematch collection delete` | Delete the face collection |
//! | `facematch list base\|query` | Print the image keys under a configured prefix |
//!
//! Logs go to stderr (`RUST_LOG` controls verbosity, default `info`);
//! stdout carries command output only.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use facematch::aws::AwsCredentials;
use facematch::config::{self, Config, Overrides};
use facematch::face_index::{FaceIndex, RekognitionClient};
use facematch::object_store::{list_keys, S3ObjectStore};
use facematch::pipeline::{Pipeline, PipelineSettings};

/// facematch: match game-time photos against reference portraits with
/// Amazon Rekognition.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "facematch",
    about = "Match game-time photos against reference portraits with Amazon Rekognition",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/facematch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the whole pipeline and write the report.
    ///
    /// Per-image failures are logged and skipped; the command still exits
    /// successfully once the report is written.
    Run {
        /// S3 bucket holding both image sets.
        #[arg(long)]
        bucket: Option<String>,

        /// Rekognition collection id.
        #[arg(long)]
        collection: Option<String>,

        /// Minimum similarity percentage for a match (0-100).
        #[arg(long)]
        threshold: Option<f64>,

        /// Maximum matches returned per game-time image.
        #[arg(long)]
        max_matches: Option<u32>,

        /// Report file (`.xlsx` or `.csv`).
        #[arg(long)]
        output: Option<PathBuf>,

        /// Delete and recreate the collection before indexing.
        #[arg(long)]
        recreate_collection: bool,
    },

    /// Manage the face collection.
    Collection {
        #[command(subcommand)]
        action: CollectionAction,
    },

    /// Print image keys under one of the configured prefixes.
    List {
        #[arg(value_enum)]
        set: ImageSet,
    },
}

#[derive(Subcommand)]
enum CollectionAction {
    /// Create the collection (an existing one is left alone).
    Create,
    /// Delete the collection and every face indexed in it.
    Delete,
}

#[derive(Clone, Copy, ValueEnum)]
enum ImageSet {
    /// Reference portraits (`storage.base_prefix`).
    Base,
    /// Game-time photos (`storage.query_prefix`).
    Query,
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
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Run {
            bucket,
            collection,
            threshold,
            max_matches,
            output,
            recreate_collection,
        } => {
            let cfg = cfg.with_overrides(Overrides {
                bucket,
                collection,
                threshold,
                max_matches,
                output,
                recreate_collection,
            })?;
            let (store, faces) = build_clients(&cfg).await?;
            let pipeline = Pipeline::new(&store, &faces, PipelineSettings::from(&cfg));

            let summary = pipeline.run(&cfg.report.path).await?;
            summary.print(pipeline.settings());
        }
        Commands::Collection { action } => {
            let (_, faces) = build_clients(&cfg).await?;
            let id = cfg.collection.id.as_str();
            match action {
                CollectionAction::Create => match faces.create_collection(id).await {
                    Ok(()) => println!("collection {} created", id),
                    Err(e) if e.is_already_exists() => {
                        println!("collection {} already exists", id)
                    }
                    Err(e) => {
                        return Err(e).with_context(|| format!("Failed to create collection {}", id))
                    }
                },
                CollectionAction::Delete => {
                    faces
                        .delete_collection(id)
                        .await
                        .with_context(|| format!("Failed to delete collection {}", id))?;
                    println!("collection {} deleted", id);
                }
            }
        }
        Commands::List { set } => {
            let (store, _) = build_clients(&cfg).await?;
            let prefix = match set {
                ImageSet::Base => &cfg.storage.base_prefix,
                ImageSet::Query => &cfg.storage.query_prefix,
            };
            for key in list_keys(&store, &cfg.storage.bucket, prefix).await {
                println!("{}", key);
            }
        }
    }

    Ok(())
}

/// Build the S3 and Rekognition clients from config and the AWS
/// credential chain.
async fn build_clients(cfg: &Config) -> Result<(S3ObjectStore, RekognitionClient)> {
    let credentials = AwsCredentials::load(cfg.aws.profile.as_deref()).await?;
    let timeout = Duration::from_secs(cfg.aws.request_timeout_secs);

    let store = S3ObjectStore::new(
        credentials.clone(),
        &cfg.aws.region,
        cfg.aws.endpoint_url.clone(),
        timeout,
    )
    .context("Failed to build S3 client")?;
    let faces = RekognitionClient::new(
        credentials,
        &cfg.aws.region,
        cfg.aws.endpoint_url.as_deref(),
        timeout,
    )
    .context("Failed to build Rekognition client")?;

    tracing::debug!(region = %cfg.aws.region, endpoint = ?cfg.aws.endpoint_url, "clients ready");
    Ok((store, faces))
}
