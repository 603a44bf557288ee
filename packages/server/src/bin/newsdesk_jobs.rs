//! Submit jobs and query their status from a shell.
//!
//! Prints JSON so the output can be piped into other tools.
//!
//! Usage:
//!   newsdesk-jobs submit pdf_pipeline --input uploads/bugle.pdf \
//!       --publication "Daily Bugle" --language hi --zone North
//!   newsdesk-jobs status 6f1c...

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use newsdesk::{DigitalArticle, DispatchError, Dispatcher, JobId, JobKind, JobParams};
use newsdesk_server::kernel::Stores;

#[derive(Parser)]
#[command(name = "newsdesk-jobs")]
#[command(about = "Submit newsdesk jobs and check their status")]
struct Cli {
    /// Job ledger database
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and enqueue a job
    Submit {
        /// pdf_pipeline, crawl_pdf, digital_json, direct_images, single_image
        kind: JobKind,

        /// Object store key of the input document or image
        #[arg(long)]
        input: Option<String>,

        #[arg(long)]
        publication: Option<String>,

        #[arg(long)]
        edition: Option<String>,

        #[arg(long)]
        language: Option<String>,

        #[arg(long)]
        zone: Option<String>,

        /// Edition date, DD-MM-YYYY
        #[arg(long)]
        date: Option<String>,

        #[arg(long)]
        dpi: Option<u32>,

        #[arg(long)]
        quality: Option<u8>,

        /// Page image key (repeat for direct_images)
        #[arg(long = "image-key")]
        image_keys: Vec<String>,

        /// JSON file holding a digital article ({title, content, ...})
        #[arg(long)]
        article_file: Option<PathBuf>,

        #[arg(long)]
        callback_url: Option<String>,
    },

    /// Show state, progress, and result of a job
    Status {
        job_id: JobId,
    },
}

#[derive(Serialize)]
struct SubmitResponse {
    job_id: JobId,
    kind: JobKind,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let stores = Stores::connect(&cli.database_url).await?;
    let dispatcher = Dispatcher::new(Arc::clone(&stores.ledger));

    match cli.command {
        Commands::Submit {
            kind,
            input,
            publication,
            edition,
            language,
            zone,
            date,
            dpi,
            quality,
            image_keys,
            article_file,
            callback_url,
        } => {
            let article = match article_file {
                Some(path) => Some(read_article(&path).await?),
                None => None,
            };
            let params = JobParams {
                publication,
                edition,
                language,
                zone,
                date,
                dpi,
                quality,
                image_keys,
                article,
                callback_url,
            };

            match dispatcher.submit(kind, input, params).await {
                Ok(job_id) => print_json(&SubmitResponse { job_id, kind }),
                Err(DispatchError::Validation(e)) => {
                    print_json(&ErrorResponse {
                        error: e.to_string(),
                    })?;
                    std::process::exit(2);
                }
                Err(e) => Err(e).context("Failed to submit job"),
            }
        }
        Commands::Status { job_id } => match dispatcher.status(job_id).await {
            Ok(status) => print_json(&status),
            Err(DispatchError::NotFound(_)) => {
                print_json(&ErrorResponse {
                    error: format!("job {} not found", job_id),
                })?;
                std::process::exit(1);
            }
            Err(e) => Err(e).context("Failed to load job status"),
        },
    }
}

async fn read_article(path: &Path) -> Result<DigitalArticle> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&raw)
        .with_context(|| format!("{} is not a valid article", path.display()))
}
