//! One-shot CLI: run a single request through the workflow and print the result as JSON.

use anyhow::{Context, Result};
use aura_router::{
    config, logging,
    workflow::{Orchestrator, Request},
};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "aura-query",
    about = "Classify a request, route it to the capability agents, and print the answer"
)]
struct Cli {
    /// Natural-language query.
    query: String,
    /// Image file or URL to analyze.
    #[arg(long)]
    image: Option<String>,
    /// Audio file to transcribe and analyze.
    #[arg(long)]
    audio: Option<PathBuf>,
    /// Restrict retrieval to chunks from this document.
    #[arg(long)]
    document: Option<String>,
    /// Language spoken in the audio clip (for example `es`).
    #[arg(long)]
    language: Option<String>,
    /// Target language when the routing policy selects audio translation.
    #[arg(long)]
    translate_to: Option<String>,
    /// Answer without retrieving context from the knowledge base.
    #[arg(long)]
    no_rag: bool,
    /// Print only the response text instead of the full result.
    #[arg(long)]
    plain: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    config::init_config();
    logging::init_tracing();

    let orchestrator =
        Orchestrator::from_config(config::get_config()).context("Failed to build workflow")?;

    let mut request = Request::new(cli.query);
    if let Some(image) = cli.image {
        request = request.with_image(image);
    }
    if let Some(audio) = cli.audio {
        request = request.with_audio(audio.to_string_lossy());
    }
    if let Some(document) = cli.document {
        request = request.with_document(document);
    }
    if let Some(language) = cli.language {
        request = request.with_language(language);
    }
    if let Some(target) = cli.translate_to {
        request = request.with_translate_to(target);
    }
    if cli.no_rag {
        request = request.with_use_rag(false);
    }

    let result = orchestrator.process(request).await;
    if cli.plain {
        println!("{}", result.response.as_deref().unwrap_or_default());
        if let Some(error) = &result.error {
            eprintln!("error: {error}");
        }
    } else {
        let rendered =
            serde_json::to_string_pretty(&result).context("Failed to serialize result")?;
        println!("{rendered}");
    }

    if result.success {
        Ok(())
    } else {
        std::process::exit(1)
    }
}
