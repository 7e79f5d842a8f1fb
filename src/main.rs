use std::path::PathBuf;
use std::process::ExitCode;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use supercut::config::Config;
use supercut::models::Rundown;
use supercut::pipeline::{AssembleOptions, NarrationInput, Pipeline};

/// On-disk rundown document: the rundown itself plus, for the synced
/// variant, analyses and narration audio references.
#[derive(Deserialize)]
struct RundownFile {
    #[serde(flatten)]
    rundown: Rundown,
    narration: Option<NarrationInput>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let (Some(rundown_path), Some(output_path)) = (args.next(), args.next()) else {
        error!("usage: supercut <rundown.json> <output.mp4>");
        return ExitCode::FAILURE;
    };

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let document: RundownFile = match std::fs::read_to_string(&rundown_path)
        .map_err(|e| e.to_string())
        .and_then(|text| serde_json::from_str(&text).map_err(|e| e.to_string()))
    {
        Ok(document) => document,
        Err(e) => {
            error!("cannot read rundown {rundown_path}: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Ctrl-C stops new work; in-flight media-tool calls finish first.
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("cancellation requested");
            signal_token.cancel();
        }
    });

    let pipeline = Pipeline::new(config);
    let options = AssembleOptions {
        output_path: PathBuf::from(output_path),
        narration: document.narration,
    };

    match pipeline.assemble(&document.rundown, &options, cancel).await {
        Ok(report) => {
            for status in &report.statuses {
                info!("item {} ({}): {:?}", status.position, status.label, status.outcome);
            }
            info!("wrote {}", report.output_path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("assembly failed: {e}");
            ExitCode::FAILURE
        }
    }
}
