// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Artidex main entry point - CLI for indexing and searching projects.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use artidex::config::load_config;
use artidex::service::IndexService;
use artidex::telemetry::{init_telemetry, TelemetryConfig};
use artidex::types::{IndexProgress, IndexStage, SearchOptions, SearchStatus};

/// Artidex - semantic index for XML integration artifacts.
#[derive(Parser)]
#[command(name = "artidex")]
#[command(author, version, about = "Semantic index for XML integration artifacts", long_about = None)]
struct Cli {
    /// Project root directory
    #[arg(short, long, env = "ARTIDEX_PROJECT", default_value = ".")]
    project: PathBuf,

    /// Show debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build or refresh the index for the project
    Index,
    /// Search the project index
    Search {
        /// Query text
        query: String,

        /// Number of results
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Minimum hybrid score
        #[arg(short = 't', long)]
        threshold: Option<f32>,

        /// Restrict to one semantic type (api, sequence, mediator, ...)
        #[arg(long)]
        semantic_type: Option<String>,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Show index statistics
    Stats,
    /// Index, then keep polling for changes until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let telemetry = if cli.debug {
        TelemetryConfig::development()
    } else {
        TelemetryConfig::default()
    };
    init_telemetry(&telemetry);

    let config = load_config(&cli.project)?;
    let service = IndexService::for_project(&cli.project, config);

    match cli.command {
        Commands::Index => {
            attach_progress_bar(&service);
            service.start().await;
            if !service.wait_for_ready().await {
                anyhow::bail!(
                    "indexing failed: {}",
                    service.failure_message().unwrap_or_default()
                );
            }
            print_index_summary(&service);
        }
        Commands::Search {
            query,
            top_k,
            threshold,
            semantic_type,
            json,
        } => {
            service.start().await;
            if !service.wait_for_ready().await {
                anyhow::bail!(
                    "index unavailable: {}",
                    service.failure_message().unwrap_or_default()
                );
            }

            let options = SearchOptions {
                top_k,
                score_threshold: threshold,
                semantic_type,
            };
            let response = service.search(&query, &options).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_search_response(&query, &response);
            }
        }
        Commands::Stats => {
            service.start().await;
            if !service.wait_for_ready().await {
                anyhow::bail!(
                    "index unavailable: {}",
                    service.failure_message().unwrap_or_default()
                );
            }
            let stats = service.stats().await?;
            println!("{}", "Index statistics".bold());
            println!("  files:   {}", stats.total_files);
            println!("  chunks:  {}", stats.total_chunks);
            println!("  size:    {} bytes", stats.index_size_bytes);
            if let Some(ts) = stats.last_indexed {
                println!("  updated: {}", format_timestamp(ts));
            }
        }
        Commands::Watch => {
            attach_progress_bar(&service);
            service.start().await;
            if !service.wait_for_ready().await {
                anyhow::bail!(
                    "indexing failed: {}",
                    service.failure_message().unwrap_or_default()
                );
            }
            print_index_summary(&service);
            println!("{}", "watching for changes, Ctrl-C to stop".dimmed());
            tokio::signal::ctrl_c().await?;
            service.stop().await;
        }
    }

    Ok(())
}

/// Wire the pipeline's progress contract into a terminal progress bar.
fn attach_progress_bar(service: &Arc<IndexService>) {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg} [{bar:30}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    service.set_progress_handler(Arc::new(move |progress: IndexProgress| {
        match progress.stage {
            IndexStage::Scanning => {
                bar.set_message(format!("scanning: {}", progress.detail));
            }
            IndexStage::Embedding | IndexStage::Updating => {
                bar.set_length(progress.total_files as u64);
                bar.set_position(progress.file_index as u64);
                bar.set_message(format!(
                    "{}: {}",
                    progress.stage.as_str(),
                    short_detail(&progress.detail)
                ));
            }
            IndexStage::Complete => {
                bar.finish_with_message(progress.detail.clone());
            }
        }
    }));
}

fn short_detail(detail: &str) -> String {
    PathBuf::from(detail)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| detail.to_string())
}

fn print_index_summary(service: &Arc<IndexService>) {
    if let Some(result) = service.last_index_result() {
        println!(
            "{} {} files, {} embedded, {} reused, {} deleted in {}ms",
            "indexed".green().bold(),
            result.files_processed,
            result.chunks_embedded,
            result.chunks_reused,
            result.chunks_deleted,
            result.duration_ms
        );
    }
}

fn print_search_response(query: &str, response: &artidex::types::SearchResponse) {
    match response.status {
        SearchStatus::Ok => {}
        SearchStatus::EmbeddingServiceUnavailable | SearchStatus::EmptyIndex => {
            println!(
                "{} {}",
                "no semantic results:".yellow(),
                response.message.as_deref().unwrap_or("index unavailable")
            );
            return;
        }
    }

    if response.results.is_empty() {
        println!("no results above threshold for '{}'", query);
        return;
    }

    println!(
        "{} results for '{}' ({}ms)",
        response.results.len(),
        query.bold(),
        response.query_latency_ms
    );
    for (i, result) in response.results.iter().enumerate() {
        println!(
            "{:>2}. {} {}:{}-{}",
            i + 1,
            format!("{:.4}", result.score).cyan(),
            result.file_path,
            result.line_range[0],
            result.line_range[1]
        );
        if !result.xml_element_hierarchy.is_empty() {
            println!("    {}", result.xml_element_hierarchy.join(" > ").dimmed());
        }
    }
}

fn format_timestamp(epoch_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(epoch_ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| epoch_ms.to_string())
}
