// SPDX-License-Identifier: MIT
// avagen — generate avatars from the Pop Yourself designer.

use anyhow::{Context as _, Result};
use avagen::{generate, GeneratorOptions};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "avagen",
    about = "Avatar generator — drives the Pop Yourself designer in a headless browser",
    version
)]
struct Args {
    /// Number of avatars to produce
    #[arg(long, env = "AVAGEN_COUNT")]
    count: Option<u32>,

    /// Final captured square side length in pixels
    #[arg(long, env = "AVAGEN_SIZE")]
    size: Option<u32>,

    /// Force a body archetype (0..=7)
    #[arg(long, env = "AVAGEN_BODY_INDEX")]
    body_index: Option<i64>,

    /// Force a skin tone (0..=11)
    #[arg(long, env = "AVAGEN_SKIN_INDEX")]
    skin_index: Option<i64>,

    /// Hide accessory overlays before capture
    #[arg(long)]
    remove_accessories: bool,

    /// Capture the head only (hide body, outfit, top and bottom layers)
    #[arg(long)]
    only_head: bool,

    /// Crop the capture to the head region at full resolution
    #[arg(long)]
    focus_head: bool,

    /// Apply a circular clip mask
    #[arg(long)]
    circle: bool,

    /// Write images under this directory instead of inlining them
    #[arg(long, env = "AVAGEN_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Load options from a TOML file (flags take precedence)
    #[arg(long, env = "AVAGEN_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter (trace, debug, info, warn, error)
    #[arg(long, env = "AVAGEN_LOG", default_value = "info")]
    log: String,

    /// Suppress the JSON report on stdout. Errors still go to stderr.
    #[arg(long, short = 'q')]
    quiet: bool,
}

impl Args {
    /// File options (when given) under the explicit flags.
    fn into_options(self) -> Result<GeneratorOptions> {
        let mut options = match &self.config {
            Some(path) => GeneratorOptions::from_toml_file(path)
                .with_context(|| format!("reading options from {}", path.display()))?,
            None => GeneratorOptions::default(),
        };

        if let Some(count) = self.count {
            options.count = count;
        }
        if let Some(size) = self.size {
            options.size = size;
        }
        if self.body_index.is_some() {
            options.body_index = self.body_index;
        }
        if self.skin_index.is_some() {
            options.skin_index = self.skin_index;
        }
        if self.remove_accessories {
            options.remove_accessories = true;
        }
        if self.only_head {
            options.only_head = true;
        }
        if self.focus_head {
            options.focus_head = true;
        }
        if self.circle {
            options.circle = true;
        }
        if self.output_dir.is_some() {
            options.output_dir = self.output_dir;
        }
        Ok(options)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(args.log.clone()))
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("avagen: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let quiet = args.quiet;
    let options = args.into_options()?.normalized();

    if let Some(dir) = &options.output_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating output directory {}", dir.display()))?;
    }

    let report = generate(options).await;
    info!(
        avatars = report.avatars.len(),
        failed = report.is_failed(),
        "run finished"
    );

    if !quiet {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serializing report")?
        );
    }

    Ok(if report.is_failed() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
