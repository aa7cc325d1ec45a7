use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use sitecull::core::grouping::GroupType;
use sitecull::services::image_source::{ImageLoader, ImageSource};
use sitecull::services::scanner::ScannerService;
use sitecull::services::vision::VisionClient;
use sitecull::{AnalysisConfig, AnalysisPipeline, AnalysisRequest, AnalysisResponse, FingerprintService, RateLimiter};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sitecull", version, about = "Find duplicate, burst and similar job-site photos")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Analysis configuration file (default: `<config dir>/sitecull/config.json`)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Base URL of an OpenAI-compatible vision endpoint
    #[arg(long, global = true, env = "SITECULL_VISION_URL", value_name = "URL")]
    vision_url: Option<String>,

    /// Model name sent to the vision endpoint
    #[arg(long, global = true, env = "SITECULL_VISION_MODEL", default_value = "gpt-4o-mini")]
    vision_model: String,

    /// Bearer token for the vision endpoint
    #[arg(long, global = true, env = "SITECULL_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze a JSON request file and emit the response JSON
    Analyze {
        /// Request file (record or columnar form)
        #[arg(short, long, value_name = "FILE")]
        request: PathBuf,
        /// Write the response here instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
        /// Skip the vision endpoint; classify from metadata only
        #[arg(long)]
        offline: bool,
    },

    /// Build a request from a photo directory and analyze it
    Scan {
        /// Directory to scan
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
        /// Also write the full response JSON here
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
        /// Skip the vision endpoint; classify from metadata only
        #[arg(long)]
        offline: bool,
    },

    /// Print the 64-bit difference hash of each file
    Fingerprint {
        #[arg(required = true, value_name = "FILE")]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            request,
            output,
            offline,
        } => {
            let content = fs::read_to_string(&request)
                .with_context(|| format!("Failed to read request {}", request.display()))?;
            let parsed: AnalysisRequest = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse request {}", request.display()))?;

            let pipeline = Arc::new(build_pipeline(&cli.global, offline)?);
            let response = run_analysis(pipeline, parsed).await?;
            emit_response(&response, output.as_deref())?;
        }

        Commands::Scan {
            path,
            output,
            offline,
        } => {
            let pipeline = Arc::new(build_pipeline(&cli.global, offline)?);
            let max_photos = pipeline.config().batch.max_photos;
            let window_secs = pipeline.config().candidates.proximity_window_secs;

            eprintln!("▶ Scanning photos in: {}", path.display());
            let scanner = ScannerService::new();
            let token = scanner.get_cancellation_token();
            let interrupt = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    token.store(true, Ordering::Relaxed);
                }
            });
            let scanned = benchmark("reading metadata and fingerprints", || {
                scanner.scan_batches(&path, max_photos, window_secs)
            });
            interrupt.abort();
            let requests = scanned.with_context(|| format!("Failed to scan {}", path.display()))?;
            if requests.is_empty() {
                println!("No photos found.");
                return Ok(());
            }

            let response = run_batches(pipeline, requests).await?;
            print_summary(&response);
            if let Some(output) = output {
                emit_response(&response, Some(&output))?;
            }
        }

        Commands::Fingerprint { files } => {
            let hashed: Vec<(PathBuf, Result<String>)> = benchmark("fingerprinting", || {
                files
                    .par_iter()
                    .map_init(FingerprintService::new, |service, path| {
                        let fingerprint = service
                            .fingerprint_file(path)
                            .map(|fp| fp.to_hex())
                            .with_context(|| format!("Failed to fingerprint {}", path.display()));
                        (path.clone(), fingerprint)
                    })
                    .collect()
            });

            let mut failures = 0;
            for (path, fingerprint) in hashed {
                match fingerprint {
                    Ok(hex) => println!("{}  {}", hex, path.display()),
                    Err(e) => {
                        failures += 1;
                        eprintln!("✗ {:#}", e);
                    }
                }
            }
            if failures > 0 {
                bail!("{} file(s) could not be fingerprinted", failures);
            }
        }
    }

    Ok(())
}

fn build_pipeline(global: &GlobalArgs, offline: bool) -> Result<AnalysisPipeline> {
    let config = AnalysisConfig::load_or_default(global.config.as_deref())
        .context("Failed to load configuration")?;
    let loader = ImageLoader::with_timeout(config.batch.fetch_timeout())
        .context("Failed to build the image loader")?;
    let images: Arc<dyn ImageSource> = Arc::new(loader);
    let limiter = Arc::new(RateLimiter::from_config(&config.classifier));
    let pipeline = AnalysisPipeline::new(config, images.clone());

    match (&global.vision_url, offline) {
        (Some(url), false) => {
            let mut client = VisionClient::new(url, &global.vision_model, images);
            if let Some(api_key) = &global.api_key {
                client = client.with_api_key(api_key.as_str());
            }
            log::info!("Using vision endpoint {} ({})", url, global.vision_model);
            Ok(pipeline.with_classifier(Arc::new(client), limiter))
        }
        _ => {
            log::info!("No vision endpoint in use; classifying from metadata only");
            Ok(pipeline)
        }
    }
}

async fn run_analysis(pipeline: Arc<AnalysisPipeline>, request: AnalysisRequest) -> Result<AnalysisResponse> {
    run_batches(pipeline, vec![request]).await
}

/// Analyze with a spinner; Ctrl-C cancels the run.
async fn run_batches(pipeline: Arc<AnalysisPipeline>, requests: Vec<AnalysisRequest>) -> Result<AnalysisResponse> {
    let interrupted = pipeline.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupted.cancel();
        }
    });

    let photos: usize = requests.iter().map(AnalysisRequest::len).sum();
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    spinner.set_message(format!("Analyzing {} photo(s) in {} batch(es)…", photos, requests.len()));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let start = Instant::now();
    let result = pipeline.analyze_batches(requests).await;
    spinner.finish_and_clear();
    interrupt.abort();
    let response = result.context("Analysis failed")?;
    eprintln!("⏱ analysis took {:.2?}", start.elapsed());

    Ok(response)
}

fn emit_response(response: &AnalysisResponse, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(response)?;
    match output {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("▶ Response written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn print_summary(response: &AnalysisResponse) {
    let metadata = &response.metadata;
    println!(
        "Analyzed {} photo(s) ({:?}, {} degraded).",
        metadata.photos_analyzed, metadata.analysis_method, metadata.degraded_photos
    );

    if response.duplicate_groups.is_empty() {
        println!("No duplicate groups found.");
        return;
    }

    println!("Found {} group(s):", response.duplicate_groups.len());
    for (i, group) in response.duplicate_groups.iter().enumerate() {
        let label = match group.group_type {
            GroupType::ExactDuplicate => "duplicates",
            GroupType::BurstSequence => "burst",
            GroupType::SimilarComposition => "similar",
        };
        println!(" Group {} [{}] {:.0}% confident", i + 1, label, group.confidence * 100.0);
        for id in &group.photo_ids {
            let marker = if group.best_photo_id.as_deref() == Some(id.as_str()) {
                "★"
            } else {
                "▶"
            };
            println!("   {} {}", marker, id);
        }
        println!("   {}", group.recommendation);
    }
}

fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    eprintln!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}
