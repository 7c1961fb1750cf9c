//! labelcheck - label compliance analysis client
//!
//! Submits label images to the analysis service and follows them to a
//! verdict: one label by status polling, or a batch by pushed progress.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use labelcheck_client::batch::BatchView;
use labelcheck_client::tracker::TrackerState;
use labelcheck_client::{
    AnalysisApi, BatchManifest, BatchSession, HttpAnalysisClient, LabelUpload, SubmissionTracker,
    SubscriberConfig, TrackerConfig,
};
use labelcheck_common::config::{self, TomlConfig};
use labelcheck_common::types::{
    AnalysisRecord, AnalysisStatus, ApplicationDetails, BatchProgressSnapshot, HistoryQuery,
    OverallVerdict, SubmissionHandle,
};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Exit status after Ctrl-C
const INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "labelcheck")]
#[command(about = "Submit beverage labels for compliance analysis and follow their progress")]
#[command(version)]
struct Args {
    /// Analysis service base URL (overrides LABELCHECK_SERVER_URL and the config file)
    #[arg(long, global = true)]
    server_url: Option<String>,

    /// Config file (default: $LABELCHECK_CONFIG, then the platform config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze one label image and wait for its verdict
    Submit {
        image: PathBuf,

        #[command(flatten)]
        details: DetailArgs,

        /// Print the final record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Analyze several label images as one batch
    Batch {
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// CSV with per-file application details (column `filename` plus field names)
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Print the batch results as JSON
        #[arg(long)]
        json: bool,
    },

    /// List past analyses, newest first
    History {
        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = 20)]
        page_size: u32,

        /// Only show this verdict (pass, fail, warnings)
        #[arg(long)]
        verdict: Option<OverallVerdict>,
    },

    /// Show one analysis by id
    Show {
        id: String,

        /// Print the record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Reference labels published by the service
    Samples {
        #[command(subcommand)]
        command: SamplesCommand,
    },

    /// Write a config file with every default spelled out
    InitConfig {
        /// Destination (default: resolved config path)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum SamplesCommand {
    /// List available sample labels
    List {
        #[arg(long)]
        json: bool,
    },

    /// Analyze a sample label with the details it ships with
    Submit {
        filename: String,

        /// Print the final record as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Application details checked against the label text
#[derive(clap::Args, Debug, Default)]
struct DetailArgs {
    #[arg(long)]
    brand_name: Option<String>,
    #[arg(long)]
    class_type: Option<String>,
    #[arg(long)]
    alcohol_content: Option<String>,
    #[arg(long)]
    net_contents: Option<String>,
    /// Bottler name and address
    #[arg(long)]
    bottler: Option<String>,
    #[arg(long)]
    country_of_origin: Option<String>,
}

impl From<DetailArgs> for ApplicationDetails {
    fn from(args: DetailArgs) -> Self {
        Self {
            brand_name: args.brand_name,
            class_type: args.class_type,
            alcohol_content: args.alcohol_content,
            net_contents: args.net_contents,
            bottler_name_address: args.bottler,
            country_of_origin: args.country_of_origin,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let config_path = config::resolve_config_path(args.config.as_deref());
    let toml_config = config::load_or_default(config_path.as_deref());

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let level = &toml_config.logging.level;
            EnvFilter::new(format!(
                "labelcheck={level},labelcheck_client={level},labelcheck_common={level}"
            ))
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Command::InitConfig { path, force } = &args.command {
        let path = path.clone().or(config_path).context("No config directory available")?;
        init_config(&path, *force)?;
        return Ok(ExitCode::SUCCESS);
    }

    let server_url = config::resolve_server_url(args.server_url.as_deref(), &toml_config);
    info!("Analysis service: {}", server_url);
    let api = Arc::new(
        HttpAnalysisClient::new(server_url, toml_config.request_timeout())
            .context("Failed to build HTTP client")?,
    );

    match args.command {
        Command::Submit {
            image,
            details,
            json,
        } => run_submit(api, &toml_config, &image, details.into(), json).await,
        Command::Batch { images, csv, json } => {
            run_batch(api, &toml_config, &images, csv.as_deref(), json).await
        }
        Command::History {
            page,
            page_size,
            verdict,
        } => {
            let query = HistoryQuery {
                page,
                page_size,
                verdict,
            };
            run_history(api.as_ref(), &query).await
        }
        Command::Show { id, json } => {
            run_show(api.as_ref(), &SubmissionHandle::new(id), json).await
        }
        Command::Samples {
            command: SamplesCommand::List { json },
        } => run_samples_list(api.as_ref(), json).await,
        Command::Samples {
            command: SamplesCommand::Submit { filename, json },
        } => run_sample_submit(api, &toml_config, &filename, json).await,
        Command::InitConfig { .. } => Ok(ExitCode::SUCCESS),
    }
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    config::write_toml_config(&TomlConfig::with_defaults(), path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

async fn run_submit(
    api: Arc<HttpAnalysisClient>,
    toml_config: &TomlConfig,
    image: &Path,
    details: ApplicationDetails,
    json: bool,
) -> Result<ExitCode> {
    let upload = LabelUpload::from_path(image)
        .await
        .with_context(|| format!("Cannot read label image {}", image.display()))?;

    track_submission(api, toml_config, upload, details, json).await
}

async fn run_sample_submit(
    api: Arc<HttpAnalysisClient>,
    toml_config: &TomlConfig,
    filename: &str,
    json: bool,
) -> Result<ExitCode> {
    let samples = api.list_samples().await.context("Failed to list sample labels")?;
    let Some(sample) = samples.iter().find(|s| s.filename == filename) else {
        bail!("No sample label named '{}' (see `labelcheck samples list`)", filename);
    };

    let upload = api
        .fetch_sample_image(filename)
        .await
        .with_context(|| format!("Failed to download sample {}", filename))?;

    info!(sample = filename, expected = %sample.expected_verdict, "Submitting sample label");
    track_submission(api, toml_config, upload, sample.details(), json).await
}

async fn track_submission(
    api: Arc<HttpAnalysisClient>,
    toml_config: &TomlConfig,
    upload: LabelUpload,
    details: ApplicationDetails,
    json: bool,
) -> Result<ExitCode> {
    let mut tracker = SubmissionTracker::new(api, TrackerConfig::from(&toml_config.polling));
    tracker.submit(upload, details);

    let mut updates = tracker.subscribe();
    let mut printed = 0;
    loop {
        let active = {
            let state = updates.borrow_and_update();
            for status in &state.history()[printed..] {
                println!("Status: {}", status);
            }
            printed = state.history().len();
            state.is_active()
        };
        if !active {
            break;
        }

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = signal::ctrl_c() => {
                warn!("Interrupted, cancelling analysis");
                tracker.reset();
                return Ok(ExitCode::from(INTERRUPTED));
            }
        }
    }

    report_submission(&tracker.view(), json)
}

fn report_submission(state: &TrackerState, json: bool) -> Result<ExitCode> {
    if let Some(error) = state.error() {
        eprintln!("Error: {}", error);
        return Ok(ExitCode::FAILURE);
    }

    let Some(record) = state.latest() else {
        bail!("Analysis finished without a record");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(record)?);
    } else {
        print_record(record);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_record(record: &AnalysisRecord) {
    let verdict = record
        .overall_verdict
        .map(|v| v.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!("Analysis {}: {}", record.id, verdict);

    if let Some(brand) = &record.detected_brand_name {
        println!("  Brand: {}", brand);
    }
    if let Some(beverage) = &record.detected_beverage_type {
        println!("  Beverage type: {}", beverage);
    }
    if let Some(message) = &record.error_message {
        println!("  Error: {}", message);
    }

    let findings = record.compliance_findings.as_deref().unwrap_or_default();
    let (matching, rules): (Vec<_>, Vec<_>) =
        findings.iter().partition(|f| f.matched_field().is_some());

    for finding in rules {
        println!("  [{}] {}: {}", finding.severity, finding.rule_name, finding.message);
    }

    if !matching.is_empty() {
        println!("  Application details:");
    }
    for finding in matching {
        let expected = finding
            .matched_field()
            .zip(record.application_details.as_ref())
            .and_then(|(field, details)| details.get(field))
            .unwrap_or("-");
        let found = finding.extracted_value.as_deref().unwrap_or("Not found");
        println!(
            "    [{}] {}: expected \"{}\", found \"{}\"",
            finding.severity, finding.rule_name, expected, found
        );
    }
}

async fn run_batch(
    api: Arc<HttpAnalysisClient>,
    toml_config: &TomlConfig,
    images: &[PathBuf],
    csv: Option<&Path>,
    json: bool,
) -> Result<ExitCode> {
    let mut labels = Vec::with_capacity(images.len());
    for image in images {
        let upload = LabelUpload::from_path(image)
            .await
            .with_context(|| format!("Cannot read label image {}", image.display()))?;
        labels.push(upload);
    }

    let manifest = match csv {
        Some(path) => Some(
            BatchManifest::from_path(path)
                .await
                .with_context(|| format!("Cannot read manifest {}", path.display()))?,
        ),
        None => None,
    };

    let mut session = BatchSession::new(api, SubscriberConfig::from(&toml_config.stream));
    let accepted = match session.submit(&labels, manifest.as_ref()).await {
        Ok(accepted) => accepted,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };
    println!("Batch {} accepted ({} labels)", accepted.batch_id, accepted.total_labels);

    let mut progress = session.subscribe_progress();
    let mut results = session.subscribe_results();
    let mut last_printed: Option<BatchProgressSnapshot> = None;

    let view = loop {
        let view = session.view();
        let snapshot = *view.progress.snapshot();
        if last_printed != Some(snapshot) && view.progress.total() > 0 {
            println!(
                "Progress: {}/{} done, {} failed ({})",
                snapshot.completed, snapshot.total, snapshot.failed, snapshot.status
            );
            last_printed = Some(snapshot);
        }
        if view.is_settled() {
            break view;
        }

        tokio::select! {
            _ = progress.changed() => {}
            _ = results.changed() => {}
            _ = signal::ctrl_c() => {
                warn!("Interrupted, closing batch stream");
                session.reset();
                return Ok(ExitCode::from(INTERRUPTED));
            }
        }
    };

    report_batch(&view, json)
}

fn report_batch(view: &BatchView, json: bool) -> Result<ExitCode> {
    if let Some(error) = view.error() {
        eprintln!("Error: {}", error);
    }

    let Some(analyses) = view.results.analyses() else {
        return Ok(ExitCode::FAILURE);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(analyses)?);
    } else {
        for record in analyses {
            print_record(record);
        }
    }

    if view.error().is_some() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

async fn run_history<A: AnalysisApi>(api: &A, query: &HistoryQuery) -> Result<ExitCode> {
    query.validate()?;

    let page = api
        .list_analyses(query)
        .await
        .context("Failed to fetch analysis history")?;

    println!("Page {} ({} analyses total)", page.page, page.total);
    for record in &page.items {
        let verdict = record
            .overall_verdict
            .map(|v| v.to_string())
            .unwrap_or_else(|| record.status.to_string());
        println!(
            "{}  {}  {}",
            record.created_at.format("%Y-%m-%d %H:%M"),
            record.id,
            verdict
        );
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_show<A: AnalysisApi>(
    api: &A,
    handle: &SubmissionHandle,
    json: bool,
) -> Result<ExitCode> {
    let record = api
        .fetch_analysis(handle)
        .await
        .with_context(|| format!("Failed to fetch analysis {}", handle))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        if !record.status.is_terminal() {
            println!("Status: {}", record.status);
        }
        print_record(&record);
    }

    if record.status == AnalysisStatus::Failed {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

async fn run_samples_list(api: &HttpAnalysisClient, json: bool) -> Result<ExitCode> {
    let samples = api.list_samples().await.context("Failed to list sample labels")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&samples)?);
        return Ok(ExitCode::SUCCESS);
    }

    for sample in &samples {
        println!(
            "{}  expected={}  {}  {}",
            sample.filename, sample.expected_verdict, sample.brand_name, sample.description
        );
    }
    println!("{} samples", samples.len());
    Ok(ExitCode::SUCCESS)
}
