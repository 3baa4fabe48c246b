//! Runs a batch of documents through the orchestrator and prints the
//! outcome of each job as JSON.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use log::{error, info, warn};

use docflow::config::{load_config, Config, OrchestratorSettings};
use docflow::{init_logging, DocflowError, JobConfig, Orchestrator, SubmitRequest};

#[derive(Parser)]
#[command(name = "docflow")]
#[command(about = "Process documents through the docflow pipeline")]
struct Cli {
    /// Config file (JSON, or YAML by extension)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Job priority, 1 (lowest) to 10
    #[arg(short, long, default_value_t = 5)]
    priority: u8,

    /// Run the OCR stage as well
    #[arg(long)]
    ocr: bool,

    /// Give up waiting after this many seconds
    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,

    /// Document ids, relative to the configured documents directory
    #[arg(required = true)]
    documents: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("docflow: {}", e);
            ExitCode::from(2)
        }
    }
}

/// Returns whether every job completed.
fn run(cli: Cli) -> Result<bool, DocflowError> {
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    init_logging(&config.logging)?;

    let settings = OrchestratorSettings::from_config(&config)?;
    let orchestrator = Orchestrator::builder(settings).build()?;
    orchestrator.start()?;

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        if let Err(e) = ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::Relaxed);
        }) {
            warn!("Could not install Ctrl-C handler: {}", e);
        }
    }

    let mut job_config = JobConfig::default().with_priority(cli.priority);
    job_config.perform_ocr = cli.ocr;

    let mut job_ids = Vec::with_capacity(cli.documents.len());
    for document in &cli.documents {
        let request = SubmitRequest::new(document.clone()).with_config(job_config.clone());
        match orchestrator.submit(request) {
            Ok(response) => job_ids.push(response.job_id),
            Err(e) => error!("Rejected {}: {}", document, e),
        }
    }

    // An unrepresentable deadline means wait without one.
    let deadline = Instant::now().checked_add(Duration::from_secs(cli.timeout_secs));
    loop {
        let pending = job_ids
            .iter()
            .filter(|id| orchestrator.status(id).is_some_and(|job| !job.is_finished()))
            .count();
        if pending == 0 {
            break;
        }
        if interrupted.load(Ordering::Relaxed) {
            info!("Interrupted with {} jobs pending", pending);
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            warn!("Timed out with {} jobs pending", pending);
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    let mut all_completed = job_ids.len() == cli.documents.len();
    for id in &job_ids {
        if let Some(job) = orchestrator.status(id) {
            all_completed &= job.status == docflow::JobStatus::Completed;
            print_json(&job);
        }
    }
    print_json(&orchestrator.stats());

    orchestrator.wait();
    Ok(all_completed)
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Could not serialize output: {}", e),
    }
}
