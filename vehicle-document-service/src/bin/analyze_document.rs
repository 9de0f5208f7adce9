use analysis_flow::{
    AnalysisResult, AnalysisRunner, CreditLedger, DocumentAnalyzer, InMemorySessionStorage,
    LegalClausesRequest, RequestBuilder, Session, SessionStorage, StepStatus,
};
use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use vehicle_document_service::{FirestoreCreditStore, OpenRouterModel, ServiceConfig};

const SESSION_ID: &str = "cli";
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(
    name = "analyze-document",
    about = "Analyze car purchase documents from the command line"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze a PDF or image, showing processing progress
    Analyze {
        path: PathBuf,
        /// Print the raw result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Summarize the legal clauses published at a URL
    Distill { url: String },
    /// Show the remaining processing credits
    Credits,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_env_filter("warn").init();

    let cli = Cli::parse();
    let config = ServiceConfig::from_env()?;
    let credits = credit_ledger(&config);
    let analyzer = DocumentAnalyzer::new(Arc::new(OpenRouterModel::new(config.model.clone())));

    match cli.command {
        Command::Analyze { path, json } => analyze(&config, analyzer, credits, path, json).await,
        Command::Distill { url } => {
            println!("Distilling legal clauses from {}", url);
            let summary = analyzer
                .extract_summarize_legal_clauses(&LegalClausesRequest::new(url))
                .await
                .map_err(|e| anyhow!("{}", e.notice().description))?;
            println!();
            println!("{}", summary.summary);
            Ok(())
        }
        Command::Credits => {
            if credits.is_configured() {
                println!("Processing credits: {}", credits.get_credits().await);
            } else {
                println!("Processing credits are not configured (set FIRESTORE_PROJECT_ID)");
            }
            Ok(())
        }
    }
}

fn credit_ledger(config: &ServiceConfig) -> CreditLedger {
    match &config.firestore {
        Some(firestore) => CreditLedger::new(Arc::new(FirestoreCreditStore::new(firestore))),
        None => CreditLedger::unconfigured(),
    }
}

async fn analyze(
    config: &ServiceConfig,
    analyzer: DocumentAnalyzer,
    credits: CreditLedger,
    path: PathBuf,
    json: bool,
) -> Result<()> {
    if credits.is_exhausted().await {
        return Err(anyhow!("No processing credits remain. Please try again later."));
    }

    let builder = RequestBuilder::new(config.max_upload_bytes);
    let upload = builder
        .read_upload(&path)
        .await
        .map_err(|e| anyhow!("{}", e.notice().description))?;
    let request = builder
        .build(&upload)
        .map_err(|e| anyhow!("{}", e.notice().description))?;

    println!("Analyzing {} ({} bytes)", upload.file_name, upload.bytes.len());

    let storage = Arc::new(InMemorySessionStorage::new());
    let mut session = Session::new(SESSION_ID);
    session.presentation.select_file(&upload.file_name)?;
    storage.save(session).await?;

    let runner = AnalysisRunner::new(analyzer, storage.clone(), credits)
        .with_tick_interval(config.tick_interval);
    let handle = runner.launch(SESSION_ID, request).await?;
    println!("Job {}", handle.job_id());

    let mut shown: Vec<StepStatus> = Vec::new();
    let session = loop {
        let session = storage
            .get(SESSION_ID)
            .await?
            .ok_or_else(|| anyhow!("session disappeared"))?;
        print_step_changes(&session, &mut shown);

        if !session.presentation.is_loading() {
            break session;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };
    handle.wait().await;

    if let Some(notice) = session.presentation.notice() {
        return Err(anyhow!("{} {}", notice.title, notice.description));
    }
    let result = session
        .presentation
        .result()
        .ok_or_else(|| anyhow!("analysis ended without a result"))?;

    println!();
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        print_result(result);
    }
    Ok(())
}

fn print_step_changes(session: &Session, shown: &mut Vec<StepStatus>) {
    let steps = session.presentation.steps();
    shown.resize(steps.len(), StepStatus::Pending);

    for (step, last) in steps.iter().zip(shown.iter_mut()) {
        if step.status == *last {
            continue;
        }
        match step.status {
            StepStatus::Processing => println!("  [..] {}: {}", step.title, step.description),
            StepStatus::Complete => println!("  [ok] {}", step.title),
            StepStatus::Pending => {}
        }
        *last = step.status;
    }
}

fn print_result(result: &AnalysisResult) {
    println!("Document type: {}", result.document_type);
    println!("Summary: {}", result.summary);

    if result.is_unprocessable() {
        return;
    }

    println!();
    println!("Key facts:");
    for fact in &result.key_facts {
        println!("  - {}", fact.fact);
        println!("    \"{}\"", fact.citation);
    }

    println!();
    println!("Risks and fees:");
    for risk in &result.risks_and_fees {
        println!("  - {}", risk.description);
        println!("    \"{}\"", risk.citation);
    }

    println!();
    println!("To do:");
    for item in &result.to_do_items {
        println!("  - {}", item.item);
        println!("    \"{}\"", item.citation);
    }
}
