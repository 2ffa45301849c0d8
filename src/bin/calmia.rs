//! Calmia CLI - Command-line driver for the assessment pipeline
//!
//! Commands:
//! - questions: Decode the questionnaire of a store snapshot
//! - normalize: Normalize an answer file against the questionnaire
//! - recommend: Run a full recommendation for a user session
//! - sentiment: Score a feedback text
//! - journal: Save a journal entry for a user
//! - history: List a user's journal or feedback entries
//! - doctor: Diagnose configuration and service reachability
//!
//! The document store is read from a JSON snapshot shaped as
//! `{collection: {docId: document}}`; the local cache lives in a directory.

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use calmia::auth::StaticAuth;
use calmia::clock::SystemClock;
use calmia::store::{FileCache, MemoryDocumentStore};
use calmia::types::{AnswerMap, AnswerValue};
use calmia::{
    AssessmentPipeline, Backends, HistoryKind, HttpTherapyApi, Normalizer, PipelineConfig,
    PipelineError, StoreError, TherapyApi, CALMIA_VERSION,
};

const DEFAULT_CACHE_DIR: &str = ".calmia-cache";

/// Calmia - Questionnaire to therapy recommendation pipeline
#[derive(Parser)]
#[command(name = "calmia")]
#[command(version = CALMIA_VERSION)]
#[command(about = "Turn wellness questionnaires into therapy recommendations", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Force pretty-printed JSON output
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode the questionnaire and report rejected documents
    Questions {
        /// Store snapshot path
        #[arg(short, long)]
        store: PathBuf,
    },

    /// Normalize answers into the model's response vector
    Normalize {
        /// Store snapshot path
        #[arg(short, long)]
        store: PathBuf,

        /// Answers file: JSON array, or object keyed by question index
        #[arg(short, long)]
        answers: PathBuf,
    },

    /// Fetch the therapy recommendation for a session
    Recommend {
        /// Store snapshot path
        #[arg(short, long)]
        store: PathBuf,

        /// Answers file: JSON array, or object keyed by question index
        #[arg(short, long)]
        answers: PathBuf,

        /// Signed-in user id
        #[arg(short, long)]
        user: String,

        /// Session id (generated when omitted)
        #[arg(long)]
        session: Option<String>,

        /// Local cache directory
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Write the updated store snapshot back to this path
        #[arg(long)]
        save_store: Option<PathBuf>,
    },

    /// Score a feedback text with the sentiment endpoint
    Sentiment {
        /// Feedback text
        text: String,
    },

    /// Save a journal entry
    Journal {
        /// Store snapshot path
        #[arg(short, long)]
        store: PathBuf,

        /// Signed-in user id
        #[arg(short, long)]
        user: String,

        /// Entry text
        text: String,

        /// Write the updated store snapshot back to this path
        #[arg(long)]
        save_store: Option<PathBuf>,
    },

    /// List journal or feedback entries, newest first
    History {
        /// Store snapshot path
        #[arg(short, long)]
        store: PathBuf,

        /// Signed-in user id
        #[arg(short, long)]
        user: String,

        /// Which entries to list
        #[arg(long, value_enum, default_value_t = HistoryArg::Journal)]
        kind: HistoryArg,
    },

    /// Diagnose configuration and service reachability
    Doctor {
        /// Local cache directory to check
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum HistoryArg {
    Journal,
    Feedback,
}

impl From<HistoryArg> for HistoryKind {
    fn from(arg: HistoryArg) -> Self {
        match arg {
            HistoryArg::Journal => HistoryKind::Journal,
            HistoryArg::Feedback => HistoryKind::Feedback,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => return fail(CalmiaCliError::Io(e)),
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(e),
    }
}

fn fail(e: CalmiaCliError) -> ExitCode {
    eprintln!(
        "{}",
        serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
    );
    ExitCode::FAILURE
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CalmiaCliError> {
    let config = PipelineConfig::load(cli.config.as_deref())?;
    let pretty = cli.pretty || atty::is(atty::Stream::Stdout);

    match cli.command {
        Commands::Questions { store } => cmd_questions(&store, &config, pretty).await,

        Commands::Normalize { store, answers } => {
            cmd_normalize(&store, &answers, &config, pretty).await
        }

        Commands::Recommend {
            store,
            answers,
            user,
            session,
            cache_dir,
            save_store,
        } => {
            cmd_recommend(
                &store,
                &answers,
                user,
                session,
                cache_dir,
                save_store.as_deref(),
                config,
                pretty,
            )
            .await
        }

        Commands::Sentiment { text } => cmd_sentiment(&text, config, pretty).await,

        Commands::Journal {
            store,
            user,
            text,
            save_store,
        } => cmd_journal(&store, user, &text, save_store.as_deref(), &config, pretty).await,

        Commands::History { store, user, kind } => {
            cmd_history(&store, user, kind.into(), &config, pretty).await
        }

        Commands::Doctor { cache_dir } => cmd_doctor(cache_dir, config, pretty).await,
    }
}

async fn cmd_questions(
    store_path: &Path,
    config: &PipelineConfig,
    pretty: bool,
) -> Result<(), CalmiaCliError> {
    let pipeline = offline_pipeline(store_path, config)?;
    let load = pipeline.load_questions().await?;

    let report = QuestionReport {
        valid_questions: load.questions.len(),
        rejected_documents: load
            .rejected()
            .map(|r| RejectedDocument {
                document_id: r.document_id.clone(),
                error: r.error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
            })
            .collect(),
        questions: serde_json::to_value(&load.questions)?,
    };
    print_json(&report, pretty)
}

async fn cmd_normalize(
    store_path: &Path,
    answers_path: &Path,
    config: &PipelineConfig,
    pretty: bool,
) -> Result<(), CalmiaCliError> {
    let pipeline = offline_pipeline(store_path, config)?;
    let questions = pipeline.load_questions().await?.questions;
    let answers = read_answers(answers_path)?;

    let normalized = Normalizer::normalize(&answers, &questions)?;
    print_json(&normalized, pretty)
}

#[allow(clippy::too_many_arguments)]
async fn cmd_recommend(
    store_path: &Path,
    answers_path: &Path,
    user: String,
    session: Option<String>,
    cache_dir: Option<PathBuf>,
    save_store: Option<&Path>,
    mut config: PipelineConfig,
    pretty: bool,
) -> Result<(), CalmiaCliError> {
    if cache_dir.is_some() {
        config.cache_dir = cache_dir;
    }
    let cache_dir = config
        .cache_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR));

    let store = Arc::new(load_store(store_path)?);
    let backends = Backends {
        api: Arc::new(HttpTherapyApi::new(config.clone())?),
        store: store.clone(),
        local: Arc::new(FileCache::open(cache_dir).await?),
        auth: Arc::new(StaticAuth::signed_in(user)),
        clock: Arc::new(SystemClock),
    };
    let pipeline = AssessmentPipeline::new(backends, config);

    let questions = pipeline.load_questions().await?.questions;
    let answers = read_answers(answers_path)?;
    let session_id = session.unwrap_or_else(|| pipeline.new_session_id());

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            ctrl_c.cancel();
        }
    });

    let report = pipeline
        .recommend(&answers, &questions, &session_id, &cancel)
        .await?;

    if let Some(path) = save_store {
        fs::write(path, store.to_json()?)?;
    }

    print_json(&report, pretty)
}

async fn cmd_sentiment(
    text: &str,
    config: PipelineConfig,
    pretty: bool,
) -> Result<(), CalmiaCliError> {
    let api = HttpTherapyApi::new(config)?;
    let analysis = api.analyze_sentiment(text).await?;
    print_json(&analysis, pretty)
}

async fn cmd_journal(
    store_path: &Path,
    user: String,
    text: &str,
    save_store: Option<&Path>,
    config: &PipelineConfig,
    pretty: bool,
) -> Result<(), CalmiaCliError> {
    let store = Arc::new(load_store(store_path)?);
    let pipeline = user_pipeline(store.clone(), user, config)?;
    let record = pipeline.record_journal_entry(text).await?;

    if let Some(path) = save_store {
        fs::write(path, store.to_json()?)?;
    }
    print_json(&record, pretty)
}

async fn cmd_history(
    store_path: &Path,
    user: String,
    kind: HistoryKind,
    config: &PipelineConfig,
    pretty: bool,
) -> Result<(), CalmiaCliError> {
    let store = Arc::new(load_store(store_path)?);
    let pipeline = user_pipeline(store, user, config)?;
    let entries = pipeline.history(kind).await?;
    print_json(&entries, pretty)
}

async fn cmd_doctor(
    cache_dir: Option<PathBuf>,
    config: PipelineConfig,
    pretty: bool,
) -> Result<(), CalmiaCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "calmia_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Calmia version {}", CALMIA_VERSION),
    });

    checks.push(if config.is_loopback_api() {
        DoctorCheck {
            name: "api_url".to_string(),
            status: CheckStatus::Warning,
            message: format!("{} is a loopback address; devices cannot reach it", config.api_url),
        }
    } else {
        DoctorCheck {
            name: "api_url".to_string(),
            status: CheckStatus::Ok,
            message: config.api_url.clone(),
        }
    });

    let connectivity = match HttpTherapyApi::new(config.clone()) {
        Ok(api) => api.check_connectivity().await,
        Err(e) => Err(e),
    };
    checks.push(match connectivity {
        Ok(()) => DoctorCheck {
            name: "connectivity".to_string(),
            status: CheckStatus::Ok,
            message: "Recommendation service reachable".to_string(),
        },
        Err(e) => DoctorCheck {
            name: "connectivity".to_string(),
            status: CheckStatus::Error,
            message: e.to_string(),
        },
    });

    let cache_dir = cache_dir
        .or_else(|| config.cache_dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR));
    checks.push(match FileCache::open(&cache_dir).await {
        Ok(cache) => DoctorCheck {
            name: "cache_dir".to_string(),
            status: CheckStatus::Ok,
            message: format!("Cache directory {} is usable", cache.dir().display()),
        },
        Err(e) => DoctorCheck {
            name: "cache_dir".to_string(),
            status: CheckStatus::Error,
            message: format!("Cannot use cache directory {}: {}", cache_dir.display(), e),
        },
    });

    let report = DoctorReport {
        version: CALMIA_VERSION.to_string(),
        max_attempts: config.max_attempts,
        cache_ttl_hours: config.cache_ttl_hours,
        checks,
    };
    print_json(&report, pretty)?;

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(CalmiaCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

/// Pipeline over a snapshot with no network or user, for read-only commands
fn offline_pipeline(
    store_path: &Path,
    config: &PipelineConfig,
) -> Result<AssessmentPipeline, CalmiaCliError> {
    let backends = Backends {
        api: Arc::new(HttpTherapyApi::new(config.clone())?),
        store: Arc::new(load_store(store_path)?),
        local: Arc::new(calmia::store::MemoryCache::new()),
        auth: Arc::new(StaticAuth::signed_out()),
        clock: Arc::new(SystemClock),
    };
    Ok(AssessmentPipeline::new(backends, config.clone()))
}

/// Pipeline over a snapshot for a signed-in user, with an in-memory cache
fn user_pipeline(
    store: Arc<MemoryDocumentStore>,
    user: String,
    config: &PipelineConfig,
) -> Result<AssessmentPipeline, CalmiaCliError> {
    let backends = Backends {
        api: Arc::new(HttpTherapyApi::new(config.clone())?),
        store,
        local: Arc::new(calmia::store::MemoryCache::new()),
        auth: Arc::new(StaticAuth::signed_in(user)),
        clock: Arc::new(SystemClock),
    };
    Ok(AssessmentPipeline::new(backends, config.clone()))
}

fn load_store(path: &Path) -> Result<MemoryDocumentStore, CalmiaCliError> {
    let content = fs::read_to_string(path)?;
    Ok(MemoryDocumentStore::from_json(&content)?)
}

fn read_answers(path: &Path) -> Result<AnswerMap, CalmiaCliError> {
    let content = fs::read_to_string(path)?;
    parse_answers(serde_json::from_str(&content)?)
}

fn parse_answers(value: Value) -> Result<AnswerMap, CalmiaCliError> {
    let entries: Vec<(usize, Value)> = match value {
        Value::Array(items) => items.into_iter().enumerate().collect(),
        Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| {
                k.parse::<usize>()
                    .map(|index| (index, v))
                    .map_err(|_| CalmiaCliError::Answers(format!("Invalid question index {k:?}")))
            })
            .collect::<Result<_, _>>()?,
        _ => {
            return Err(CalmiaCliError::Answers(
                "Answers must be a JSON array or object".to_string(),
            ))
        }
    };

    entries
        .into_iter()
        .map(|(index, v)| {
            let answer = match v {
                Value::Number(n) => n.as_f64().map(AnswerValue::Number),
                Value::String(s) => Some(AnswerValue::Text(s)),
                Value::Bool(b) => Some(AnswerValue::Text(if b { "Yes" } else { "No" }.to_string())),
                _ => None,
            };
            answer
                .map(|a| (index, a))
                .ok_or_else(|| CalmiaCliError::Answers(format!("Unsupported answer at index {index}")))
        })
        .collect()
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<(), CalmiaCliError> {
    let output = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", output);
    Ok(())
}

// Error types

#[derive(Debug)]
enum CalmiaCliError {
    Io(io::Error),
    Pipeline(PipelineError),
    Json(serde_json::Error),
    Store(StoreError),
    Answers(String),
    DoctorFailed,
}

impl From<io::Error> for CalmiaCliError {
    fn from(e: io::Error) -> Self {
        CalmiaCliError::Io(e)
    }
}

impl From<PipelineError> for CalmiaCliError {
    fn from(e: PipelineError) -> Self {
        CalmiaCliError::Pipeline(e)
    }
}

impl From<serde_json::Error> for CalmiaCliError {
    fn from(e: serde_json::Error) -> Self {
        CalmiaCliError::Json(e)
    }
}

impl From<StoreError> for CalmiaCliError {
    fn from(e: StoreError) -> Self {
        CalmiaCliError::Store(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl CliError {
    fn new(code: &str, message: String, hint: &str) -> Self {
        Self {
            code: code.to_string(),
            message,
            hint: Some(hint.to_string()),
        }
    }
}

impl From<CalmiaCliError> for CliError {
    fn from(e: CalmiaCliError) -> Self {
        match e {
            CalmiaCliError::Io(e) => {
                CliError::new("IO_ERROR", e.to_string(), "Check file paths and permissions")
            }
            CalmiaCliError::Json(e) => CliError::new("JSON_ERROR", e.to_string(), "Check JSON syntax"),
            CalmiaCliError::Store(e) => CliError::new(
                "STORE_ERROR",
                e.to_string(),
                "Snapshots are shaped as {collection: {docId: document}}",
            ),
            CalmiaCliError::Answers(msg) => CliError::new(
                "ANSWERS_ERROR",
                msg,
                "Provide a JSON array of answers in question order",
            ),
            CalmiaCliError::DoctorFailed => CliError::new(
                "DOCTOR_FAILED",
                "One or more health checks failed".to_string(),
                "Review the doctor report for details",
            ),
            CalmiaCliError::Pipeline(e) => pipeline_error(e),
        }
    }
}

fn pipeline_error(e: PipelineError) -> CliError {
    let message = e.to_string();
    let (code, hint) = match e {
        PipelineError::DataSource(_) => ("DATA_SOURCE_ERROR", "Check the store snapshot"),
        PipelineError::NoValidQuestions => {
            ("NO_VALID_QUESTIONS", "Run 'calmia questions' to see rejected documents")
        }
        PipelineError::Validation(_) => ("VALIDATION_ERROR", "Answer every question and retry"),
        PipelineError::AuthenticationRequired => ("AUTH_REQUIRED", "Pass --user"),
        PipelineError::Prediction(_) => ("PREDICTION_ERROR", "Check the prediction service logs"),
        PipelineError::Recommendation(_) => {
            ("RECOMMENDATION_ERROR", "Check the recommendation service logs")
        }
        PipelineError::EnvironmentNotFound { .. } => {
            ("ENVIRONMENT_NOT_FOUND", "Check the environments collection")
        }
        PipelineError::Network(_) => ("NETWORK_ERROR", "Run 'calmia doctor' to check connectivity"),
        PipelineError::Storage(_) => ("STORE_ERROR", "Check the cache directory and snapshot"),
        PipelineError::Json(_) => ("JSON_ERROR", "Check JSON syntax"),
        PipelineError::Config(_) => ("CONFIG_ERROR", "Check the configuration file"),
        PipelineError::Cancelled => ("CANCELLED", "Re-run the command"),
    };
    CliError::new(code, message, hint)
}

// Report types

#[derive(Serialize)]
struct QuestionReport {
    valid_questions: usize,
    rejected_documents: Vec<RejectedDocument>,
    questions: Value,
}

#[derive(Serialize)]
struct RejectedDocument {
    document_id: String,
    error: String,
}

#[derive(Serialize)]
struct DoctorReport {
    version: String,
    max_attempts: u32,
    cache_ttl_hours: u64,
    checks: Vec<DoctorCheck>,
}

#[derive(Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
