use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::eval::Metric;
use crate::eval::baseline::DEFAULT_LABEL_FIELD;
use crate::index::AdapterSettings;
use crate::retry::RetryPolicy;
use crate::semantic::DEFAULT_MODEL_ID;

pub const DEFAULT_CACHE_ROOT: &str = ".cache/feedback-eval";

#[derive(Parser, Debug)]
#[command(
    name = "feedback-eval",
    version,
    about = "Retrieval-quality evaluation for labelled feedback collections"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Labels(LabelsArgs),
    Index(IndexArgs),
    Sweep(SweepArgs),
    Baseline(BaselineArgs),
    Report(ReportArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct LabelsArgs {
    #[arg(long, default_value = DEFAULT_CACHE_ROOT)]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub artifacts_dir: Option<PathBuf>,

    #[arg(long)]
    pub records_path: PathBuf,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum IndexRefreshMode {
    Full,
    MissingOrStale,
}

impl IndexRefreshMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::MissingOrStale => "missing-or-stale",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct IndexArgs {
    #[arg(long, default_value = DEFAULT_CACHE_ROOT)]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long, env = "COLLECTION_NAME", default_value = "feedback")]
    pub collection: String,

    #[arg(long)]
    pub corpus_path: PathBuf,

    #[arg(long, default_value = "id")]
    pub id_field: String,

    #[arg(long, default_value = "feedback")]
    pub text_field: String,

    #[arg(long, env = "HF_MODEL_NAME", default_value = DEFAULT_MODEL_ID)]
    pub model_id: String,

    #[arg(long, value_enum, default_value_t = IndexRefreshMode::MissingOrStale)]
    pub refresh_mode: IndexRefreshMode,

    #[arg(long, default_value_t = 500)]
    pub batch_size: usize,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum IndexBackend {
    Sqlite,
    Qdrant,
}

#[derive(Args, Debug, Clone)]
pub struct BackendArgs {
    #[arg(long, value_enum, default_value_t = IndexBackend::Sqlite)]
    pub backend: IndexBackend,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long, env = "QDRANT_HOST", default_value = "localhost")]
    pub qdrant_host: String,

    #[arg(long, env = "QDRANT_PORT", default_value_t = 6333)]
    pub qdrant_port: u16,

    #[arg(long, env = "QDRANT_API_KEY", hide_env_values = true)]
    pub qdrant_api_key: Option<String>,

    #[arg(long, env = "COLLECTION_NAME", default_value = "feedback")]
    pub collection: String,
}

#[derive(Args, Debug, Clone)]
pub struct QueryTuningArgs {
    #[arg(long, default_value_t = 120_000)]
    pub query_timeout_ms: u64,

    #[arg(long, default_value_t = 3)]
    pub retry_attempts: u32,

    #[arg(long, default_value_t = 250)]
    pub retry_backoff_ms: u64,

    #[arg(long, default_value_t = 1_000)]
    pub scroll_page_size: usize,

    #[arg(long, default_value_t = 10_000)]
    pub scroll_max_pages: usize,
}

impl QueryTuningArgs {
    pub fn adapter_settings(&self) -> AdapterSettings {
        AdapterSettings {
            query_timeout: Duration::from_millis(self.query_timeout_ms.max(1)),
            retry: RetryPolicy::new(
                self.retry_attempts,
                Duration::from_millis(self.retry_backoff_ms),
            ),
            scroll_page_size: self.scroll_page_size.max(1),
            scroll_max_pages: self.scroll_max_pages.max(1),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SweepArgs {
    #[arg(long, default_value = DEFAULT_CACHE_ROOT)]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub artifacts_dir: Option<PathBuf>,

    #[arg(long, env = "HF_MODEL_NAME", default_value = DEFAULT_MODEL_ID)]
    pub model_id: String,

    #[command(flatten)]
    pub backend: BackendArgs,

    #[command(flatten)]
    pub tuning: QueryTuningArgs,

    #[arg(long, default_value_t = 4)]
    pub concurrency: usize,

    #[arg(long, default_value_t = 4)]
    pub threshold_concurrency: usize,

    #[arg(long = "label")]
    pub labels: Vec<String>,

    #[arg(long = "filter")]
    pub filters: Vec<String>,

    #[arg(long, default_value_t = false)]
    pub save_outputs: bool,
}

#[derive(Args, Debug, Clone)]
pub struct BaselineArgs {
    #[arg(long, default_value = DEFAULT_CACHE_ROOT)]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub artifacts_dir: Option<PathBuf>,

    #[command(flatten)]
    pub backend: BackendArgs,

    #[command(flatten)]
    pub tuning: QueryTuningArgs,

    #[arg(long, default_value = DEFAULT_LABEL_FIELD)]
    pub label_field: String,

    #[arg(long, default_value_t = 4)]
    pub concurrency: usize,

    #[arg(long = "label")]
    pub labels: Vec<String>,

    #[arg(long, default_value_t = false)]
    pub save_outputs: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ReportArgs {
    #[arg(long, default_value = DEFAULT_CACHE_ROOT)]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub artifacts_dir: Option<PathBuf>,

    #[arg(long = "metric", value_enum)]
    pub metrics: Vec<Metric>,

    #[arg(long)]
    pub threshold: Option<String>,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = DEFAULT_CACHE_ROOT)]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub artifacts_dir: Option<PathBuf>,

    #[arg(long)]
    pub db_path: Option<PathBuf>,
}
