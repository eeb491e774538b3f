//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::pipeline::ExecutionMode;
use crate::domain::outline::PageCountContract;
use crate::domain::report::UnparsablePolicy;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "lucido";
const DEFAULT_MODEL_BASE_URL: &str = "http://localhost:11434/v1";
const DEFAULT_TEXT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_VISION_MODEL: &str = "gpt-4o";
const DEFAULT_MODEL_MAX_TOKENS: u32 = 8192;
const DEFAULT_MODEL_TEMPERATURE: f32 = 0.7;
const DEFAULT_MODEL_RETRIES: u32 = 3;
const DEFAULT_MODEL_BACKOFF_MS: u64 = 500;
const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 120;
const DEFAULT_BROWSER_EXECUTABLE: &str = "chromium";
const DEFAULT_VIEWPORT_WIDTH: u32 = 1280;
const DEFAULT_VIEWPORT_HEIGHT: u32 = 720;
const DEFAULT_WAIT_BUDGET_MS: u64 = 8000;
const DEFAULT_PIPELINE_CONCURRENCY: usize = 4;
const DEFAULT_MAX_RENDER_ATTEMPTS: u32 = 5;
const DEFAULT_MAX_REPAIR_ROUNDS: u32 = 10;
const DEFAULT_DATA_DIR: &str = "decks";

/// Command-line arguments for the Lucido binary.
#[derive(Debug, Parser)]
#[command(name = "lucido", version, about = "Lucido slide deck generator")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "LUCIDO_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Plan an outline and render the full deck.
    Generate(Box<GenerateArgs>),
    /// Plan an outline and print it as JSON without rendering.
    Plan(PlanArgs),
    /// Export a previously generated deck as one PDF per slide.
    #[command(name = "export-pdf")]
    ExportPdf(ExportPdfArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DeckArgs {
    /// Deck topic.
    #[arg(long, value_name = "TEXT")]
    pub topic: String,

    /// Exact number of slides.
    #[arg(long, value_name = "COUNT", conflicts_with_all = ["min_pages", "max_pages"])]
    pub pages: Option<u32>,

    /// Lower bound of the slide-count range.
    #[arg(long = "min-pages", value_name = "COUNT", requires = "max_pages")]
    pub min_pages: Option<u32>,

    /// Upper bound of the slide-count range.
    #[arg(long = "max-pages", value_name = "COUNT", requires = "min_pages")]
    pub max_pages: Option<u32>,

    /// Target audience description.
    #[arg(long, value_name = "TEXT")]
    pub audience: Option<String>,

    /// Reference visual style.
    #[arg(long, value_name = "TEXT")]
    pub style: Option<String>,

    /// Topic that must be covered; repeatable.
    #[arg(long = "focus", value_name = "TEXT")]
    pub focus_topics: Vec<String>,
}

impl DeckArgs {
    /// Translate the page flags into a contract; no flags means the planner
    /// chooses freely.
    pub fn page_contract(&self) -> PageCountContract {
        match (self.pages, self.min_pages, self.max_pages) {
            (Some(count), _, _) => PageCountContract::fixed(count),
            (None, Some(min), Some(max)) => PageCountContract::range(min, max),
            _ => PageCountContract::Open,
        }
    }
}

#[derive(Debug, Args, Default, Clone)]
pub struct GenerateArgs {
    #[command(flatten)]
    pub deck: DeckArgs,

    #[command(flatten)]
    pub overrides: GenerateOverrides,

    /// Execution mode (sequential|parallel).
    #[arg(long, value_name = "MODE")]
    pub mode: Option<String>,

    /// Re-render only the unit at this position, reusing the stored outline.
    #[arg(long = "only", value_name = "POSITION")]
    pub only: Option<u32>,

    /// Project identifier; defaults to a fresh UUID.
    #[arg(long, value_name = "UUID")]
    pub project: Option<uuid::Uuid>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct PlanArgs {
    #[command(flatten)]
    pub deck: DeckArgs,

    #[command(flatten)]
    pub overrides: GenerateOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct ExportPdfArgs {
    #[command(flatten)]
    pub overrides: GenerateOverrides,

    /// Project identifier of the deck to export.
    #[arg(long, value_name = "UUID")]
    pub project: uuid::Uuid,

    /// Directory to write the per-slide PDF files into.
    #[arg(value_name = "DIR", value_hint = ValueHint::DirPath)]
    pub output: PathBuf,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GenerateOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the OpenAI-compatible API base URL.
    #[arg(long = "model-base-url", value_name = "URL")]
    pub model_base_url: Option<String>,

    /// Override the API key.
    #[arg(long = "model-api-key", value_name = "KEY", env = "LUCIDO_MODELS__API_KEY")]
    pub model_api_key: Option<String>,

    /// Override the text generation model.
    #[arg(long = "text-model", value_name = "NAME")]
    pub text_model: Option<String>,

    /// Override the vision model used by the inspector.
    #[arg(long = "vision-model", value_name = "NAME")]
    pub vision_model: Option<String>,

    /// Override the browser executable used for off-screen rendering.
    #[arg(long = "browser-executable", value_name = "PATH")]
    pub browser_executable: Option<PathBuf>,

    /// Toggle the visual inspection stage.
    #[arg(
        long = "inspection",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub inspection: Option<bool>,

    /// Override the per-deck concurrency limit for parallel mode.
    #[arg(long = "concurrency", value_name = "COUNT")]
    pub concurrency: Option<usize>,

    /// Override the persistent storage directory; "memory" disables it.
    #[arg(long = "data-dir", value_name = "PATH")]
    pub data_dir: Option<PathBuf>,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub models: ModelSettings,
    pub browser: BrowserSettings,
    pub inspection: InspectionSettings,
    pub pipeline: PipelineSettings,
    pub storage: StorageSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub text_model: String,
    pub vision_model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub retries: u32,
    pub backoff: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub executable: PathBuf,
    pub width: u32,
    pub height: u32,
    pub wait_budget: Duration,
}

#[derive(Debug, Clone)]
pub struct InspectionSettings {
    pub enabled: bool,
    pub unparsable_policy: UnparsablePolicy,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub mode: ExecutionMode,
    pub concurrency: usize,
    pub max_render_attempts: u32,
    pub max_repair_rounds: u32,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// `None` keeps everything in memory for the current process.
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("LUCIDO").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match &cli.command {
        Command::Generate(args) => {
            raw.apply_overrides(&args.overrides);
            if let Some(mode) = args.mode.as_ref() {
                raw.pipeline.mode = Some(mode.clone());
            }
        }
        Command::Plan(args) => raw.apply_overrides(&args.overrides),
        Command::ExportPdf(args) => raw.apply_overrides(&args.overrides),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    models: RawModelSettings,
    browser: RawBrowserSettings,
    inspection: RawInspectionSettings,
    pipeline: RawPipelineSettings,
    storage: RawStorageSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &GenerateOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.model_base_url.as_ref() {
            self.models.base_url = Some(url.clone());
        }
        if let Some(key) = overrides.model_api_key.as_ref() {
            self.models.api_key = Some(key.clone());
        }
        if let Some(model) = overrides.text_model.as_ref() {
            self.models.text_model = Some(model.clone());
        }
        if let Some(model) = overrides.vision_model.as_ref() {
            self.models.vision_model = Some(model.clone());
        }
        if let Some(path) = overrides.browser_executable.as_ref() {
            self.browser.executable = Some(path.clone());
        }
        if let Some(enabled) = overrides.inspection {
            self.inspection.enabled = Some(enabled);
        }
        if let Some(concurrency) = overrides.concurrency {
            self.pipeline.concurrency = Some(concurrency);
        }
        if let Some(dir) = overrides.data_dir.as_ref() {
            self.storage.data_dir = Some(dir.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            models,
            browser,
            inspection,
            pipeline,
            storage,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let models = build_model_settings(models)?;
        let browser = build_browser_settings(browser)?;
        let inspection = build_inspection_settings(inspection)?;
        let pipeline = build_pipeline_settings(pipeline)?;
        let storage = build_storage_settings(storage);

        Ok(Self {
            logging,
            models,
            browser,
            inspection,
            pipeline,
            storage,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_model_settings(models: RawModelSettings) -> Result<ModelSettings, LoadError> {
    let base_url = models
        .base_url
        .unwrap_or_else(|| DEFAULT_MODEL_BASE_URL.to_string());
    if base_url.trim().is_empty() {
        return Err(LoadError::invalid("models.base_url", "must not be empty"));
    }

    let api_key = models.api_key.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let temperature = models.temperature.unwrap_or(DEFAULT_MODEL_TEMPERATURE);
    if !(0.0..=2.0).contains(&temperature) {
        return Err(LoadError::invalid(
            "models.temperature",
            "must be between 0.0 and 2.0",
        ));
    }

    let timeout_secs = models.timeout_seconds.unwrap_or(DEFAULT_MODEL_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "models.timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ModelSettings {
        base_url,
        api_key,
        text_model: models
            .text_model
            .unwrap_or_else(|| DEFAULT_TEXT_MODEL.to_string()),
        vision_model: models
            .vision_model
            .unwrap_or_else(|| DEFAULT_VISION_MODEL.to_string()),
        max_tokens: models.max_tokens.unwrap_or(DEFAULT_MODEL_MAX_TOKENS),
        temperature,
        retries: models.retries.unwrap_or(DEFAULT_MODEL_RETRIES),
        backoff: Duration::from_millis(models.backoff_ms.unwrap_or(DEFAULT_MODEL_BACKOFF_MS)),
        timeout: Duration::from_secs(timeout_secs),
    })
}

fn build_browser_settings(browser: RawBrowserSettings) -> Result<BrowserSettings, LoadError> {
    let executable = browser
        .executable
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BROWSER_EXECUTABLE));
    if executable.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "browser.executable",
            "path must not be empty",
        ));
    }

    let width = browser.width.unwrap_or(DEFAULT_VIEWPORT_WIDTH);
    let height = browser.height.unwrap_or(DEFAULT_VIEWPORT_HEIGHT);
    if width == 0 || height == 0 {
        return Err(LoadError::invalid(
            "browser.width",
            "viewport dimensions must be greater than zero",
        ));
    }

    Ok(BrowserSettings {
        executable,
        width,
        height,
        wait_budget: Duration::from_millis(
            browser.wait_budget_ms.unwrap_or(DEFAULT_WAIT_BUDGET_MS),
        ),
    })
}

fn build_inspection_settings(
    inspection: RawInspectionSettings,
) -> Result<InspectionSettings, LoadError> {
    let unparsable_policy = match inspection.unparsable_policy.as_deref() {
        None => UnparsablePolicy::default(),
        Some("skip_repair") => UnparsablePolicy::SkipRepair,
        Some("attempt_repair") => UnparsablePolicy::AttemptRepair,
        Some(other) => {
            return Err(LoadError::invalid(
                "inspection.unparsable_policy",
                format!("unknown policy `{other}`, expected skip_repair or attempt_repair"),
            ));
        }
    };

    Ok(InspectionSettings {
        enabled: inspection.enabled.unwrap_or(true),
        unparsable_policy,
    })
}

fn build_pipeline_settings(pipeline: RawPipelineSettings) -> Result<PipelineSettings, LoadError> {
    let mode = match pipeline.mode.as_deref() {
        None | Some("sequential") => ExecutionMode::Sequential,
        Some("parallel") => ExecutionMode::Parallel,
        Some(other) => {
            return Err(LoadError::invalid(
                "pipeline.mode",
                format!("unknown mode `{other}`, expected sequential or parallel"),
            ));
        }
    };

    let concurrency = pipeline.concurrency.unwrap_or(DEFAULT_PIPELINE_CONCURRENCY);
    if concurrency == 0 {
        return Err(LoadError::invalid(
            "pipeline.concurrency",
            "must be greater than zero",
        ));
    }

    Ok(PipelineSettings {
        mode,
        concurrency,
        max_render_attempts: pipeline
            .max_render_attempts
            .unwrap_or(DEFAULT_MAX_RENDER_ATTEMPTS)
            .max(1),
        max_repair_rounds: pipeline
            .max_repair_rounds
            .unwrap_or(DEFAULT_MAX_REPAIR_ROUNDS)
            .max(1),
    })
}

fn build_storage_settings(storage: RawStorageSettings) -> StorageSettings {
    let data_dir = match storage.data_dir {
        Some(dir) if dir.as_os_str() == "memory" => None,
        Some(dir) => Some(dir),
        None => Some(PathBuf::from(DEFAULT_DATA_DIR)),
    };
    StorageSettings { data_dir }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawModelSettings {
    base_url: Option<String>,
    api_key: Option<String>,
    text_model: Option<String>,
    vision_model: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    retries: Option<u32>,
    backoff_ms: Option<u64>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBrowserSettings {
    executable: Option<PathBuf>,
    width: Option<u32>,
    height: Option<u32>,
    wait_budget_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawInspectionSettings {
    enabled: Option<bool>,
    unparsable_policy: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPipelineSettings {
    mode: Option<String>,
    concurrency: Option<usize>,
    max_render_attempts: Option<u32>,
    max_repair_rounds: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    data_dir: Option<PathBuf>,
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = RawSettings::default();
        raw.logging.level = Some("info".to_string());
        raw.models.text_model = Some("file-model".to_string());

        let overrides = GenerateOverrides {
            log_level: Some("debug".to_string()),
            text_model: Some("cli-model".to_string()),
            ..Default::default()
        };

        raw.apply_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
        assert_eq!(settings.models.text_model, "cli-model");
    }

    #[test]
    fn defaults_are_usable_without_any_configuration() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
        assert!(settings.inspection.enabled);
        assert_eq!(settings.pipeline.concurrency, DEFAULT_PIPELINE_CONCURRENCY);
        assert_eq!(settings.pipeline.max_render_attempts, 5);
        assert_eq!(settings.storage.data_dir, Some(PathBuf::from("decks")));
        assert!(matches!(settings.pipeline.mode, ExecutionMode::Sequential));
    }

    #[test]
    fn memory_data_dir_disables_persistence() {
        let raw = RawSettings {
            storage: RawStorageSettings {
                data_dir: Some(PathBuf::from("memory")),
            },
            ..Default::default()
        };
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert!(settings.storage.data_dir.is_none());
    }

    #[test]
    fn unknown_pipeline_mode_is_rejected() {
        let raw = RawSettings {
            pipeline: RawPipelineSettings {
                mode: Some("sideways".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            Settings::from_raw(raw),
            Err(LoadError::Invalid { key: "pipeline.mode", .. })
        ));
    }

    #[test]
    fn page_flags_translate_to_contracts() {
        let fixed = DeckArgs {
            pages: Some(5),
            ..Default::default()
        };
        assert!(matches!(
            fixed.page_contract(),
            PageCountContract::Fixed { count: 5 }
        ));

        let range = DeckArgs {
            min_pages: Some(4),
            max_pages: Some(6),
            ..Default::default()
        };
        assert!(matches!(
            range.page_contract(),
            PageCountContract::Range { min: 4, max: 6 }
        ));

        assert!(matches!(
            DeckArgs::default().page_contract(),
            PageCountContract::Open
        ));
    }

    #[test]
    fn parse_generate_arguments() {
        let args = CliArgs::parse_from([
            "lucido",
            "generate",
            "--topic",
            "Edge caching",
            "--pages",
            "6",
            "--focus",
            "TTLs",
            "--focus",
            "Invalidation",
            "--mode",
            "parallel",
        ]);

        match args.command {
            Command::Generate(generate) => {
                assert_eq!(generate.deck.topic, "Edge caching");
                assert_eq!(generate.deck.pages, Some(6));
                assert_eq!(generate.deck.focus_topics.len(), 2);
                assert_eq!(generate.mode.as_deref(), Some("parallel"));
                assert!(generate.only.is_none());
            }
            _ => panic!("wrong command parsed"),
        }
    }

    #[test]
    fn parse_export_pdf_arguments() {
        let project = uuid::Uuid::new_v4();
        let args = CliArgs::parse_from([
            "lucido",
            "export-pdf",
            "--project",
            &project.to_string(),
            "/tmp/deck-out",
        ]);

        match args.command {
            Command::ExportPdf(export) => {
                assert_eq!(export.project, project);
                assert_eq!(export.output, std::path::Path::new("/tmp/deck-out"));
            }
            _ => panic!("wrong command parsed"),
        }
    }
}
