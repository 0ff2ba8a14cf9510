use std::io;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::env::Settings;

pub mod analysis;
pub mod cache;
pub mod env;
pub mod exception;
pub mod jobs;
pub mod orchestrator;
pub mod report;
pub mod wcl;

pub use analysis::{AnalyzerResult, AnalyzerSpec};
pub use exception::{EngineError, EngineResult};
pub use jobs::{JobHandle, JobState, JobStatus};
pub use orchestrator::{AnalyzeOutcome, ReportOrchestrator, ReportRequest};
pub use report::ReportSnapshot;

/// Installs the global tracing subscriber (console + daily rolling file) and
/// keeps the non-blocking writer alive for the process lifetime.
pub struct LoggerManager {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

impl LoggerManager {
    pub fn setup(settings: &Settings) -> Self {
        let file_appender = RollingFileAppender::new(
            Rotation::DAILY,
            &settings.logging.directory,
            &settings.logging.filename,
        );
        let (non_blocking_file_writer, guard) = tracing_appender::non_blocking(file_appender);

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&settings.logging.log_level));

        let console_layer = fmt::layer()
            .with_writer(io::stdout)
            .with_ansi(true)
            .with_target(false)
            .pretty();

        let file_layer = fmt::layer()
            .with_writer(non_blocking_file_writer)
            .with_ansi(false)
            .with_target(false)
            .pretty();

        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        tracing::info!(
            "logger initialized: console and file ({}/{}) output active",
            settings.logging.directory,
            settings.logging.filename
        );

        Self { _guard: guard }
    }
}
