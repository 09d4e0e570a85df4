//! Logging backend bootstrap and per-build logging context.
//!
//! # Responsibility
//! - Initialize the file-based rolling log backend once per process.
//! - Provide `BuildLogContext`, the explicit logging handle a single build
//!   run writes its `event=...` lines through.
//!
//! # Invariants
//! - Backend init is idempotent for the same level and directory.
//! - Backend init never panics; re-initialization with a different
//!   directory or level is rejected.
//! - Every pipeline event carries the `run_id` of its build.

use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::{debug, error, info, warn};
use once_cell::sync::OnceCell;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Instant;
use uuid::Uuid;

const LOG_FILE_BASENAME: &str = "dielectric_builder";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_LOG_FILES: usize = 5;
const MAX_PANIC_PAYLOAD_CHARS: usize = 160;
const MAX_ERROR_CHARS: usize = 240;

static LOGGING_STATE: OnceCell<LoggingState> = OnceCell::new();
static PANIC_HOOK_INSTALLED: OnceCell<()> = OnceCell::new();

struct LoggingState {
    level: &'static str,
    log_dir: PathBuf,
    _logger: LoggerHandle,
}

impl LoggingState {
    fn ensure_same_config(&self, level: &str, log_dir: &Path) -> Result<(), String> {
        if self.log_dir != log_dir {
            return Err(format!(
                "logging already initialized at `{}`; refusing to switch to `{}`",
                self.log_dir.display(),
                log_dir.display()
            ));
        }
        if self.level != level {
            return Err(format!(
                "logging already initialized with level `{}`; refusing to switch to `{}`",
                self.level, level
            ));
        }
        Ok(())
    }
}

/// Initializes the process-wide log backend with level and directory.
///
/// # Invariants
/// - Repeated calls with the same `level` and `log_dir` are no-ops.
/// - Calls with a different `level` or `log_dir` are rejected.
///
/// # Errors
/// - `level` is not one of `trace|debug|info|warn|error`.
/// - `log_dir` is empty, relative, or cannot be created.
/// - The `flexi_logger` backend fails to start.
pub fn init_logging(level: &str, log_dir: &str) -> Result<(), String> {
    let level = normalize_level(level)?;
    let log_dir = normalize_log_dir(log_dir)?;

    let state = LOGGING_STATE.get_or_try_init(|| start_backend(level, &log_dir))?;
    state.ensure_same_config(level, &log_dir)
}

fn start_backend(level: &'static str, log_dir: &Path) -> Result<LoggingState, String> {
    std::fs::create_dir_all(log_dir).map_err(|err| {
        format!(
            "failed to create log directory `{}`: {err}",
            log_dir.display()
        )
    })?;

    let logger = Logger::try_with_str(level)
        .map_err(|err| format!("invalid log level `{level}`: {err}"))?
        .log_to_file(
            FileSpec::default()
                .directory(log_dir)
                .basename(LOG_FILE_BASENAME),
        )
        .rotate(
            Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(MAX_LOG_FILES),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        // [YYYY-MM-DD HH:MM:SS.ffffff TZ] LEVEL [module] file:line: message
        .format_for_files(flexi_logger::detailed_format)
        .start()
        .map_err(|err| format!("failed to start logger: {err}"))?;

    install_panic_hook_once();

    info!(
        "event=logging_init module=logging status=ok level={} log_dir={} version={}",
        level,
        log_dir.display(),
        env!("CARGO_PKG_VERSION")
    );

    Ok(LoggingState {
        level,
        log_dir: log_dir.to_path_buf(),
        _logger: logger,
    })
}

/// Returns `(level, log_dir)` of the active backend, or `None` before init.
pub fn logging_status() -> Option<(&'static str, PathBuf)> {
    LOGGING_STATE
        .get()
        .map(|state| (state.level, state.log_dir.clone()))
}

/// Returns `debug` for debug builds and `info` for release builds.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

/// Logging handle scoped to exactly one build run.
///
/// Created when a run starts and consumed by [`BuildLogContext::finish`]; all
/// per-material events of the run go through it and share its `run_id`.
#[derive(Debug)]
pub struct BuildLogContext {
    run_id: Uuid,
    builder: &'static str,
    started_at: Instant,
}

impl BuildLogContext {
    /// Opens a new run and emits `event=build_start`.
    pub fn start(builder: &'static str) -> Self {
        let context = Self {
            run_id: Uuid::new_v4(),
            builder,
            started_at: Instant::now(),
        };
        info!(
            "event=build_start module=pipeline builder={} run_id={} status=start",
            context.builder, context.run_id
        );
        context
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn builder(&self) -> &'static str {
        self.builder
    }

    pub fn candidates_found(&self, count: usize) {
        info!(
            "event=build_candidates module=pipeline builder={} run_id={} count={}",
            self.builder, self.run_id, count
        );
    }

    pub fn item_skipped(&self, material_id: &str) {
        debug!(
            "event=item_skipped module=pipeline run_id={} material_id={} reason=no_dielectric_task",
            self.run_id, material_id
        );
    }

    pub fn item_upserted(&self, material_id: &str, task_id: &str, has_piezo: bool) {
        debug!(
            "event=item_upserted module=pipeline run_id={} material_id={} task_id={} piezo={}",
            self.run_id, material_id, task_id, has_piezo
        );
    }

    pub fn item_failed(&self, material_id: &str, task_id: Option<&str>, error: &dyn Display) {
        warn!(
            "event=item_failed module=pipeline run_id={} material_id={} task_id={} status=error error={}",
            self.run_id,
            material_id,
            task_id.unwrap_or("-"),
            sanitize_message(&error.to_string(), MAX_ERROR_CHARS)
        );
    }

    pub fn piezo_omitted(&self, material_id: &str, error: &dyn Display) {
        warn!(
            "event=piezo_omitted module=pipeline run_id={} material_id={} error={}",
            self.run_id,
            material_id,
            sanitize_message(&error.to_string(), MAX_ERROR_CHARS)
        );
    }

    /// Closes the run and emits `event=build_finish` with outcome counts.
    pub fn finish(self, upserted: usize, skipped: usize, failed: usize) {
        info!(
            "event=build_finish module=pipeline builder={} run_id={} status=ok upserted={} skipped={} failed={} duration_ms={}",
            self.builder,
            self.run_id,
            upserted,
            skipped,
            failed,
            self.started_at.elapsed().as_millis()
        );
    }

    /// Closes the run after a fatal error.
    pub fn abort(self, error: &dyn Display) {
        error!(
            "event=build_finish module=pipeline builder={} run_id={} status=error duration_ms={} error={}",
            self.builder,
            self.run_id,
            self.started_at.elapsed().as_millis(),
            sanitize_message(&error.to_string(), MAX_ERROR_CHARS)
        );
    }
}

fn normalize_level(level: &str) -> Result<&'static str, String> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        other => Err(format!(
            "unsupported log level `{other}`; expected trace|debug|info|warn|error"
        )),
    }
}

fn normalize_log_dir(log_dir: &str) -> Result<PathBuf, String> {
    let trimmed = log_dir.trim();
    if trimmed.is_empty() {
        return Err("log_dir cannot be empty".to_string());
    }
    let path = Path::new(trimmed);
    if !path.is_absolute() {
        return Err(format!("log_dir must be an absolute path, got `{trimmed}`"));
    }
    Ok(path.to_path_buf())
}

fn install_panic_hook_once() {
    if PANIC_HOOK_INSTALLED.set(()).is_err() {
        return;
    }

    let previous_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        // Payload may embed document content; keep it on one capped line.
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = if let Some(message) = panic_info.payload().downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = panic_info.payload().downcast_ref::<String>() {
            message.clone()
        } else {
            "non-string panic payload".to_string()
        };
        error!(
            "event=panic_captured module=logging status=error location={} payload={}",
            location,
            sanitize_message(&payload, MAX_PANIC_PAYLOAD_CHARS)
        );
        previous_hook(panic_info);
    }));
}

fn sanitize_message(value: &str, max_chars: usize) -> String {
    let normalized = value.replace(['\n', '\r'], " ");
    let mut truncated = normalized.chars().take(max_chars).collect::<String>();
    if normalized.chars().count() > max_chars {
        truncated.push_str("...");
    }
    truncated
}

#[cfg(test)]
mod tests {
    use super::{
        init_logging, logging_status, normalize_level, normalize_log_dir, sanitize_message,
        BuildLogContext,
    };

    #[test]
    fn normalize_level_accepts_known_values() {
        assert_eq!(normalize_level("INFO").unwrap(), "info");
        assert_eq!(normalize_level(" warning ").unwrap(), "warn");
        assert!(normalize_level("verbose").is_err());
    }

    #[test]
    fn normalize_log_dir_rejects_relative_and_empty_paths() {
        let error = normalize_log_dir("logs/dev").expect_err("relative paths must be rejected");
        assert!(error.contains("absolute"));
        assert!(normalize_log_dir("   ").is_err());
    }

    #[test]
    fn sanitize_message_removes_newlines_and_truncates() {
        let sanitized = sanitize_message("line1\nline2\rline3", 8);
        assert!(!sanitized.contains('\n'));
        assert!(!sanitized.contains('\r'));
        assert!(sanitized.ends_with("..."));
    }

    #[test]
    fn build_contexts_get_distinct_run_ids() {
        let first = BuildLogContext::start("dielectric");
        let second = BuildLogContext::start("dielectric");
        assert_ne!(first.run_id(), second.run_id());
        assert_eq!(first.builder(), "dielectric");
        first.finish(0, 0, 0);
        second.abort(&"store unavailable");
    }

    #[test]
    fn init_logging_is_idempotent_for_same_config_and_rejects_conflicts() {
        let log_dir = tempfile::tempdir().unwrap();
        let log_dir_str = log_dir.path().to_str().unwrap().to_string();
        let second_dir = tempfile::tempdir().unwrap();
        let second_dir_str = second_dir.path().to_str().unwrap().to_string();

        init_logging("info", &log_dir_str).expect("first init should succeed");
        init_logging("info", &log_dir_str).expect("same config should be idempotent");

        let level_error =
            init_logging("debug", &log_dir_str).expect_err("level conflict should fail");
        assert!(level_error.contains("refusing to switch"));

        let dir_error =
            init_logging("info", &second_dir_str).expect_err("directory conflict should fail");
        assert!(dir_error.contains("refusing to switch"));

        let (active_level, active_dir) = logging_status().expect("logging should be active");
        assert_eq!(active_level, "info");
        assert_eq!(active_dir, log_dir.path());
    }
}
