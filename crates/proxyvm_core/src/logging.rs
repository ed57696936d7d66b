//! VM logging bootstrap and safety policy.
//!
//! # Responsibility
//! - Route `log` records to the host's log sink exactly once per VM.
//! - Emit stable, metadata-only diagnostic events from the runtime.
//! - Report panics to the host before the VM traps.
//!
//! # Invariants
//! - Logging init is idempotent for the same level.
//! - Re-initialization with a different level is rejected.
//! - Logging never panics and never re-enters a borrowed sink.

use crate::abi::{HostAbi, LogLevel};
use log::{info, LevelFilter, Log, Metadata, Record};
use once_cell::sync::OnceCell;
use std::cell::RefCell;
use std::rc::Rc;

const MAX_PANIC_PAYLOAD_CHARS: usize = 160;

static LOGGING_STATE: OnceCell<LoggingState> = OnceCell::new();
static PANIC_HOOK_INSTALLED: OnceCell<()> = OnceCell::new();
static HOST_LOGGER: HostLogger = HostLogger;

thread_local! {
    static HOST_SINK: RefCell<Option<Rc<dyn HostAbi>>> = RefCell::new(None);
}

struct LoggingState {
    level: LogLevel,
}

/// `log::Log` backend forwarding records to the bound host.
struct HostLogger;

impl Log for HostLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let message = record.args().to_string();
        emit(host_level(record.level()), &message);
    }

    fn flush(&self) {}
}

/// Binds the host that receives log records on this thread.
pub fn attach_host(abi: Rc<dyn HostAbi>) {
    let _ = HOST_SINK.try_with(|sink| {
        if let Ok(mut slot) = sink.try_borrow_mut() {
            *slot = Some(abi);
        }
    });
}

pub fn detach_host() {
    let _ = HOST_SINK.try_with(|sink| {
        if let Ok(mut slot) = sink.try_borrow_mut() {
            *slot = None;
        }
    });
}

/// Installs the host logger at `level`.
///
/// # Errors
/// - Returns an error when logging is active at a different level.
/// - Returns an error when another `log` backend already owns the facade.
pub fn init_logging(level: LogLevel) -> Result<(), String> {
    if let Some(state) = LOGGING_STATE.get() {
        return check_level(state, level);
    }

    let state = LOGGING_STATE.get_or_try_init(|| -> Result<LoggingState, String> {
        log::set_logger(&HOST_LOGGER)
            .map_err(|err| format!("failed to install host logger: {err}"))?;
        log::set_max_level(level_filter(level));
        install_panic_hook_once();

        info!(
            "event=vm_logging_init module=core status=ok level={} version={}",
            level.as_str(),
            env!("CARGO_PKG_VERSION")
        );
        Ok(LoggingState { level })
    })?;

    check_level(state, level)
}

/// Active logging level, or `None` before `init_logging`.
pub fn logging_status() -> Option<LogLevel> {
    LOGGING_STATE.get().map(|state| state.level)
}

/// Level used when the host cannot report one.
///
/// - `debug` builds -> `Debug`
/// - `release` builds -> `Info`
pub fn default_log_level() -> LogLevel {
    if cfg!(debug_assertions) {
        LogLevel::Debug
    } else {
        LogLevel::Info
    }
}

fn check_level(state: &LoggingState, level: LogLevel) -> Result<(), String> {
    if state.level != level {
        return Err(format!(
            "logging already initialized with level `{}`; refusing to switch to `{}`",
            state.level.as_str(),
            level.as_str()
        ));
    }
    Ok(())
}

fn emit(level: LogLevel, message: &str) {
    let _ = HOST_SINK.try_with(|sink| {
        let Ok(slot) = sink.try_borrow() else {
            return;
        };
        if let Some(abi) = slot.as_ref() {
            let _ = abi.log(level, message.as_bytes());
        }
    });
}

fn level_filter(level: LogLevel) -> LevelFilter {
    match level {
        LogLevel::Trace => LevelFilter::Trace,
        LogLevel::Debug => LevelFilter::Debug,
        LogLevel::Info => LevelFilter::Info,
        LogLevel::Warn => LevelFilter::Warn,
        LogLevel::Error | LogLevel::Critical => LevelFilter::Error,
    }
}

fn host_level(level: log::Level) -> LogLevel {
    match level {
        log::Level::Trace => LogLevel::Trace,
        log::Level::Debug => LogLevel::Debug,
        log::Level::Info => LogLevel::Info,
        log::Level::Warn => LogLevel::Warn,
        log::Level::Error => LogLevel::Error,
    }
}

fn install_panic_hook_once() {
    if PANIC_HOOK_INSTALLED.get().is_some() {
        return;
    }

    let previous_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_payload_summary(panic_info);
        emit(
            LogLevel::Critical,
            &format!(
                "event=panic_captured module=core status=error location={} payload={}",
                location, payload
            ),
        );
        previous_hook(panic_info);
    }));

    let _ = PANIC_HOOK_INSTALLED.set(());
}

fn panic_payload_summary(info: &std::panic::PanicHookInfo<'_>) -> String {
    let payload = if let Some(message) = info.payload().downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = info.payload().downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    };

    sanitize_message(&payload, MAX_PANIC_PAYLOAD_CHARS)
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
        attach_host, detach_host, host_level, init_logging, level_filter, logging_status,
        sanitize_message,
    };
    use crate::abi::memory::MemoryHost;
    use crate::abi::LogLevel;
    use log::LevelFilter;
    use std::rc::Rc;

    #[test]
    fn critical_shares_the_error_filter() {
        assert_eq!(level_filter(LogLevel::Critical), LevelFilter::Error);
        assert_eq!(level_filter(LogLevel::Trace), LevelFilter::Trace);
        assert_eq!(host_level(log::Level::Warn), LogLevel::Warn);
    }

    #[test]
    fn sanitize_message_removes_newlines_and_truncates() {
        let sanitized = sanitize_message("line1\nline2\rline3", 8);
        assert!(!sanitized.contains('\n'));
        assert!(!sanitized.contains('\r'));
        assert!(sanitized.ends_with("..."));
    }

    #[test]
    fn init_logging_is_idempotent_and_forwards_to_the_host() {
        let memory = Rc::new(MemoryHost::new());
        attach_host(memory.clone());

        init_logging(LogLevel::Info).expect("first init should succeed");
        init_logging(LogLevel::Info).expect("same level should be idempotent");
        let level_error =
            init_logging(LogLevel::Debug).expect_err("level conflict should fail");
        assert!(level_error.contains("refusing to switch"));
        assert_eq!(logging_status(), Some(LogLevel::Info));

        log::info!("event=probe module=test status=ok");
        log::debug!("event=hidden module=test status=ok");
        assert!(memory.logged("event=probe"));
        assert!(!memory.logged("event=hidden"));

        detach_host();
        log::info!("event=after_detach module=test status=ok");
        assert!(!memory.logged("event=after_detach"));
    }
}
