// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge from the `log` facade to an [`Output`] backend.
//!
//! `install()` may be called once per process; later calls are ignored
//! (the facade only accepts one logger). Embedders with their own `log`
//! backend simply never call it.

use super::output::{LogLevel, Output};
use std::sync::Arc;
use std::sync::OnceLock;

static BRIDGE: OnceLock<LogBridge> = OnceLock::new();

/// `log::Log` implementation forwarding to an [`Output`].
pub struct LogBridge {
    output: Arc<dyn Output>,
    max_level: log::LevelFilter,
}

impl LogBridge {
    fn level_of(record_level: log::Level) -> LogLevel {
        match record_level {
            log::Level::Error => LogLevel::Error,
            log::Level::Warn => LogLevel::Warning,
            log::Level::Info => LogLevel::Info,
            log::Level::Debug | log::Level::Trace => LogLevel::Debug,
        }
    }
}

impl log::Log for LogBridge {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &log::Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // I/O errors on the log path are swallowed; logging must never take
        // the control path down.
        let _ = self
            .output
            .write(Self::level_of(record.level()), &format!("{}", record.args()));
    }

    fn flush(&self) {
        let _ = self.output.flush();
    }
}

/// Install the bridge as the process-wide `log` backend.
///
/// Returns false if a logger (ours or the host's) was already installed.
pub fn install(output: Arc<dyn Output>, max_level: log::LevelFilter) -> bool {
    let bridge = BRIDGE.get_or_init(|| LogBridge { output, max_level });
    if log::set_logger(bridge).is_err() {
        return false;
    }
    log::set_max_level(max_level);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_mapping() {
        assert_eq!(LogBridge::level_of(log::Level::Error), LogLevel::Error);
        assert_eq!(LogBridge::level_of(log::Level::Warn), LogLevel::Warning);
        assert_eq!(LogBridge::level_of(log::Level::Info), LogLevel::Info);
        assert_eq!(LogBridge::level_of(log::Level::Debug), LogLevel::Debug);
        assert_eq!(LogBridge::level_of(log::Level::Trace), LogLevel::Debug);
    }
}
