// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Logging output backends (console and rotating file).
//!
//! Implementations are thread-safe and keep the write path cheap; the cyclic
//! threads may log on fault paths and must not block on I/O contention for
//! long.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Log level enumeration for filtering and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Debug: detailed development information
    Debug = 0,
    /// Info: general information about normal operation
    Info = 1,
    /// Warning: potentially harmful situations
    Warning = 2,
    /// Error: error conditions
    Error = 3,
}

impl LogLevel {
    /// Returns the string representation of the log level.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO ",
            Self::Warning => "WARN ",
            Self::Error => "ERROR",
        }
    }
}

/// Output destination trait for log messages.
pub trait Output: Send + Sync {
    /// Write a formatted log message to the output.
    fn write(&self, level: LogLevel, message: &str) -> io::Result<()>;

    /// Flush any buffered output.
    fn flush(&self) -> io::Result<()>;
}

/// Console output implementation.
///
/// Writes directly to stderr with level prefix and newline.
pub struct ConsoleOutput {
    level_filter: LogLevel,
}

impl ConsoleOutput {
    /// Create a new console output with the specified minimum level.
    pub fn new(level_filter: LogLevel) -> Self {
        Self { level_filter }
    }
}

impl Output for ConsoleOutput {
    fn write(&self, level: LogLevel, message: &str) -> io::Result<()> {
        if level < self.level_filter {
            return Ok(());
        }
        eprintln!("[{}] {}", level.as_str(), message);
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        io::stderr().flush()
    }
}

/// Rotating file output.
///
/// Appends to `path`; when the file exceeds `max_bytes` it is renamed to
/// `path.1` (shifting `path.1` -> `path.2`, up to `keep` generations) and a
/// fresh file is started. Rotation happens inline on the writing thread --
/// the files are small enough that the rename cost stays in the noise.
pub struct FileOutput {
    inner: Mutex<FileState>,
    path: PathBuf,
    max_bytes: u64,
    keep: u32,
    level_filter: LogLevel,
}

struct FileState {
    file: File,
    written: u64,
}

impl FileOutput {
    /// Open (appending) a rotating log file.
    ///
    /// # Parameters
    /// - `path`: log file path
    /// - `level_filter`: minimum level written
    /// - `max_bytes`: rotation threshold
    /// - `keep`: rotated generations retained
    pub fn new(
        path: impl AsRef<Path>,
        level_filter: LogLevel,
        max_bytes: u64,
        keep: u32,
    ) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            inner: Mutex::new(FileState { file, written }),
            path,
            max_bytes,
            keep,
            level_filter,
        })
    }

    fn rotate(&self, state: &mut FileState) -> io::Result<()> {
        state.file.flush()?;

        // Shift path.N-1 -> path.N, oldest falls off.
        for n in (1..self.keep).rev() {
            let from = self.generation_path(n);
            let to = self.generation_path(n + 1);
            if from.exists() {
                let _ = std::fs::rename(&from, &to);
            }
        }
        if self.keep > 0 {
            let _ = std::fs::rename(&self.path, self.generation_path(1));
        }

        state.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        state.written = 0;
        Ok(())
    }

    fn generation_path(&self, n: u32) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".{}", n));
        PathBuf::from(name)
    }
}

impl Output for FileOutput {
    fn write(&self, level: LogLevel, message: &str) -> io::Result<()> {
        if level < self.level_filter {
            return Ok(());
        }
        let line = format!("[{}] {}\n", level.as_str(), message);

        let mut state = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("file output mutex poisoned"))?;
        state.file.write_all(line.as_bytes())?;
        state.written += line.len() as u64;
        if state.written >= self.max_bytes {
            self.rotate(&mut state)?;
        }
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("file output mutex poisoned"))?;
        state.file.flush()
    }
}
