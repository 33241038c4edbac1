// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Logging setup for processes embedding the bridge.

use serde::{Deserialize, Serialize};
use tracing::Level;

/// Stream the formatted log lines are written to.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Stdout,
    /// The host process usually owns stdout.
    #[default]
    Stderr,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TracingConfiguration {
    /// one of trace, debug, info, warn, error; anything else means info
    log_level: String,

    output: LogOutput,

    /// colored output, off unless the host writes to a terminal
    ansi: bool,

    display_thread_names: bool,

    display_target: bool,
}

impl Default for TracingConfiguration {
    fn default() -> Self {
        TracingConfiguration {
            log_level: "info".to_string(),
            output: LogOutput::default(),
            ansi: false,
            display_thread_names: true,
            display_target: true,
        }
    }
}

impl TracingConfiguration {
    pub fn with_log_level(self, log_level: impl Into<String>) -> Self {
        TracingConfiguration {
            log_level: log_level.into(),
            ..self
        }
    }

    pub fn with_output(self, output: LogOutput) -> Self {
        TracingConfiguration { output, ..self }
    }

    pub fn with_ansi(self, ansi: bool) -> Self {
        TracingConfiguration { ansi, ..self }
    }

    pub fn with_display_thread_names(self, display_thread_names: bool) -> Self {
        TracingConfiguration {
            display_thread_names,
            ..self
        }
    }

    pub fn with_display_target(self, display_target: bool) -> Self {
        TracingConfiguration {
            display_target,
            ..self
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// The configured level, parsed case-insensitively.
    pub fn level(&self) -> Level {
        self.log_level.parse().unwrap_or(Level::INFO)
    }

    pub fn output(&self) -> LogOutput {
        self.output
    }

    pub fn ansi(&self) -> bool {
        self.ansi
    }

    pub fn display_thread_names(&self) -> bool {
        self.display_thread_names
    }

    pub fn display_target(&self) -> bool {
        self.display_target
    }

    /// Installs the global fmt subscriber.
    ///
    /// The bridge can be loaded more than once per process, so an already
    /// installed subscriber is kept. Returns true if this call installed it.
    pub fn setup_tracing_subscriber(&self) -> bool {
        let builder = tracing_subscriber::fmt()
            .with_max_level(self.level())
            .with_ansi(self.ansi)
            .with_thread_names(self.display_thread_names)
            .with_target(self.display_target);

        let installed = match self.output {
            LogOutput::Stdout => builder.with_writer(std::io::stdout).try_init(),
            LogOutput::Stderr => builder.with_writer(std::io::stderr).try_init(),
        };
        installed.is_ok()
    }
}
