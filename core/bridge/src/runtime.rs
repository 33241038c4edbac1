// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Environment variable overriding the number of worker threads.
pub const WORKERS_ENV: &str = "TETHER_TOKIO_WORKERS";

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct RuntimeConfiguration {
    /// the number of worker threads, 0 means derived from the CPU count
    #[serde(default = "default_worker_threads")]
    worker_threads: usize,

    /// the thread name prefix for the runtime
    #[serde(default = "default_thread_name")]
    thread_name: String,
}

impl Default for RuntimeConfiguration {
    fn default() -> Self {
        RuntimeConfiguration {
            worker_threads: default_worker_threads(),
            thread_name: default_thread_name(),
        }
    }
}

fn default_worker_threads() -> usize {
    0
}

fn default_thread_name() -> String {
    "tether-rt".to_string()
}

impl RuntimeConfiguration {
    pub fn new() -> Self {
        RuntimeConfiguration::default()
    }

    pub fn with_worker_threads(self, worker_threads: usize) -> Self {
        RuntimeConfiguration {
            worker_threads,
            ..self
        }
    }

    pub fn with_thread_name(self, thread_name: &str) -> Self {
        RuntimeConfiguration {
            thread_name: thread_name.to_string(),
            ..self
        }
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    /// Worker count to use: the environment wins over the configuration,
    /// otherwise twice the CPU count with a floor of 4.
    pub fn resolve_worker_threads(&self) -> usize {
        if let Some(workers) = std::env::var(WORKERS_ENV)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|n| *n > 0)
        {
            return workers;
        }
        if self.worker_threads > 0 {
            return self.worker_threads;
        }
        (num_cpus::get() * 2).max(4)
    }
}

static GLOBAL_RUNTIME: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
static RUNTIME_CONFIG: OnceLock<RuntimeConfiguration> = OnceLock::new();

/// Sets the configuration of the global runtime. Only effective before the
/// runtime is first used; returns false otherwise.
pub fn configure_runtime(config: RuntimeConfiguration) -> bool {
    if GLOBAL_RUNTIME.get().is_some() {
        warn!("runtime already started, configuration ignored");
        return false;
    }
    RUNTIME_CONFIG.set(config).is_ok()
}

/// Get or initialize the global runtime used for blocking calls and timers.
pub fn get_runtime() -> &'static tokio::runtime::Runtime {
    GLOBAL_RUNTIME.get_or_init(|| {
        let config = RUNTIME_CONFIG.get_or_init(RuntimeConfiguration::default);
        let workers = config.resolve_worker_threads();
        let prefix = config.thread_name.clone();

        info!(%workers, thread_name = %prefix, "starting bridge runtime");

        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name_fn(move || {
                static ATOMIC_ID: AtomicUsize = AtomicUsize::new(0);
                let id = ATOMIC_ID.fetch_add(1, Ordering::SeqCst);
                format!("{}-{}", prefix, id)
            })
            .enable_all()
            .build()
            .expect("failed to create tokio runtime")
    })
}
