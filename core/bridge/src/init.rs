// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use tracing::{debug, warn};

use crate::config::{ClientConfiguration, ConfigError, ConfigLoader};
use crate::runtime::configure_runtime;

/// Applies the process-wide sections of a configuration file and returns
/// its validated client section.
///
/// Installs the logging subscriber unless one is already set, and hands the
/// runtime section to the bridge runtime if it has not started yet. Safe to
/// call more than once; later calls keep what the first one installed.
pub fn initialize_from_config(
    loader: &mut ConfigLoader,
) -> Result<ClientConfiguration, ConfigError> {
    let tracing = loader.tracing().clone();
    if tracing.setup_tracing_subscriber() {
        debug!(?tracing, "tracing subscriber installed");
    } else {
        warn!("tracing subscriber already set, using the existing one");
    }

    let runtime = loader.runtime().clone();
    if configure_runtime(runtime.clone()) {
        debug!(?runtime, "runtime configuration applied");
    } else {
        warn!(?runtime, "runtime already configured, settings ignored");
    }

    loader.client()
}
