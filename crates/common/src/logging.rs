// OTC Broker Engine
// Copyright (C) 2026 OTC Broker Engine contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Structured logging bootstrap, shared by the `broker` binary and tests.

use eyre::Result;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::{EnvFilter, Layer};

/// Initialize structured console logging for a broker component.
///
/// Respects `RUST_LOG`, defaulting to `info`. Every span carries the target
/// module, file and line so deal ids / chain ids / queue item ids logged via
/// `tracing::info!(deal_id = %id, ...)` are easy to grep out of the stream.
pub fn init_logging(component_name: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(true);

    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer.with_filter(EnvFilter::from_default_env()))
        .try_init()
        .map_err(|e| eyre::eyre!("failed to initialize tracing subscriber: {e}"))?;

    tracing::info!(component = component_name, "logging initialized");
    Ok(())
}

static TEST_LOGGING_INIT: Once = Once::new();

/// Safe, idempotent logging init for tests. Can be called from any test file.
pub fn init_test_logging() {
    TEST_LOGGING_INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(Level::DEBUG.to_string()));
        let _ = tracing_subscriber::fmt().with_env_filter(env_filter).with_test_writer().try_init();
    });
}
