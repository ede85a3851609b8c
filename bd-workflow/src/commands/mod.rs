pub mod agent;
pub mod analytics;
pub mod migrate;
pub mod template;
pub mod workflow;

use std::time::Duration;

use anyhow::Context as _;
use serde::Serialize;

use bd_workflow::bridge::Bridge;
use bd_workflow::config::Config;

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

/// Resolved configuration shared by every command.
pub struct Context {
    pub config: Config,
}

impl Context {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Open the coordination store, applying pending migrations when configured.
    pub fn bridge(&self) -> anyhow::Result<Bridge> {
        let path = &self.config.database.coordination_path;
        Bridge::open(path, &self.config)
            .with_context(|| format!("failed to open coordination store {}", path.display()))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.config.agents.retry_backoff_ms)
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// `12ms`, `1.4s`, `2m05s`.
pub fn format_elapsed(d: Duration) -> String {
    let ms = d.as_millis();
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", d.as_secs_f64())
    } else {
        format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1000)
    }
}
