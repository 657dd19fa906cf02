use std::time::Duration;

use anyhow::{bail, Context};

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_DEADLINE_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub database_url: String,
    pub max_connections: u32,
    /// `None` when `REPORT_DEADLINE_SECS=0`.
    pub deadline: Option<Duration>,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .context("DATABASE_URL must be set to a production Postgres instance")?;

        let max_connections = match lookup("REPORT_MAX_CONNECTIONS") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .with_context(|| format!("REPORT_MAX_CONNECTIONS is not a number: {raw}"))?,
            None => DEFAULT_MAX_CONNECTIONS,
        };
        if max_connections == 0 {
            bail!("REPORT_MAX_CONNECTIONS must be at least 1");
        }

        let deadline_secs = match lookup("REPORT_DEADLINE_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("REPORT_DEADLINE_SECS is not a number: {raw}"))?,
            None => DEFAULT_DEADLINE_SECS,
        };

        Ok(Self {
            database_url,
            max_connections,
            deadline: (deadline_secs > 0).then(|| Duration::from_secs(deadline_secs)),
        })
    }
}
