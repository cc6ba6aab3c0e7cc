//! Node configuration, read from command-line flags.

use crate::grid::types::TaskOptions;

use anyhow::{Context, Result};
use std::time::Duration;

/// Handler name the subtasking engine is registered under.
pub const SUM_HANDLER: &str = "sum";

/// Settings of one worker pool.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Number of concurrent workers.
    pub worker_count: usize,
    /// Partition the workers pull tasks from.
    pub partition: String,
    /// Sleep between polls when there is nothing to run.
    pub idle_backoff: Duration,
    /// Interval between lease renewals. Must stay well below the grid's lease duration.
    pub lease_renewal: Duration,
}

impl ExecutorConfig {
    /// Checks the pool against the lease the grid grants. A renewal interval
    /// at or above the lease lets running tasks be reclaimed mid-run.
    pub fn validate(&self, lease_duration: Duration) -> Result<()> {
        if self.worker_count < 1 {
            anyhow::bail!("executor needs at least one worker");
        }
        if self.lease_renewal >= lease_duration {
            anyhow::bail!(
                "lease renewal every {:?} does not keep a {:?} lease alive",
                self.lease_renewal,
                lease_duration
            );
        }
        Ok(())
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            partition: "default".to_string(),
            idle_backoff: Duration::from_millis(100),
            lease_renewal: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    /// Number of values to sum (`1..=size`).
    pub size: u32,
    /// Largest unit a single task combines without splitting.
    pub threshold: u32,
    pub workers: usize,
    pub partition: String,
    /// How long the client waits for the root result.
    pub timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            size: 20,
            threshold: 4,
            workers: 4,
            partition: "default".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl NodeConfig {
    pub const USAGE: &'static str = "[--size <n>] [--threshold <n>] [--workers <n>] [--partition <name>] [--timeout-secs <n>]";

    /// Parses flags (without the program name). Unknown flags are ignored.
    pub fn from_args<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|a| a.as_ref().to_string()).collect();
        let mut config = Self::default();

        let mut i = 0;
        while i < args.len() {
            let flag = args[i].as_str();
            let value = || {
                args.get(i + 1)
                    .map(String::as_str)
                    .with_context(|| format!("{} requires a value", flag))
            };

            match flag {
                "--size" => {
                    config.size = value()?.parse().context("--size must be an integer")?;
                    i += 2;
                }
                "--threshold" => {
                    config.threshold = value()?
                        .parse()
                        .context("--threshold must be an integer")?;
                    i += 2;
                }
                "--workers" => {
                    config.workers = value()?.parse().context("--workers must be an integer")?;
                    i += 2;
                }
                "--partition" => {
                    config.partition = value()?.to_string();
                    i += 2;
                }
                "--timeout-secs" => {
                    let secs: u64 = value()?
                        .parse()
                        .context("--timeout-secs must be an integer")?;
                    config.timeout = Duration::from_secs(secs);
                    i += 2;
                }
                _ => {
                    i += 1;
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.size < 1 {
            anyhow::bail!("--size must be at least 1");
        }
        if self.threshold < 1 {
            anyhow::bail!("--threshold must be at least 1");
        }
        if self.workers < 1 {
            anyhow::bail!("--workers must be at least 1");
        }
        Ok(())
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            worker_count: self.workers,
            partition: self.partition.clone(),
            ..ExecutorConfig::default()
        }
    }

    /// Options of the root task; subtasks inherit them.
    pub fn task_options(&self) -> TaskOptions {
        TaskOptions::default()
            .with_partition(&self.partition)
            .with_handler(SUM_HANDLER)
    }
}
