/// Bounded readiness polling against the workload's health endpoint
use crate::config::config::WorkloadConfig;
use crate::types::{HarnessError, Result};
use log::{debug, info, warn};
use std::thread;
use std::time::Duration;

/// One readiness check
pub trait HealthProbe {
    /// True when the workload reports itself healthy
    fn check(&self) -> bool;
}

/// `GET http://127.0.0.1:<port><path>`; any 2xx is ready
pub struct HttpHealthProbe {
    url: String,
    client: reqwest::blocking::Client,
}

impl HttpHealthProbe {
    pub fn new(port: u16, path: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|e| HarnessError::Process(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            url: format!("http://127.0.0.1:{}{}", port, path),
            client,
        })
    }

    /// Probe for the configured endpoint; each request is bounded below the cadence
    pub fn for_workload(config: &WorkloadConfig) -> Result<Self> {
        let cadence = config.readiness_cadence();
        let timeout = (cadence * 4 / 5).max(Duration::from_millis(50));
        Self::new(config.health_port, &config.health_path, timeout)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl HealthProbe for HttpHealthProbe {
    fn check(&self) -> bool {
        match self.client.get(&self.url).send() {
            Ok(response) => {
                let ok = response.status().is_success();
                debug!("{} -> {}", self.url, response.status());
                ok
            }
            Err(e) => {
                debug!("{} unreachable: {}", self.url, e);
                false
            }
        }
    }
}

/// Attempt budget at a fixed cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub attempts: u32,
    pub cadence: Duration,
}

impl PollBudget {
    pub fn for_workload(config: &WorkloadConfig) -> Self {
        Self {
            attempts: config.readiness_attempts,
            cadence: config.readiness_cadence(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessOutcome {
    Ready { attempts: u32 },
    TimedOut { attempts: u32 },
    /// The workload died before answering
    Exited { attempts: u32, exit_code: Option<i32> },
}

/// Poll `probe` until ready, the budget is spent, or `exited` reports an exit.
///
/// The cadence sleep happens only between attempts, so a budget of N checks
/// takes N-1 cadences before timing out.
pub fn wait_until_ready(
    probe: &dyn HealthProbe,
    budget: PollBudget,
    mut exited: impl FnMut() -> Option<Option<i32>>,
) -> ReadinessOutcome {
    for attempt in 1..=budget.attempts {
        if let Some(exit_code) = exited() {
            warn!(
                "Workload exited (code {:?}) before readiness, after {} checks",
                exit_code,
                attempt - 1
            );
            return ReadinessOutcome::Exited {
                attempts: attempt - 1,
                exit_code,
            };
        }

        if probe.check() {
            info!("Workload ready after {} health check(s)", attempt);
            return ReadinessOutcome::Ready { attempts: attempt };
        }

        if attempt < budget.attempts {
            thread::sleep(budget.cadence);
        }
    }

    warn!("Workload not ready after {} health checks", budget.attempts);
    ReadinessOutcome::TimedOut {
        attempts: budget.attempts,
    }
}
