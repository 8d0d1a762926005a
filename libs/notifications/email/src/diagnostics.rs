//! Provider connectivity report.
//!
//! Verifies every registered provider once, in registry order, and ranks the
//! working ones by handshake latency. Nothing is sent and the registry order is
//! left untouched.

use crate::error::TransportError;
use crate::registry::ProviderRegistry;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct WorkingProvider {
    pub name: String,
    pub endpoint: String,
    pub latency: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedProvider {
    pub name: String,
    pub endpoint: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProbeReport {
    /// Fastest first
    pub working: Vec<WorkingProvider>,
    /// Registry order
    pub failed: Vec<FailedProvider>,
}

impl ProbeReport {
    pub fn fastest(&self) -> Option<&WorkingProvider> {
        self.working.first()
    }

    pub fn all_failed(&self) -> bool {
        self.working.is_empty()
    }
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.working.is_empty() && self.failed.is_empty() {
            return writeln!(f, "No e-mail providers configured.");
        }

        writeln!(f, "Working providers ({}):", self.working.len())?;
        for (rank, provider) in self.working.iter().enumerate() {
            writeln!(
                f,
                "  {}. {} [{}] {}ms",
                rank + 1,
                provider.name,
                provider.endpoint,
                provider.latency.as_millis()
            )?;
        }

        writeln!(f, "Failed providers ({}):", self.failed.len())?;
        for provider in &self.failed {
            writeln!(f, "  - {} [{}]: {}", provider.name, provider.endpoint, provider.reason)?;
        }

        if let Some(best) = self.fastest() {
            writeln!(f, "Recommended: {}", best.name)?;
        }
        Ok(())
    }
}

/// Verify each provider with `timeout` and collect the results.
pub async fn probe(registry: &ProviderRegistry, timeout: Duration) -> ProbeReport {
    let mut report = ProbeReport::default();

    for provider in registry.snapshot() {
        let endpoint = provider.transport.endpoint();
        let started = Instant::now();
        let result = match tokio::time::timeout(timeout, provider.transport.verify()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        };
        let latency = started.elapsed();

        match result {
            Ok(()) => {
                info!(
                    provider = %provider.name,
                    endpoint = %endpoint,
                    elapsed_ms = latency.as_millis() as u64,
                    "Provider reachable"
                );
                report.working.push(WorkingProvider {
                    name: provider.name.clone(),
                    endpoint,
                    latency,
                });
            }
            Err(e) => {
                warn!(
                    provider = %provider.name,
                    endpoint = %endpoint,
                    error = %e,
                    "Provider unreachable"
                );
                report.failed.push(FailedProvider {
                    name: provider.name.clone(),
                    endpoint,
                    reason: e.to_string(),
                });
            }
        }
    }

    report.working.sort_by_key(|p| p.latency);
    report
}
