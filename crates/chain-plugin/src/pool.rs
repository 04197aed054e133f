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

//! Multi-endpoint RPC management with health checking and weighted selection.
//!
//! Every `ChainPlugin` implementation that talks to a chain over JSON-RPC
//! pools several endpoints through this type rather than pinning a single
//! URL, so a single flaky provider does not stall deposit scanning or
//! submission. This is the mechanism spec §4.1 alludes to when it says a
//! plugin may use "block-explorer bulk APIs, filter-based log scans, or
//! balance probes" internally -- the choice of *which* endpoint answers a
//! given call is exactly what this pool hides.

use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Health and performance bookkeeping for one RPC endpoint.
#[derive(Debug, Clone)]
struct EndpointInfo {
    url: String,
    is_healthy: bool,
    last_health_check: Option<Instant>,
    response_time_ms: Option<u64>,
    consecutive_failures: u32,
}

/// Performance tier derived from response time, in 100ms buckets. Lower is better.
fn performance_tier(response_time_ms: u64) -> u8 {
    match response_time_ms / 100 {
        0..=1 => 1,
        2..=3 => 2,
        4..=5 => 3,
        _ => 4,
    }
}

fn tier_weight(tier: u8) -> u32 {
    match tier {
        1 => 100,
        2 => 60,
        3 => 30,
        4 => 10,
        _ => 1,
    }
}

/// A pool of RPC endpoints for a single chain, with health checking and
/// weighted round-robin selection favoring faster, healthier endpoints.
pub struct ProviderPool {
    endpoints: RwLock<Vec<EndpointInfo>>,
    round_robin: AtomicUsize,
    client: reqwest::Client,
    max_consecutive_failures: u32,
}

impl ProviderPool {
    /// Build a pool from `urls`, performing an initial health probe against
    /// each. At least one endpoint must be healthy or this returns an error.
    pub async fn new(urls: Vec<String>, max_consecutive_failures: u32) -> eyre::Result<Self> {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(5)).build()?;
        let mut endpoints = Vec::with_capacity(urls.len());

        for url in urls {
            let mut info = EndpointInfo {
                url: url.clone(),
                is_healthy: false,
                last_health_check: None,
                response_time_ms: None,
                consecutive_failures: 0,
            };

            match Self::probe(&client, &url).await {
                Ok(ms) => {
                    info.is_healthy = true;
                    info.response_time_ms = Some(ms);
                    info.last_health_check = Some(Instant::now());
                    debug!(url, ms, "rpc endpoint healthy");
                }
                Err(e) => {
                    info.consecutive_failures = 1;
                    warn!(url, error = %e, "rpc endpoint unhealthy at startup");
                }
            }
            endpoints.push(info);
        }

        let healthy = endpoints.iter().filter(|e| e.is_healthy).count();
        if healthy == 0 {
            return Err(eyre::eyre!("no healthy RPC endpoints available"));
        }
        info!(healthy, total = endpoints.len(), "rpc provider pool initialized");

        Ok(Self {
            endpoints: RwLock::new(endpoints),
            round_robin: AtomicUsize::new(0),
            client,
            max_consecutive_failures,
        })
    }

    async fn probe(client: &reqwest::Client, url: &str) -> eyre::Result<u64> {
        let start = Instant::now();
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "eth_blockNumber",
            "params": [],
            "id": 1
        });
        let response = client.post(url).json(&request).send().await?;
        let elapsed = start.elapsed().as_millis() as u64;
        let body: serde_json::Value = response.json().await?;
        if body.get("result").is_some() {
            Ok(elapsed)
        } else {
            Err(eyre::eyre!("invalid rpc response from {url}"))
        }
    }

    /// Pick a healthy endpoint, weighted toward lower response times.
    pub async fn pick(&self) -> Option<String> {
        let endpoints = self.endpoints.read().await;
        let healthy: Vec<_> = endpoints.iter().filter(|e| e.is_healthy).collect();
        if healthy.is_empty() {
            return None;
        }
        if healthy.len() == 1 {
            return Some(healthy[0].url.clone());
        }

        let mut total_weight = 0u32;
        let mut weighted = Vec::with_capacity(healthy.len());
        for endpoint in &healthy {
            let tier = performance_tier(endpoint.response_time_ms.unwrap_or(300));
            let weight = tier_weight(tier);
            total_weight += weight;
            weighted.push((endpoint, weight));
        }

        let pick = rand::thread_rng().gen_range(0..total_weight);
        let mut acc = 0u32;
        for (endpoint, weight) in weighted {
            acc += weight;
            if pick < acc {
                return Some(endpoint.url.clone());
            }
        }
        Some(healthy[0].url.clone())
    }

    /// Round-robin fallback, used when a caller wants to try a different
    /// endpoint than the one just picked (e.g. after a failed submission).
    pub async fn next_round_robin(&self) -> Option<String> {
        let endpoints = self.endpoints.read().await;
        let healthy: Vec<_> = endpoints.iter().filter(|e| e.is_healthy).collect();
        if healthy.is_empty() {
            return None;
        }
        let idx = self.round_robin.fetch_add(1, Ordering::Relaxed) % healthy.len();
        Some(healthy[idx].url.clone())
    }

    /// Record a successful call against `url`, resetting its failure streak.
    pub async fn mark_success(&self, url: &str, response_time_ms: u64) {
        let mut endpoints = self.endpoints.write().await;
        if let Some(e) = endpoints.iter_mut().find(|e| e.url == url) {
            e.is_healthy = true;
            e.response_time_ms = Some(response_time_ms);
            e.last_health_check = Some(Instant::now());
            e.consecutive_failures = 0;
        }
    }

    /// Record a failed call against `url`, marking it unhealthy once the
    /// configured consecutive-failure threshold is reached.
    pub async fn mark_failure(&self, url: &str) {
        let mut endpoints = self.endpoints.write().await;
        if let Some(e) = endpoints.iter_mut().find(|e| e.url == url) {
            e.consecutive_failures += 1;
            e.last_health_check = Some(Instant::now());
            if e.consecutive_failures >= self.max_consecutive_failures {
                e.is_healthy = false;
                warn!(url, failures = e.consecutive_failures, "rpc endpoint marked unhealthy");
            }
        }
    }

    /// Re-probe every endpoint, healthy or not.
    pub async fn health_check_all(&self) {
        let urls: Vec<String> = {
            let endpoints = self.endpoints.read().await;
            endpoints.iter().map(|e| e.url.clone()).collect()
        };
        for url in urls {
            match Self::probe(&self.client, &url).await {
                Ok(ms) => self.mark_success(&url, ms).await,
                Err(_) => self.mark_failure(&url).await,
            }
        }
    }

    /// Count of currently-healthy endpoints.
    pub async fn healthy_count(&self) -> usize {
        self.endpoints.read().await.iter().filter(|e| e.is_healthy).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiering_favors_fast_endpoints() {
        assert_eq!(performance_tier(50), 1);
        assert_eq!(performance_tier(250), 2);
        assert_eq!(performance_tier(900), 4);
        assert!(tier_weight(1) > tier_weight(4));
    }
}
