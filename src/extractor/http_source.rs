//! JSON HTTP source extraction, gated through `RateGate`.

use tracing::warn;

use crate::metrics::MetricsRegistry;
use crate::models::{RawRecord, Source};
use crate::rate_gate::{Admission, RateGate};

/// Returns `Err("network" | "data")` on failure so the caller can label
/// `etl_errors_total` without re-deriving the failure kind.
pub async fn extract(
    client: &reqwest::Client,
    rate_gate: &RateGate,
    metrics: &MetricsRegistry,
    source: Source,
    url: &str,
    cap: usize,
) -> Result<Vec<RawRecord>, &'static str> {
    let payload = match rate_gate.acquire(source.as_str()).await {
        Admission::Ok => fetch_and_cache(client, rate_gate, metrics, source, url).await?,
        Admission::UseCached(cached) => cached,
        Admission::Throttled { wait_hint } => {
            tokio::time::sleep(wait_hint).await;
            match rate_gate.acquire(source.as_str()).await {
                Admission::Ok => fetch_and_cache(client, rate_gate, metrics, source, url).await?,
                Admission::UseCached(cached) => cached,
                Admission::Throttled { .. } => {
                    warn!(source = source.as_str(), "gave up after repeated throttling");
                    return Err("network");
                }
            }
        }
    };

    let records = decode_records(&payload).ok_or("data")?;
    Ok(records.into_iter().take(cap).collect())
}

async fn fetch_and_cache(
    client: &reqwest::Client,
    rate_gate: &RateGate,
    metrics: &MetricsRegistry,
    source: Source,
    url: &str,
) -> Result<serde_json::Value, &'static str> {
    let start = std::time::Instant::now();
    let response = client.get(url).send().await.map_err(|e| {
        warn!(source = source.as_str(), error = %e, "http request failed");
        "network"
    })?;

    if !response.status().is_success() {
        warn!(source = source.as_str(), status = %response.status(), "non-success http status");
        return Err("network");
    }

    let payload: serde_json::Value = response.json().await.map_err(|e| {
        warn!(source = source.as_str(), error = %e, "failed to decode json body");
        "data"
    })?;

    metrics.observe_latency("extract", start.elapsed().as_secs_f64());
    rate_gate.remember_payload(source.as_str(), payload.clone());
    Ok(payload)
}

/// Accepts either a bare JSON array or `{"data": [...]}` / `{"records": [...]}`
/// envelopes, matching the loose shape real market-data APIs tend to use.
fn decode_records(payload: &serde_json::Value) -> Option<Vec<RawRecord>> {
    let array = payload
        .as_array()
        .or_else(|| payload.get("data").and_then(|v| v.as_array()))
        .or_else(|| payload.get("records").and_then(|v| v.as_array()))?;

    array.iter().map(|v| v.as_object().cloned()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_bare_array() {
        let payload = json!([{"symbol": "BTC"}, {"symbol": "ETH"}]);
        let records = decode_records(&payload).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn decodes_data_envelope() {
        let payload = json!({"data": [{"symbol": "BTC"}]});
        let records = decode_records(&payload).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn rejects_non_array_shapes() {
        assert!(decode_records(&json!({"unexpected": true})).is_none());
    }
}
