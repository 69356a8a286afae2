//! Metered-only outlier signal: z-score and percentage-jump per numeric
//! field against a small rolling per-symbol window. Never quarantines or
//! drops a record — its only effect is `outlier_detected_total`.

use dashmap::DashMap;
use std::collections::VecDeque;

use crate::metrics::MetricsRegistry;
use crate::models::UnifiedRecord;

const WINDOW_SIZE: usize = 20;
const Z_SCORE_THRESHOLD: f64 = 3.0;
const PERCENTAGE_JUMP_THRESHOLD: f64 = 0.5;

#[derive(Default)]
struct Window {
    price_usd: VecDeque<f64>,
    volume_24h: VecDeque<f64>,
}

impl Window {
    fn push(history: &mut VecDeque<f64>, value: f64) {
        history.push_back(value);
        if history.len() > WINDOW_SIZE {
            history.pop_front();
        }
    }
}

pub struct OutlierDetector {
    windows: DashMap<String, Window>,
    metrics: MetricsRegistry,
}

impl OutlierDetector {
    pub fn new(metrics: MetricsRegistry) -> Self {
        OutlierDetector {
            windows: DashMap::new(),
            metrics,
        }
    }

    /// Evaluate `record` against its symbol's rolling window, emit
    /// `outlier_detected_total` for any signal that fires, then extend the
    /// window with the new observation.
    pub fn observe(&self, record: &UnifiedRecord) {
        let mut window = self.windows.entry(record.symbol.clone()).or_default();

        self.check_field("price_usd", &record.symbol, record.price_usd, &window.price_usd);
        self.check_field("volume_24h", &record.symbol, record.volume_24h, &window.volume_24h);

        Window::push(&mut window.price_usd, record.price_usd);
        Window::push(&mut window.volume_24h, record.volume_24h);
    }

    fn check_field(&self, field: &str, symbol: &str, value: f64, history: &VecDeque<f64>) {
        if let Some(last) = history.back() {
            if *last != 0.0 {
                let jump = ((value - last) / last).abs();
                if jump >= PERCENTAGE_JUMP_THRESHOLD {
                    self.metrics.outlier_detected(field, "percentage_jump", symbol);
                }
            }
        }

        if history.len() >= 2 {
            let mean = history.iter().sum::<f64>() / history.len() as f64;
            let variance = history.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / history.len() as f64;
            let std_dev = variance.sqrt();
            if std_dev > 0.0 && ((value - mean) / std_dev).abs() >= Z_SCORE_THRESHOLD {
                self.metrics.outlier_detected(field, "z_score", symbol);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Source;
    use chrono::Utc;

    fn record(symbol: &str, price: f64) -> UnifiedRecord {
        UnifiedRecord {
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            price_usd: price,
            volume_24h: 100.0,
            market_cap: None,
            percent_change_24h: None,
            timestamp: Utc::now(),
            source: Source::A,
        }
    }

    #[test]
    fn stable_prices_never_panic_and_build_a_window() {
        let detector = OutlierDetector::new(MetricsRegistry);
        for _ in 0..10 {
            detector.observe(&record("BTC", 50_000.0));
        }
    }

    #[test]
    fn large_jump_is_observed_without_error() {
        let detector = OutlierDetector::new(MetricsRegistry);
        detector.observe(&record("BTC", 50_000.0));
        detector.observe(&record("BTC", 500_000.0));
    }
}
