//! Rolling price volatility per (chain, pair)
//!
//! Feeds the confidence heuristic. Volatility is scoring-only and never
//! enters the profit identity, so f64 is fine here.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

const MIN_SAMPLES: usize = 6;

pub struct VolatilityWindow {
    window: VecDeque<(Instant, f64)>,
    max_duration: Duration,
}

impl VolatilityWindow {
    pub fn new(max_duration: Duration) -> Self {
        Self {
            window: VecDeque::new(),
            max_duration,
        }
    }

    pub fn push(&mut self, price: f64) {
        let now = Instant::now();
        self.window.push_back((now, price));
        while let Some((ts, _)) = self.window.front() {
            if now.duration_since(*ts) > self.max_duration {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Standard deviation as a percentage of the mean, or None until the
    /// window has enough samples.
    pub fn volatility_pct(&self) -> Option<f64> {
        if self.window.len() < MIN_SAMPLES {
            return None;
        }
        let prices: Vec<f64> = self.window.iter().map(|(_, p)| *p).collect();
        let mean: f64 = prices.iter().sum::<f64>() / prices.len() as f64;
        if mean <= 0.0 {
            return None;
        }
        let variance: f64 =
            prices.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / prices.len() as f64;
        Some(variance.sqrt() / mean * 100.0)
    }

    pub fn sample_count(&self) -> usize {
        self.window.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_enough_samples() {
        let mut w = VolatilityWindow::new(Duration::from_secs(60));
        for _ in 0..(MIN_SAMPLES - 1) {
            w.push(100.0);
        }
        assert!(w.volatility_pct().is_none());
        w.push(100.0);
        assert_eq!(w.volatility_pct(), Some(0.0));
    }

    #[test]
    fn jittery_prices_raise_volatility() {
        let mut flat = VolatilityWindow::new(Duration::from_secs(60));
        let mut noisy = VolatilityWindow::new(Duration::from_secs(60));
        for i in 0..20 {
            flat.push(100.0);
            noisy.push(if i % 2 == 0 { 95.0 } else { 105.0 });
        }
        assert!(noisy.volatility_pct().unwrap() > flat.volatility_pct().unwrap());
    }
}
