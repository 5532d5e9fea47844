//! Rolling per-wallet activity
//!
//! Feeds the scorer's `WalletContext`: recent same-source transactions for
//! velocity / cluster signals and a smoothed amount baseline per wallet+token.
//! Both maps are TTL-bounded so unbounded distinct wallets cannot grow memory.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use crate::core::risk_score::WalletContext;
use crate::models::{ScorerConfig, Transaction};
use crate::utils::cache::{CacheStats, TtlCache};
use crate::utils::constants::{BASELINE_SMOOTHING, DUST_MAX_AMOUNT};

/// Per-source events kept for the activity window
const MAX_EVENTS_PER_WALLET: usize = 256;
/// Tracked wallets
const MAX_TRACKED_WALLETS: usize = 100_000;

#[derive(Debug, Default)]
struct SourceActivity {
    events: VecDeque<(Instant, String)>,
}

impl SourceActivity {
    fn prune(&mut self, window: Duration, now: Instant) {
        while let Some((at, _)) = self.events.front() {
            if now.saturating_duration_since(*at) >= window {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }
}

pub struct WalletActivity {
    config: ScorerConfig,
    recent: TtlCache<SourceActivity>,
    baselines: TtlCache<f64>,
}

impl WalletActivity {
    pub fn new(config: ScorerConfig) -> Self {
        // Idle wallets drop out once nothing inside their window can matter anymore
        let ttl = config.activity_window.max(Duration::from_secs(60));
        Self {
            recent: TtlCache::new(ttl, MAX_TRACKED_WALLETS),
            baselines: TtlCache::new(ttl * 6, MAX_TRACKED_WALLETS),
            config,
        }
    }

    fn baseline_key(tx: &Transaction) -> String {
        format!("{}:{}", tx.source_wallet, tx.token)
    }

    /// Snapshot of the source wallet's rolling context, excluding `tx` itself
    pub fn context_for(&self, tx: &Transaction, now: Instant, alert_threshold: f64) -> WalletContext {
        let window = self.config.activity_window;
        let (recent_tx_count, distinct_counterparties) = self
            .recent
            .read(&tx.source_wallet, now, |activity| {
                let live = activity
                    .events
                    .iter()
                    .filter(|(at, _)| now.saturating_duration_since(*at) < window);
                let mut count = 0usize;
                let mut dests: HashSet<&str> = HashSet::new();
                for (_, dest) in live {
                    count += 1;
                    dests.insert(dest.as_str());
                }
                dests.insert(tx.dest_wallet.as_str());
                (count, dests.len())
            })
            .unwrap_or((0, 1));

        let baseline = self.baselines.read(&Self::baseline_key(tx), now, |b| *b);

        WalletContext {
            baseline_amount: baseline.unwrap_or(self.config.baseline_amount),
            has_history: baseline.is_some(),
            recent_tx_count,
            distinct_counterparties,
            alert_threshold,
        }
    }

    /// Fold `tx` into the rolling state
    pub fn record(&self, tx: &Transaction, now: Instant) {
        let window = self.config.activity_window;
        self.recent.update(
            &tx.source_wallet,
            now,
            SourceActivity::default,
            |activity| {
                activity.prune(window, now);
                activity.events.push_back((now, tx.dest_wallet.clone()));
                while activity.events.len() > MAX_EVENTS_PER_WALLET {
                    activity.events.pop_front();
                }
            },
        );

        // Dust never moves the baseline
        if tx.amount > DUST_MAX_AMOUNT && tx.amount.is_finite() {
            let default = self.config.baseline_amount;
            self.baselines.update(
                &Self::baseline_key(tx),
                now,
                || default,
                |baseline| {
                    *baseline += BASELINE_SMOOTHING * (tx.amount - *baseline);
                },
            );
        }
    }

    pub fn cleanup_expired(&self, now: Instant) -> usize {
        self.recent.cleanup_expired(now) + self.baselines.cleanup_expired(now)
    }

    pub fn stats(&self) -> CacheStats {
        self.recent.stats()
    }
}
