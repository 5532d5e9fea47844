//! Event feed adapters
//!
//! Both adapters push `Transaction`s into the pipeline channel and stop on the
//! shutdown signal:
//! 1. `SyntheticFeed` - deterministic generator with periodic attack injection
//! 2. `WsFeed` - upstream WebSocket JSON feed with exponential-backoff reconnect

use futures_util::{SinkExt, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::models::{AppError, AppResult, ErrorCode, FeedConfig, Transaction, TxKind};
use crate::utils::constants::{
    FEED_MAX_RECONNECT_ATTEMPTS, FEED_RECONNECT_BASE_MS, FEED_RECONNECT_MAX_MS,
    SYNTHETIC_START_TICK, SYNTHETIC_WALLET_POOL, SYNTHETIC_WHALE_COUNT,
};

const SYNTHETIC_TOKENS: [&str; 6] = ["QUBIC", "QX", "QXALPHA", "QU", "QXTRADE", "QUBICX"];

/// Share of batches that carry an attack pattern
const ANOMALY_RATE: f64 = 0.1;

const DUST_BURST: usize = 5;
const SPAM_BURST: usize = 12;

// ============================================
// SYNTHETIC FEED
// ============================================

pub struct SyntheticFeed {
    rng: StdRng,
    wallets: Vec<String>,
    interval: Duration,
    tick: u64,
}

impl SyntheticFeed {
    pub fn new(seed: u64, interval: Duration) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let wallets = (0..SYNTHETIC_WALLET_POOL.max(SYNTHETIC_WHALE_COUNT + 2))
            .map(|_| {
                let bytes: [u8; 20] = rng.gen();
                format!("0x{}", hex::encode(bytes))
            })
            .collect();
        Self {
            rng,
            wallets,
            interval,
            tick: SYNTHETIC_START_TICK,
        }
    }

    /// Whales sit at the front of the pool
    fn whale(&mut self) -> String {
        let i = self.rng.gen_range(0..SYNTHETIC_WHALE_COUNT);
        self.wallets[i].clone()
    }

    fn regular(&mut self) -> String {
        let i = self.rng.gen_range(SYNTHETIC_WHALE_COUNT..self.wallets.len());
        self.wallets[i].clone()
    }

    fn other_than(&mut self, wallet: &str) -> String {
        loop {
            let i = self.rng.gen_range(0..self.wallets.len());
            if self.wallets[i] != wallet {
                return self.wallets[i].clone();
            }
        }
    }

    fn token(&mut self) -> &'static str {
        SYNTHETIC_TOKENS[self.rng.gen_range(0..SYNTHETIC_TOKENS.len())]
    }

    fn tx(&mut self, source: String, dest: String, amount: f64) -> Transaction {
        let token = self.token();
        Transaction::transfer(source, dest, (amount * 100.0).round() / 100.0)
            .with_token(token)
            .with_tick(self.tick)
    }

    fn normal(&mut self) -> Transaction {
        let source = self.regular();
        let dest = self.other_than(&source);
        let amount = self.rng.gen_range(1.0..10_000.0);
        let tx = self.tx(source, dest, amount);
        if self.rng.gen_bool(0.05) {
            tx.with_kind(TxKind::ContractCall)
        } else {
            tx
        }
    }

    fn anomaly(&mut self) -> Vec<Transaction> {
        match self.rng.gen_range(0..4) {
            0 => {
                let source = self.whale();
                let dest = self.other_than(&source);
                let amount = self.rng.gen_range(100_000.0..10_000_000.0);
                vec![self.tx(source, dest, amount)]
            }
            1 => {
                let wallet = self.regular();
                let amount = self.rng.gen_range(1_000.0..50_000.0);
                vec![self.tx(wallet.clone(), wallet, amount)]
            }
            2 => {
                let source = self.regular();
                (0..DUST_BURST)
                    .map(|_| {
                        let dest = self.other_than(&source);
                        let amount = self.rng.gen_range(0.01..0.1);
                        self.tx(source.clone(), dest, amount)
                    })
                    .collect()
            }
            _ => {
                let source = self.regular();
                (0..SPAM_BURST)
                    .map(|_| {
                        let dest = self.other_than(&source);
                        let amount = self.rng.gen_range(1.0..100.0);
                        self.tx(source.clone(), dest, amount)
                    })
                    .collect()
            }
        }
    }

    /// One interval's worth of transactions
    pub fn next_batch(&mut self) -> Vec<Transaction> {
        self.tick += 1;
        if self.rng.gen_bool(ANOMALY_RATE) {
            self.anomaly()
        } else {
            vec![self.normal()]
        }
    }

    pub async fn run(mut self, tx: mpsc::Sender<Transaction>, mut shutdown: watch::Receiver<bool>) {
        info!(
            wallets = self.wallets.len(),
            interval_ms = self.interval.as_millis() as u64,
            "🎲 Synthetic feed started"
        );
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    for event in self.next_batch() {
                        if tx.send(event).await.is_err() {
                            info!("📪 Pipeline dropped, stopping synthetic feed");
                            return;
                        }
                    }
                }
            }
        }
        info!("🛑 Synthetic feed stopped");
    }
}

// ============================================
// UPSTREAM WEBSOCKET FEED
// ============================================

pub struct WsFeed {
    url: String,
}

/// Accepts one transaction object or an array of them
pub fn parse_feed_message(text: &str) -> AppResult<Vec<Transaction>> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(|e| {
        AppError::with_source(ErrorCode::FeedDecodeFailed, "feed message is not JSON", e)
    })?;
    let decoded = if value.is_array() {
        serde_json::from_value::<Vec<Transaction>>(value)
    } else {
        serde_json::from_value::<Transaction>(value).map(|tx| vec![tx])
    };
    decoded.map_err(|e| {
        AppError::with_source(ErrorCode::FeedDecodeFailed, "feed message is not a transaction", e)
    })
}

enum SessionEnd {
    Shutdown,
    ReceiverDropped,
    Disconnected,
}

impl WsFeed {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub async fn run(self, tx: mpsc::Sender<Transaction>, mut shutdown: watch::Receiver<bool>) {
        let mut reconnect_attempts = 0;
        let mut reconnect_delay = FEED_RECONNECT_BASE_MS;

        loop {
            match connect_async(self.url.as_str()).await {
                Ok((ws_stream, _)) => {
                    info!(url = %self.url, "🔌 Upstream feed connected");
                    reconnect_attempts = 0;
                    reconnect_delay = FEED_RECONNECT_BASE_MS;

                    match Self::session(ws_stream, &tx, &mut shutdown).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::ReceiverDropped => {
                            info!("📪 Pipeline dropped, stopping upstream feed");
                            return;
                        }
                        SessionEnd::Disconnected => {}
                    }
                }
                Err(e) => {
                    let err = AppError::new(
                        ErrorCode::FeedConnectionFailed,
                        format!("upstream feed connection failed: {}", e),
                    );
                    error!(code = err.code_str(), error = %err, "❌ Feed connection failed");
                }
            }

            reconnect_attempts += 1;
            if reconnect_attempts >= FEED_MAX_RECONNECT_ATTEMPTS {
                error!("❌ Max reconnection attempts reached, giving up");
                return;
            }
            warn!(
                delay_ms = reconnect_delay,
                attempt = reconnect_attempts,
                max = FEED_MAX_RECONNECT_ATTEMPTS,
                "🔄 Reconnecting upstream feed"
            );

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(reconnect_delay)) => {}
                _ = shutdown.changed() => break,
            }
            reconnect_delay = (reconnect_delay * 2).min(FEED_RECONNECT_MAX_MS);
        }
        info!("🛑 Upstream feed stopped");
    }

    async fn session(
        ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
        tx: &mpsc::Sender<Transaction>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        let _ = write.send(Message::Close(None)).await;
                        return SessionEnd::Shutdown;
                    }
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => match parse_feed_message(&text) {
                        Ok(events) => {
                            for event in events {
                                if tx.send(event).await.is_err() {
                                    return SessionEnd::ReceiverDropped;
                                }
                            }
                        }
                        Err(e) => {
                            let preview: String = text.chars().take(120).collect();
                            debug!(code = e.code_str(), %preview, "Skipping feed message");
                        }
                    },
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        warn!("🔌 Upstream feed closed by server");
                        return SessionEnd::Disconnected;
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "❌ Upstream feed error");
                        return SessionEnd::Disconnected;
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    }
}

/// Spawn the configured feed: upstream when `AEGIS_FEED_URL` is set, synthetic otherwise
pub fn spawn_feed(
    config: &FeedConfig,
    tx: mpsc::Sender<Transaction>,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    match &config.upstream_url {
        Some(url) => tokio::spawn(WsFeed::new(url.clone()).run(tx, shutdown)),
        None => {
            let seed = config.seed.unwrap_or_else(rand::random);
            tokio::spawn(SyntheticFeed::new(seed, config.interval).run(tx, shutdown))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_is_deterministic() {
        let mut a = SyntheticFeed::new(7, Duration::from_millis(10));
        let mut b = SyntheticFeed::new(7, Duration::from_millis(10));
        for _ in 0..50 {
            let (x, y) = (a.next_batch(), b.next_batch());
            assert_eq!(x.len(), y.len());
            for (l, r) in x.iter().zip(&y) {
                assert_eq!(l.source_wallet, r.source_wallet);
                assert_eq!(l.amount, r.amount);
                assert_eq!(l.tick, r.tick);
            }
        }
    }

    #[test]
    fn test_synthetic_injects_attacks() {
        let mut feed = SyntheticFeed::new(42, Duration::from_millis(10));
        let events: Vec<Transaction> = (0..2_000).flat_map(|_| feed.next_batch()).collect();
        assert!(events.iter().any(|t| t.amount >= 100_000.0));
        assert!(events.iter().any(|t| t.is_self_transfer()));
        assert!(events.iter().any(|t| t.amount <= 0.1));
        assert!(events.iter().all(|t| t.amount >= 0.0 && t.amount.is_finite()));
    }

    #[test]
    fn test_parse_feed_message() {
        let one = parse_feed_message(r#"{"source_wallet":"A","dest_wallet":"B","amount":5}"#).unwrap();
        assert_eq!(one.len(), 1);

        let many = parse_feed_message(
            r#"[{"source_wallet":"A","dest_wallet":"B","amount":5},{"source_wallet":"C","dest_wallet":"D","amount":6,"token":"QX"}]"#,
        )
        .unwrap();
        assert_eq!(many.len(), 2);
        assert_eq!(many[1].token, "QX");

        let err = parse_feed_message("not json").unwrap_err();
        assert_eq!(err.code_str(), "FEED_DECODE_FAILED");
        assert!(parse_feed_message(r#"{"hello":1}"#).is_err());
    }

    #[tokio::test]
    async fn test_synthetic_feed_stops_on_shutdown() {
        let (tx, mut rx) = mpsc::channel(64);
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(SyntheticFeed::new(1, Duration::from_millis(5)).run(tx, stop_rx));

        assert!(rx.recv().await.is_some());
        stop_tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
