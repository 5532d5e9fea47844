//! Wallet Graph - who pays whom, how much and how risky
//!
//! Source wallets accumulate outgoing volume, counterparties and their worst
//! risk score; destinations get an empty node so they show up as link targets.
//! Backed by `TtlCache` so idle wallets age out.

use serde::Serialize;
use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::models::Transaction;
use crate::utils::cache::{CacheStats, TtlCache};
use crate::utils::constants::{
    GRAPH_FLAG_SCORE, MAX_WALLET_CONNECTIONS, WALLET_GRAPH_MAX_WALLETS, WALLET_GRAPH_TTL_SECS,
};

const FLAGGED_COLOR: &str = "#ef4444";
const NORMAL_COLOR: &str = "#22c55e";
const LABEL_CHARS: usize = 8;

#[derive(Debug, Clone, Default)]
struct WalletNode {
    volume: f64,
    connections: HashSet<String>,
    max_risk_score: u8,
    tx_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    /// Outgoing volume in thousands
    pub val: f64,
    pub color: &'static str,
    pub risk_score: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphLink {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalletGraphView {
    pub nodes: Vec<GraphNode>,
    pub links: Vec<GraphLink>,
    pub tracked_wallets: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalletProfile {
    pub wallet_id: String,
    pub risk_score: u8,
    pub volume: f64,
    pub transaction_count: u64,
    pub counterparties: Vec<String>,
    pub flagged: bool,
}

fn short_label(id: &str) -> String {
    let head: String = id.chars().take(LABEL_CHARS).collect();
    format!("{}...", head)
}

pub struct WalletGraph {
    nodes: TtlCache<WalletNode>,
}

impl Default for WalletGraph {
    fn default() -> Self {
        Self::new(Duration::from_secs(WALLET_GRAPH_TTL_SECS), WALLET_GRAPH_MAX_WALLETS)
    }
}

impl WalletGraph {
    pub fn new(ttl: Duration, max_wallets: usize) -> Self {
        Self {
            nodes: TtlCache::new(ttl, max_wallets),
        }
    }

    /// Fold one scored transaction into the graph
    pub fn record(&self, tx: &Transaction, risk_score: u8, now: Instant) {
        self.nodes.update(&tx.source_wallet, now, WalletNode::default, |node| {
            node.volume += tx.amount.max(0.0);
            node.tx_count += 1;
            node.max_risk_score = node.max_risk_score.max(risk_score);
            if node.connections.len() < MAX_WALLET_CONNECTIONS {
                node.connections.insert(tx.dest_wallet.clone());
            }
        });
        if tx.dest_wallet != tx.source_wallet {
            self.nodes.update(&tx.dest_wallet, now, WalletNode::default, |_| ());
        }
    }

    /// Top `max_nodes` wallets by volume with the links between them.
    /// Each wallet pair appears once regardless of direction.
    pub fn graph(&self, max_nodes: usize, now: Instant) -> WalletGraphView {
        let mut wallets = self.nodes.snapshot(now);
        let tracked_wallets = wallets.len();
        wallets.sort_by(|(a_id, a), (b_id, b)| {
            b.volume
                .total_cmp(&a.volume)
                .then_with(|| a_id.cmp(b_id))
        });
        wallets.truncate(max_nodes);

        let selected: HashSet<&str> = wallets.iter().map(|(id, _)| id.as_str()).collect();
        let mut seen: HashSet<(&str, &str)> = HashSet::new();
        let mut links = Vec::new();
        for (id, node) in &wallets {
            let mut targets: Vec<&String> = node.connections.iter().collect();
            targets.sort();
            for target in targets {
                let Some(target) = selected.get(target.as_str()) else {
                    continue;
                };
                let pair = if id.as_str() <= *target {
                    (id.as_str(), *target)
                } else {
                    (*target, id.as_str())
                };
                if seen.insert(pair) {
                    links.push(GraphLink {
                        source: id.clone(),
                        target: target.to_string(),
                    });
                }
            }
        }

        let nodes = wallets
            .iter()
            .map(|(id, node)| GraphNode {
                id: id.clone(),
                label: short_label(id),
                val: node.volume / 1000.0,
                color: if node.max_risk_score > GRAPH_FLAG_SCORE {
                    FLAGGED_COLOR
                } else {
                    NORMAL_COLOR
                },
                risk_score: node.max_risk_score,
            })
            .collect();

        WalletGraphView {
            nodes,
            links,
            tracked_wallets,
        }
    }

    pub fn wallet(&self, wallet_id: &str, now: Instant) -> Option<WalletProfile> {
        self.nodes.read(wallet_id, now, |node| {
            let mut counterparties: Vec<String> = node.connections.iter().cloned().collect();
            counterparties.sort();
            WalletProfile {
                wallet_id: wallet_id.to_string(),
                risk_score: node.max_risk_score,
                volume: node.volume,
                transaction_count: node.tx_count,
                counterparties,
                flagged: node.max_risk_score > GRAPH_FLAG_SCORE,
            }
        })
    }

    pub fn cleanup_expired(&self, now: Instant) -> usize {
        self.nodes.cleanup_expired(now)
    }

    pub fn stats(&self) -> CacheStats {
        self.nodes.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> WalletGraph {
        WalletGraph::new(Duration::from_secs(60), 100)
    }

    #[test]
    fn test_record_accumulates_source() {
        let graph = graph();
        let now = Instant::now();
        graph.record(&Transaction::transfer("ALICE", "BOB", 1_000.0), 20, now);
        graph.record(&Transaction::transfer("ALICE", "CAROL", 500.0), 90, now);
        graph.record(&Transaction::transfer("ALICE", "BOB", 250.0), 10, now);

        let alice = graph.wallet("ALICE", now).unwrap();
        assert_eq!(alice.volume, 1_750.0);
        assert_eq!(alice.transaction_count, 3);
        // Worst score sticks
        assert_eq!(alice.risk_score, 90);
        assert!(alice.flagged);
        assert_eq!(alice.counterparties, vec!["BOB", "CAROL"]);

        // Destinations exist but carry nothing of their own
        let bob = graph.wallet("BOB", now).unwrap();
        assert_eq!(bob.volume, 0.0);
        assert_eq!(bob.transaction_count, 0);
        assert!(!bob.flagged);
        assert!(graph.wallet("NOBODY", now).is_none());
    }

    #[test]
    fn test_graph_top_nodes_and_dedup_links() {
        let graph = graph();
        let now = Instant::now();
        graph.record(&Transaction::transfer("WHALE_WALLET_1", "POOL", 900_000.0), 85, now);
        graph.record(&Transaction::transfer("POOL", "WHALE_WALLET_1", 10_000.0), 10, now);
        graph.record(&Transaction::transfer("SMALL", "POOL", 5.0), 5, now);

        let view = graph.graph(2, now);
        assert_eq!(view.tracked_wallets, 3);
        let ids: Vec<&str> = view.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["WHALE_WALLET_1", "POOL"]);

        let whale = &view.nodes[0];
        assert_eq!(whale.label, "WHALE_WA...");
        assert_eq!(whale.val, 900.0);
        assert_eq!(whale.color, FLAGGED_COLOR);
        assert_eq!(view.nodes[1].color, NORMAL_COLOR);

        // Both directions collapse into one link; SMALL is outside the selection
        assert_eq!(
            view.links,
            vec![GraphLink {
                source: "WHALE_WALLET_1".to_string(),
                target: "POOL".to_string(),
            }]
        );
    }

    #[test]
    fn test_idle_wallets_age_out() {
        let graph = graph();
        let t0 = Instant::now();
        graph.record(&Transaction::transfer("OLD", "GONE", 10.0), 10, t0);
        graph.record(&Transaction::transfer("NEW", "HERE", 10.0), 10, t0 + Duration::from_secs(50));

        let later = t0 + Duration::from_secs(70);
        assert!(graph.wallet("OLD", later).is_none());
        assert_eq!(graph.graph(50, later).tracked_wallets, 2);
        assert_eq!(graph.cleanup_expired(later), 1);
    }

    #[test]
    fn test_connections_are_bounded() {
        let graph = WalletGraph::new(Duration::from_secs(60), 10_000);
        let now = Instant::now();
        for i in 0..(MAX_WALLET_CONNECTIONS + 10) {
            graph.record(&Transaction::transfer("HUB", format!("D{}", i), 1.0), 1, now);
        }
        let hub = graph.wallet("HUB", now).unwrap();
        assert_eq!(hub.counterparties.len(), MAX_WALLET_CONNECTIONS);
        assert_eq!(hub.transaction_count as usize, MAX_WALLET_CONNECTIONS + 10);
    }
}
