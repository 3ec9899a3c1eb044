//! Deterministic in-memory datagram network for tests.
//!
//! Faults are drawn from one seeded RNG so a given seed replays the same
//! pattern of loss, duplication and delay for the same send order.

use crate::error::{NetworkError, Result};
use crate::transport::DatagramEndpoint;
use async_trait::async_trait;
use depchain_core::ReplicaId;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::trace;

/// Fault model of a [`SimNetwork`]
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Probability that a datagram is dropped
    pub loss: f64,
    /// Probability that a datagram is delivered twice
    pub duplicate: f64,
    /// Probability that a datagram is delayed (and therefore reordered)
    pub reorder: f64,
    /// Upper bound of the reordering delay
    pub max_delay: Duration,
    /// RNG seed
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            loss: 0.0,
            duplicate: 0.0,
            reorder: 0.0,
            max_delay: Duration::from_millis(20),
            seed: 7,
        }
    }
}

impl SimConfig {
    /// Network that drops, duplicates and reorders
    pub fn lossy(seed: u64) -> Self {
        Self {
            loss: 0.2,
            duplicate: 0.1,
            reorder: 0.2,
            max_delay: Duration::from_millis(20),
            seed,
        }
    }
}

/// Factory of connected endpoint pairs sharing one fault model
#[derive(Clone)]
pub struct SimNetwork {
    config: SimConfig,
    rng: Arc<Mutex<StdRng>>,
}

impl SimNetwork {
    /// Create a network with the given fault model
    pub fn new(config: SimConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng: Arc::new(Mutex::new(rng)),
        }
    }

    /// Reliable network
    pub fn reliable() -> Self {
        Self::new(SimConfig::default())
    }

    /// Create two endpoints connected to each other
    pub fn endpoint_pair(&self) -> (SimEndpoint, SimEndpoint) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        let a = SimEndpoint {
            network: self.clone(),
            outbound: tx_b,
            inbound: tokio::sync::Mutex::new(rx_a),
            blocked: Arc::new(AtomicBool::new(false)),
        };
        let b = SimEndpoint {
            network: self.clone(),
            outbound: tx_a,
            inbound: tokio::sync::Mutex::new(rx_b),
            blocked: Arc::new(AtomicBool::new(false)),
        };
        (a, b)
    }

    /// Full mesh: `mesh[a][b]` is `a`'s endpoint of the `a`-`b` channel
    pub fn mesh(&self, ids: &[ReplicaId]) -> HashMap<ReplicaId, HashMap<ReplicaId, SimEndpoint>> {
        let mut mesh: HashMap<ReplicaId, HashMap<ReplicaId, SimEndpoint>> =
            ids.iter().map(|id| (id.clone(), HashMap::new())).collect();
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                let (ea, eb) = self.endpoint_pair();
                mesh.entry(a.clone()).or_default().insert(b.clone(), ea);
                mesh.entry(b.clone()).or_default().insert(a.clone(), eb);
            }
        }
        mesh
    }

    /// How many copies of a datagram to deliver, and after what delay
    fn plan(&self) -> Vec<Duration> {
        let mut rng = self.rng.lock();
        if rng.gen_bool(self.config.loss.clamp(0.0, 1.0)) {
            return Vec::new();
        }
        let copies = if rng.gen_bool(self.config.duplicate.clamp(0.0, 1.0)) {
            2
        } else {
            1
        };
        (0..copies)
            .map(|_| {
                if rng.gen_bool(self.config.reorder.clamp(0.0, 1.0)) {
                    let max = self.config.max_delay.as_millis().max(1) as u64;
                    Duration::from_millis(rng.gen_range(1..=max))
                } else {
                    Duration::ZERO
                }
            })
            .collect()
    }
}

/// One side of a simulated channel
pub struct SimEndpoint {
    network: SimNetwork,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    blocked: Arc<AtomicBool>,
}

impl SimEndpoint {
    /// Silently drop everything this endpoint sends while `blocked` is set
    pub fn set_blocked(&self, blocked: bool) {
        self.blocked.store(blocked, Ordering::SeqCst);
    }

    /// Handle for toggling the outbound block from elsewhere
    pub fn block_handle(&self) -> Arc<AtomicBool> {
        self.blocked.clone()
    }
}

#[async_trait]
impl DatagramEndpoint for SimEndpoint {
    async fn send(&self, datagram: &[u8]) -> Result<()> {
        if self.blocked.load(Ordering::SeqCst) {
            trace!(len = datagram.len(), "Blocked endpoint dropped datagram");
            return Ok(());
        }
        for delay in self.network.plan() {
            if delay.is_zero() {
                self.outbound
                    .send(datagram.to_vec())
                    .map_err(|_| NetworkError::Closed)?;
            } else {
                let outbound = self.outbound.clone();
                let datagram = datagram.to_vec();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = outbound.send(datagram);
                });
            }
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>> {
        self.inbound.lock().await.recv().await.ok_or(NetworkError::Closed)
    }
}
