//! Stubborn point-to-point link.
//!
//! Every payload gets a link-local sequence number and is retransmitted on
//! each tick until the remote side acknowledges it. Received data frames are
//! acknowledged and handed to the listener every time they arrive, so the
//! listener sees duplicates and must de-duplicate itself.

use crate::config::LinkConfig;
use crate::error::{NetworkError, Result};
use crate::frame::Frame;
use crate::transport::DatagramEndpoint;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

/// Callback receiving every delivered payload
pub type Listener = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

struct StubbornInner {
    endpoint: Arc<dyn DatagramEndpoint>,
    next_seq: AtomicU64,
    /// Encoded data frames awaiting an ACK, by sequence number
    pending: DashMap<u64, Vec<u8>>,
    listener: Listener,
}

impl StubbornInner {
    async fn transmit(&self, frame: &[u8]) {
        if let Err(e) = self.endpoint.send(frame).await {
            // retried on the next tick
            warn!(error = %e, "Transmission failed");
        }
    }

    async fn retransmit_pending(&self) {
        let mut frames: Vec<(u64, Vec<u8>)> = self
            .pending
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        frames.sort_by_key(|(seq, _)| *seq);

        for (seq, frame) in frames {
            trace!(seq, "Retransmitting frame");
            self.transmit(&frame).await;
        }
    }

    async fn on_receive(&self, raw: &[u8]) {
        match Frame::decode(raw) {
            Ok(Frame::Data { seq, payload }) => {
                match (Frame::Ack { seq }).encode() {
                    Ok(ack) => self.transmit(&ack).await,
                    Err(e) => warn!(seq, error = %e, "Failed to encode ACK"),
                }
                (self.listener)(payload);
            }
            Ok(Frame::Ack { seq }) => {
                if self.pending.remove(&seq).is_some() {
                    trace!(seq, "Frame acknowledged");
                }
            }
            Err(e) => {
                debug!(len = raw.len(), error = %e, "Dropping malformed frame");
            }
        }
    }
}

/// Retransmitting link over one datagram endpoint
pub struct StubbornLink {
    inner: Arc<StubbornInner>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    shutdown: watch::Sender<bool>,
}

impl StubbornLink {
    /// Start the transmit and receive tasks for `endpoint`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        endpoint: Arc<dyn DatagramEndpoint>,
        config: &LinkConfig,
        listener: Listener,
    ) -> Self {
        let inner = Arc::new(StubbornInner {
            endpoint,
            next_seq: AtomicU64::new(0),
            pending: DashMap::new(),
            listener,
        });
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);

        tokio::spawn(Self::transmit_loop(
            inner.clone(),
            outbound_rx,
            shutdown_rx.clone(),
            config.retransmit_interval,
        ));
        tokio::spawn(Self::receive_loop(
            inner.clone(),
            shutdown_rx,
            config.retransmit_interval,
        ));

        Self {
            inner,
            outbound,
            shutdown,
        }
    }

    /// Queue a payload for reliable delivery. Never blocks.
    pub fn send(&self, payload: Vec<u8>) -> Result<u64> {
        let seq = self.inner.next_seq.fetch_add(1, Ordering::SeqCst);
        let frame = Frame::Data { seq, payload }.encode()?;
        self.inner.pending.insert(seq, frame.clone());
        self.outbound.send(frame).map_err(|_| NetworkError::Closed)?;
        Ok(seq)
    }

    /// Handle one raw datagram from the remote side
    pub async fn on_receive(&self, raw: &[u8]) {
        self.inner.on_receive(raw).await;
    }

    /// Number of frames not yet acknowledged
    pub fn pending_len(&self) -> usize {
        self.inner.pending.len()
    }

    /// Stop both tasks; unacknowledged frames are abandoned
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    async fn transmit_loop(
        inner: Arc<StubbornInner>,
        mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
        mut shutdown: watch::Receiver<bool>,
        interval: Duration,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                frame = outbound.recv() => match frame {
                    Some(frame) => inner.transmit(&frame).await,
                    None => break,
                },
                _ = ticker.tick() => inner.retransmit_pending().await,
            }
        }
        debug!(pending = inner.pending.len(), "Stubborn transmit loop stopped");
    }

    async fn receive_loop(
        inner: Arc<StubbornInner>,
        mut shutdown: watch::Receiver<bool>,
        backoff: Duration,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                received = inner.endpoint.recv() => match received {
                    Ok(raw) => inner.on_receive(&raw).await,
                    Err(NetworkError::Closed) => break,
                    Err(e) => {
                        warn!(error = %e, "Receive failed");
                        tokio::time::sleep(backoff).await;
                    }
                },
            }
        }
        debug!("Stubborn receive loop stopped");
    }
}

impl Drop for StubbornLink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimConfig, SimNetwork};
    use std::collections::HashSet;

    fn channel_listener() -> (Listener, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener: Listener = Arc::new(move |payload| {
            let _ = tx.send(payload);
        });
        (listener, rx)
    }

    fn fast() -> LinkConfig {
        LinkConfig {
            retransmit_interval: Duration::from_millis(10),
            ..LinkConfig::default()
        }
    }

    #[tokio::test]
    async fn test_delivery_over_lossy_network() {
        let (ea, eb) = SimNetwork::new(SimConfig::lossy(11)).endpoint_pair();
        let (la, _) = channel_listener();
        let (lb, mut rx) = channel_listener();
        let a = StubbornLink::spawn(Arc::new(ea), &fast(), la);
        let _b = StubbornLink::spawn(Arc::new(eb), &fast(), lb);

        for i in 0..20u8 {
            a.send(vec![i]).unwrap();
        }

        let mut seen = HashSet::new();
        while seen.len() < 20 {
            let payload = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            seen.insert(payload);
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while a.pending_len() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_retransmits_until_acknowledged() {
        let (ea, eb) = SimNetwork::reliable().endpoint_pair();
        ea.set_blocked(true);
        let block = ea.block_handle();
        let (la, _) = channel_listener();
        let (lb, mut rx) = channel_listener();
        let a = StubbornLink::spawn(Arc::new(ea), &fast(), la);
        let _b = StubbornLink::spawn(Arc::new(eb), &fast(), lb);

        a.send(b"late".to_vec()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(a.pending_len(), 1);
        assert!(rx.try_recv().is_err());

        block.store(false, Ordering::SeqCst);
        let payload = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload, b"late");
    }

    #[tokio::test]
    async fn test_malformed_datagram_is_ignored() {
        let (ea, _eb) = SimNetwork::reliable().endpoint_pair();
        let (la, mut rx) = channel_listener();
        let a = StubbornLink::spawn(Arc::new(ea), &fast(), la);
        a.on_receive(&[0xde, 0xad]).await;
        assert!(rx.try_recv().is_err());
    }
}
