//! Pending header feed
//!
//! Primes the update channel with the upstream's current pending header,
//! then keeps it supplied:
//!
//! ```text
//!  Proxy ── fetch ──► (reply seen by SessionListener) ──┐
//!                                                       ├──► update channel
//!  Zone node ── fetch, then subscribe ──────────────────┘
//! ```

use crate::{
    MinerError, metrics,
    retry::{RetryPolicy, retry},
    session::MinerSession,
    slice::SliceClients,
};
use futures::StreamExt;
use quai_primitives::{Context, Header};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Where pending headers come from and sealed headers go.
#[derive(Debug, Clone)]
pub enum Upstream {
    /// A mining proxy session
    Proxy(Arc<MinerSession>),
    /// The three nodes of the miner's slice
    Nodes(SliceClients),
}

/// Feeds pending headers into the update channel.
#[derive(Debug)]
pub struct PendingHeaderFeed {
    upstream: Upstream,
    updates: mpsc::Sender<Header>,
    policy: RetryPolicy,
}

impl PendingHeaderFeed {
    /// Create a feed for `upstream`.
    pub const fn new(upstream: Upstream, updates: mpsc::Sender<Header>, policy: RetryPolicy) -> Self {
        Self { upstream, updates, policy }
    }

    /// Fetch the first pending header, then deliver updates until the
    /// source ends or `shutdown` fires.
    ///
    /// In proxy mode this returns after the first fetch; the session
    /// listener delivers everything after it.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), MinerError> {
        match &self.upstream {
            Upstream::Proxy(session) => {
                let fetched = retry(self.policy, &shutdown, "Pending header fetch", || {
                    session.fetch_pending_header()
                })
                .await?;
                if fetched.is_some() {
                    info!(target: "quai::feed", "Received initial pending header from proxy");
                }
                Ok(())
            }
            Upstream::Nodes(slice) => self.run_zone(slice, &shutdown).await,
        }
    }

    async fn run_zone(&self, slice: &SliceClients, shutdown: &CancellationToken) -> Result<(), MinerError> {
        let zone = slice.zone();

        let Some(header) =
            retry(self.policy, shutdown, "Pending header fetch", || zone.pending_header()).await?
        else {
            return Ok(());
        };
        info!(
            target: "quai::feed",
            number = header.number(Context::Zone),
            "Received initial pending header from zone"
        );
        self.forward(header).await?;

        let Some(mut headers) = retry(self.policy, shutdown, "Pending header subscription", || {
            zone.subscribe_pending_headers()
        })
        .await?
        else {
            return Ok(());
        };
        debug!(target: "quai::feed", "Subscribed to zone pending headers");

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                next = headers.next() => next,
            };
            match next {
                Some(header) => self.forward(header?).await?,
                None => return Err(MinerError::SubscriptionClosed),
            }
        }
    }

    async fn forward(&self, header: Header) -> Result<(), MinerError> {
        metrics::record_pending_header();
        self.updates.send(header).await.map_err(|_| MinerError::ChannelClosed("update"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{session::SessionListener, test_utils::StubNode};
    use alloy_primitives::Address;
    use assert_matches::assert_matches;
    use futures::SinkExt;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_util::codec::{Framed, LinesCodec};

    fn slice(zone: StubNode) -> SliceClients {
        SliceClients::new([StubNode::default().into_client(), StubNode::default().into_client(), zone.into_client()])
    }

    #[tokio::test(start_paused = true)]
    async fn zone_feed_retries_then_streams_updates() {
        let zone = StubNode::default().with_pending(StubNode::header(10)).fail_fetches(2);
        let pushes = zone.push_channel();
        let (tx, mut rx) = mpsc::channel(10);
        let start = tokio::time::Instant::now();

        pushes.send(Ok(StubNode::header(11))).unwrap();
        pushes.send(Ok(StubNode::header(12))).unwrap();
        drop(pushes);

        let feed = PendingHeaderFeed::new(Upstream::Nodes(slice(zone.clone())), tx, RetryPolicy::default());
        let res = feed.run(CancellationToken::new()).await;

        assert_matches!(res, Err(MinerError::SubscriptionClosed));
        assert_eq!(zone.fetches(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(1 + 2));
        for expected in 10..=12 {
            assert_eq!(rx.recv().await.unwrap().number(Context::Zone), expected);
        }
    }

    #[tokio::test]
    async fn subscription_error_ends_feed() {
        let zone = StubNode::default().with_pending(StubNode::header(1));
        let pushes = zone.push_channel();
        pushes.send(Err(MinerError::SubscriptionClosed)).unwrap();
        let (tx, _rx) = mpsc::channel(10);

        let feed = PendingHeaderFeed::new(Upstream::Nodes(slice(zone)), tx, RetryPolicy::default());
        assert_matches!(feed.run(CancellationToken::new()).await, Err(MinerError::SubscriptionClosed));
    }

    #[tokio::test]
    async fn shutdown_stops_zone_feed() {
        let zone = StubNode::default().with_pending(StubNode::header(1));
        let _pushes = zone.push_channel();
        let (tx, mut rx) = mpsc::channel(10);
        let shutdown = CancellationToken::new();

        let feed = PendingHeaderFeed::new(Upstream::Nodes(slice(zone)), tx, RetryPolicy::default());
        let task = tokio::spawn(feed.run(shutdown.clone()));

        assert_eq!(rx.recv().await.unwrap().number(Context::Zone), 1);
        shutdown.cancel();
        assert!(task.await.unwrap().is_ok());
    }

    async fn proxy_session() -> (Arc<MinerSession>, SessionListener, Framed<tokio::net::TcpStream, LinesCodec>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (session, accepted) = tokio::join!(MinerSession::connect(&addr), listener.accept());
        let (session, session_listener) = session.unwrap();
        (session, session_listener, Framed::new(accepted.unwrap().0, LinesCodec::new()))
    }

    #[tokio::test]
    async fn proxy_feed_primes_through_listener() {
        let (session, listener, mut conn) = proxy_session().await;
        let (tx, mut rx) = mpsc::channel(10);
        let shutdown = CancellationToken::new();
        tokio::spawn(listener.run(tx.clone(), shutdown.clone()));
        session.login(Address::ZERO, "").await.unwrap();

        tokio::spawn(async move {
            let _login = conn.next().await;
            let line = conn.next().await.unwrap().unwrap();
            let request: Value = serde_json::from_str(&line).unwrap();
            let reply = json!({ "jsonrpc": "2.0", "id": request["id"], "result": StubNode::header(20) });
            conn.send(reply.to_string()).await.unwrap();
            let _ = conn.next().await;
        });

        let feed = PendingHeaderFeed::new(Upstream::Proxy(session), tx, RetryPolicy::default());
        feed.run(shutdown.clone()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().number(Context::Zone), 20);
        shutdown.cancel();
    }
}
