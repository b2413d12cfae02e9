//! Direct node access
//!
//! In direct mode the miner talks to the three nodes of its slice: the Prime
//! node, its Region node and its Zone node. Only the Zone is fetched from and
//! subscribed to; all three receive sealed headers.

use crate::{
    MinerError,
    config::MinerConfig,
    methods::{GET_PENDING_HEADER, PENDING_HEADER_SUBSCRIPTION, RECEIVE_MINED_HEADER, SUBSCRIBE, UNSUBSCRIBE},
    retry::{RetryPolicy, retry},
};
use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use jsonrpsee::{
    core::{
        client::{ClientT, SubscriptionClientT},
        params::ArrayParams,
    },
    ws_client::{WsClient, WsClientBuilder},
};
use quai_primitives::{Context, Header, Location};
use serde_json::Value;
use std::{fmt, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Requests wait for the node however long it takes. Unresponsive endpoints
/// surface as connection errors, which the retry policy handles.
const REQUEST_TIMEOUT: Duration = Duration::MAX;

/// Stream of pending headers pushed by a node.
pub type HeaderStream = BoxStream<'static, Result<Header, MinerError>>;

/// One node endpoint.
#[async_trait]
pub trait NodeClient: Send + Sync + 'static {
    /// Current pending header.
    async fn pending_header(&self) -> Result<Header, MinerError>;

    /// Hand a sealed header to the node.
    async fn submit_mined_header(&self, header: &Header) -> Result<(), MinerError>;

    /// Every pending header the node produces from now on.
    async fn subscribe_pending_headers(&self) -> Result<HeaderStream, MinerError>;
}

/// Websocket JSON-RPC node client
pub struct WsNodeClient {
    ctx: Context,
    url: String,
    client: WsClient,
}

impl fmt::Debug for WsNodeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsNodeClient").field("ctx", &self.ctx).field("url", &self.url).finish()
    }
}

impl WsNodeClient {
    /// Dial the `ctx` node at `url`.
    pub async fn connect(ctx: Context, url: &str) -> Result<Self, MinerError> {
        let client =
            WsClientBuilder::default().request_timeout(REQUEST_TIMEOUT).build(url).await?;
        info!(target: "quai::slice", %ctx, url, "Connected to node");
        Ok(Self { ctx, url: url.to_string(), client })
    }

    /// Level this node serves.
    pub const fn context(&self) -> Context {
        self.ctx
    }
}

#[async_trait]
impl NodeClient for WsNodeClient {
    async fn pending_header(&self) -> Result<Header, MinerError> {
        Ok(self.client.request(GET_PENDING_HEADER, ArrayParams::new()).await?)
    }

    async fn submit_mined_header(&self, header: &Header) -> Result<(), MinerError> {
        let mut params = ArrayParams::new();
        params.insert(header)?;
        let _: Value = self.client.request(RECEIVE_MINED_HEADER, params).await?;
        Ok(())
    }

    async fn subscribe_pending_headers(&self) -> Result<HeaderStream, MinerError> {
        let mut params = ArrayParams::new();
        params.insert(PENDING_HEADER_SUBSCRIPTION)?;
        let subscription =
            self.client.subscribe::<Header, _>(SUBSCRIBE, params, UNSUBSCRIBE).await?;
        Ok(subscription.map(|item| item.map_err(MinerError::from)).boxed())
    }
}

/// The Prime, Region and Zone clients of one slice, indexed by [`Context`].
///
/// Fixed at startup; nothing here reconnects.
#[derive(Clone)]
pub struct SliceClients {
    clients: [Arc<dyn NodeClient>; 3],
}

impl fmt::Debug for SliceClients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SliceClients").finish_non_exhaustive()
    }
}

impl SliceClients {
    /// Clients in `[prime, region, zone]` order.
    pub fn new(clients: [Arc<dyn NodeClient>; 3]) -> Self {
        Self { clients }
    }

    /// Client for `ctx`.
    pub fn get(&self, ctx: Context) -> &Arc<dyn NodeClient> {
        &self.clients[ctx.index()]
    }

    /// The zone client, the only one mined from.
    pub fn zone(&self) -> &Arc<dyn NodeClient> {
        self.get(Context::Zone)
    }

    /// Dial all three nodes of `location`'s slice.
    ///
    /// Each node is retried until it connects; nodes already connected are
    /// kept. Returns `None` if `shutdown` fires first.
    pub async fn connect(
        config: &MinerConfig,
        location: Location,
        policy: RetryPolicy,
        shutdown: &CancellationToken,
    ) -> Result<Option<Self>, MinerError> {
        let dial = |ctx: Context| {
            let url = config.node_url(ctx, location);
            retry(policy, shutdown, "Node connection", move || WsNodeClient::connect(ctx, url))
        };

        let Some(prime) = dial(Context::Prime).await? else { return Ok(None) };
        let Some(region) = dial(Context::Region).await? else { return Ok(None) };
        let Some(zone) = dial(Context::Zone).await? else { return Ok(None) };

        info!(target: "quai::slice", %location, "Connected to all slice nodes");
        Ok(Some(Self::new([Arc::new(prime), Arc::new(region), Arc::new(zone)])))
    }
}
