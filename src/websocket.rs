use crate::error::{AppError, AppResult};
use crate::models::{AggregationResult, PriceChange};
use crate::services::PriceNotifier;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::sync::RwLock;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Channel carrying live storefront prices
pub const PRICES_CHANNEL: &str = "prices";

/// WebSocket message types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsMessage {
    #[serde(rename = "subscribe")]
    Subscribe {
        channel: String,
    },
    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        channel: String,
    },
    #[serde(rename = "price_update")]
    PriceUpdate {
        our_price: f64,
        competitor_prices: BTreeMap<String, f64>,
        average_competitor: f64,
        savings_percent: f64,
        origin: String,
        timestamp: i64,
    },
    #[serde(rename = "price_change")]
    PriceChange {
        old_price: f64,
        new_price: f64,
        percent_change: f64,
        timestamp: i64,
    },
    #[serde(rename = "error")]
    Error {
        message: String,
    },
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

impl WsMessage {
    pub fn price_update(quote: &AggregationResult) -> Self {
        WsMessage::PriceUpdate {
            our_price: to_f64(quote.our_price),
            competitor_prices: quote
                .raw_samples
                .iter()
                .map(|(name, price)| (name.clone(), to_f64(*price)))
                .collect(),
            average_competitor: to_f64(quote.average_competitor_price),
            savings_percent: to_f64(quote.savings_percent),
            origin: quote.origin.as_str().to_string(),
            timestamp: quote.computed_at.timestamp(),
        }
    }

    pub fn price_change(change: &PriceChange) -> Self {
        WsMessage::PriceChange {
            old_price: to_f64(change.old_price),
            new_price: to_f64(change.new_price),
            percent_change: to_f64(change.percent_change.round_dp(2)),
            timestamp: change.detected_at.timestamp(),
        }
    }

    /// Channel a server-originated message is delivered on
    fn channel(&self) -> Option<&'static str> {
        match self {
            WsMessage::PriceUpdate { .. } | WsMessage::PriceChange { .. } => Some(PRICES_CHANNEL),
            _ => None,
        }
    }
}

/// WebSocket server pushing live prices to the storefront
#[derive(Clone)]
pub struct WebSocketServer {
    /// Broadcast sender for sending messages to all clients
    tx: broadcast::Sender<WsMessage>,
    /// Active subscriptions: channel -> client IDs
    subscriptions: Arc<RwLock<HashMap<String, Vec<Uuid>>>>,
    /// Client subscriptions: client_id -> channels
    client_channels: Arc<RwLock<HashMap<Uuid, Vec<String>>>>,
    /// Last price update, replayed to new subscribers
    latest_quote: Arc<RwLock<Option<WsMessage>>>,
}

impl WebSocketServer {
    /// Create a new WebSocket server
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);

        Self {
            tx,
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            client_channels: Arc::new(RwLock::new(HashMap::new())),
            latest_quote: Arc::new(RwLock::new(None)),
        }
    }

    /// Receiver for every message the server broadcasts
    pub fn subscribe_feed(&self) -> broadcast::Receiver<WsMessage> {
        self.tx.subscribe()
    }

    /// Broadcast a message to all subscribers of a channel
    pub async fn broadcast_to_channel(&self, channel: &str, message: WsMessage) {
        let subscriptions = self.subscriptions.read().await;

        let count = subscriptions.get(channel).map(|s| s.len()).unwrap_or(0);
        if count > 0 {
            info!("Broadcasting to {} subscribers on channel {}", count, channel);
            if let Err(e) = self.tx.send(message) {
                warn!("Failed to broadcast message: {}", e);
            }
        }
    }

    /// Subscribe a client to a channel
    pub async fn subscribe(&self, client_id: Uuid, channel: String) {
        let mut subscriptions = self.subscriptions.write().await;
        let mut client_channels = self.client_channels.write().await;

        let subscribers = subscriptions.entry(channel.clone()).or_default();
        if !subscribers.contains(&client_id) {
            subscribers.push(client_id);
        }

        let channels = client_channels.entry(client_id).or_default();
        if !channels.contains(&channel) {
            channels.push(channel.clone());
        }

        info!("Client {} subscribed to {}", client_id, channel);
    }

    /// Unsubscribe a client from a channel
    pub async fn unsubscribe(&self, client_id: Uuid, channel: &str) {
        let mut subscriptions = self.subscriptions.write().await;
        let mut client_channels = self.client_channels.write().await;

        if let Some(subscribers) = subscriptions.get_mut(channel) {
            subscribers.retain(|&id| id != client_id);
        }

        if let Some(channels) = client_channels.get_mut(&client_id) {
            channels.retain(|c| c != channel);
        }

        info!("Client {} unsubscribed from {}", client_id, channel);
    }

    /// Drop every subscription a client holds
    pub async fn disconnect(&self, client_id: Uuid) {
        let channels = self.get_client_channels(client_id).await;
        for channel in channels {
            self.unsubscribe(client_id, &channel).await;
        }
        self.client_channels.write().await.remove(&client_id);
    }

    /// Get all channels a client is subscribed to
    pub async fn get_client_channels(&self, client_id: Uuid) -> Vec<String> {
        let client_channels = self.client_channels.read().await;
        client_channels.get(&client_id).cloned().unwrap_or_default()
    }

    /// Check if client is subscribed to a channel
    pub async fn is_client_subscribed(&self, client_id: Uuid, channel: &str) -> bool {
        let subscriptions = self.subscriptions.read().await;
        subscriptions
            .get(channel)
            .is_some_and(|subscribers| subscribers.contains(&client_id))
    }

    /// Number of clients on a channel
    pub async fn subscriber_count(&self, channel: &str) -> usize {
        let subscriptions = self.subscriptions.read().await;
        subscriptions.get(channel).map(|s| s.len()).unwrap_or(0)
    }

    /// Most recent price update, if one has been published
    pub async fn latest_quote(&self) -> Option<WsMessage> {
        self.latest_quote.read().await.clone()
    }

    /// Publish a fresh quote to the prices channel
    pub async fn broadcast_price_update(&self, quote: &AggregationResult) {
        let message = WsMessage::price_update(quote);
        *self.latest_quote.write().await = Some(message.clone());
        self.broadcast_to_channel(PRICES_CHANNEL, message).await;
    }

    /// Publish a significant price move to the prices channel
    pub async fn broadcast_price_change(&self, change: &PriceChange) {
        self.broadcast_to_channel(PRICES_CHANNEL, WsMessage::price_change(change))
            .await;
    }

    /// Accept connections until the listener fails
    pub async fn serve(self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    info!("New WebSocket connection from {}", addr);
                    let ws = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = ws.handle_connection(stream).await {
                            error!("WebSocket connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("WebSocket accept error: {}", e);
                }
            }
        }
    }

    /// Handle a new WebSocket connection
    pub async fn handle_connection(&self, stream: tokio::net::TcpStream) -> AppResult<()> {
        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| AppError::Message(format!("WebSocket handshake failed: {}", e)))?;

        let (ws_sender, mut ws_receiver) = ws_stream.split();
        let mut rx = self.tx.subscribe();
        let client_id = Uuid::new_v4();

        // Sender is shared between the receive loop (acks) and the broadcast loop
        let ws_sender = Arc::new(tokio::sync::Mutex::new(ws_sender));

        let welcome = serde_json::json!({
            "type": "connected",
            "client_id": client_id.to_string(),
        });
        if let Err(e) = ws_sender.lock().await.send(Message::Text(welcome.to_string())).await {
            warn!("Failed to send welcome message: {}", e);
        }

        let ws_server_for_receiver = self.clone();
        let ws_sender_for_receiver = ws_sender.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_receiver.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let mut replies = Vec::new();

                        match serde_json::from_str::<WsMessage>(&text) {
                            Ok(WsMessage::Subscribe { channel }) => {
                                ws_server_for_receiver.subscribe(client_id, channel.clone()).await;
                                replies.push(
                                    serde_json::json!({ "type": "subscribed", "channel": channel })
                                        .to_string(),
                                );

                                if channel == PRICES_CHANNEL {
                                    if let Some(latest) = ws_server_for_receiver.latest_quote().await {
                                        if let Ok(json) = serde_json::to_string(&latest) {
                                            replies.push(json);
                                        }
                                    }
                                }
                            }
                            Ok(WsMessage::Unsubscribe { channel }) => {
                                ws_server_for_receiver.unsubscribe(client_id, &channel).await;
                                replies.push(
                                    serde_json::json!({ "type": "unsubscribed", "channel": channel })
                                        .to_string(),
                                );
                            }
                            Ok(_) => {
                                warn!("Unexpected message type from client {}", client_id);
                            }
                            Err(_) => {
                                warn!("Failed to parse message from client {}: {}", client_id, text);
                                let err = WsMessage::Error {
                                    message: "Invalid message format".to_string(),
                                };
                                if let Ok(json) = serde_json::to_string(&err) {
                                    replies.push(json);
                                }
                            }
                        }

                        let mut sender = ws_sender_for_receiver.lock().await;
                        for reply in replies {
                            if let Err(e) = sender.send(Message::Text(reply)).await {
                                warn!("Failed to reply to client {}: {}", client_id, e);
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        info!("WebSocket connection closed: {}", client_id);
                        break;
                    }
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            ws_server_for_receiver.disconnect(client_id).await;
        });

        let ws_server_for_broadcast = self.clone();
        tokio::spawn(async move {
            loop {
                let msg = match rx.recv().await {
                    Ok(msg) => msg,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Client {} lagged, skipped {} messages", client_id, skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                let should_send = match msg.channel() {
                    Some(channel) => {
                        ws_server_for_broadcast
                            .is_client_subscribed(client_id, channel)
                            .await
                    }
                    None => false,
                };

                if !should_send {
                    continue;
                }

                let json = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to serialize message: {}", e);
                        continue;
                    }
                };

                let mut sender = ws_sender.lock().await;
                if let Err(e) = sender.send(Message::Text(json)).await {
                    error!("Failed to send message to client {}: {}", client_id, e);
                    break;
                }
            }
        });

        Ok(())
    }
}

impl Default for WebSocketServer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceNotifier for WebSocketServer {
    async fn notify_change(&self, change: &PriceChange) -> AppResult<()> {
        self.broadcast_price_change(change).await;
        Ok(())
    }

    async fn publish_quote(&self, quote: &AggregationResult) -> AppResult<()> {
        self.broadcast_price_update(quote).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PriceOrigin;

    fn quote() -> AggregationResult {
        let mut samples = BTreeMap::new();
        samples.insert("Eldorado".to_string(), Decimal::new(100, 2));
        AggregationResult::from_parts(Decimal::new(85, 2), samples, PriceOrigin::Computed)
    }

    #[test]
    fn test_price_update_serialization() {
        let json = serde_json::to_value(WsMessage::price_update(&quote())).unwrap();
        assert_eq!(json["type"], "price_update");
        assert_eq!(json["our_price"], 0.85);
        assert_eq!(json["competitor_prices"]["Eldorado"], 1.0);
        assert_eq!(json["origin"], "computed");
    }

    #[test]
    fn test_subscribe_parsing() {
        let msg: WsMessage = serde_json::from_str(r#"{"type":"subscribe","channel":"prices"}"#).unwrap();
        assert_eq!(
            msg,
            WsMessage::Subscribe {
                channel: "prices".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_subscription_bookkeeping() {
        let server = WebSocketServer::new();
        let client = Uuid::new_v4();

        server.subscribe(client, PRICES_CHANNEL.to_string()).await;
        server.subscribe(client, PRICES_CHANNEL.to_string()).await;
        assert_eq!(server.subscriber_count(PRICES_CHANNEL).await, 1);
        assert!(server.is_client_subscribed(client, PRICES_CHANNEL).await);

        server.disconnect(client).await;
        assert_eq!(server.subscriber_count(PRICES_CHANNEL).await, 0);
        assert!(server.get_client_channels(client).await.is_empty());
    }

    #[tokio::test]
    async fn test_publish_reaches_feed_when_subscribed() {
        let server = WebSocketServer::new();
        let mut feed = server.subscribe_feed();
        server.subscribe(Uuid::new_v4(), PRICES_CHANNEL.to_string()).await;

        server.publish_quote(&quote()).await.unwrap();

        let msg = feed.recv().await.unwrap();
        assert!(matches!(msg, WsMessage::PriceUpdate { .. }));
        assert_eq!(server.latest_quote().await, Some(msg));
    }

    #[tokio::test]
    async fn test_latest_quote_kept_without_subscribers() {
        let server = WebSocketServer::new();
        server.publish_quote(&quote()).await.unwrap();
        assert!(server.latest_quote().await.is_some());
    }
}
