// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Redis adapter.
//!
//! Two connections: a pub/sub connection for the request topics and a
//! multiplexed connection for `PUBLISH`.

use futures_util::StreamExt;
use payout_core::DynResult;
use payout_protocol::topics;
use redis::aio::{MultiplexedConnection, PubSub};
use redis::RedisResult;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::BusConfig;
use crate::dispatcher::Dispatcher;
use crate::publisher::OutboundMessage;
use crate::wait_for_shutdown;

pub struct BusConnections {
    pub subscriber: PubSub,
    pub publisher: MultiplexedConnection,
}

/// Open both connections and subscribe to every inbound topic.
pub async fn connect(config: &BusConfig) -> DynResult<BusConnections> {
    let client = redis::Client::open(config.url())?;

    let mut subscriber = client.get_async_pubsub().await?;
    for topic in topics::SUBSCRIBED {
        subscriber.subscribe(topic).await?;
        debug!("Subscribed to {}", topic);
    }
    let publisher = client.get_multiplexed_async_connection().await?;

    info!("Connected to bus at {}:{}", config.host, config.port);
    Ok(BusConnections {
        subscriber,
        publisher,
    })
}

/// Feed subscribed messages to the dispatcher until shutdown. Returns an
/// error when the subscription is lost.
pub async fn run_subscriber(
    subscriber: PubSub,
    dispatcher: Dispatcher,
    shutdown_rx: watch::Receiver<bool>,
) -> DynResult<()> {
    let mut messages = Box::pin(subscriber.into_on_message());
    let mut shutdown = Box::pin(wait_for_shutdown(shutdown_rx));

    loop {
        tokio::select! {
            maybe_msg = messages.next() => {
                let Some(msg) = maybe_msg else {
                    return Err("bus subscription closed".into());
                };
                let topic = msg.get_channel_name();
                match msg.get_payload::<String>() {
                    Ok(payload) => dispatcher.dispatch(topic, &payload).await,
                    Err(e) => warn!("Unreadable payload on {}: {}", topic, e),
                }
            }
            _ = &mut shutdown => {
                debug!("Bus subscriber stopping");
                return Ok(());
            }
        }
    }
}

/// Drain the outbound channel into `PUBLISH` commands.
pub async fn run_publisher(
    mut conn: MultiplexedConnection,
    mut rx: mpsc::UnboundedReceiver<OutboundMessage>,
) {
    while let Some(message) = rx.recv().await {
        let payload = message.payload.to_string();
        debug!("{} <- {}", message.topic, payload);
        let published: RedisResult<()> = redis::cmd("PUBLISH")
            .arg(message.topic)
            .arg(&payload)
            .query_async(&mut conn)
            .await;
        if let Err(e) = published {
            warn!("Publishing to {} failed: {}", message.topic, e);
        }
    }
    debug!("Outbound channel closed");
}
