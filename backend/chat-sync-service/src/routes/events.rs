//! Server-sent event stream: the client end of fan-out.
//!
//! One stream follows the caller's personal channel and, optionally, one
//! conversation channel. Both subscriptions are released when the client goes
//! away and the response body is dropped.

use crate::{
    error::AppError,
    fanout::{Channel, Delivery, Subscriber, SubscriberId},
    middleware::CurrentUser,
    state::AppState,
};
use actix_web::{get, http::header, web, web::Bytes, HttpResponse};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{interval_at, Instant, Interval};
use uuid::Uuid;

const KEEP_ALIVE: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub conversation_id: Option<Uuid>,
}

enum Frame {
    Event(Delivery),
    KeepAlive,
}

impl Frame {
    fn encode(self) -> Bytes {
        match self {
            Frame::Event(delivery) => Bytes::from(format!(
                "event: {}\ndata: {}\n\n",
                delivery.event, delivery.payload
            )),
            Frame::KeepAlive => Bytes::from_static(b": keep-alive\n\n"),
        }
    }
}

/// Subscriptions held by one open stream
struct EventFeed {
    subscriber: Arc<dyn Subscriber>,
    held: Vec<(Channel, SubscriberId)>,
    personal: UnboundedReceiver<Delivery>,
    conversation: Option<UnboundedReceiver<Delivery>>,
    keep_alive: Interval,
}

impl EventFeed {
    async fn open(
        subscriber: Arc<dyn Subscriber>,
        personal: Channel,
        conversation: Option<Channel>,
    ) -> Self {
        let mut held = Vec::with_capacity(2);

        let (id, personal_rx) = subscriber.subscribe(&personal).await;
        held.push((personal, id));

        let conversation_rx = match conversation {
            Some(channel) => {
                let (id, rx) = subscriber.subscribe(&channel).await;
                held.push((channel, id));
                Some(rx)
            }
            None => None,
        };

        Self {
            subscriber,
            held,
            personal: personal_rx,
            conversation: conversation_rx,
            keep_alive: interval_at(Instant::now() + KEEP_ALIVE, KEEP_ALIVE),
        }
    }

    /// `None` once a channel is closed under us
    async fn next_frame(&mut self) -> Option<Frame> {
        let delivery = match self.conversation.as_mut() {
            Some(conversation) => tokio::select! {
                d = self.personal.recv() => d,
                d = conversation.recv() => d,
                _ = self.keep_alive.tick() => return Some(Frame::KeepAlive),
            },
            None => tokio::select! {
                d = self.personal.recv() => d,
                _ = self.keep_alive.tick() => return Some(Frame::KeepAlive),
            },
        };
        delivery.map(Frame::Event)
    }
}

impl Drop for EventFeed {
    fn drop(&mut self) {
        let held = std::mem::take(&mut self.held);
        tracing::debug!(channels = held.len(), "event stream closed");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let subscriber = self.subscriber.clone();
            handle.spawn(async move {
                for (channel, id) in held {
                    subscriber.unsubscribe(&channel, id).await;
                }
            });
        }
    }
}

#[get("/events")]
pub async fn stream_events(
    state: web::Data<AppState>,
    user: CurrentUser,
    query: web::Query<EventsQuery>,
) -> Result<HttpResponse, AppError> {
    let personal = Channel::for_user(&user)
        .ok_or_else(|| AppError::Validation("user has no personal channel".into()))?;

    let conversation = match query.conversation_id {
        Some(id) => {
            state
                .store
                .find_conversation(id)
                .await?
                .ok_or(AppError::NotFound)?;
            Some(Channel::Conversation(id))
        }
        None => None,
    };

    let feed = EventFeed::open(state.events.clone(), personal, conversation).await;
    tracing::info!(user_id = %user.id, conversation_id = ?query.conversation_id, "event stream opened");

    let body = futures::stream::unfold(feed, |mut feed| async move {
        let frame = feed.next_frame().await?;
        Some((Ok::<_, Infallible>(frame.encode()), feed))
    });

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(body))
}
