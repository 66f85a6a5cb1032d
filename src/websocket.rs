//! # WebSocket Event Stream
//!
//! Pushes engine events to browser clients in real time. Each connection
//! is an independent actor holding its own subscription to the
//! [`PublisherHub`](crate::publisher::PublisherHub); the hub's
//! per-subscriber queue is attached to the actor as a stream, so a slow
//! client backs up only its own queue and never the worker loop.
//!
//! Frames are JSON: `{"event": "status"|"transcription"|"error", "data":
//! {...}}`. The first frame after connecting is always the current status.
//! This channel is push-only; text sent by the client is ignored.

use crate::publisher::{PublisherHub, SpeechEvent};
use crate::state::AppState;
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

pub struct EventSocket {
    id: Uuid,
    hub: Arc<PublisherHub>,
    events: Option<UnboundedReceiverStream<SpeechEvent>>,
    last_heartbeat: Instant,
}

impl EventSocket {
    fn new(
        id: Uuid,
        hub: Arc<PublisherHub>,
        events: tokio::sync::mpsc::UnboundedReceiver<SpeechEvent>,
    ) -> Self {
        Self {
            id,
            hub,
            events: Some(UnboundedReceiverStream::new(events)),
            last_heartbeat: Instant::now(),
        }
    }
}

impl Actor for EventSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("WebSocket subscriber {} connected", self.id);

        if let Some(events) = self.events.take() {
            ctx.add_stream(events);
        }

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("WebSocket subscriber {} timed out, closing", act.id);
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.hub.unsubscribe(&self.id);
        info!("WebSocket subscriber {} disconnected", self.id);
    }
}

/// Engine events from the hub, forwarded as JSON frames.
impl StreamHandler<SpeechEvent> for EventSocket {
    fn handle(&mut self, event: SpeechEvent, ctx: &mut Self::Context) {
        match serde_json::to_string(&event.to_frame()) {
            Ok(json) => ctx.text(json),
            Err(e) => warn!("Failed to serialize event frame: {}", e),
        }
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        // Hub side closed the channel; nothing more will ever arrive
        ctx.stop();
    }
}

/// Protocol frames from the client.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for EventSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                debug!("WebSocket subscriber {} closed: {:?}", self.id, reason);
                ctx.stop();
            }
            Ok(ws::Message::Text(_)) | Ok(ws::Message::Binary(_)) => {
                debug!("Ignoring inbound data on push-only event stream");
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(e) => {
                warn!("WebSocket protocol error: {}", e);
                ctx.stop();
            }
        }
    }
}

/// `GET /ws` upgrade handler. Subscribes the connection to the hub; the
/// initial status frame is queued before the actor starts.
pub async fn event_stream(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let engine = &state.engine;
    let (id, events) = engine.hub().subscribe(engine.status_event());

    match ws::start(EventSocket::new(id, engine.hub().clone(), events), &req, stream) {
        Ok(response) => Ok(response),
        Err(e) => {
            engine.hub().unsubscribe(&id);
            Err(e)
        }
    }
}
