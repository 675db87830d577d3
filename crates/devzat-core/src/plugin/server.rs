//! The tonic service implementation backing the `Plugin` gRPC service:
//! listener registration (plain broadcast tap or middleware), command
//! registration, and message sending. Ported from the RPC handlers in
//! `original_source/rpc.go`; the bearer-token check lives in an
//! interceptor wired up in `devzat-server` rather than here, matching how
//! `libshpool`'s daemon keeps auth at the transport boundary.

use std::pin::Pin;
use std::sync::{atomic::{AtomicU64, Ordering}, Arc};

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{info, instrument, warn};

use devzat_proto::plugin_server::Plugin;
use devzat_proto::{
    listener_client_message::Data, CmdDef, CmdInvocation, Event, ListenerClientMessage, Message,
    MessageReply,
};

use crate::room::RoomRegistry;

use super::listeners::PassiveListeners;
use super::middleware::{MiddlewareChain, MiddlewareSlot};
use super::registry::PluginCommandRegistry;

pub struct PluginService {
    rooms: Arc<RoomRegistry>,
    middleware: Arc<MiddlewareChain>,
    commands: Arc<PluginCommandRegistry>,
    listeners: Arc<PassiveListeners>,
    next_listener_id: AtomicU64,
}

impl PluginService {
    pub fn new(
        rooms: Arc<RoomRegistry>,
        middleware: Arc<MiddlewareChain>,
        commands: Arc<PluginCommandRegistry>,
        listeners: Arc<PassiveListeners>,
    ) -> Self {
        PluginService { rooms, middleware, commands, listeners, next_listener_id: AtomicU64::new(1) }
    }
}

#[tonic::async_trait]
impl Plugin for PluginService {
    type RegisterListenerStream = Pin<Box<dyn Stream<Item = Result<Event, Status>> + Send + 'static>>;
    type RegisterCmdStream = Pin<Box<dyn Stream<Item = Result<CmdInvocation, Status>> + Send + 'static>>;

    #[instrument(skip_all)]
    async fn register_listener(
        &self,
        request: Request<Streaming<ListenerClientMessage>>,
    ) -> Result<Response<Self::RegisterListenerStream>, Status> {
        let mut inbound = request.into_inner();
        let first = inbound
            .message()
            .await?
            .ok_or_else(|| Status::invalid_argument("expected a Listener as the first message"))?;
        let Some(Data::Listener(listener)) = first.data else {
            return Err(Status::invalid_argument("first message must be a Listener"));
        };

        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let (to_plugin, from_plugin_rx) = mpsc::channel::<Event>(64);

        if listener.middleware.unwrap_or(false) {
            let slot = Arc::new(MiddlewareSlot::new(to_plugin));
            self.middleware.register(id, Arc::clone(&slot)).await;

            let middleware = Arc::clone(&self.middleware);
            tokio::spawn(async move {
                while let Ok(Some(msg)) = inbound.message().await {
                    if let Some(Data::Response(resp)) = msg.data {
                        slot.resolve(resp.msg).await;
                    }
                }
                middleware.unregister(id).await;
            });
        } else {
            let regex = match listener.regex.as_deref().map(regex::Regex::new) {
                Some(Ok(re)) => Some(re),
                Some(Err(e)) => return Err(Status::invalid_argument(format!("invalid regex: {e}"))),
                None => None,
            };
            let once = listener.once.unwrap_or(false);
            self.listeners.register(id, to_plugin, regex, once).await;

            // A plain listener sends nothing further on its inbound half;
            // drain it so a disconnect is noticed and the registration is
            // torn down.
            let listeners = Arc::clone(&self.listeners);
            tokio::spawn(async move {
                while let Ok(Some(_)) = inbound.message().await {}
                listeners.unregister(id).await;
            });
        }

        info!(listener_id = id, middleware = listener.middleware.unwrap_or(false), "plugin listener registered");
        let out = ReceiverStream::new(from_plugin_rx).map(Ok);
        Ok(Response::new(Box::pin(out)))
    }

    #[instrument(skip_all)]
    async fn register_cmd(&self, request: Request<CmdDef>) -> Result<Response<Self::RegisterCmdStream>, Status> {
        let def = request.into_inner();
        if def.name.is_empty() {
            return Err(Status::invalid_argument("command name must not be empty"));
        }
        let (tx, rx) = mpsc::channel::<CmdInvocation>(16);
        info!(command = %def.name, "plugin command registered");
        self.commands.register(def, tx).await;
        let out = ReceiverStream::new(rx).map(Ok);
        Ok(Response::new(Box::pin(out)))
    }

    #[instrument(skip_all)]
    async fn send_message(&self, request: Request<Message>) -> Result<Response<MessageReply>, Status> {
        let msg = request.into_inner();
        let Some(room) = self.rooms.get(&msg.room).await else {
            return Err(Status::invalid_argument(format!("room {} not found", msg.room)));
        };

        if let Some(to) = msg.ephemeral_to.as_deref() {
            let delivered = room
                .deliver_direct(to, crate::room::DirectMessage { from: msg.from.clone(), body: msg.msg.clone() })
                .await;
            return if delivered {
                Ok(Response::new(MessageReply {}))
            } else {
                Err(Status::not_found(format!("{to} is not in #{}", msg.room)))
            };
        }

        let event = Event { room: msg.room.clone(), from: msg.from.clone(), msg: msg.msg.clone() };
        match self.middleware.apply(event).await {
            Some(event) => {
                self.listeners.notify(event.clone()).await;
                room.broadcast_chat(event.from, event.msg).await;
            }
            None => warn!(from = %msg.from, "message dropped by middleware"),
        }
        Ok(Response::new(MessageReply {}))
    }
}
