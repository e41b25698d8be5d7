//! Registry of log message handlers.
//!
//! There is at most one handler per [MessageKind]; registering again replaces it.
//! Handlers are invoked outside of the registry lock so they may freely (un)subscribe.
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crossbeam::channel::{bounded, Receiver, TrySendError};
use tracing::trace;

use super::engine::LogChunk;
use super::message::{
    AddLoggedMessage, DataMessage, DropoutMessage, FlagBitsMessage, FormatMessage,
    InfoMessage, InfoMultipleMessage, LogMessage, LoggingMessage, MessageKind,
    ParameterMessage, RemoveLoggedMessage, SyncMessage,
};

pub type Handler = Arc<dyn Fn(&LogMessage) + Send + Sync>;
pub type ChunkHandler = Arc<dyn Fn(&LogChunk) + Send + Sync>;

#[derive(Default)]
pub struct Subscriptions {
    handlers: RwLock<HashMap<MessageKind, Handler>>,
    chunk_handler: RwLock<Option<ChunkHandler>>,
}

impl std::fmt::Debug for Subscriptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Subscriptions")
            .field("kinds", &handlers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

macro_rules! typed_subscribe {
    ($($(#[$meta:meta])* $name:ident => $variant:ident($msg:ty);)+) => {
        $(
            $(#[$meta])*
            pub fn $name<F>(&self, handler: F)
            where
                F: Fn(&$msg) + Send + Sync + 'static,
            {
                self.subscribe(MessageKind::$variant, move |msg| {
                    if let LogMessage::$variant(msg) = msg {
                        handler(msg);
                    }
                });
            }
        )+
    };
}

impl Subscriptions {
    /// Register `handler` for messages of `kind`, replacing any existing handler.
    pub fn subscribe<F>(&self, kind: MessageKind, handler: F)
    where
        F: Fn(&LogMessage) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, Arc::new(handler));
    }

    /// Remove the handler for `kind`, returning whether there was one.
    pub fn unsubscribe(&self, kind: MessageKind) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&kind)
            .is_some()
    }

    #[must_use]
    pub fn is_subscribed(&self, kind: MessageKind) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&kind)
    }

    /// Subscribe to `kind` through a bounded channel. Messages are dropped while the
    /// channel is full and the subscription is removed once the receiver is gone.
    #[must_use]
    pub fn channel(self: &Arc<Self>, kind: MessageKind, capacity: usize) -> Receiver<LogMessage> {
        let (tx, rx) = bounded(capacity);
        let registry = Arc::downgrade(self);
        self.subscribe(kind, move |msg| {
            if let Err(TrySendError::Disconnected(_)) = tx.try_send(msg.clone()) {
                if let Some(registry) = registry.upgrade() {
                    registry.unsubscribe(kind);
                }
            }
        });
        rx
    }

    typed_subscribe! {
        on_flag_bits => FlagBits(FlagBitsMessage);
        on_format => Format(FormatMessage);
        on_info => Info(InfoMessage);
        on_info_multiple => InfoMultiple(InfoMultipleMessage);
        on_parameter => Parameter(ParameterMessage);
        on_add_logged => AddLogged(AddLoggedMessage);
        on_remove_logged => RemoveLogged(RemoveLoggedMessage);
        on_data => Data(DataMessage);
        /// Text log messages.
        on_logging => Logging(LoggingMessage);
        on_dropout => Dropout(DropoutMessage);
        on_sync => Sync(SyncMessage);
    }

    /// Register a handler receiving every raw log chunk before reassembly.
    pub fn on_chunk<F>(&self, handler: F)
    where
        F: Fn(&LogChunk) + Send + Sync + 'static,
    {
        *self
            .chunk_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
    }

    pub fn clear_chunk_handler(&self) {
        *self
            .chunk_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Deliver `msg` to the handler for its kind, returning whether there was one.
    pub fn dispatch(&self, msg: &LogMessage) -> bool {
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&msg.kind())
            .cloned();
        match handler {
            Some(handler) => {
                handler(msg);
                true
            }
            None => {
                trace!(kind = ?msg.kind(), "no subscriber for message");
                false
            }
        }
    }

    pub(crate) fn dispatch_chunk(&self, chunk: &LogChunk) {
        let handler = self
            .chunk_handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(handler) = handler {
            handler(chunk);
        }
    }
}
