//! Notifications for the presentation layer.
//!
//! Components emit `ClientEvent`s through a shared `EventHub`; whatever
//! renders the UI subscribes once and redraws on each event.

use std::sync::{Arc, PoisonError, RwLock};

use crate::session::SessionState;
use crate::types::Todo;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The session was established or torn down.
    SessionChanged(SessionState),
    /// A fresh authoritative list arrived from the server.
    TodosChanged(Vec<Todo>),
}

type Listener = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

/// Cloneable fan-out point for `ClientEvent`s.
#[derive(Clone, Default)]
pub struct EventHub {
    listeners: Arc<RwLock<Vec<Listener>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: impl Fn(&ClientEvent) + Send + Sync + 'static) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    /// Deliver `event` to every listener in subscription order. Listeners run
    /// without the registry lock held, so they may emit or subscribe.
    pub fn emit(&self, event: ClientEvent) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(&event);
        }
    }
}
