//! Event fan-out between the processor, the queues and subscribers.
//!
//! A pure dispatch table from `(source, event)` to receivers. Handlers
//! run synchronously in registration order; a failing handler is
//! logged and the remaining ones still run.

use rill_protocol::{DownEvent, LiveUpdate, Mutation, ViewUpdate};
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Clone)]
pub enum RouterEvent {
    Update(ViewUpdate),
    Mutation(Mutation),
    Live(LiveUpdate),
    Down(DownEvent),
}

pub type Handler = Box<dyn Fn(&RouterEvent) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
pub struct Router {
    routes: HashMap<(String, String), Vec<Handler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(
        &mut self,
        source: &str,
        event: &str,
        handler: impl Fn(&RouterEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    ) {
        self.routes
            .entry((source.to_string(), event.to_string()))
            .or_default()
            .push(Box::new(handler));
    }

    /// Dispatch to every registered handler; returns how many ran.
    pub fn dispatch(&self, source: &str, event: &str, payload: &RouterEvent) -> usize {
        let Some(handlers) = self.routes.get(&(source.to_string(), event.to_string())) else {
            return 0;
        };
        for handler in handlers {
            if let Err(e) = handler(payload) {
                warn!(source, event, error = %e, "handler failed");
            }
        }
        handlers.len()
    }
}
