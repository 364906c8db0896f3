//! Exchange, queue and routing-key names.
//!
//! Operators and other services rely on these names, so they are fixed
//! defaults rather than derived values.

use std::fmt;

pub const MAIN_EXCHANGE: &str = "operation.log.exchange";
pub const MAIN_QUEUE: &str = "operation.log.queue";
pub const MAIN_ROUTING_KEY: &str = "operation.log";

pub const DEAD_LETTER_EXCHANGE: &str = "dlx.exchange";
pub const DEAD_LETTER_QUEUE: &str = "dlx.queue";
pub const DEAD_LETTER_ROUTING_KEY: &str = "dlx.operation.log";

/// Logical destination of a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Main operation-log route.
    Main,
    /// Dead-letter route.
    DeadLetter,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::DeadLetter => "dead_letter",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One exchange bound to one durable queue by one routing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
}

impl Binding {
    fn new(exchange: &str, queue: &str, routing_key: &str) -> Self {
        Self {
            exchange: exchange.to_string(),
            queue: queue.to_string(),
            routing_key: routing_key.to_string(),
        }
    }
}

/// Both routes of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub main: Binding,
    pub dead_letter: Binding,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            main: Binding::new(MAIN_EXCHANGE, MAIN_QUEUE, MAIN_ROUTING_KEY),
            dead_letter: Binding::new(
                DEAD_LETTER_EXCHANGE,
                DEAD_LETTER_QUEUE,
                DEAD_LETTER_ROUTING_KEY,
            ),
        }
    }
}

impl Topology {
    pub fn binding(&self, route: Route) -> &Binding {
        match route {
            Route::Main => &self.main,
            Route::DeadLetter => &self.dead_letter,
        }
    }

    /// Durable queue receiving publishes to `route`.
    pub fn queue(&self, route: Route) -> &str {
        &self.binding(route).queue
    }
}
