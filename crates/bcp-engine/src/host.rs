//! The seam between the engine and the process hosting it.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bcp_wire::Params;

/// Collaborator the engine reports inbound activity to.
///
/// `post` and `set_switch` are called from the thread running
/// [`crate::Engine::poll`]. `apply_frame` is called from a receive thread and
/// `request_shutdown` from whichever thread observed the fatal condition, so
/// implementations must be thread-safe.
pub trait Host: Send + Sync {
    /// Posts a named host event.
    fn post(&self, event: HostEvent);

    /// Changes the state of a switch.
    fn set_switch(&self, name: &str, active: bool, logical: bool);

    /// Hands a raw display-frame payload to the display consumer.
    fn apply_frame(&self, payload: &[u8]);

    /// Asks the host to shut down. Called at most once per engine.
    fn request_shutdown(&self);
}

impl<T> Host for Arc<T>
where
    T: Host + ?Sized,
{
    fn post(&self, event: HostEvent) {
        (**self).post(event);
    }

    fn set_switch(&self, name: &str, active: bool, logical: bool) {
        (**self).set_switch(name, active, logical);
    }

    fn apply_frame(&self, payload: &[u8]) {
        (**self).apply_frame(payload);
    }

    fn request_shutdown(&self) {
        (**self).request_shutdown();
    }
}

/// Work to run once the host has finished handling an event.
pub struct Completion(Box<dyn FnOnce() + Send>);

impl Completion {
    /// Wraps a closure.
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(action))
    }

    /// Runs the completion.
    pub fn run(self) {
        (self.0)();
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("Completion(..)")
    }
}

/// An event posted to the host.
#[derive(Debug)]
pub struct HostEvent {
    name: String,
    fields: Params,
    completion: Option<Completion>,
}

impl HostEvent {
    /// Builds an event without a completion.
    #[must_use]
    pub fn new(name: impl Into<String>, fields: Params) -> Self {
        Self {
            name: name.into(),
            fields,
            completion: None,
        }
    }

    /// Attaches work to run when the host completes the event.
    #[must_use]
    pub fn with_completion(mut self, completion: Completion) -> Self {
        self.completion = Some(completion);
        self
    }

    /// Event name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Event fields.
    #[must_use]
    pub const fn fields(&self) -> &Params {
        &self.fields
    }

    /// Whether completing the event will do anything.
    #[must_use]
    pub const fn has_completion(&self) -> bool {
        self.completion.is_some()
    }

    /// Marks the event handled, running its completion if one is attached.
    pub fn complete(self) {
        if let Some(completion) = self.completion {
            completion.run();
        }
    }
}

/// Host handle shared by the engine and its connections.
///
/// Latches `request_shutdown` so the host sees it once no matter how many
/// connections hit a fatal condition.
pub(crate) struct HostLink {
    host: Arc<dyn Host>,
    shutdown_requested: AtomicBool,
}

impl HostLink {
    pub(crate) fn new(host: Arc<dyn Host>) -> Self {
        Self {
            host,
            shutdown_requested: AtomicBool::new(false),
        }
    }

    pub(crate) fn host(&self) -> &dyn Host {
        self.host.as_ref()
    }

    /// Forwards the first shutdown request; returns `false` for repeats.
    pub(crate) fn request_shutdown(&self) -> bool {
        if self.shutdown_requested.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.host.request_shutdown();
        true
    }

    pub(crate) fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for HostLink {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("HostLink")
            .field("shutdown_requested", &self.shutdown_requested())
            .finish_non_exhaustive()
    }
}
