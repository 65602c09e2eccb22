//! The public facade applications hold onto.
//!
//! A thin, cloneable handle that hands instructions to a background task
//! over one channel and hands state back over another, wired with
//! `async_channel` each way and backed by a single `async_std` task rather
//! than per-topic `std::sync::mpsc` channels and an OS thread.

use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use url::Url;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::context::Context;
use crate::error::TerminalCause;
use crate::event::ConnectOptions;
use crate::machine::{Machine, MachineState};
use crate::queue::Priority;
use crate::supervisor::{Command, Supervisor};
use crate::transport::Transport;

/// A notification the supervisor pushes to the application as it runs.
/// Distinct from [`crate::machine::ObservabilityEvent`], which is meant
/// for logs, not application logic.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    StateChanged { from: MachineState, to: MachineState },
    Message(Vec<u8>),
    Terminated(TerminalCause),
}

/// A running client. Cloning shares the same background task and inbox;
/// dropping every clone does not stop the task -- call [`Client::terminate`]
/// for that; shutdown is explicit, not drop-to-stop.
#[derive(Clone)]
pub struct Client {
    commands: async_channel::Sender<Command>,
    events: async_channel::Receiver<ClientEvent>,
}

impl Client {
    /// Spawns the supervisor task and returns a handle to it. `transport_factory`
    /// is called once per connection attempt to build a fresh [`Transport`].
    pub fn spawn(
        config: Config,
        transport_factory: impl Fn() -> Box<dyn Transport> + Send + 'static,
    ) -> Client {
        Self::spawn_with_clock(config, Arc::new(SystemClock::default()), transport_factory)
    }

    /// As [`Client::spawn`], but with an explicit [`Clock`] -- the seam
    /// [`crate::clock::TestClock`]-driven tests use.
    pub fn spawn_with_clock(
        config: Config,
        clock: Arc<dyn Clock>,
        transport_factory: impl Fn() -> Box<dyn Transport> + Send + 'static,
    ) -> Client {
        let inbox_capacity = config.inbox_capacity;
        let rng = Box::new(rand::rngs::StdRng::from_entropy());
        let machine = Machine::new(config, clock, rng);

        let (command_tx, command_rx) = async_channel::bounded(inbox_capacity);
        let (event_tx, event_rx) = async_channel::unbounded();

        let mut supervisor = Supervisor::new(machine, command_rx, Box::new(transport_factory), event_tx);
        async_std::task::spawn(async move { supervisor.run().await });

        Client {
            commands: command_tx,
            events: event_rx,
        }
    }

    /// Requests a connection. CONNECT is never dropped for back-pressure:
    /// this awaits room in the inbox rather than rejecting, only failing if
    /// the supervisor task has already exited.
    pub async fn connect(&self, url: Url, protocols: Vec<String>) -> Result<(), ClientBusy> {
        self.send_command_lossless(Command::Connect {
            url,
            options: ConnectOptions { protocols },
        })
        .await
    }

    /// Enqueues or sends a message. The id actually assigned (visible on the
    /// matching [`ClientEvent`] or in a snapshot) is chosen by the
    /// supervisor's `MessageIdGenerator`, not by the caller.
    ///
    /// SEND is the one command the inbox's high-water mark applies to (spec
    /// §5): once the bounded channel is full this returns `Overloaded`
    /// immediately instead of waiting for room, unlike CONNECT/DISCONNECT/
    /// TERMINATE, which are never dropped for back-pressure.
    pub fn send(&self, data: Vec<u8>, priority: Priority) -> Result<(), SendRejected> {
        self.send_with_timeout(data, priority, None)
    }

    /// As [`Client::send`], but bounds how long the message may sit queued
    /// awaiting delivery: past `timeout` it is discarded as `timed_out`
    /// independent of `max_retries` (spec §3/§7's per-message lifetime
    /// bound on `QueuedMessage`).
    pub fn send_with_timeout(
        &self,
        data: Vec<u8>,
        priority: Priority,
        timeout: Option<Duration>,
    ) -> Result<(), SendRejected> {
        self.commands
            .try_send(Command::Send { data, id: None, priority, timeout })
            .map_err(|err| match err {
                async_channel::TrySendError::Full(_) => SendRejected::Overloaded,
                async_channel::TrySendError::Closed(_) => SendRejected::Closed,
            })
    }

    /// DISCONNECT is never dropped for back-pressure: the inbox high-water
    /// mark only applies to SEND.
    pub async fn disconnect(&self, code: Option<u16>, reason: Option<String>) -> Result<(), ClientBusy> {
        self.send_command_lossless(Command::Disconnect { code, reason }).await
    }

    /// TERMINATE is never dropped for back-pressure: the inbox high-water
    /// mark only applies to SEND.
    pub async fn terminate(&self) -> Result<(), ClientBusy> {
        self.send_command_lossless(Command::Terminate).await
    }

    /// The next [`ClientEvent`], or `None` once the supervisor has wound
    /// down and every sender has been dropped.
    pub async fn next_event(&self) -> Option<ClientEvent> {
        self.events.recv().await.ok()
    }

    /// Awaits room in the bounded inbox rather than rejecting on a full
    /// queue, for the command kinds the spec says must never be dropped.
    async fn send_command_lossless(&self, command: Command) -> Result<(), ClientBusy> {
        self.commands.send(command).await.map_err(|_| ClientBusy)
    }
}

/// The inbox rejected a command outright because the supervisor task has
/// already exited (CONNECT/DISCONNECT/TERMINATE never get rejected merely
/// for being submitted while the inbox is full; they wait instead).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("client inbox is unavailable (the supervisor task has already stopped)")]
pub struct ClientBusy;

/// Why [`Client::send`] rejected a message outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendRejected {
    /// The inbox is at its high-water mark (spec §5, `overloaded`).
    #[error("client inbox is overloaded")]
    Overloaded,
    /// The supervisor task has already exited.
    #[error("client inbox is closed")]
    Closed,
}

/// A read-only snapshot of the machine's context, for tests and
/// diagnostics that don't want to thread a `ClientEvent` subscription
/// through. Not part of the hot path: cloning [`Context`] is cheap
/// relative to a network round trip, but still a full copy.
pub fn snapshot(machine: &Machine) -> Context {
    machine.context().clone()
}
