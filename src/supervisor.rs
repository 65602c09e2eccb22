//! Owns the timers, the transport and the event inbox; turns all three into
//! [`crate::event::Envelope`]s fed through [`Machine::submit`].
//!
//! A single `async_std::task` looping on `futures::select!` over four
//! concurrent sources -- the application inbox, the in-flight connect
//! attempt, the open transport's event stream, and whichever timer is
//! soonest to fire.

use std::collections::HashMap;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::client::ClientEvent;
use crate::clock::{Clock, Timestamp};
use crate::error::TransportError;
use crate::event::{ConnectOptions, Envelope, Event};
use crate::machine::{Effect, Machine, MachineState, ObservabilityEvent, Rejected, TimerKind};
use crate::queue::{MessageId, Priority, QueuedMessage};
use crate::transport::{Transport, TransportEvent};

/// An application-originated instruction delivered through the inbox (spec
/// §5: "a single bounded inbox ... SEND above a high-water mark is
/// rejected with `overloaded`").
#[derive(Debug, Clone)]
pub enum Command {
    Connect { url: url::Url, options: ConnectOptions },
    Send {
        data: Vec<u8>,
        id: Option<MessageId>,
        priority: Priority,
        timeout: Option<Duration>,
    },
    Disconnect { code: Option<u16>, reason: Option<String> },
    Terminate,
}

impl Command {
    fn into_event(self) -> Event {
        match self {
            Command::Connect { url, options } => Event::Connect { url, options },
            Command::Send { data, id, priority, timeout } => Event::Send { data, id, priority, timeout },
            Command::Disconnect { code, reason } => Event::Disconnect { code, reason },
            Command::Terminate => Event::Terminate,
        }
    }
}

type TransportFactory = Box<dyn Fn() -> Box<dyn Transport> + Send>;

/// Drives one [`Machine`] to completion against a real or mock transport.
pub struct Supervisor {
    machine: Machine,
    clock: std::sync::Arc<dyn Clock>,
    inbox: async_channel::Receiver<Command>,
    transport_factory: TransportFactory,
    transport: Option<Box<dyn Transport>>,
    connecting: Option<BoxFuture<'static, Result<Box<dyn Transport>, TransportError>>>,
    deadlines: HashMap<TimerKind, Timestamp>,
    notify: async_channel::Sender<ClientEvent>,
}

impl Supervisor {
    pub fn new(
        machine: Machine,
        inbox: async_channel::Receiver<Command>,
        transport_factory: TransportFactory,
        notify: async_channel::Sender<ClientEvent>,
    ) -> Self {
        let clock = machine.clock().clone();
        Supervisor {
            machine,
            clock,
            inbox,
            transport_factory,
            transport: None,
            connecting: None,
            deadlines: HashMap::new(),
            notify,
        }
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    /// Runs until the machine reaches `terminated`. Each iteration waits on
    /// whichever of {inbox, in-flight connect, open transport, soonest
    /// timer} resolves first, translates it into an `Envelope`, and applies
    /// the resulting effects before looping.
    pub async fn run(&mut self) {
        loop {
            if self.machine.state() == MachineState::Terminated {
                return;
            }

            enum Woken {
                Command(Option<Command>),
                Connected(Result<Box<dyn Transport>, TransportError>),
                Transport(Option<TransportEvent>),
                Timer(TimerKind),
            }

            let inbox_fut = self.inbox.recv().map(|r| Woken::Command(r.ok())).boxed();

            let connect_fut: BoxFuture<'_, Woken> = match self.connecting.as_mut() {
                Some(f) => f.map(Woken::Connected).boxed(),
                None => futures::future::pending().boxed(),
            };

            let transport_fut: BoxFuture<'_, Woken> = match self.transport.as_mut() {
                Some(t) => async move { Woken::Transport(t.next_event().await) }.boxed(),
                None => futures::future::pending().boxed(),
            };

            let timer_fut: BoxFuture<'_, Woken> = match self.next_timer() {
                Some((kind, delay)) => async move {
                    async_std::task::sleep(delay).await;
                    Woken::Timer(kind)
                }
                .boxed(),
                None => futures::future::pending().boxed(),
            };

            let woken = futures::select! {
                w = inbox_fut.fuse() => w,
                w = connect_fut.fuse() => w,
                w = transport_fut.fuse() => w,
                w = timer_fut.fuse() => w,
            };

            match woken {
                Woken::Command(Some(command)) => {
                    self.feed(command.into_event()).await;
                },
                Woken::Command(None) => {
                    // Every `Command` sender dropped: treat it as a request to
                    // wind down cleanly.
                    self.feed(Event::Terminate).await;
                },
                Woken::Connected(Ok(transport)) => {
                    self.connecting = None;
                    self.transport = Some(transport);
                    self.feed(Event::Open).await;
                },
                Woken::Connected(Err(e)) => {
                    self.connecting = None;
                    self.feed_error(e.to_string()).await;
                },
                Woken::Transport(Some(TransportEvent::Open)) => {
                    self.feed(Event::Open).await;
                },
                Woken::Transport(Some(TransportEvent::Message(data))) => {
                    let size = data.len();
                    self.feed(Event::Message { data, size }).await;
                },
                Woken::Transport(Some(TransportEvent::Pong)) => {
                    let latency = self.ping_latency();
                    self.feed(Event::Pong { latency }).await;
                },
                Woken::Transport(Some(TransportEvent::Error(description))) => {
                    self.feed_error(description).await;
                },
                Woken::Transport(Some(TransportEvent::Close { code, reason, was_clean })) => {
                    self.transport = None;
                    self.feed(Event::Close { code, reason, was_clean }).await;
                },
                Woken::Transport(None) => {
                    self.transport = None;
                    self.feed_error(String::from("transport closed without a close frame")).await;
                },
                Woken::Timer(kind) => {
                    self.deadlines.remove(&kind);
                    self.feed(Event::Timeout(kind)).await;
                },
            }
        }
    }

    fn ping_latency(&self) -> Duration {
        let now = self.clock.now();
        match self.machine.context().timing.last_ping_time {
            Some(sent) => now.saturating_duration_since(sent),
            None => Duration::from_millis(0),
        }
    }

    fn next_timer(&self) -> Option<(TimerKind, Duration)> {
        let now = self.clock.now();
        self.deadlines
            .iter()
            .min_by_key(|(_, deadline)| **deadline)
            .map(|(kind, deadline)| (*kind, deadline.saturating_duration_since(now)))
    }

    async fn feed(&mut self, event: Event) {
        let prior_state = self.machine.state();
        let message_payload = match &event {
            Event::Message { data, .. } => Some(data.clone()),
            _ => None,
        };

        let now = self.clock.now();
        let envelope = Envelope::new(event, now);
        match self.machine.submit(envelope) {
            Ok(outcome) => {
                self.apply_effects(outcome.effects).await;
                if let Some(data) = message_payload {
                    let _ = self.notify.send(ClientEvent::Message(data)).await;
                }
                if outcome.new_state != prior_state {
                    let _ = self
                        .notify
                        .send(ClientEvent::StateChanged {
                            from: prior_state,
                            to: outcome.new_state,
                        })
                        .await;
                }
                if outcome.new_state == MachineState::Terminated {
                    if let Some(cause) = self.machine.context().terminal_cause {
                        let _ = self.notify.send(ClientEvent::Terminated(cause)).await;
                    }
                }
            },
            Err(rejected) => self.log_rejected(rejected),
        }
    }

    async fn feed_error(&mut self, description: String) {
        match Event::error(description) {
            Ok(event) => self.feed(event).await,
            Err(_) => (),
        }
    }

    fn log_rejected(&self, rejected: Rejected) {
        tracing::warn!(kind = %rejected.kind, reason = %rejected.reason, "event rejected");
    }

    async fn apply_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::OpenSocket { url, protocols } => self.start_connect(url, protocols),
                Effect::SendFrame { id, payload, priority, attempts, enqueue_time, timeout_at } => {
                    if let Some(transport) = self.transport.as_mut() {
                        let result = if payload.is_empty() {
                            transport.send_ping().await
                        } else {
                            transport.send(&payload).await
                        };
                        if let Err(e) = result {
                            let description = e.to_string();
                            // Pings (`id: None`) aren't queued messages and
                            // have no delivery-attempt bound to enforce.
                            if let Some(id) = id {
                                let message = QueuedMessage {
                                    id,
                                    payload,
                                    enqueue_time,
                                    attempts,
                                    priority,
                                    timeout_at,
                                };
                                self.feed(Event::DeliveryFailed { message }).await;
                            }
                            self.feed_error(description).await;
                        }
                    }
                },
                Effect::CloseSocket { code, reason } => {
                    if let Some(transport) = self.transport.as_mut() {
                        let _ = transport.close(code, &reason).await;
                    }
                },
                Effect::ArmTimer { timer, delay } => {
                    let now = self.clock.now();
                    self.deadlines.insert(timer, now.saturating_add(delay));
                },
                Effect::DisarmTimer(timer) => {
                    self.deadlines.remove(&timer);
                },
                Effect::Emit(observability) => log_observability(observability),
            }
        }
    }

    fn start_connect(&mut self, url: url::Url, protocols: Vec<String>) {
        let mut transport = (self.transport_factory)();
        self.connecting = Some(Box::pin(async move {
            transport.connect(&url, &protocols).await.map(|()| transport)
        }));
    }
}

fn log_observability(event: ObservabilityEvent) {
    const TARGET: &str = "ws_client::machine";
    match event {
        ObservabilityEvent::Transitioned { detail } => {
            tracing::info!(target: TARGET, %detail, "transitioned")
        },
        ObservabilityEvent::ActionApplied { name } => {
            tracing::debug!(target: TARGET, action = name, "action applied")
        },
        ObservabilityEvent::TimerArmed { timer, delay } => {
            tracing::debug!(target: TARGET, ?timer, ?delay, "timer armed")
        },
        ObservabilityEvent::TimerFired { timer } => {
            tracing::debug!(target: TARGET, ?timer, "timer fired")
        },
        ObservabilityEvent::ErrorRecorded { kind } => {
            tracing::warn!(target: TARGET, %kind, "error recorded")
        },
        ObservabilityEvent::RateLimited => tracing::warn!(target: TARGET, "rate limited"),
        ObservabilityEvent::MessageEnqueued { id } => {
            tracing::debug!(target: TARGET, %id, "message enqueued")
        },
        ObservabilityEvent::MessageDropped { id, reason } => {
            tracing::warn!(target: TARGET, %id, %reason, "message dropped")
        },
        ObservabilityEvent::Stabilized => tracing::info!(target: TARGET, "connection stabilized"),
        ObservabilityEvent::Terminated { cause } => {
            tracing::warn!(target: TARGET, %cause, "terminated")
        },
    }
}
