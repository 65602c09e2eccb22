//! The connection state machine.
//!
//! `Machine::submit` is the one synchronous entry point: it validates an
//! incoming [`Envelope`], looks up `δ(state, event)`, runs the matching
//! guards and actions against [`Context`], and returns a [`StepOutcome`]
//! carrying every [`Effect`] the supervisor still owes the outside world --
//! a plain `match` over `(State, Event)` that returns effects to run,
//! never running them itself.

use std::sync::Arc;

use rand::RngCore;
use url::Url;

use crate::actions;
use crate::clock::{Clock, Timestamp};
use crate::config::Config;
use crate::context::Context;
use crate::error::{DropReason, ErrorKind, TerminalCause};
use crate::event::{Envelope, Event};
use crate::guards;
use crate::queue::{MessageId, MessageIdGenerator, Priority, QueuedMessage};
use crate::recovery;

/// One of the six connection states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Disconnecting,
    Terminated,
}

impl MachineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, MachineState::Terminated)
    }
}

/// The timers the machine owns: connect/disconnect deadlines, the
/// heartbeat, the backoff delay, and the stabilization window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    ConnectTimeout,
    DisconnectTimeout,
    Heartbeat,
    PongTimeout,
    Backoff,
    Stability,
}

/// Deferred I/O a [`StepOutcome`] asks the supervisor to perform. Actions
/// never touch the network or a clock themselves: they complete
/// synchronously against the context, and neither guards nor actions
/// suspend.
#[derive(Debug, Clone)]
pub enum Effect {
    OpenSocket { url: Url, protocols: Vec<String> },
    /// `id: None` marks a control frame (a `PING`) rather than an
    /// application message; the remaining fields let the supervisor
    /// reconstruct a [`crate::queue::QueuedMessage`] for `DeliveryFailed`
    /// if the send fails, without the machine needing to track in-flight
    /// sends itself.
    SendFrame {
        id: Option<MessageId>,
        payload: Vec<u8>,
        priority: Priority,
        attempts: u32,
        enqueue_time: Timestamp,
        timeout_at: Option<Timestamp>,
    },
    CloseSocket { code: u16, reason: String },
    ArmTimer { timer: TimerKind, delay: std::time::Duration },
    DisarmTimer(TimerKind),
    Emit(ObservabilityEvent),
}

/// The structured observability surface: every member here is meant to be
/// logged through `tracing`, one event per emission, by whatever owns the
/// supervisor loop.
#[derive(Debug, Clone)]
pub enum ObservabilityEvent {
    Transitioned { detail: String },
    ActionApplied { name: &'static str },
    TimerArmed { timer: TimerKind, delay: std::time::Duration },
    TimerFired { timer: TimerKind },
    ErrorRecorded { kind: ErrorKind },
    RateLimited,
    MessageEnqueued { id: MessageId },
    MessageDropped { id: MessageId, reason: DropReason },
    Stabilized,
    Terminated { cause: TerminalCause },
}

/// The result of a successful `submit`: the transition taken and every
/// effect the caller still owes the outside world.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub prior_state: MachineState,
    pub new_state: MachineState,
    pub actions_applied: Vec<&'static str>,
    pub effects: Vec<Effect>,
}

/// A rejected `submit`: the event was well-formed but inapplicable in the
/// current state, or failed an operation-level guard (oversized payload,
/// rate limit, queue overflow, inbox back-pressure). No context mutation
/// occurs on a `Rejected` outcome, besides the small absorption counters
/// noted per case below.
#[derive(Debug, Clone)]
pub struct Rejected {
    pub kind: ErrorKind,
    pub reason: String,
}

impl Rejected {
    fn new(kind: ErrorKind, reason: impl Into<String>) -> Self {
        Rejected {
            kind,
            reason: reason.into(),
        }
    }
}

/// Owns the [`Context`], the validated [`Config`], a [`Clock`] and an rng
/// for jittered backoff. The one stateful object in the crate; every
/// method that mutates it is `&mut self` and runs to completion
/// synchronously, so dispatch is effectively single-threaded.
pub struct Machine {
    state: MachineState,
    ctx: Context,
    config: Config,
    clock: Arc<dyn Clock>,
    rng: Box<dyn RngCore + Send>,
    id_gen: MessageIdGenerator,
    last_timestamp: Option<Timestamp>,
}

impl Machine {
    pub fn new(config: Config, clock: Arc<dyn Clock>, rng: Box<dyn RngCore + Send>) -> Self {
        let ctx = Context::new(config.max_queue_size);
        Machine {
            state: MachineState::Disconnected,
            ctx,
            config,
            clock,
            rng,
            id_gen: MessageIdGenerator::default(),
            last_timestamp: None,
        }
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Allocates a fresh [`MessageId`] for an application-originated `SEND`
    /// that didn't already carry one.
    pub fn next_message_id(&self) -> MessageId {
        self.id_gen.next()
    }

    /// The single synchronous entry point. Validates the envelope's
    /// timestamp is monotone, absorbs events once `terminated`, applies the
    /// explicit pre-table tie-breaks, then falls through to `dispatch` for
    /// everything the literal state chart defines.
    pub fn submit(&mut self, envelope: Envelope) -> Result<StepOutcome, Rejected> {
        if let Some(prior) = self.last_timestamp {
            if envelope.timestamp < prior {
                return Err(Rejected::new(
                    ErrorKind::Internal,
                    "event timestamp precedes a previously submitted event",
                ));
            }
        }
        self.last_timestamp = Some(envelope.timestamp);
        let now = envelope.timestamp;

        if self.state == MachineState::Terminated {
            self.ctx.metrics.absorbed_events += 1;
            return Ok(StepOutcome {
                prior_state: MachineState::Terminated,
                new_state: MachineState::Terminated,
                actions_applied: vec!["absorbed"],
                effects: Vec::new(),
            });
        }

        self.dispatch(envelope.event, now)
    }

    fn transition(
        &mut self,
        new_state: MachineState,
        actions_applied: Vec<&'static str>,
        effects: Vec<Effect>,
    ) -> StepOutcome {
        let prior_state = self.state;
        self.state = new_state;
        StepOutcome {
            prior_state,
            new_state,
            actions_applied,
            effects,
        }
    }

    /// TERMINATE is universal: from any non-terminal state it runs
    /// `forceTerminate` and lands on `terminated`. Every other
    /// path into `terminated` (max retries, a non-recoverable close, a
    /// disconnect-timeout escalation) folds through here too, so
    /// `terminal_cause` is only ever set in one place.
    fn terminate(&mut self, cause: TerminalCause) -> StepOutcome {
        self.terminate_with(cause, Vec::new(), Vec::new())
    }

    fn terminate_with(
        &mut self,
        cause: TerminalCause,
        mut effects: Vec<Effect>,
        mut actions_applied: Vec<&'static str>,
    ) -> StepOutcome {
        actions::force_terminate(&mut self.ctx, &mut effects);
        effects.push(Effect::Emit(ObservabilityEvent::Terminated { cause }));
        actions_applied.push("forceTerminate");
        self.ctx.terminal_cause = Some(cause);
        self.transition(MachineState::Terminated, actions_applied, effects)
    }

    fn dispatch(&mut self, event: Event, now: Timestamp) -> Result<StepOutcome, Rejected> {
        // TERMINATE is handled identically in every non-terminal state.
        if matches!(event, Event::Terminate) {
            return Ok(self.terminate(TerminalCause::TerminatedByUser));
        }

        match (self.state, event) {
            // --- CONNECT -------------------------------------------------
            (MachineState::Disconnected, Event::Connect { url, options }) => {
                self.do_connect(url, options, now)
            },
            (MachineState::Reconnecting, Event::Connect { url, options }) => {
                // Re-targets/early-retries without touching reconnectAttempts.
                self.do_connect(url, options, now)
            },
            (
                MachineState::Connecting | MachineState::Connected | MachineState::Disconnecting,
                Event::Connect { .. },
            ) => Err(Rejected::new(
                ErrorKind::InvalidUrl,
                "CONNECT is only valid from disconnected or reconnecting",
            )),

            // --- DISCONNECT ------------------------------------------------
            (MachineState::Disconnected | MachineState::Reconnecting | MachineState::Disconnecting, Event::Disconnect { .. }) => {
                // Already not connected (or already disconnecting): a no-op
                // acknowledgement, no state change.
                Ok(self.transition(self.state, vec!["noop"], Vec::new()))
            },
            (MachineState::Connecting | MachineState::Connected, Event::Disconnect { code, reason }) => {
                let mut effects = Vec::new();
                actions::init_disconnect(&mut self.ctx, code, reason, &mut effects);
                if self.state == MachineState::Connecting {
                    effects.push(Effect::DisarmTimer(TimerKind::ConnectTimeout));
                } else {
                    effects.push(Effect::DisarmTimer(TimerKind::Heartbeat));
                    effects.push(Effect::DisarmTimer(TimerKind::PongTimeout));
                }
                actions::arm_disconnect_timeout(&mut effects, &self.config);
                Ok(self.transition(
                    MachineState::Disconnecting,
                    vec!["initDisconnect", "armDisconnectTimeout"],
                    effects,
                ))
            },

            // --- OPEN --------------------------------------------------
            (MachineState::Connecting, Event::Open) => {
                let mut effects = vec![Effect::DisarmTimer(TimerKind::ConnectTimeout)];
                actions::log_connection(&mut effects, "connected");
                actions::open_rate_window(&mut self.ctx, now, &self.config);
                actions::start_heartbeat(&mut self.ctx, now, &mut effects, &self.config);
                actions::begin_stabilization_if_needed(&mut self.ctx, now, &self.config);
                if self.ctx.timing.stabilizing_since.is_some() {
                    effects.push(Effect::ArmTimer {
                        timer: TimerKind::Stability,
                        delay: self.config.stability_timeout,
                    });
                } else {
                    actions::reset_retries(&mut self.ctx, now);
                }
                actions::drain_queue(&mut self.ctx, now, &mut effects);
                Ok(self.transition(
                    MachineState::Connected,
                    vec!["logConnection", "openRateWindow", "startHeartbeat", "beginStabilizationIfNeeded", "drainQueue"],
                    effects,
                ))
            },

            // --- CLOSE ---------------------------------------------------
            (MachineState::Connecting, Event::Close { .. }) => {
                let mut effects = vec![Effect::DisarmTimer(TimerKind::ConnectTimeout)];
                actions::cleanup(&mut self.ctx);
                actions::log_connection(&mut effects, "handshake rejected by peer");
                Ok(self.transition(MachineState::Disconnected, vec!["logConnection", "cleanup"], effects))
            },
            (MachineState::Disconnecting, Event::Close { .. }) => {
                let mut effects = vec![Effect::DisarmTimer(TimerKind::DisconnectTimeout)];
                actions::complete_disconnect(&mut self.ctx, now);
                Ok(self.transition(MachineState::Disconnected, vec!["completeDisconnect"], effects))
            },
            (MachineState::Connected, Event::Close { code, reason, .. }) => {
                Ok(self.handle_close_while_connected(code, reason, now))
            },

            // --- ERROR -----------------------------------------------------
            (MachineState::Connecting, Event::Error { description }) => {
                Ok(self.error_while_connecting_or_connected(ErrorKind::ConnectionFailed, description, now, true))
            },
            (MachineState::Connected, Event::Error { description }) => {
                Ok(self.error_while_connecting_or_connected(ErrorKind::ConnectionFailed, description, now, false))
            },
            (MachineState::Disconnecting, Event::Error { description }) => {
                let mut effects = vec![Effect::DisarmTimer(TimerKind::DisconnectTimeout)];
                actions::handle_error(&mut self.ctx, now, ErrorKind::ConnectionFailed, true, &description);
                actions::cleanup(&mut self.ctx);
                Ok(self.transition(
                    MachineState::Disconnected,
                    vec!["handleError", "cleanup"],
                    effects,
                ))
            },

            // --- RETRY / MAX_RETRIES --------------------------------------
            (MachineState::Reconnecting, Event::Retry { .. }) => Ok(self.do_retry(now)),
            // The backoff timer armed by `scheduleRetry` fires as a
            // `Timeout(Backoff)`, not a `Retry`: both drive the same
            // re-connect attempt.
            (MachineState::Reconnecting, Event::Timeout(TimerKind::Backoff)) => Ok(self.do_retry(now)),
            (MachineState::Reconnecting, Event::MaxRetries) => {
                Ok(self.terminate(TerminalCause::MaxRetries))
            },

            // --- timer-driven connect timeout / heartbeat / pong timeout --
            (MachineState::Connecting, Event::Timeout(TimerKind::ConnectTimeout)) => {
                Ok(self.error_while_connecting_or_connected(ErrorKind::ConnectTimeout, String::from("connect_timeout"), now, true))
            },
            // A healthy connection's heartbeat deadline only sends a PING
            // and re-arms itself alongside a pong-timeout deadline; only
            // the pong timeout actually tears the connection down (§4.8).
            (MachineState::Connected, Event::Timeout(TimerKind::Heartbeat)) => {
                Ok(self.fire_heartbeat(now))
            },
            (MachineState::Connected, Event::Timeout(TimerKind::PongTimeout)) => {
                Ok(self.error_while_connecting_or_connected(ErrorKind::ConnectionFailed, String::from("pong_timeout"), now, false))
            },
            (MachineState::Disconnecting, Event::Timeout(TimerKind::DisconnectTimeout)) => {
                Ok(self.terminate(TerminalCause::InvariantViolation))
            },
            (MachineState::Connected, Event::Timeout(TimerKind::Stability)) => {
                Ok(self.complete_stabilization(now))
            },

            // --- MESSAGE / PING / PONG, only meaningful while connected ---
            (MachineState::Connected, Event::Message { data, size }) => {
                actions::process_message(&mut self.ctx, size);
                let _ = data;
                Ok(self.transition(MachineState::Connected, vec!["processMessage"], Vec::new()))
            },
            (MachineState::Connected, Event::Ping) => {
                let mut effects = Vec::new();
                actions::record_ping(&mut self.ctx, now, &mut effects);
                Ok(self.transition(MachineState::Connected, vec!["recordPing"], effects))
            },
            (MachineState::Connected, Event::Pong { latency }) => {
                actions::record_pong(&mut self.ctx, now);
                actions::update_latency(&mut self.ctx, latency);
                Ok(self.transition(
                    MachineState::Connected,
                    vec!["recordPong", "updateLatency"],
                    vec![Effect::DisarmTimer(TimerKind::PongTimeout)],
                ))
            },

            // --- SEND: accepted in every non-terminal state, so a message
            // submitted while reconnecting still enqueues coherently --
            (
                MachineState::Disconnected
                | MachineState::Connecting
                | MachineState::Connected
                | MachineState::Reconnecting
                | MachineState::Disconnecting,
                Event::Send { data, id, priority, timeout },
            ) => self.handle_send(data, id, priority, timeout, now),

            // --- DELIVERY_FAILED: a queued message's send attempt failed at
            // the transport layer; re-enqueue it (bumping attempts) or drop
            // it as exhausted -------------------------------------------
            (
                MachineState::Disconnected
                | MachineState::Connecting
                | MachineState::Connected
                | MachineState::Reconnecting
                | MachineState::Disconnecting,
                Event::DeliveryFailed { message },
            ) => Ok(self.handle_delivery_failed(message)),

            // Anything else is an undefined transition: invoke generic
            // recovery, staying in the current state. An undefined
            // (state, event) pair invokes recovery without changing
            // context beyond the error record.
            (state, event) => Ok(self.recover(state, event, now)),
        }
    }

    fn do_connect(&mut self, url: Url, options: crate::event::ConnectOptions, now: Timestamp) -> Result<StepOutcome, Rejected> {
        if !guards::can_connect(self.state, &url) {
            let mut effects = Vec::new();
            actions::handle_error(&mut self.ctx, now, ErrorKind::InvalidUrl, true, "invalid url scheme");
            effects.push(Effect::Emit(ObservabilityEvent::ErrorRecorded {
                kind: ErrorKind::InvalidUrl,
            }));
            return Ok(self.transition(self.state, vec!["handleError"], effects));
        }
        let mut effects = Vec::new();
        actions::store_url(&mut self.ctx, &url, &options.protocols);
        actions::log_connection(&mut effects, "connecting");
        actions::open_socket(&mut self.ctx, &mut effects);
        actions::arm_connect_timeout(&mut effects, &self.config);
        Ok(self.transition(
            MachineState::Connecting,
            vec!["storeUrl", "logConnection", "openSocket", "armConnectTimeout"],
            effects,
        ))
    }

    /// Re-enters `connecting` for the current reconnect attempt. Shared by
    /// the explicit `RETRY` event and the `Backoff` timer that arms it,
    /// which both resume the same in-flight attempt.
    fn do_retry(&mut self, now: Timestamp) -> StepOutcome {
        debug_assert!(self.ctx.url.is_some(), "reconnecting state always has a stored url");
        let _ = now;
        let mut effects = Vec::new();
        actions::open_socket(&mut self.ctx, &mut effects);
        actions::arm_connect_timeout(&mut effects, &self.config);
        self.transition(MachineState::Connecting, vec!["openSocket", "armConnectTimeout"], effects)
    }

    /// The heartbeat deadline on a healthy connection: sends a `PING`,
    /// re-arms the next heartbeat, and arms the pong-timeout deadline that
    /// actually tears the connection down if no `PONG` arrives in time.
    fn fire_heartbeat(&mut self, now: Timestamp) -> StepOutcome {
        let mut effects = Vec::new();
        actions::record_ping(&mut self.ctx, now, &mut effects);
        actions::arm_heartbeat(&mut effects, &self.config);
        actions::arm_pong_timeout(&mut effects, &self.config);
        self.transition(
            MachineState::Connected,
            vec!["recordPing", "armHeartbeat", "armPongTimeout"],
            effects,
        )
    }

    fn handle_close_while_connected(&mut self, code: u16, reason: String, now: Timestamp) -> StepOutcome {
        let mut effects = vec![
            Effect::DisarmTimer(TimerKind::Heartbeat),
            Effect::DisarmTimer(TimerKind::PongTimeout),
        ];
        if recovery::is_normal_close(code) {
            actions::cleanup(&mut self.ctx);
            return self.transition(MachineState::Disconnected, vec!["cleanup"], effects);
        }
        let class = recovery::classify_close(code);
        actions::handle_error(&mut self.ctx, now, class.kind, class.recoverable, &reason);
        effects.push(Effect::Emit(ObservabilityEvent::ErrorRecorded { kind: class.kind }));
        if class.recoverable && guards::can_retry(&self.ctx, &self.config) {
            actions::increment_retries(&mut self.ctx, now);
            actions::schedule_retry(&self.ctx, &mut effects, &self.config, self.rng.as_mut());
            self.transition(
                MachineState::Reconnecting,
                vec!["handleError", "incrementRetries", "scheduleRetry"],
                effects,
            )
        } else {
            let cause = if class.recoverable {
                TerminalCause::MaxRetries
            } else {
                TerminalCause::NonRecoverableClose(code)
            };
            self.terminate_with(cause, effects, vec!["handleError"])
        }
    }

    /// Shared by `ERROR` in `connecting`/`connected` and by the synthetic
    /// connect-timeout / pong-timeout events, which fold into the same arm:
    /// a connect timeout maps internally to an `ERROR`.
    fn error_while_connecting_or_connected(
        &mut self,
        kind: ErrorKind,
        description: String,
        now: Timestamp,
        was_connecting: bool,
    ) -> StepOutcome {
        let mut effects = vec![Effect::DisarmTimer(if was_connecting {
            TimerKind::ConnectTimeout
        } else {
            TimerKind::Heartbeat
        })];
        if !was_connecting {
            effects.push(Effect::DisarmTimer(TimerKind::PongTimeout));
        }
        actions::handle_error(&mut self.ctx, now, kind, true, &description);
        effects.push(Effect::Emit(ObservabilityEvent::ErrorRecorded { kind }));
        actions::increment_retries(&mut self.ctx, now);
        if guards::can_retry(&self.ctx, &self.config) {
            actions::schedule_retry(&self.ctx, &mut effects, &self.config, self.rng.as_mut());
            self.transition(
                MachineState::Reconnecting,
                vec!["handleError", "incrementRetries", "scheduleRetry"],
                effects,
            )
        } else {
            self.terminate_with(
                TerminalCause::MaxRetries,
                effects,
                vec!["handleError", "incrementRetries"],
            )
        }
    }

    fn complete_stabilization(&mut self, now: Timestamp) -> StepOutcome {
        let mut effects = vec![Effect::DisarmTimer(TimerKind::Stability)];
        if self.ctx.timing.stabilizing_since.is_some() {
            actions::reset_retries(&mut self.ctx, now);
            effects.push(Effect::Emit(ObservabilityEvent::Stabilized));
        }
        self.transition(MachineState::Connected, vec!["resetRetries"], effects)
    }

    fn handle_send(
        &mut self,
        data: Vec<u8>,
        id: Option<MessageId>,
        priority: Priority,
        timeout: Option<std::time::Duration>,
        now: Timestamp,
    ) -> Result<StepOutcome, Rejected> {
        let size = data.len();
        if !guards::payload_within_limit(size, &self.config) {
            return Err(Rejected::new(
                ErrorKind::MessageSize,
                "payload exceeds max_bytes_per_message",
            ));
        }
        let id = id.unwrap_or_else(|| self.id_gen.next());
        let timeout_at = timeout.map(|d| now.saturating_add(d));

        if self.state == MachineState::Connected && self.ctx.queue.is_empty() {
            // Nothing queued ahead of this message: send immediately (spec
            // §4.3's ordering only constrains messages sharing a lane, and
            // an empty queue has nothing to order against).
            match actions::enforce_rate_limit(&mut self.ctx, now) {
                crate::rate_limiter::Admit::Admitted => {
                    let mut effects = Vec::new();
                    actions::send_message(&mut self.ctx, size, &mut effects, Some(id), data, priority, now, timeout_at);
                    Ok(self.transition(MachineState::Connected, vec!["sendMessage"], effects))
                },
                crate::rate_limiter::Admit::Rejected => Err(Rejected::new(
                    ErrorKind::RateLimited,
                    "rate limit window exhausted",
                )),
            }
        } else if self.state == MachineState::Connected {
            // A backlog is already waiting: preserve its ordering by
            // enqueuing behind it, then try to drain as much as the rate
            // window now admits.
            let mut effects = Vec::new();
            actions::enqueue(&mut self.ctx, now, id, data, priority, timeout_at, &mut effects);
            actions::drain_queue(&mut self.ctx, now, &mut effects);
            Ok(self.transition(MachineState::Connected, vec!["enqueueOrSend", "drainQueue"], effects))
        } else {
            let mut effects = Vec::new();
            actions::enqueue(&mut self.ctx, now, id, data, priority, timeout_at, &mut effects);
            Ok(self.transition(self.state, vec!["enqueue"], effects))
        }
    }

    /// `DELIVERY_FAILED`: a queued message's transport-level send attempt
    /// failed. Re-enqueues it at the head of its lane with `attempts`
    /// bumped, or drops it as `exhausted` past `max_retries`.
    fn handle_delivery_failed(&mut self, message: QueuedMessage) -> StepOutcome {
        let mut effects = Vec::new();
        if let Some((id, reason)) = self.ctx.queue.requeue_failed(message, self.config.max_retries) {
            effects.push(Effect::Emit(ObservabilityEvent::MessageDropped { id, reason }));
        }
        self.transition(self.state, vec!["requeueFailed"], effects)
    }

    /// Generic recovery: an undefined `(state, event)` pair records an
    /// error and leaves state untouched.
    fn recover(&mut self, state: MachineState, event: Event, now: Timestamp) -> StepOutcome {
        actions::handle_error(
            &mut self.ctx,
            now,
            ErrorKind::Internal,
            true,
            &format!("unhandled event {} in state {state:?}", event.kind_name()),
        );
        let effects = vec![Effect::Emit(ObservabilityEvent::ErrorRecorded {
            kind: ErrorKind::Internal,
        })];
        self.transition(state, vec!["handleError"], effects)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::clock::TestClock;
    use crate::event::ConnectOptions;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn machine() -> Machine {
        Machine::new(
            Config::default(),
            Arc::new(TestClock::new()),
            Box::new(StdRng::seed_from_u64(7)),
        )
    }

    fn envelope(event: Event, ms: u64) -> Envelope {
        Envelope::new(event, Timestamp::from_millis(ms))
    }

    #[test]
    fn connect_from_disconnected_opens_socket_and_arms_timeout() {
        let mut m = machine();
        let url = Url::parse("wss://example.test/socket").unwrap();
        let outcome = m
            .submit(envelope(
                Event::Connect {
                    url,
                    options: ConnectOptions::default(),
                },
                0,
            ))
            .unwrap();
        assert_eq!(outcome.new_state, MachineState::Connecting);
        assert!(outcome.effects.iter().any(|e| matches!(e, Effect::OpenSocket { .. })));
        assert!(
            outcome
                .effects
                .iter()
                .any(|e| matches!(e, Effect::ArmTimer { timer: TimerKind::ConnectTimeout, .. }))
        );
    }

    #[test]
    fn connect_while_connected_is_rejected() {
        let mut m = machine();
        let url = Url::parse("wss://example.test/socket").unwrap();
        m.submit(envelope(
            Event::Connect {
                url: url.clone(),
                options: ConnectOptions::default(),
            },
            0,
        ))
        .unwrap();
        m.submit(envelope(Event::Open, 1)).unwrap();
        assert_eq!(m.state(), MachineState::Connected);

        let rejected = m
            .submit(envelope(
                Event::Connect {
                    url,
                    options: ConnectOptions::default(),
                },
                2,
            ))
            .unwrap_err();
        assert_eq!(rejected.kind, ErrorKind::InvalidUrl);
        assert_eq!(m.state(), MachineState::Connected);
    }

    #[test]
    fn five_consecutive_errors_terminate_with_max_retries() {
        let mut m = machine();
        let url = Url::parse("wss://example.test/socket").unwrap();
        m.submit(envelope(
            Event::Connect {
                url,
                options: ConnectOptions::default(),
            },
            0,
        ))
        .unwrap();
        assert_eq!(m.state(), MachineState::Connecting);

        let mut ts = 1;
        for attempt in 1..=5 {
            let outcome = m
                .submit(envelope(Event::error("boom").unwrap(), ts))
                .unwrap();
            ts += 1;
            if attempt < 5 {
                assert_eq!(outcome.new_state, MachineState::Reconnecting);
                let outcome = m.submit(envelope(
                    Event::Retry {
                        attempt,
                        delay: std::time::Duration::from_millis(1),
                    },
                    ts,
                ))
                .unwrap();
                ts += 1;
                assert_eq!(outcome.new_state, MachineState::Connecting);
            } else {
                assert_eq!(outcome.new_state, MachineState::Terminated);
            }
        }
        assert_eq!(m.state(), MachineState::Terminated);
        assert_eq!(m.context().metrics.reconnect_attempts, 5);
    }

    #[test]
    fn terminated_absorbs_further_events() {
        let mut m = machine();
        m.submit(envelope(Event::Terminate, 0)).unwrap();
        assert_eq!(m.state(), MachineState::Terminated);
        let outcome = m.submit(envelope(Event::Ping, 1)).unwrap();
        assert_eq!(outcome.new_state, MachineState::Terminated);
        assert_eq!(m.context().metrics.absorbed_events, 1);
    }

    #[test]
    fn send_while_disconnected_enqueues_instead_of_rejecting() {
        let mut m = machine();
        let outcome = m
            .submit(envelope(
                Event::Send {
                    data: vec![1, 2, 3],
                    id: None,
                    priority: Priority::Normal,
                    timeout: None,
                },
                0,
            ))
            .unwrap();
        assert_eq!(outcome.new_state, MachineState::Disconnected);
        assert_eq!(m.context().queue.len(), 1);
    }

    #[test]
    fn oversized_send_is_rejected_without_state_change() {
        let mut m = machine();
        let huge = vec![0u8; m.config().max_bytes_per_message + 1];
        let rejected = m
            .submit(envelope(
                Event::Send {
                    data: huge,
                    id: None,
                    priority: Priority::Normal,
                    timeout: None,
                },
                0,
            ))
            .unwrap_err();
        assert_eq!(rejected.kind, ErrorKind::MessageSize);
        assert_eq!(m.state(), MachineState::Disconnected);
    }

    #[test]
    fn non_recoverable_close_while_connected_terminates_immediately() {
        let mut m = machine();
        let url = Url::parse("wss://example.test/socket").unwrap();
        m.submit(envelope(
            Event::Connect {
                url,
                options: ConnectOptions::default(),
            },
            0,
        ))
        .unwrap();
        m.submit(envelope(Event::Open, 1)).unwrap();
        assert_eq!(m.state(), MachineState::Connected);

        let outcome = m
            .submit(envelope(
                Event::Close {
                    code: 1008,
                    reason: String::from("policy violation"),
                    was_clean: false,
                },
                2,
            ))
            .unwrap();
        assert_eq!(outcome.new_state, MachineState::Terminated);
    }
}
