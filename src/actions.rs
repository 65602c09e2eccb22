//! Pure context transformers.
//!
//! No I/O: every function here only mutates [`Context`] and appends
//! [`Effect`]s describing I/O the caller (the supervisor) should perform,
//! keeping the actual socket/timer work strictly outside the transition
//! table.

use std::time::Duration;

use url::Url;

use crate::clock::{Timestamp, backoff_delay};
use crate::config::Config;
use crate::context::{ConnectionStatus, Context, ReadyState};
use crate::error::ErrorKind;
use crate::machine::{Effect, ObservabilityEvent, TimerKind};
use crate::queue::{MessageId, Priority, QueuedMessage};
use crate::rate_limiter::{Admit, RateWindow};
use rand::RngCore;

/// `storeUrl`: pre url is non-empty ws/wss; post `context.url = url`.
pub fn store_url(ctx: &mut Context, url: &Url, protocols: &[String]) {
    ctx.url = Some(url.clone());
    ctx.protocols = protocols.to_vec();
}

pub fn log_connection(effects: &mut Vec<Effect>, detail: impl Into<String>) {
    effects.push(Effect::Emit(ObservabilityEvent::Transitioned {
        detail: detail.into(),
    }));
}

pub fn arm_connect_timeout(effects: &mut Vec<Effect>, config: &Config) {
    effects.push(Effect::ArmTimer {
        timer: TimerKind::ConnectTimeout,
        delay: config.connect_timeout,
    });
}

pub fn arm_disconnect_timeout(effects: &mut Vec<Effect>, config: &Config) {
    effects.push(Effect::ArmTimer {
        timer: TimerKind::DisconnectTimeout,
        delay: config.disconnect_timeout,
    });
}

/// Re-arms the heartbeat deadline for the next `max_ping_interval`.
pub fn arm_heartbeat(effects: &mut Vec<Effect>, config: &Config) {
    effects.push(Effect::ArmTimer {
        timer: TimerKind::Heartbeat,
        delay: config.max_ping_interval,
    });
}

/// Arms the pong-timeout deadline a heartbeat's `PING` must be answered
/// within before the connection is declared dead (§4.8).
pub fn arm_pong_timeout(effects: &mut Vec<Effect>, config: &Config) {
    effects.push(Effect::ArmTimer {
        timer: TimerKind::PongTimeout,
        delay: config.max_pong_delay,
    });
}

/// `openSocket`: allocates the handle and requests the transport connect.
pub fn open_socket(ctx: &mut Context, effects: &mut Vec<Effect>) {
    ctx.allocate_socket_handle();
    ctx.ready_state = ReadyState::Connecting;
    let url = ctx.url.clone().expect("storeUrl ran before openSocket");
    effects.push(Effect::OpenSocket {
        url,
        protocols: ctx.protocols.clone(),
    });
}

/// `resetRetries`: only called once stabilization completes.
pub fn reset_retries(ctx: &mut Context, now: Timestamp) {
    ctx.metrics.reconnect_attempts = 0;
    ctx.timing.last_stable_connection = Some(now);
    ctx.timing.stabilizing_since = None;
}

/// `openRateWindow`: opens a fresh window on `OPEN` only -- never on
/// stabilization completing.
pub fn open_rate_window(ctx: &mut Context, now: Timestamp, config: &Config) {
    ctx.rate_window = Some(RateWindow::new(
        now,
        config.rate_limit_window,
        config.max_messages_per_window,
    ));
}

pub fn start_heartbeat(ctx: &mut Context, now: Timestamp, effects: &mut Vec<Effect>, config: &Config) {
    ctx.status = ConnectionStatus::Connected;
    ctx.ready_state = ReadyState::Open;
    ctx.timing.connect_time = Some(now);
    effects.push(Effect::ArmTimer {
        timer: TimerKind::Heartbeat,
        delay: config.max_ping_interval,
    });
}

/// Marks the start of a stabilization sub-period if this `OPEN` followed at
/// least one reconnect attempt.
pub fn begin_stabilization_if_needed(ctx: &mut Context, now: Timestamp, config: &Config) {
    if ctx.metrics.reconnect_attempts > 0 {
        ctx.timing.stabilizing_since = Some(now);
    } else {
        ctx.timing.stabilizing_since = None;
    }
    let _ = config;
}

/// `handleError`: post status = error; lastError = now(); errorCount += 1; socket := ∅.
pub fn handle_error(
    ctx: &mut Context,
    now: Timestamp,
    kind: ErrorKind,
    recoverable: bool,
    description: &str,
) {
    ctx.status = ConnectionStatus::Error;
    ctx.clear_socket_handle();
    ctx.ready_state = ReadyState::Closed;
    ctx.record_error(now, kind, recoverable, description);
}

/// `incrementRetries`: post reconnectAttempts += 1; lastRetry = now().
/// During stabilization, an ERROR is a *regression*: attempts are still
/// bumped but the prior backoff sequence is not restarted from zero.
pub fn increment_retries(ctx: &mut Context, now: Timestamp) {
    ctx.metrics.reconnect_attempts += 1;
    ctx.timing.last_retry_time = Some(now);
}

/// `scheduleRetry`: arms the backoff timer for the current attempt count.
pub fn schedule_retry(
    ctx: &Context,
    effects: &mut Vec<Effect>,
    config: &Config,
    rng: &mut dyn RngCore,
) {
    let attempt = ctx.metrics.reconnect_attempts;
    let delay = backoff_delay(config, attempt.saturating_sub(1), rng);
    effects.push(Effect::ArmTimer {
        timer: TimerKind::Backoff,
        delay,
    });
    effects.push(Effect::Emit(ObservabilityEvent::TimerArmed {
        timer: TimerKind::Backoff,
        delay,
    }));
}

/// `cleanup`/`cleanupSocket`: clears the socket handle and disarms the
/// timers owned by the state being exited. The caller (machine::step)
/// issues the matching `DisarmTimer` effects since it knows which state is
/// being exited.
pub fn cleanup(ctx: &mut Context) {
    ctx.clear_socket_handle();
    ctx.status = ConnectionStatus::Disconnected;
    ctx.ready_state = ReadyState::Closed;
    ctx.rate_window = None;
}

/// `processMessage`: post messagesReceived += 1; bytesReceived += size.
pub fn process_message(ctx: &mut Context, size: usize) {
    ctx.metrics.messages_received += 1;
    ctx.metrics.bytes_received += size as u64;
}

/// `enforceRateLimit`: advances the window, returning whether the message
/// was admitted.
pub fn enforce_rate_limit(ctx: &mut Context, now: Timestamp) -> Admit {
    match ctx.rate_window.as_mut() {
        Some(window) => window.admit(now),
        None => Admit::Admitted,
    }
}

/// `sendMessage`: precondition state = connected; post messagesSent +=1;
/// bytesSent += size.
#[allow(clippy::too_many_arguments)]
pub fn send_message(
    ctx: &mut Context,
    size: usize,
    effects: &mut Vec<Effect>,
    id: Option<MessageId>,
    payload: Vec<u8>,
    priority: Priority,
    now: Timestamp,
    timeout_at: Option<Timestamp>,
) {
    ctx.metrics.messages_sent += 1;
    ctx.metrics.bytes_sent += size as u64;
    effects.push(Effect::SendFrame {
        id,
        payload,
        priority,
        attempts: 0,
        enqueue_time: now,
        timeout_at,
    });
}

/// `enqueueOrSend`: when offline (or rate-limited), enqueues; the machine
/// decides the fork before calling into either this or `send_message`.
#[allow(clippy::too_many_arguments)]
pub fn enqueue(
    ctx: &mut Context,
    now: Timestamp,
    id: MessageId,
    payload: Vec<u8>,
    priority: Priority,
    timeout_at: Option<Timestamp>,
    effects: &mut Vec<Effect>,
) {
    let msg = QueuedMessage {
        id,
        payload,
        enqueue_time: now,
        attempts: 0,
        priority,
        timeout_at,
    };
    match ctx.queue.enqueue(msg) {
        Ok(None) => {
            effects.push(Effect::Emit(ObservabilityEvent::MessageEnqueued { id }));
        },
        Ok(Some((evicted_id, reason))) => {
            effects.push(Effect::Emit(ObservabilityEvent::MessageEnqueued { id }));
            effects.push(Effect::Emit(ObservabilityEvent::MessageDropped {
                id: evicted_id,
                reason,
            }));
        },
        Err((_msg, reason)) => {
            effects.push(Effect::Emit(ObservabilityEvent::MessageDropped { id, reason }));
        },
    }
}

/// `enqueueOrSend`'s counterpart for backlog already sitting in the queue:
/// drains as many messages as the rate window admits, in priority/FIFO
/// order, stopping at the first rejection -- dequeue only happens while
/// connected, and only after rate-limit admission. Called whenever the
/// machine has a fresh chance to make progress on the backlog -- on `OPEN`
/// and after a `SEND` that enqueued rather than sent directly.
pub fn drain_queue(ctx: &mut Context, now: Timestamp, effects: &mut Vec<Effect>) {
    for (id, reason) in ctx.queue.evict_expired(now) {
        effects.push(Effect::Emit(ObservabilityEvent::MessageDropped { id, reason }));
    }
    loop {
        let Some(msg) = ctx.queue.dequeue() else {
            return;
        };
        let admit = match ctx.rate_window.as_mut() {
            Some(window) => window.admit(now),
            None => Admit::Admitted,
        };
        match admit {
            Admit::Admitted => {
                ctx.metrics.messages_sent += 1;
                ctx.metrics.bytes_sent += msg.payload.len() as u64;
                effects.push(Effect::SendFrame {
                    id: Some(msg.id),
                    payload: msg.payload,
                    priority: msg.priority,
                    attempts: msg.attempts,
                    enqueue_time: msg.enqueue_time,
                    timeout_at: msg.timeout_at,
                });
            },
            Admit::Rejected => {
                ctx.queue.return_to_front(msg);
                effects.push(Effect::Emit(ObservabilityEvent::RateLimited));
                return;
            },
        }
    }
}

pub fn record_ping(ctx: &mut Context, now: Timestamp, effects: &mut Vec<Effect>) {
    ctx.timing.last_ping_time = Some(now);
    effects.push(Effect::SendFrame {
        id: None,
        payload: Vec::new(), // control frame, carried out-of-band by the transport
        priority: Priority::Normal,
        attempts: 0,
        enqueue_time: now,
        timeout_at: None,
    });
}

pub fn record_pong(ctx: &mut Context, now: Timestamp) {
    ctx.timing.last_pong_time = Some(now);
}

pub fn update_latency(ctx: &mut Context, latency: Duration) {
    ctx.latency_samples.push(latency);
}

pub fn init_disconnect(
    ctx: &mut Context,
    code: Option<u16>,
    reason: Option<String>,
    effects: &mut Vec<Effect>,
) {
    ctx.ready_state = ReadyState::Closing;
    let code = code.unwrap_or(1000);
    let reason = reason.unwrap_or_default();
    ctx.last_disconnect_reason = Some(reason.clone());
    effects.push(Effect::CloseSocket { code, reason });
}

pub fn complete_disconnect(ctx: &mut Context, now: Timestamp) {
    ctx.clear_socket_handle();
    ctx.status = ConnectionStatus::Disconnected;
    ctx.ready_state = ReadyState::Closed;
    ctx.timing.disconnect_time = Some(now);
    ctx.rate_window = None;
}

/// `forceTerminate`: closes the transport if any, clears the queue with
/// `terminated`, disarms all timers.
pub fn force_terminate(ctx: &mut Context, effects: &mut Vec<Effect>) {
    if ctx.socket_handle.is_some() {
        effects.push(Effect::CloseSocket {
            code: 1000,
            reason: String::from("terminated"),
        });
    }
    ctx.clear_socket_handle();
    for (id, reason) in ctx.queue.drain_terminated() {
        effects.push(Effect::Emit(ObservabilityEvent::MessageDropped { id, reason }));
    }
    for timer in [
        TimerKind::ConnectTimeout,
        TimerKind::DisconnectTimeout,
        TimerKind::Heartbeat,
        TimerKind::PongTimeout,
        TimerKind::Backoff,
        TimerKind::Stability,
    ] {
        effects.push(Effect::DisarmTimer(timer));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::clock::TestClock;

    #[test]
    fn store_url_sets_url_and_protocols() {
        let mut ctx = Context::new(10);
        let url = Url::parse("wss://example.test/socket").unwrap();
        store_url(&mut ctx, &url, &[String::from("chat")]);
        assert_eq!(ctx.url, Some(url));
        assert_eq!(ctx.protocols, vec![String::from("chat")]);
    }

    #[test]
    fn handle_error_clears_socket_and_bumps_error_count() {
        let mut ctx = Context::new(10);
        ctx.allocate_socket_handle();
        let clock = TestClock::new();
        handle_error(&mut ctx, clock.now(), ErrorKind::ConnectionFailed, true, "boom");
        assert!(ctx.socket_handle.is_none());
        assert_eq!(ctx.metrics.error_count, 1);
        assert_eq!(ctx.status, ConnectionStatus::Error);
    }

    #[test]
    fn reset_retries_clears_stabilization() {
        let mut ctx = Context::new(10);
        ctx.metrics.reconnect_attempts = 3;
        ctx.timing.stabilizing_since = Some(Timestamp::from_millis(10));
        reset_retries(&mut ctx, Timestamp::from_millis(100));
        assert_eq!(ctx.metrics.reconnect_attempts, 0);
        assert!(ctx.timing.stabilizing_since.is_none());
        assert_eq!(ctx.timing.last_stable_connection, Some(Timestamp::from_millis(100)));
    }
}
