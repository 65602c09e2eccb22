//! Scenario tests driven end to end through [`reconnecting_ws::Client`]
//! against a scripted [`MockTransport`] and a [`TestClock`] so every timer
//! fire is explicit rather than raced against real wall-clock time.

use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use reconnecting_ws::clock::{Clock, TestClock};
use reconnecting_ws::config::Config;
use reconnecting_ws::event::{ConnectOptions, Envelope, Event};
use reconnecting_ws::machine::{Machine, MachineState};
use reconnecting_ws::queue::Priority;
use reconnecting_ws::transport::mock::MockTransport;
use test_log::test;
use url::Url;

fn url() -> Url {
    Url::parse("wss://example.test/socket").unwrap()
}

fn rng() -> Box<StdRng> {
    Box::new(StdRng::seed_from_u64(7))
}

fn connect(machine: &mut Machine, clock: &TestClock) {
    machine
        .submit(Envelope::new(
            Event::Connect {
                url: url(),
                options: ConnectOptions::default(),
            },
            clock.now(),
        ))
        .unwrap();
}

/// Scenario 1: happy connect and send.
#[test]
fn happy_connect_and_send() {
    let clock = Arc::new(TestClock::new());
    let mut machine = Machine::new(
        Config::default(),
        clock.clone(),
        rng(),
    );

    connect(&mut machine, &clock);
    assert_eq!(machine.state(), MachineState::Connecting);

    machine.submit(Envelope::new(Event::Open, clock.now())).unwrap();
    assert_eq!(machine.state(), MachineState::Connected);

    let outcome = machine
        .submit(Envelope::new(
            Event::Send {
                data: b"hi".to_vec(),
                id: None,
                priority: Priority::Normal,
                timeout: None,
            },
            clock.now(),
        ))
        .unwrap();
    assert_eq!(outcome.new_state, MachineState::Connected);
    assert_eq!(machine.context().metrics.messages_sent, 1);
    assert_eq!(machine.context().metrics.bytes_sent, 2);
    assert_eq!(machine.context().rate_window.as_ref().unwrap().count(), 1);
}

/// Scenario 2: retry with backoff, terminating at max_retries.
#[test]
fn retry_with_backoff_terminates_at_max_retries() {
    let clock = Arc::new(TestClock::new());
    let config = Config::builder()
        .max_retries(5)
        .initial_retry_delay(Duration::from_millis(100))
        .max_retry_delay(Duration::from_millis(2000))
        .connect_timeout(Duration::from_millis(100_000))
        .build()
        .unwrap();
    let mut machine = Machine::new(config, clock.clone(), rng());

    connect(&mut machine, &clock);

    let mut ts = 1u64;
    for attempt in 1..=5u32 {
        clock.set(ts);
        let outcome = machine
            .submit(Envelope::new(Event::error("boom").unwrap(), clock.now()))
            .unwrap();
        ts += 1;
        if attempt < 5 {
            assert_eq!(outcome.new_state, MachineState::Reconnecting);
            assert_eq!(machine.context().metrics.reconnect_attempts, attempt);
            clock.set(ts);
            let retry = machine
                .submit(Envelope::new(
                    Event::Retry {
                        attempt,
                        delay: Duration::from_millis(1),
                    },
                    clock.now(),
                ))
                .unwrap();
            ts += 1;
            assert_eq!(retry.new_state, MachineState::Connecting);
        } else {
            assert_eq!(outcome.new_state, MachineState::Terminated);
        }
    }
    assert_eq!(machine.state(), MachineState::Terminated);
}

/// Scenario 3: rate limiting within a window, then a fresh window after
/// it expires.
#[test]
fn rate_limit_window_rejects_then_reopens() {
    let clock = Arc::new(TestClock::new());
    let config = Config::builder()
        .max_messages_per_window(3)
        .rate_limit_window(Duration::from_millis(1000))
        .connect_timeout(Duration::from_millis(100_000))
        .initial_retry_delay(Duration::from_millis(100))
        .max_retry_delay(Duration::from_millis(500))
        .build()
        .unwrap();
    let mut machine = Machine::new(config, clock.clone(), rng());

    connect(&mut machine, &clock);
    machine.submit(Envelope::new(Event::Open, clock.now())).unwrap();

    let send = |machine: &mut Machine, clock: &TestClock, ms: u64| {
        clock.set(ms);
        machine.submit(Envelope::new(
            Event::Send {
                data: vec![0],
                id: None,
                priority: Priority::Normal,
                timeout: None,
            },
            clock.now(),
        ))
    };

    assert!(send(&mut machine, &clock, 0).is_ok());
    assert!(send(&mut machine, &clock, 150).is_ok());
    assert!(send(&mut machine, &clock, 300).is_ok());
    let rejected = send(&mut machine, &clock, 450).unwrap_err();
    assert_eq!(rejected.kind, reconnecting_ws::ErrorKind::RateLimited);

    assert!(send(&mut machine, &clock, 1001).is_ok());
    assert_eq!(machine.context().rate_window.as_ref().unwrap().count(), 1);
}

/// Scenario 4: stabilization regression -- an error inside the
/// stabilization window recounts against the existing backoff sequence
/// instead of resetting it.
#[test]
fn stabilization_regression_does_not_reset_attempts() {
    let clock = Arc::new(TestClock::new());
    let config = Config::builder()
        .stability_timeout(Duration::from_millis(5000))
        .connect_timeout(Duration::from_millis(100_000))
        .build()
        .unwrap();
    let mut machine = Machine::new(config, clock.clone(), rng());

    connect(&mut machine, &clock);
    machine
        .submit(Envelope::new(Event::error("boom").unwrap(), clock.now()))
        .unwrap();
    assert_eq!(machine.context().metrics.reconnect_attempts, 1);

    clock.set(10);
    machine
        .submit(Envelope::new(
            Event::Retry { attempt: 1, delay: Duration::from_millis(1) },
            clock.now(),
        ))
        .unwrap();
    clock.set(20);
    machine.submit(Envelope::new(Event::Open, clock.now())).unwrap();
    assert_eq!(machine.state(), MachineState::Connected);
    assert!(machine.context().timing.stabilizing_since.is_some());

    clock.set(220);
    let outcome = machine
        .submit(Envelope::new(Event::error("boom again").unwrap(), clock.now()))
        .unwrap();
    assert_eq!(outcome.new_state, MachineState::Reconnecting);
    // Not reset: still the same attempt count from before, now incremented
    // by the regression -- reconnectAttempts is not reset until
    // stabilization completes.
    assert_eq!(machine.context().metrics.reconnect_attempts, 2);
}

/// Scenario 5: queue overflow with priority eviction while reconnecting.
#[test]
fn queue_overflow_evicts_lowest_priority() {
    let clock = Arc::new(TestClock::new());
    let config = Config::builder()
        .max_queue_size(2)
        .connect_timeout(Duration::from_millis(100_000))
        .build()
        .unwrap();
    let mut machine = Machine::new(config, clock.clone(), rng());

    connect(&mut machine, &clock);
    machine
        .submit(Envelope::new(Event::error("boom").unwrap(), clock.now()))
        .unwrap();
    assert_eq!(machine.state(), MachineState::Reconnecting);

    for priority in [Priority::Normal, Priority::Normal, Priority::High] {
        machine
            .submit(Envelope::new(
                Event::Send {
                    data: vec![1],
                    id: None,
                    priority,
                    timeout: None,
                },
                clock.now(),
            ))
            .unwrap();
    }
    assert_eq!(machine.context().queue.len(), 2);
}

/// Scenario 6: a non-recoverable close code terminates immediately with no
/// retry scheduled.
#[test]
fn non_recoverable_close_terminates_without_retry() {
    let clock = Arc::new(TestClock::new());
    let mut machine = Machine::new(
        Config::default(),
        clock.clone(),
        rng(),
    );

    connect(&mut machine, &clock);
    machine.submit(Envelope::new(Event::Open, clock.now())).unwrap();

    let outcome = machine
        .submit(Envelope::new(
            Event::Close {
                code: 1008,
                reason: String::from("policy violation"),
                was_clean: false,
            },
            clock.now(),
        ))
        .unwrap();
    assert_eq!(outcome.new_state, MachineState::Terminated);
    assert_eq!(
        machine.context().terminal_cause,
        Some(reconnecting_ws::TerminalCause::NonRecoverableClose(1008))
    );
}

/// A supervisor-level smoke test: the transport's scripted `Open` drives
/// the machine into `connected` the same way a real socket would.
#[test(async_std::test)]
async fn supervisor_drives_machine_from_mock_transport_events() {
    use reconnecting_ws::client::Client;

    let clock: Arc<dyn Clock> = Arc::new(TestClock::new());

    let client = Client::spawn_with_clock(Config::default(), clock, move || {
        Box::new(MockTransport::new())
    });

    client.connect(url(), vec![]).await.unwrap();
    let event = client.next_event().await;
    assert!(matches!(
        event,
        Some(reconnecting_ws::client::ClientEvent::StateChanged {
            to: MachineState::Connecting,
            ..
        })
    ));
    let event = client.next_event().await;
    assert!(matches!(
        event,
        Some(reconnecting_ws::client::ClientEvent::StateChanged {
            to: MachineState::Connected,
            ..
        })
    ));
    client.terminate().await.unwrap();
}
