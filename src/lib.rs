//! A reconnecting WebSocket client built around an explicit state machine
//! with six connection states, a mutable context record, and a supervisor
//! task that drives it against a real transport.
//!
//! [`machine::Machine`] is the pure core: it owns no I/O and advances only
//! in response to [`event::Envelope`]s submitted through [`machine::Machine::submit`].
//! [`supervisor::Supervisor`] drives one `Machine` against a real or mock
//! [`transport::Transport`], turning timers, inbound frames and application
//! commands into envelopes. [`client::Client`] is the handle applications
//! hold: it spawns the supervisor onto an `async-std` task and exchanges
//! [`supervisor::Command`]s and [`client::ClientEvent`]s with it over
//! `async-channel` channels.

#![forbid(unsafe_code)]

pub mod actions;
pub mod client;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod guards;
pub mod machine;
pub mod queue;
pub mod rate_limiter;
pub mod recovery;
pub mod supervisor;
pub mod transport;

pub use client::{Client, ClientEvent};
pub use config::Config;
pub use error::{ErrorKind, TerminalCause, WsClientError};
pub use machine::MachineState;
