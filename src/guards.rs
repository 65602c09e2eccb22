//! Pure predicates over `(state, event, context)`.
//!
//! No I/O, no suspension: every guard here is a plain `fn` returning `bool`,
//! the kind of condition that would otherwise live inline as a `match` arm's
//! leading check, pulled out into a named, independently testable unit.

use url::Url;

use crate::config::Config;
use crate::context::Context;
use crate::machine::MachineState;

/// `canConnect`: state is {disconnected, reconnecting} and the url is valid.
pub fn can_connect(state: MachineState, url: &Url) -> bool {
    matches!(state, MachineState::Disconnected | MachineState::Reconnecting) && has_valid_url(url)
}

/// `hasValidUrl`: scheme is `ws` or `wss`.
pub fn has_valid_url(url: &Url) -> bool {
    matches!(url.scheme(), "ws" | "wss")
}

/// `canRetry`: `reconnectAttempts < MAX_RETRIES`.
pub fn can_retry(ctx: &Context, config: &Config) -> bool {
    ctx.metrics.reconnect_attempts < config.max_retries
}

/// `canSend`: connected, not currently rate-limited, and payload within
/// `MAX_BYTES_PER_MESSAGE`. Rate-limiting itself is evaluated separately
/// (enforceRateLimit mutates the window, so it isn't a pure predicate);
/// this guard only covers the size precondition.
pub fn payload_within_limit(size: usize, config: &Config) -> bool {
    size <= config.max_bytes_per_message
}

#[cfg(test)]
mod test {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn valid_url_schemes() {
        assert!(has_valid_url(&url("ws://example.test/socket")));
        assert!(has_valid_url(&url("wss://example.test/socket")));
        assert!(!has_valid_url(&url("http://example.test/socket")));
    }

    #[test]
    fn can_connect_requires_right_state_and_url() {
        assert!(can_connect(
            MachineState::Disconnected,
            &url("wss://x/y")
        ));
        assert!(can_connect(
            MachineState::Reconnecting,
            &url("ws://x/y")
        ));
        assert!(!can_connect(MachineState::Connected, &url("wss://x/y")));
        assert!(!can_connect(
            MachineState::Disconnected,
            &url("http://x/y")
        ));
    }

    #[test]
    fn can_retry_respects_max_retries() {
        let config = Config::default();
        let mut ctx = Context::new(config.max_queue_size);
        assert!(can_retry(&ctx, &config));
        ctx.metrics.reconnect_attempts = config.max_retries;
        assert!(!can_retry(&ctx, &config));
    }

    #[test]
    fn payload_within_limit_checks_size() {
        let config = Config::default();
        assert!(payload_within_limit(config.max_bytes_per_message, &config));
        assert!(!payload_within_limit(
            config.max_bytes_per_message + 1,
            &config
        ));
    }
}
