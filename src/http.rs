use std::time::Duration;

use ureq::Agent;

/// User-Agent sent to every service.
pub const USER_AGENT: &str = concat!("ratingrelay/", env!("CARGO_PKG_VERSION"));

/// Shared HTTP agent. Status codes are returned as responses rather than
/// errors so each service can read its own error payloads.
pub fn agent(timeout: Duration) -> Agent {
    let config = Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build();
    config.into()
}
