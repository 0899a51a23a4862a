//! Shared HTTP client construction for consistent timeout configuration.

use std::time::Duration;

/// Create the HTTP client used for embedding calls.
///
/// Config: 10s connect timeout, `request_timeout` per request,
/// `repolens/{version}` user-agent, redirect limit 10.
#[must_use]
pub fn default_client(request_timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(request_timeout)
        .user_agent(concat!("repolens/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .expect("default HTTP client construction must not fail")
}
