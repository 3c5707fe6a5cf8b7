//! WireMock server utilities for HTTP store testing

use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Mock counter store that accepts every increment.
///
/// # Example
/// ```rust
/// let mock_server = setup_counter_server().await;
/// // Use mock_server.uri() as the store URL
/// ```
pub async fn setup_counter_server() -> MockServer {
    setup_counter_server_with_status(204).await
}

/// Mock counter store answering every increment with `status`.
pub async fn setup_counter_server_with_status(status: u16) -> MockServer {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path_regex(r"^/counters/[^/]+/increment$"))
        .respond_with(ResponseTemplate::new(status))
        .mount(&mock_server)
        .await;

    mock_server
}
