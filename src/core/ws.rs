//! WebSocket connection helpers shared by streaming providers.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::errors::{ProviderError, ProviderResult};

pub type ProviderSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Build a client handshake request carrying provider auth headers.
pub fn websocket_request(
    url: &Url,
    headers: &[(&str, String)],
) -> ProviderResult<http::Request<()>> {
    let host = url
        .host_str()
        .ok_or_else(|| ProviderError::InvalidConfiguration(format!("URL has no host: {url}")))?;
    let host = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let mut builder = http::Request::builder()
        .method("GET")
        .uri(url.as_str())
        .header("Host", host)
        .header("Upgrade", "websocket")
        .header("Connection", "Upgrade")
        .header("Sec-WebSocket-Key", generate_key())
        .header("Sec-WebSocket-Version", "13");
    for (name, value) in headers {
        builder = builder.header(*name, value.as_str());
    }
    builder
        .body(())
        .map_err(|e| ProviderError::ConnectionFailed(e.to_string()))
}

/// Open a WebSocket, failing with `Timeout` if the handshake takes longer
/// than `timeout`.
pub async fn connect_websocket(
    request: http::Request<()>,
    timeout: Duration,
) -> ProviderResult<ProviderSocket> {
    let (stream, _response) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request))
        .await
        .map_err(|_| ProviderError::Timeout(format!("WebSocket handshake exceeded {timeout:?}")))??;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_headers() {
        let url = Url::parse("wss://api.example.com/v1/listen?model=x").unwrap();
        let request =
            websocket_request(&url, &[("Authorization", "Token abc".to_string())]).unwrap();
        assert_eq!(request.headers()["Host"], "api.example.com");
        assert_eq!(request.headers()["Authorization"], "Token abc");
        assert_eq!(request.uri().query(), Some("model=x"));
    }

    #[test]
    fn test_host_keeps_explicit_port() {
        let url = Url::parse("ws://127.0.0.1:9001/ws").unwrap();
        let request = websocket_request(&url, &[]).unwrap();
        assert_eq!(request.headers()["Host"], "127.0.0.1:9001");
    }
}
