// http.rs: reqwest-backed RemoteClient.
//
// Every request is authenticated by appending the session's access token
// to the parameters. GET/DELETE send parameters in the query string,
// POST/PATCH send them form-encoded. A 401 signs the session out before the
// error is returned, so every layer above sees the same "unknown user"
// state no matter which request tripped it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::client::{Method, Params, RemoteClient};
use crate::error::RemoteError;
use crate::session::Session;

const USERNAME_PLACEHOLDER: &str = "{username}";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP implementation of [`RemoteClient`].
pub struct HttpRemoteClient {
    http: reqwest::Client,
    base_url: String,
    session: Arc<Session>,
}

impl HttpRemoteClient {
    pub fn new(base_url: impl Into<String>, session: Arc<Session>) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

/// Join the base URL and a relative path, filling in `{username}`.
fn resolve_url(base_url: &str, path: &str, username: Option<&str>) -> Result<String, RemoteError> {
    let path = path.trim_start_matches('/');
    let path = if path.contains(USERNAME_PLACEHOLDER) {
        let username = username.ok_or(RemoteError::NotSignedIn)?;
        path.replace(USERNAME_PLACEHOLDER, username)
    } else {
        path.to_string()
    };
    Ok(format!("{}/{}", base_url, path))
}

/// Pull the server's human-readable `error_message` out of an error body.
fn server_error_message(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    value
        .get("error_message")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn decode_body(body: &[u8]) -> Result<Value, RemoteError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| RemoteError::Decode(e.to_string()))
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn request(
        &self,
        path: &str,
        method: Method,
        mut params: Params,
    ) -> Result<Value, RemoteError> {
        let credentials = self.session.credentials();
        let url = resolve_url(
            &self.base_url,
            path,
            credentials.as_ref().map(|c| c.username.as_str()),
        )?;
        if let Some(credentials) = &credentials {
            params.insert("access_token".to_string(), credentials.access_token.clone());
        }

        tracing::debug!("{} {}", method, url);
        let builder = match method {
            Method::Get => self.http.get(&url).query(&params),
            Method::Delete => self.http.delete(&url).query(&params),
            Method::Post => self.http.post(&url).form(&params),
            Method::Put => self.http.patch(&url).form(&params),
        };

        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if status == reqwest::StatusCode::UNAUTHORIZED {
            tracing::warn!("{} {} returned 401, signing out", method, path);
            self.session.sign_out();
            return Err(RemoteError::Unauthorized);
        }

        if !status.is_success() {
            let message = server_error_message(&body)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());
            tracing::error!("error issuing request {}: {} {}", path, status.as_u16(), message);
            return Err(RemoteError::Server {
                status: status.as_u16(),
                message,
            });
        }

        decode_body(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Credentials, SessionEvent};

    #[test]
    fn resolve_url_fills_username() {
        let url = resolve_url(
            "https://example.com",
            "/api/v1/users/{username}/goals.json",
            Some("alice"),
        )
        .unwrap();
        assert_eq!(url, "https://example.com/api/v1/users/alice/goals.json");
    }

    #[test]
    fn resolve_url_without_placeholder_needs_no_user() {
        let url = resolve_url("https://example.com", "api/v1/ping.json", None).unwrap();
        assert_eq!(url, "https://example.com/api/v1/ping.json");
    }

    #[test]
    fn resolve_url_placeholder_requires_session() {
        let err = resolve_url("https://example.com", "api/v1/users/{username}.json", None)
            .unwrap_err();
        assert_eq!(err, RemoteError::NotSignedIn);
    }

    #[test]
    fn extracts_server_error_message() {
        let body = br#"{"error_message": "Goal not found"}"#;
        assert_eq!(server_error_message(body).as_deref(), Some("Goal not found"));
        assert_eq!(server_error_message(b"<html>oops</html>"), None);
    }

    #[test]
    fn empty_body_decodes_to_null() {
        assert_eq!(decode_body(b"").unwrap(), Value::Null);
        assert_eq!(decode_body(b"  \n").unwrap(), Value::Null);
        assert!(matches!(decode_body(b"{nope"), Err(RemoteError::Decode(_))));
    }

    /// Serve one canned HTTP response on a local port; return the base URL.
    async fn serve_once(response: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let _ = stream.read(&mut buf).await.unwrap();
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.flush().await.unwrap();
        });
        format!("http://127.0.0.1:{port}")
    }

    #[tokio::test]
    async fn unauthorized_response_signs_session_out() {
        let base_url = serve_once(
            "HTTP/1.1 401 Unauthorized\r\n\
             Content-Type: application/json\r\n\
             Content-Length: 2\r\n\
             Connection: close\r\n\r\n\
             {}",
        )
        .await;
        let session = Arc::new(Session::signed_in(Credentials::new("alice", "expired")));
        let mut events = session.subscribe();
        let client = HttpRemoteClient::new(base_url, Arc::clone(&session)).unwrap();

        let err = client
            .request("api/v1/users/{username}/goals.json", Method::Get, Params::new())
            .await
            .unwrap_err();

        assert!(err.is_unauthorized());
        assert!(!session.is_signed_in());
        assert_eq!(events.try_recv().unwrap(), SessionEvent::SignedOut);
    }

    #[tokio::test]
    async fn server_error_keeps_session() {
        let base_url = serve_once(
            "HTTP/1.1 422 Unprocessable Entity\r\n\
             Content-Type: application/json\r\n\
             Content-Length: 35\r\n\
             Connection: close\r\n\r\n\
             {\"error_message\": \"Goal not found\"}",
        )
        .await;
        let session = Arc::new(Session::signed_in(Credentials::new("alice", "tok")));
        let client = HttpRemoteClient::new(base_url, Arc::clone(&session)).unwrap();

        let err = client
            .request("api/v1/users/{username}/goals/nope.json", Method::Get, Params::new())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            RemoteError::Server {
                status: 422,
                message: "Goal not found".into()
            }
        );
        assert!(session.is_signed_in());
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client =
            HttpRemoteClient::new("https://example.com/", Arc::new(Session::new())).unwrap();
        assert_eq!(client.base_url, "https://example.com");
    }
}
