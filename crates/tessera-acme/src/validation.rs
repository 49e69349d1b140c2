//! 挑战验证
//!
//! 只主动验证`http-01`：请求`http://<域名>/.well-known/acme-challenge/<令牌>`，
//! 响应体必须与密钥授权完全一致。请求有超时限制，超时与网络错误都按验证失败处理。

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::{
    error::{AcmeError, Result, ValidationFailure},
    types::{encoded_token, key_authorization, ChallengeType},
};

/// 取回挑战响应体
#[async_trait]
pub trait ChallengeFetcher: Send + Sync {
    async fn fetch(&self, host: &str, path: &str) -> std::result::Result<String, ValidationFailure>;
}

/// 基于`reqwest`的HTTP取回
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    port: u16,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|e| AcmeError::Malformed(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, port: 80 })
    }

    /// 使用非标准端口（测试环境）
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

#[async_trait]
impl ChallengeFetcher for HttpFetcher {
    async fn fetch(&self, host: &str, path: &str) -> std::result::Result<String, ValidationFailure> {
        let url = if self.port == 80 {
            format!("http://{host}{path}")
        } else {
            format!("http://{host}:{}{path}", self.port)
        };
        debug!(url = %url, "Fetching ACME challenge");
        let response = self.client.get(&url).send().await.map_err(network_failure)?;
        response.text().await.map_err(network_failure)
    }
}

fn network_failure(error: reqwest::Error) -> ValidationFailure {
    ValidationFailure::Network(error.to_string())
}

/// `http-01`挑战的请求路径
pub fn challenge_path(token: &str) -> String {
    format!("/.well-known/acme-challenge/{}", encoded_token(token))
}

/// 验证一个挑战；超过`timeout`视为失败
pub async fn validate(
    fetcher: &dyn ChallengeFetcher,
    kind: ChallengeType,
    host: &str,
    token: &str,
    thumbprint: &str,
    timeout: Duration,
) -> std::result::Result<(), ValidationFailure> {
    if kind != ChallengeType::Http01 {
        return Err(ValidationFailure::UnsupportedChallenge(kind));
    }
    let expected = key_authorization(token, thumbprint);
    let received = tokio::time::timeout(timeout, fetcher.fetch(host, &challenge_path(token)))
        .await
        .map_err(|_| ValidationFailure::Timeout(timeout))??;
    if received != expected {
        return Err(ValidationFailure::TokenMismatch { expected, received });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;

    /// 回答一次请求；`body`为`None`时接受连接但从不回答
    async fn serve_once(body: Option<String>) -> (u16, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buffer = vec![0u8; 4096];
            let read = socket.read(&mut buffer).await.unwrap();
            let request = String::from_utf8_lossy(&buffer[..read]).to_string();
            match body {
                Some(body) => {
                    let response = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    socket.write_all(response.as_bytes()).await.unwrap();
                }
                None => tokio::time::sleep(Duration::from_secs(5)).await,
            }
            request
        });
        (port, handle)
    }

    fn fetcher(port: u16) -> HttpFetcher {
        HttpFetcher::new(Duration::from_secs(5)).unwrap().with_port(port)
    }

    #[tokio::test]
    async fn test_matching_body_is_valid() {
        let (port, server) = serve_once(Some(key_authorization("tok", "thumb"))).await;
        let result = validate(
            &fetcher(port),
            ChallengeType::Http01,
            "127.0.0.1",
            "tok",
            "thumb",
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(result, Ok(()));
        let request = server.await.unwrap();
        assert!(request.starts_with("GET /.well-known/acme-challenge/dG9r HTTP/1.1"));
    }

    #[tokio::test]
    async fn test_mismatch_is_reported() {
        let (port, _server) = serve_once(Some("something else".to_string())).await;
        let result = validate(
            &fetcher(port),
            ChallengeType::Http01,
            "127.0.0.1",
            "tok",
            "thumb",
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(
            result,
            Err(ValidationFailure::TokenMismatch {
                expected: "dG9r.thumb".to_string(),
                received: "something else".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let (port, _server) = serve_once(None).await;
        let timeout = Duration::from_millis(200);
        let result = validate(
            &fetcher(port),
            ChallengeType::Http01,
            "127.0.0.1",
            "tok",
            "thumb",
            timeout,
        )
        .await;
        assert_eq!(result, Err(ValidationFailure::Timeout(timeout)));
    }

    #[tokio::test]
    async fn test_refused_connection_is_a_network_failure() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let result = validate(
            &fetcher(port),
            ChallengeType::Http01,
            "127.0.0.1",
            "tok",
            "thumb",
            Duration::from_secs(5),
        )
        .await;
        assert!(matches!(result, Err(ValidationFailure::Network(_))));
    }

    #[tokio::test]
    async fn test_other_challenge_types_are_unsupported() {
        let result = validate(
            &fetcher(1),
            ChallengeType::Dns01,
            "127.0.0.1",
            "tok",
            "thumb",
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(
            result,
            Err(ValidationFailure::UnsupportedChallenge(ChallengeType::Dns01))
        );
    }
}
