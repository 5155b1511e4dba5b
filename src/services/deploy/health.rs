//! 部署后健康检查
//!
//! 轮询服务公网 URL 的健康端点，直到返回 200 或超时。
//! 部署完成的服务会把 /health 代理到内部的 MXCP server

use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// 健康检查错误
#[derive(Debug, Error)]
pub enum HealthError {
    #[error("health check at {url} did not return 200 within {timeout_secs}s (last result: {last})")]
    Unhealthy {
        url: String,
        timeout_secs: u64,
        last: String,
    },

    #[error("health check cancelled")]
    Cancelled,
}

/// 健康检查客户端
#[derive(Clone)]
pub struct HealthChecker {
    client: Client,
}

impl HealthChecker {
    /// 创建客户端
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(1)
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }

    /// 轮询健康端点直到 200
    ///
    /// 请求错误和非 200 响应都视为"还没就绪"继续轮询；
    /// 超时后带上最后一次结果报错
    pub async fn wait_healthy(
        &self,
        service_url: &str,
        path: &str,
        timeout: Duration,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), HealthError> {
        let url = health_url(service_url, path);
        let deadline = tokio::time::Instant::now() + timeout;
        let mut last = "not probed yet".to_string();

        loop {
            match self.client.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    info!(%url, "service is healthy");
                    return Ok(());
                }
                Ok(response) => {
                    last = format!("HTTP {}", response.status().as_u16());
                }
                Err(e) => {
                    last = e.to_string();
                }
            }
            debug!(%url, %last, "service not healthy yet");

            if tokio::time::Instant::now() + interval >= deadline {
                return Err(HealthError::Unhealthy {
                    url,
                    timeout_secs: timeout.as_secs(),
                    last,
                });
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(HealthError::Cancelled),
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

/// 拼接健康检查 URL
///
/// App Runner 返回的 ServiceUrl 不带 scheme，默认补 https
fn health_url(service_url: &str, path: &str) -> String {
    let base = service_url.trim_end_matches('/');
    let base = if base.starts_with("http://") || base.starts_with("https://") {
        base.to_string()
    } else {
        format!("https://{}", base)
    };
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_url_adds_scheme() {
        assert_eq!(
            health_url("demo.awsapprunner.com", "/health"),
            "https://demo.awsapprunner.com/health"
        );
    }

    #[test]
    fn test_health_url_keeps_explicit_scheme() {
        assert_eq!(
            health_url("http://localhost:8000/", "health"),
            "http://localhost:8000/health"
        );
    }
}
