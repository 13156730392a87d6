//! TCP readiness polling
//!
//! Repeatedly attempts a short TCP connect until the port accepts or the
//! overall budget runs out. The only side effect is the connect attempts
//! themselves; the stream is dropped as soon as it is established.

use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::config::ReadinessConfig;
use crate::metrics;

/// Wait until `host:port` accepts TCP connections, using default intervals
///
/// Returns `true` as soon as one connect succeeds and `false` once `timeout`
/// has elapsed without success. Never fails: invalid input yields `false`.
pub async fn wait_for_service(host: &str, port: u16, timeout: Duration) -> bool {
    wait_for_service_with(host, port, timeout, &ReadinessConfig::default()).await
}

/// Same as [`wait_for_service`] with tunable attempt and retry intervals
pub async fn wait_for_service_with(
    host: &str,
    port: u16,
    timeout: Duration,
    config: &ReadinessConfig,
) -> bool {
    if host.trim().is_empty() || port == 0 {
        debug!(host = %host, port = port, "Invalid readiness target");
        return false;
    }

    let started = Instant::now();
    let attempt_timeout = config.attempt_timeout().max(Duration::from_millis(1));
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        let remaining = timeout.saturating_sub(started.elapsed());
        let budget = attempt_timeout.min(remaining.max(Duration::from_millis(1)));

        match tokio::time::timeout(budget, TcpStream::connect((host, port))).await {
            Ok(Ok(_stream)) => {
                let waited = started.elapsed();
                metrics::metrics().record_readiness_wait(waited, true);
                info!(
                    host = %host,
                    port = port,
                    attempts = attempts,
                    waited_ms = waited.as_millis() as u64,
                    "Service is reachable"
                );
                return true;
            }
            Ok(Err(e)) => {
                debug!(host = %host, port = port, error = %e, "Connect attempt failed");
            }
            Err(_) => {
                debug!(host = %host, port = port, "Connect attempt timed out");
            }
        }

        let remaining = timeout.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            break;
        }
        tokio::time::sleep(config.retry_interval().min(remaining)).await;
        if started.elapsed() >= timeout {
            break;
        }
    }

    metrics::metrics().record_readiness_wait(started.elapsed(), false);
    info!(
        host = %host,
        port = port,
        attempts = attempts,
        timeout_ms = timeout.as_millis() as u64,
        "Service did not become reachable"
    );
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn fast() -> ReadinessConfig {
        ReadinessConfig {
            timeout_ms: 1_000,
            attempt_timeout_ms: 100,
            retry_interval_ms: 50,
        }
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    #[tokio::test]
    async fn test_reachable_returns_promptly() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let started = Instant::now();
        assert!(wait_for_service("127.0.0.1", port, Duration::from_secs(5)).await);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_unreachable_returns_false_after_timeout() {
        let port = closed_port().await;
        let timeout = Duration::from_millis(400);

        let started = Instant::now();
        assert!(!wait_for_service_with("127.0.0.1", port, timeout, &fast()).await);
        let elapsed = started.elapsed();
        assert!(elapsed >= timeout, "returned early: {:?}", elapsed);
        assert!(elapsed < timeout + Duration::from_secs(1), "overran: {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_becomes_reachable_while_waiting() {
        let port = closed_port().await;

        let bind = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            TcpListener::bind(("127.0.0.1", port)).await
        });

        let ready = wait_for_service_with("127.0.0.1", port, Duration::from_secs(3), &fast()).await;
        // The port may have been grabbed by another process in between
        if bind.await.unwrap().is_ok() {
            assert!(ready);
        }
    }

    #[tokio::test]
    async fn test_invalid_input_returns_false() {
        assert!(!wait_for_service("", 5432, Duration::from_millis(100)).await);
        assert!(!wait_for_service("127.0.0.1", 0, Duration::from_millis(100)).await);
    }
}
