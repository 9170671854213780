/// Connect helpers for reaching a listening debug adapter on loopback.
use crate::{Error, Result};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Single connect attempt with a hard deadline (attach-only mode).
pub async fn connect_once(port: u16, timeout: Duration) -> Result<TcpStream> {
    debug!("Connecting to 127.0.0.1:{} (deadline: {:?})", port, timeout);

    match tokio::time::timeout(timeout, TcpStream::connect(("127.0.0.1", port))).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(Error::Transport(format!(
            "failed to connect to port {port}: {e}"
        ))),
        Err(_) => Err(Error::Timeout(format!(
            "connect to port {port} timed out after {timeout:?}"
        ))),
    }
}

/// Poll the port after spawning the adapter: 1-second connect attempts
/// spaced 500 ms apart until the overall budget elapses.
pub async fn connect_with_retry(port: u16, budget: Duration) -> Result<TcpStream> {
    let start = std::time::Instant::now();
    let attempt_timeout = Duration::from_secs(1);
    let retry_interval = Duration::from_millis(500);

    info!("Connecting to 127.0.0.1:{} (budget: {:?})", port, budget);

    loop {
        match tokio::time::timeout(attempt_timeout, TcpStream::connect(("127.0.0.1", port))).await
        {
            Ok(Ok(stream)) => {
                info!(
                    "Connected to 127.0.0.1:{} after {:?}",
                    port,
                    start.elapsed()
                );
                return Ok(stream);
            }
            Ok(Err(e)) => {
                if start.elapsed() >= budget {
                    return Err(Error::Transport(format!(
                        "failed to connect to port {port} within {budget:?}: {e}"
                    )));
                }
            }
            Err(_) => {
                if start.elapsed() >= budget {
                    return Err(Error::Timeout(format!(
                        "connect to port {port} timed out after {budget:?}"
                    )));
                }
            }
        }
        tokio::time::sleep(retry_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_once_success() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let result = connect_once(port, Duration::from_secs(2)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_connect_once_refused() {
        // Bind then drop to get a port nothing is listening on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = connect_once(port, Duration::from_secs(2)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_connect_with_retry_eventual_success() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
            let _ = listener.accept().await;
        });

        let result = connect_with_retry(port, Duration::from_secs(5)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_connect_with_retry_budget_exhausted() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = connect_with_retry(port, Duration::from_millis(600)).await;
        assert!(result.is_err());
    }
}
