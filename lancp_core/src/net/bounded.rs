//! Deadline wrapper for blocking network actions.
//!
//! Every accept, dial and read in a run goes through [`BoundedOperation`].
//! The action runs on its own tokio task and is raced against a timer. If the
//! timer wins, the task is detached rather than aborted, so the action must
//! own everything it opens and clean it up on its own failure path.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::sleep;

use crate::error::LancpError;

/// How long a dial keeps retrying a refused connection while the peer moves
/// from one listener to the next.
pub const DIAL_GRACE: Duration = Duration::from_secs(3);
const DIAL_RETRY_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy)]
pub struct BoundedOperation {
    action: &'static str,
    deadline: Duration,
}

impl BoundedOperation {
    /// `action` completes the sentence "timed out waiting to ...".
    pub fn new(action: &'static str, deadline: Duration) -> Self {
        Self { action, deadline }
    }

    pub async fn run<T, F>(&self, action: F) -> Result<T, LancpError>
    where
        F: Future<Output = Result<T, LancpError>> + Send + 'static,
        T: Send + 'static,
    {
        let mut handle = tokio::spawn(action);

        tokio::select! {
            joined = &mut handle => match joined {
                Ok(result) => result,
                Err(e) => Err(LancpError::Task {
                    action: self.action,
                    message: e.to_string(),
                }),
            },
            _ = sleep(self.deadline) => {
                tracing::debug!(
                    "Gave up after {:?} waiting to {}",
                    self.deadline,
                    self.action
                );
                Err(LancpError::Timeout {
                    action: self.action,
                    waited: self.deadline,
                })
            }
        }
    }
}

/// Open a TCP connection, retrying refusals for up to [`DIAL_GRACE`].
///
/// Meant to be used inside a [`BoundedOperation`]; the grace window is what
/// turns a late listener into success and a missing one into `Connect`.
pub async fn dial_tcp(addr: SocketAddr) -> Result<TcpStream, LancpError> {
    let started = tokio::time::Instant::now();
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e)
                if e.kind() == std::io::ErrorKind::ConnectionRefused
                    && started.elapsed() < DIAL_GRACE =>
            {
                sleep(DIAL_RETRY_INTERVAL).await;
            }
            Err(source) => return Err(LancpError::Connect { addr, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_result_wins_before_deadline() {
        let op = BoundedOperation::new("add numbers", Duration::from_secs(5));
        let got = op.run(async { Ok::<_, LancpError>(2 + 2) }).await.unwrap();
        assert_eq!(got, 4);
    }

    #[tokio::test]
    async fn test_deadline_wins_over_slow_action() {
        let op = BoundedOperation::new("wait forever", Duration::from_millis(50));
        let err = op
            .run(async {
                sleep(Duration::from_secs(30)).await;
                Ok::<_, LancpError>(())
            })
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_action_error_is_returned_as_is() {
        let op = BoundedOperation::new("fail", Duration::from_secs(5));
        let err = op
            .run(async { Err::<(), _>(LancpError::Frame("bad".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, LancpError::Frame(_)));
    }

    #[tokio::test]
    async fn test_panicking_action_is_reported() {
        let op = BoundedOperation::new("panic", Duration::from_secs(5));
        let err = op
            .run(async {
                if true {
                    panic!("boom");
                }
                Ok::<(), LancpError>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LancpError::Task { action: "panic", .. }));
    }

    #[tokio::test]
    async fn test_dial_refused_after_grace() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = dial_tcp(addr).await.unwrap_err();
        assert!(matches!(err, LancpError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_dial_waits_for_late_listener() {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        let server = tokio::spawn(async move {
            sleep(Duration::from_millis(300)).await;
            let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
            listener.accept().await.unwrap();
        });

        let stream = dial_tcp(addr).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap(), addr);
        server.await.unwrap();
    }
}
