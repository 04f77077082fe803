//! Deadline races for network round-trips
//!
//! [`with_timeout`] races a future against a tokio sleep. The race is biased
//! towards the operation: when both are ready in the same poll the operation
//! wins. Once either branch completes the other one is dropped on the spot,
//! which for the sleep means the timer is cancelled before the caller's
//! continuation runs.
//!
//! For operations that complete through an adapter event rather than through
//! the future itself, the deadline is paired with the take-once completion
//! slot in [`pending`](crate::pending), so a late event after a timeout (or a
//! late timeout after an event) is a no-op.
//!
//! ```rust
//! # use rvoip_softphone_core::timeout::{with_timeout, TimeoutKind};
//! # use rvoip_softphone_core::ClientResult;
//! # use std::time::Duration;
//! # #[tokio::main]
//! # async fn main() {
//! let slow = async {
//!     tokio::time::sleep(Duration::from_secs(60)).await;
//!     ClientResult::Ok(())
//! };
//! let err = with_timeout("connect", Duration::from_millis(10), TimeoutKind::Connect, slow)
//!     .await
//!     .unwrap_err();
//! assert!(err.is_timeout());
//! # }
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use crate::error::{ClientError, ClientResult};

/// Which timeout error a deadline produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Connect,
    Register,
    Unregister,
    Disconnect,
    Request,
}

impl TimeoutKind {
    /// Build the matching error
    pub fn into_error(self, operation: &'static str, elapsed: Duration) -> ClientError {
        match self {
            TimeoutKind::Connect => ClientError::ConnectionTimeout { operation, elapsed },
            TimeoutKind::Register => ClientError::RegistrationTimeout { operation, elapsed },
            TimeoutKind::Unregister => ClientError::UnregistrationTimeout { operation, elapsed },
            TimeoutKind::Disconnect => ClientError::DisconnectTimeout { operation, elapsed },
            TimeoutKind::Request => ClientError::RequestTimeout { operation, elapsed },
        }
    }
}

/// Race `future` against `deadline`
pub async fn with_timeout<T, F>(
    operation: &'static str,
    deadline: Duration,
    kind: TimeoutKind,
    future: F,
) -> ClientResult<T>
where
    F: Future<Output = ClientResult<T>>,
{
    let started = Instant::now();
    let sleep = tokio::time::sleep(deadline);
    tokio::pin!(future);
    tokio::pin!(sleep);

    tokio::select! {
        biased;
        result = &mut future => result,
        _ = &mut sleep => {
            let elapsed = started.elapsed();
            warn!(
                operation,
                timeout_ms = deadline.as_millis() as u64,
                "Operation timed out"
            );
            Err(kind.into_error(operation, elapsed))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn operation_finishing_first_wins() {
        let result = with_timeout("register", Duration::from_secs(10), TimeoutKind::Register, async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(7)
        })
        .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_maps_to_typed_error() {
        let result: ClientResult<()> = with_timeout(
            "unregister",
            Duration::from_secs(1),
            TimeoutKind::Unregister,
            std::future::pending(),
        )
        .await;
        match result {
            Err(ClientError::UnregistrationTimeout { operation, elapsed }) => {
                assert_eq!(operation, "unregister");
                assert!(elapsed >= Duration::from_secs(1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ready_operation_beats_elapsed_deadline() {
        // Both branches are ready on the first poll.
        let result = with_timeout("connect", Duration::ZERO, TimeoutKind::Connect, async { Ok(()) }).await;
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_operation_is_dropped() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let _ = with_timeout("request", Duration::from_millis(50), TimeoutKind::Request, async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            flag.store(true, Ordering::SeqCst);
            ClientResult::Ok(())
        })
        .await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }
}
