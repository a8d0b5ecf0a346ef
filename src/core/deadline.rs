//! Per-operation deadlines
//!
//! A deadline is armed once and then bounds every read and write issued until
//! the next one is armed, the same way a socket deadline would.

use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::time::Instant;

/// Deadline `secs` seconds from now, `None` when `secs` is 0
pub fn deadline_after(secs: u64) -> Option<Instant> {
    (secs != 0).then(|| Instant::now() + Duration::from_secs(secs))
}

/// Run `fut` until `deadline`, failing with `TimedOut` when it passes
pub async fn with_deadline<F, T>(deadline: Option<Instant>, fut: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "deadline exceeded"))?,
        None => fut.await,
    }
}

/// Keep reading and discarding until the peer closes, errors, or the deadline
/// passes
///
/// Used instead of an error reply so a failed handshake looks like a stalled
/// connection from the outside.
pub async fn drain_until_error<R>(reader: &mut R, deadline: Option<Instant>)
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut sink = tokio::io::sink();
    let _ = with_deadline(deadline, tokio::io::copy(reader, &mut sink)).await;
}
