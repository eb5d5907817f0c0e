//! Command/response correlation.
//!
//! At most one request is in flight per connection. [`Correlator::exchange`]
//! holds an async gate for the whole send-and-wait, registers the response
//! key of the outgoing command, and waits on a oneshot that the dispatcher
//! completes from [`Correlator::offer`] when a frame with the same key
//! arrives. Frames that nobody is waiting for are handed back to the caller
//! of `offer`.

use std::future::Future;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};

use crate::error::{Result, RfidError};
use crate::protocol::Frame;

struct Pending {
    key: u16,
    tx: oneshot::Sender<Frame>,
}

/// Matches replies to the single outstanding request.
#[derive(Default)]
pub struct Correlator {
    /// Serializes exchanges.
    gate: Mutex<()>,
    pending: Mutex<Option<Pending>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `send`, then wait up to `timeout` for a frame whose response key
    /// equals `key`.
    ///
    /// Concurrent callers queue on the gate; the timeout only starts once the
    /// caller's own command has been written.
    pub async fn exchange<F>(&self, key: u16, send: F, timeout: Duration) -> Result<Frame>
    where
        F: Future<Output = Result<()>>,
    {
        let _gate = self.gate.lock().await;

        let (tx, rx) = oneshot::channel();
        *self.pending.lock().await = Some(Pending { key, tx });

        if let Err(e) = send.await {
            self.pending.lock().await.take();
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(frame)) => Ok(frame),
            // Sender dropped by cancel_all.
            Ok(Err(_)) => Err(RfidError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().await.take();
                tracing::warn!(key = %format!("0x{key:04X}"), waited = ?timeout, "No response before timeout");
                Err(RfidError::Timeout { waited: timeout })
            }
        }
    }

    /// Hand an inbound frame to the waiting request if its key matches.
    ///
    /// Returns the frame when it was not claimed.
    pub async fn offer(&self, key: Option<u16>, frame: Frame) -> Option<Frame> {
        let mut pending = self.pending.lock().await;
        let expected = match pending.as_ref() {
            Some(p) => p.key,
            None => return Some(frame),
        };

        if key != Some(expected) {
            tracing::warn!(
                expected = %format!("0x{expected:04X}"),
                received = ?key,
                "Frame does not answer the pending request"
            );
            return Some(frame);
        }

        let waiter = pending.take()?;
        match waiter.tx.send(frame) {
            Ok(()) => None,
            // Requester gave up between timeout and now.
            Err(frame) => Some(frame),
        }
    }

    /// Fail the outstanding request, if any, with `ConnectionClosed`.
    pub async fn cancel_all(&self) {
        if self.pending.lock().await.take().is_some() {
            tracing::debug!("Cancelled pending request");
        }
    }

    #[cfg(test)]
    pub async fn is_pending(&self) -> bool {
        self.pending.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::protocol::{vmr64, ReaderModel};

    fn reply(cmd: u8, payload: &[u8]) -> Frame {
        let raw = vmr64::build_command(vmr64::READER_ADDRESS, cmd, payload).unwrap();
        Frame::from_slice(ReaderModel::Vmr64, &raw)
    }

    async fn wait_until_pending(correlator: &Correlator) {
        while !correlator.is_pending().await {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_matching_reply_completes_exchange() {
        let correlator = Arc::new(Correlator::new());

        let c = correlator.clone();
        let task = tokio::spawn(async move {
            c.exchange(vmr64::cmd::PWR_GET as u16, async { Ok(()) }, Duration::from_secs(1))
                .await
        });

        wait_until_pending(&correlator).await;
        let frame = reply(vmr64::cmd::PWR_GET, &[30]);
        assert!(correlator.offer(Some(vmr64::cmd::PWR_GET as u16), frame.clone()).await.is_none());

        assert_eq!(task.await.unwrap().unwrap(), frame);
        assert!(!correlator.is_pending().await);
    }

    #[tokio::test]
    async fn test_unmatched_frame_is_returned() {
        let correlator = Arc::new(Correlator::new());
        let frame = reply(vmr64::cmd::BEEPER, &[0x10]);

        // Nothing pending.
        assert_eq!(correlator.offer(Some(0x7A), frame.clone()).await, Some(frame.clone()));

        let c = correlator.clone();
        let task = tokio::spawn(async move {
            c.exchange(vmr64::cmd::PWR_GET as u16, async { Ok(()) }, Duration::from_secs(1))
                .await
        });
        wait_until_pending(&correlator).await;

        // Different key: the request keeps waiting.
        assert_eq!(correlator.offer(Some(0x7A), frame.clone()).await, Some(frame));
        assert!(correlator.is_pending().await);

        correlator.cancel_all().await;
        assert!(matches!(task.await.unwrap(), Err(RfidError::ConnectionClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_without_reply() {
        let correlator = Correlator::new();
        let started = tokio::time::Instant::now();

        let result = correlator
            .exchange(0x77, async { Ok(()) }, Duration::from_millis(2000))
            .await;

        assert!(matches!(result, Err(RfidError::Timeout { waited }) if waited == Duration::from_millis(2000)));
        assert!(started.elapsed() >= Duration::from_millis(2000));
        assert!(started.elapsed() < Duration::from_millis(2100));
        assert!(!correlator.is_pending().await);
    }

    #[tokio::test]
    async fn test_send_failure_clears_pending() {
        let correlator = Correlator::new();

        let result = correlator
            .exchange(0x77, async { Err(RfidError::ConnectionClosed) }, Duration::from_secs(1))
            .await;

        assert!(matches!(result, Err(RfidError::ConnectionClosed)));
        assert!(!correlator.is_pending().await);
    }

    #[tokio::test]
    async fn test_exchanges_are_serialized() {
        let correlator = Arc::new(Correlator::new());

        let first = {
            let c = correlator.clone();
            tokio::spawn(async move { c.exchange(0x01, async { Ok(()) }, Duration::from_secs(5)).await })
        };
        wait_until_pending(&correlator).await;

        let second = {
            let c = correlator.clone();
            tokio::spawn(async move { c.exchange(0x02, async { Ok(()) }, Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;

        // The second request has not registered; only key 0x01 is accepted.
        let second_reply = reply(0x02, &[]);
        assert!(correlator.offer(Some(0x02), second_reply.clone()).await.is_some());
        assert!(correlator.offer(Some(0x01), reply(0x01, &[])).await.is_none());
        first.await.unwrap().unwrap();

        wait_until_pending(&correlator).await;
        assert!(correlator.offer(Some(0x02), second_reply).await.is_none());
        second.await.unwrap().unwrap();
    }
}
