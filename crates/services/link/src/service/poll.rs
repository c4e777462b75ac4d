use super::{
    Inner,
    LinkEvent,
};
use crate::ports::Sender;
use btp_relay_types::RelayId;
use std::sync::Arc;
use tokio::time::Instant;

/// Polls the destination for the outcome of the `attempt` of the relay
/// message `id`, and reports it to the link.
///
/// Polling stops once the attempt is superseded, the message leaves the
/// window, or the link stops.
pub(super) async fn poll_result<R, S>(inner: Arc<Inner<R, S>>, id: RelayId, attempt: u32)
where
    S: Sender,
{
    let started = Instant::now();
    let interval = inner.config.result_poll_interval;
    loop {
        tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
        if !inner.is_current(id, attempt).await {
            tracing::trace!(%id, attempt, "stop polling a superseded attempt");
            return
        }

        let status = tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => return,
            status = inner.sender.result(id) => status,
        };
        let event = match status {
            Ok(status) => status
                .into_result(id)
                .map(|result| LinkEvent::Result { result, attempt }),
            Err(err) => {
                tracing::debug!(%id, %err, "failed to get the relay result");
                None
            }
        };
        let event = event.or_else(|| {
            inner
                .config
                .result_timeout
                .filter(|timeout| started.elapsed() >= *timeout)
                .map(|_| LinkEvent::TimedOut { id, attempt })
        });

        if let Some(event) = event {
            tokio::select! {
                biased;
                _ = inner.shutdown.cancelled() => {}
                sent = inner.events.send(event) => {
                    if sent.is_err() {
                        tracing::trace!(%id, "link stopped, dropping the relay result");
                    }
                }
            }
            return
        }
    }
}
