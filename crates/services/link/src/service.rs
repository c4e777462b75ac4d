//! The link task: turns the source chain events into relay messages and
//! delivers them to the destination in order.

use crate::{
    accumulator::Segment,
    config::Config,
    error::{
        Error,
        Result,
    },
    ports::{
        BoxStream,
        Receiver,
        Sender,
    },
    recovery::{
        self,
        Action,
    },
    window::{
        EntrySummary,
        InFlight,
    },
};
use btp_relay_types::{
    services::sender::{
        RelayResult,
        SenderMessage,
    },
    BmcLinkStatus,
    BtpAddress,
    ItemKind,
    ReceiveStatus,
    RelayId,
    RelayMessageItem,
};
use core::fmt;
use futures::StreamExt;
use std::sync::Arc;
use tokio::{
    sync::{
        mpsc,
        Mutex,
        RwLock,
    },
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use self::state::LinkState;

mod poll;
mod state;

#[cfg(test)]
mod tests;

/// An event raised by the tasks of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkEvent {
    /// A polled relay transaction became final.
    Result { result: RelayResult, attempt: u32 },
    /// A relay transaction is still pending after the result timeout.
    TimedOut { id: RelayId, attempt: u32 },
}

pub(crate) struct Inner<R, S> {
    config: Config,
    receiver: R,
    sender: S,
    state: RwLock<LinkState>,
    events: mpsc::Sender<LinkEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<LinkEvent>>>,
    shutdown: CancellationToken,
    span: tracing::Span,
}

impl<R, S> Inner<R, S> {
    /// Returns `true` while `attempt` is the live submission of the entry `id`.
    async fn is_current(&self, id: RelayId, attempt: u32) -> bool {
        self.state
            .read()
            .await
            .window
            .find(id)
            .is_some_and(|entry| entry.attempt == attempt && entry.is_submitted())
    }
}

/// A relay link from the `src` BMC to the `dst` BMC.
///
/// Clones share the same link, so one clone can run it while another stops
/// it or reports on it.
pub struct Link<R, S> {
    inner: Arc<Inner<R, S>>,
}

impl<R, S> Clone for Link<R, S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// A snapshot of the state of a link.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone)]
pub struct LinkReport {
    /// The source BMC.
    pub src: BtpAddress,
    /// The destination BMC.
    pub dst: BtpAddress,
    /// The last status confirmed by the destination.
    pub confirmed: BmcLinkStatus,
    /// The status once every in-flight and accumulated item is applied.
    pub shadow: BmcLinkStatus,
    /// The relay messages waiting for a confirmation, in submission order.
    pub in_flight: Vec<EntrySummary>,
    /// The source checkpoints with unconfirmed events.
    pub retained: Vec<ReceiveStatus>,
}

impl fmt::Display for LinkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} confirmed:[{}] shadow:[{}] in_flight:{} retained:{}",
            self.src,
            self.dst,
            self.confirmed,
            self.shadow,
            self.in_flight.len(),
            self.retained.len()
        )
    }
}

impl<R, S> Link<R, S>
where
    R: Receiver + 'static,
    S: Sender + 'static,
{
    /// Creates the link. Nothing happens until [`Link::run`] is called.
    pub fn new(config: Config, receiver: R, sender: S) -> Result<Self> {
        let tx_size_limit = sender.tx_size_limit();
        let margin = sender.margin_for_limit();
        let limit = i64::try_from(tx_size_limit)
            .unwrap_or(i64::MAX)
            .saturating_sub(margin);
        if limit <= 0 {
            return Err(Error::InvalidSizeLimit {
                tx_size_limit,
                margin,
            })
        }
        let (events, events_rx) = mpsc::channel(config.event_channel_capacity.max(1));
        let span = tracing::info_span!("link", src = %config.src, dst = %config.dst);
        let inner = Inner {
            config,
            receiver,
            sender,
            state: RwLock::new(LinkState::new(limit)),
            events,
            events_rx: Mutex::new(Some(events_rx)),
            shutdown: CancellationToken::new(),
            span,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// The token cancelled when the link stops.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Asks the link to stop. [`Link::run`] returns once its loops exit.
    pub fn stop(&self) {
        self.inner.shutdown.cancel();
    }

    /// A snapshot of the link state.
    pub async fn report(&self) -> LinkReport {
        let state = self.inner.state.read().await;
        LinkReport {
            src: self.inner.config.src.clone(),
            dst: self.inner.config.dst.clone(),
            confirmed: state.confirmed.clone(),
            shadow: state.shadow.clone(),
            in_flight: state.window.iter().map(InFlight::summary).collect(),
            retained: state.receive_statuses.iter().copied().collect(),
        }
    }

    /// Runs the link until it is stopped, one of the chains ends its stream,
    /// or an error the link can't recover from occurs.
    pub async fn run(&self) -> Result<()> {
        let Some(mut events) = self.inner.events_rx.lock().await.take() else {
            return Err(Error::AlreadyStarted)
        };
        let span = self.inner.span.clone();
        let result = self.run_loops(&mut events).instrument(span.clone()).await;
        self.inner.shutdown.cancel();
        self.inner.receiver.stop();
        self.inner.sender.stop();
        if let Err(err) = &result {
            if err.is_fatal() {
                let report = self.report().await;
                let link = format!("{} -> {}", report.src, report.dst);
                let _entered = span.enter();
                tracing::error!(
                    %link,
                    confirmed = %report.confirmed,
                    in_flight = report.in_flight.len(),
                    "link halted: {err}"
                );
                for entry in &report.in_flight {
                    tracing::error!(%entry, "in-flight relay message");
                }
            }
        }
        result
    }

    async fn run_loops(&self, events: &mut mpsc::Receiver<LinkEvent>) -> Result<()> {
        let status = self.inner.sender.get_status().await?;
        tracing::info!(%status, "starting link");
        self.inner.state.write().await.reset(status.clone());

        let messages = self.inner.sender.start().await?;
        let statuses = self.inner.receiver.start(&status).await?;
        tokio::try_join!(
            self.receive_loop(statuses),
            self.send_loop(messages, events)
        )?;
        tracing::info!("link stopped");
        Ok(())
    }

    async fn receive_loop(&self, mut statuses: BoxStream<ReceiveStatus>) -> Result<()> {
        loop {
            let status = tokio::select! {
                biased;
                _ = self.inner.shutdown.cancelled() => return Ok(()),
                status = statuses.next() => status,
            };
            let Some(status) = status else {
                tracing::info!("receiver stream ended");
                self.inner.shutdown.cancel();
                return Ok(())
            };
            tracing::trace!(height = status.height, seq = status.seq, "receive status");
            let mut state = self.inner.state.write().await;
            state.receive_statuses.push(status)?;
            tolerate(self.relay(&mut state).await)?;
        }
    }

    async fn send_loop(
        &self,
        mut messages: BoxStream<SenderMessage>,
        events: &mut mpsc::Receiver<LinkEvent>,
    ) -> Result<()> {
        loop {
            let result = tokio::select! {
                biased;
                _ = self.inner.shutdown.cancelled() => return Ok(()),
                Some(event) = events.recv() => self.on_event(event).await,
                message = messages.next() => match message {
                    Some(SenderMessage::Status(status)) => self.on_status(status).await,
                    Some(SenderMessage::Result(result)) => self.on_result(result, None).await,
                    None => {
                        tracing::info!("sender stream ended");
                        self.inner.shutdown.cancel();
                        return Ok(())
                    }
                },
            };
            tolerate(result)?;
        }
    }

    async fn on_status(&self, status: BmcLinkStatus) -> Result<()> {
        let mut state = self.inner.state.write().await;
        if state.confirm(status)? {
            self.relay(&mut state).await?;
        }
        Ok(())
    }

    async fn on_event(&self, event: LinkEvent) -> Result<()> {
        match event {
            LinkEvent::Result { result, attempt } => {
                self.on_result(result, Some(attempt)).await
            }
            LinkEvent::TimedOut { id, attempt } => {
                if !self.inner.is_current(id, attempt).await {
                    return Ok(())
                }
                tracing::warn!(%id, attempt, "relay message still pending, resubmitting");
                let mut state = self.inner.state.write().await;
                self.execute(&mut state, Action::Resubmit(id)).await
            }
        }
    }

    async fn on_result(&self, result: RelayResult, attempt: Option<u32>) -> Result<()> {
        let mut state = self.inner.state.write().await;
        let id = result.id;
        if let (Some(attempt), Some(entry)) = (attempt, state.window.find(id)) {
            if entry.attempt != attempt {
                tracing::debug!(%id, attempt, current = entry.attempt, "ignoring result of a previous attempt");
                return Ok(())
            }
        }
        let Some(code) = result.err else {
            tracing::debug!(%id, "relay message finalized");
            return Ok(())
        };
        let action = recovery::recover(id, code, state.window.find(id))?;
        tracing::info!(%id, %code, ?action, "relay message reverted");
        self.execute(&mut state, action).await
    }

    async fn execute(&self, state: &mut LinkState, action: Action) -> Result<()> {
        match action {
            Action::Ignore => Ok(()),
            Action::Discard(id) => {
                let discarded = state.discard_verified(id);
                tracing::debug!(%id, discarded = discarded.len(), "discarded verified relay messages");
                Ok(())
            }
            Action::Resubmit(id) => {
                if let Some(entry) = state.window.find_mut(id) {
                    entry.clear_submission();
                }
                self.send_unsubmitted(state).await;
                Ok(())
            }
            Action::Rebuild(id) => self.rebuild(state, id).await,
            Action::RebuildBlockProof { id, height } => {
                self.rebuild_block_proof(state, id, height).await
            }
        }
    }

    /// Fetches the destination status, drops the entry `id` with every later
    /// entry, and builds them again.
    async fn rebuild(&self, state: &mut LinkState, id: RelayId) -> Result<()> {
        self.refresh(state, id).await?;
        let superseded = state.window.discard_from(id);
        state.rebase();
        tracing::info!(
            %id,
            superseded = superseded.len(),
            from = %state.shadow,
            "rebuilding relay messages"
        );
        self.relay(state).await
    }

    /// Replaces the block proof of the entry `id` with one built against the
    /// destination status, and submits the entry again.
    async fn rebuild_block_proof(
        &self,
        state: &mut LinkState,
        id: RelayId,
        height: i64,
    ) -> Result<()> {
        self.refresh(state, id).await?;
        let Some((index, mut items)) = state.window.find(id).map(|entry| {
            (entry.block_proof().map(|(index, _)| index), entry.items.clone())
        }) else {
            tracing::debug!(%id, "relay message confirmed meanwhile");
            return Ok(())
        };
        let Some(index) = index else {
            return self.rebuild(state, id).await
        };

        let proof = match self
            .inner
            .receiver
            .build_block_proof(&state.confirmed, height)
            .await
        {
            Ok(proof) => proof,
            Err(err) => {
                if let Some(entry) = state.window.find_mut(id) {
                    entry.clear_submission();
                }
                return Err(err.into())
            }
        };
        let Some(proof) = proof else {
            tracing::warn!(%id, height, "no block proof available, rebuilding");
            return self.rebuild(state, id).await
        };
        if let Some(item) = items.get_mut(index) {
            *item = proof.into();
        }
        let size = items
            .iter()
            .fold(0i64, |size, item| size.saturating_add(item.len()));
        if size > state.accumulator.limit() {
            tracing::warn!(%id, size, "rebuilt block proof does not fit, rebuilding");
            return self.rebuild(state, id).await
        }
        let message = self
            .inner
            .receiver
            .build_relay_message(&items)
            .map_err(Error::Construction)?;
        if let Some(entry) = state.window.find_mut(id) {
            entry.items = items;
            entry.message = message;
            entry.clear_submission();
        }
        tracing::info!(
            %id,
            height,
            against = state.confirmed.height(),
            "block proof rebuilt"
        );
        self.send_unsubmitted(state).await;
        Ok(())
    }

    /// Applies the status read from the destination. On failure the entry
    /// `id` is left for a resubmission, so the revert comes back later.
    async fn refresh(&self, state: &mut LinkState, id: RelayId) -> Result<()> {
        match self.inner.sender.get_status().await {
            Ok(status) => {
                state.confirm(status)?;
                Ok(())
            }
            Err(err) => {
                if let Some(entry) = state.window.find_mut(id) {
                    entry.clear_submission();
                }
                Err(err.into())
            }
        }
    }

    /// One round: build what the source chain has, register the segments,
    /// and submit every entry waiting for it.
    async fn relay(&self, state: &mut LinkState) -> Result<()> {
        if let Err(err) = self.build(state).await {
            if err.is_fatal() {
                return Err(err)
            }
            tracing::warn!(%err, "failed to build relay message items, retrying on the next round");
        }
        let segments = if self.inner.config.max_size_tx {
            state.accumulator.take_closed()
        } else {
            state.accumulator.flush()
        };
        for segment in segments {
            self.register(state, segment)?;
        }
        self.send_unsubmitted(state).await;
        Ok(())
    }

    async fn build(&self, state: &mut LinkState) -> Result<()> {
        let receiver = &self.inner.receiver;
        let updates = receiver
            .build_block_updates(&state.shadow, state.accumulator.remaining())
            .await?;
        for update in updates {
            if update.target_height <= state.shadow.height() {
                tracing::trace!(
                    target_height = update.target_height,
                    "skipping block update already applied"
                );
                continue
            }
            state.append(vec![update.into()])?;
        }

        loop {
            let next_seq = state.shadow.rx_seq.saturating_add(1);
            let Some(height) = state
                .receive_statuses
                .height_for_seq(next_seq)
                .or_else(|| receiver.height_for_seq(next_seq))
            else {
                break
            };
            if height > state.shadow.height() {
                break
            }
            if state.accumulator.remaining() == 0 {
                state.accumulator.close();
            }

            let proof = if state.accumulator.open_segment().has_block_update_for(height) {
                None
            } else {
                receiver.build_block_proof(&state.shadow, height).await?
            };
            let proof_size = proof.as_ref().map_or(0, |proof| {
                i64::try_from(proof.payload.len()).unwrap_or(i64::MAX)
            });
            let budget = state.accumulator.remaining().saturating_sub(proof_size);
            if budget <= 0 {
                if state.accumulator.open_segment().is_empty() {
                    return Err(Error::ItemTooLarge {
                        kind: ItemKind::BlockProof,
                        size: proof_size,
                        limit: state.accumulator.limit(),
                    })
                }
                state.accumulator.close();
                continue
            }

            let Some(message) = receiver.build_message_proof(&state.shadow, budget).await?
            else {
                break
            };
            if message.is_empty() {
                if state.accumulator.open_segment().is_empty() {
                    break
                }
                state.accumulator.close();
                continue
            }
            let group_size = proof_size.saturating_add(
                i64::try_from(message.payload.len()).unwrap_or(i64::MAX),
            );
            if group_size > state.accumulator.remaining()
                && !state.accumulator.open_segment().is_empty()
            {
                // The proof lands in a new segment, which needs its own
                // anchor for the block.
                state.accumulator.close();
                continue
            }
            tracing::trace!(
                height,
                start_seq = message.start_seq,
                last_seq = message.last_seq,
                "message proof built"
            );
            let mut group: Vec<RelayMessageItem> =
                proof.into_iter().map(Into::into).collect();
            group.push(message.into());
            state.append(group)?;
        }
        Ok(())
    }

    fn register(&self, state: &mut LinkState, segment: Segment) -> Result<RelayId> {
        let message = self
            .inner
            .receiver
            .build_relay_message(segment.items())
            .map_err(Error::Construction)?;
        let mut target = state.base();
        segment.apply(&mut target);
        let id = state.window.next_id(&mut rand::thread_rng());
        tracing::info!(
            %id,
            items = segment.len(),
            size = segment.size(),
            %target,
            "relay message built"
        );
        state
            .window
            .submit(InFlight::new(id, target, segment.into_items(), message));
        Ok(id)
    }

    /// Submits the entries waiting for it in window order, up to the first
    /// one the sender fails to take.
    async fn send_unsubmitted(&self, state: &mut LinkState) {
        for id in state.window.unsubmitted() {
            if !self.send(state, id).await {
                break
            }
        }
    }

    async fn send(&self, state: &mut LinkState, id: RelayId) -> bool {
        let Some(entry) = state.window.find_mut(id) else {
            return true
        };
        match self.inner.sender.relay(id, &entry.message).await {
            Ok(()) => {
                let attempt = entry.mark_submitted(Instant::now());
                tracing::debug!(%id, attempt, target = %entry.target, "relay message submitted");
                let inner = self.inner.clone();
                tokio::spawn(
                    poll::poll_result(inner, id, attempt).instrument(self.inner.span.clone()),
                );
                true
            }
            Err(err) => {
                entry.clear_submission();
                tracing::warn!(%id, %err, "failed to submit relay message, retrying on the next round");
                false
            }
        }
    }
}

/// Logs collaborator failures; the next trigger retries the round.
fn tolerate(result: Result<()>) -> Result<()> {
    match result {
        Err(Error::Port(err)) => {
            tracing::warn!(%err, "link round failed");
            Ok(())
        }
        result => result,
    }
}
