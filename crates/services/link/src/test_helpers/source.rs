use super::codec;
use crate::ports::{
    BoxStream,
    Receiver,
};
use anyhow::anyhow;
use async_trait::async_trait;
use btp_relay_types::{
    BlockProof,
    BlockUpdate,
    BmcLinkStatus,
    MessageProof,
    ReceiveStatus,
    RelayMessageItem,
};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// The state of a [`MockSourceChain`].
#[derive(Debug)]
pub struct SourceData {
    /// The checkpoints of the blocks with events, in height order.
    pub checkpoints: Vec<ReceiveStatus>,
    /// The height of the last block.
    pub tip: i64,
    /// The proof size of one event. At least 24 bytes.
    pub event_size: usize,
    /// The size of a block update.
    pub update_size: usize,
    /// The size of a block proof.
    pub proof_size: usize,
    /// Whether the chain builds block proofs for blocks updated in an
    /// earlier relay message.
    pub block_proofs: bool,
    /// The `(against_height, proof_height)` of every block proof built.
    pub block_proof_requests: Vec<(i64, i64)>,
    /// The number of builds left to fail.
    pub failing_builds: usize,
    notify: Option<mpsc::UnboundedSender<ReceiveStatus>>,
}

impl Default for SourceData {
    fn default() -> Self {
        Self {
            checkpoints: Vec::new(),
            tip: 0,
            event_size: 32,
            update_size: 64,
            proof_size: 48,
            block_proofs: false,
            block_proof_requests: Vec::new(),
            failing_builds: 0,
            notify: None,
        }
    }
}

impl SourceData {
    /// The number of events emitted so far.
    pub fn total_events(&self) -> i64 {
        self.checkpoints.last().map_or(0, |rs| rs.seq)
    }

    fn height_for_seq(&self, seq: i64) -> Option<i64> {
        self.checkpoints
            .iter()
            .find(|rs| rs.seq >= seq)
            .map(|rs| rs.height)
    }

    fn fail_build(&mut self) -> anyhow::Result<()> {
        if self.failing_builds > 0 {
            self.failing_builds -= 1;
            return Err(anyhow!("source chain is unavailable"))
        }
        Ok(())
    }
}

/// A source chain kept in memory, producing blocks on demand.
#[derive(Clone, Debug, Default)]
pub struct MockSourceChain {
    data: Arc<Mutex<SourceData>>,
}

impl MockSourceChain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` on the chain state.
    pub fn update_data<T>(&self, f: impl FnOnce(&mut SourceData) -> T) -> T {
        f(&mut self.data.lock())
    }

    /// Appends a block emitting `events` events and returns its height.
    pub fn produce_block(&self, events: i64) -> i64 {
        let mut data = self.data.lock();
        data.tip += 1;
        if events > 0 {
            let status = ReceiveStatus::new(data.tip, data.total_events() + events);
            data.checkpoints.push(status);
            if let Some(notify) = &data.notify {
                let _ = notify.send(status);
            }
        }
        data.tip
    }

    /// Appends one block per entry of `events`.
    pub fn produce_blocks(&self, events: impl IntoIterator<Item = i64>) {
        for events in events {
            self.produce_block(events);
        }
    }

    /// The number of events emitted so far.
    pub fn total_events(&self) -> i64 {
        self.data.lock().total_events()
    }
}

#[async_trait]
impl Receiver for MockSourceChain {
    async fn start(
        &self,
        status: &BmcLinkStatus,
    ) -> anyhow::Result<BoxStream<ReceiveStatus>> {
        let (notify, statuses) = mpsc::unbounded_channel();
        let mut data = self.data.lock();
        for rs in data.checkpoints.iter().filter(|rs| rs.seq > status.rx_seq) {
            let _ = notify.send(*rs);
        }
        data.notify = Some(notify);
        Ok(Box::pin(UnboundedReceiverStream::new(statuses)))
    }

    async fn build_block_updates(
        &self,
        status: &BmcLinkStatus,
        limit: i64,
    ) -> anyhow::Result<Vec<BlockUpdate>> {
        let mut data = self.data.lock();
        data.fail_build()?;
        let size = i64::try_from(data.update_size)?;
        let mut src_height = status.height();
        let mut used = 0i64;
        let mut updates = Vec::new();
        for rs in data.checkpoints.iter().filter(|rs| rs.height > status.height()) {
            if !updates.is_empty() && used + size > limit {
                break
            }
            updates.push(BlockUpdate {
                src_height,
                target_height: rs.height,
                payload: codec::payload(&[src_height, rs.height], data.update_size),
            });
            used += size;
            src_height = rs.height;
        }
        Ok(updates)
    }

    async fn build_block_proof(
        &self,
        status: &BmcLinkStatus,
        height: i64,
    ) -> anyhow::Result<Option<BlockProof>> {
        let mut data = self.data.lock();
        data.fail_build()?;
        if !data.block_proofs {
            return Ok(None)
        }
        data.block_proof_requests.push((status.height(), height));
        Ok(Some(BlockProof {
            proof_height: height,
            payload: codec::payload(&[height, status.height()], data.proof_size),
        }))
    }

    async fn build_message_proof(
        &self,
        status: &BmcLinkStatus,
        limit: i64,
    ) -> anyhow::Result<Option<MessageProof>> {
        let mut data = self.data.lock();
        data.fail_build()?;
        let start_seq = status.rx_seq + 1;
        let Some(rs) = data.checkpoints.iter().find(|rs| rs.seq >= start_seq) else {
            return Ok(None)
        };
        let event_size = i64::try_from(data.event_size)?;
        let fitting = (limit / event_size.max(1)).max(1);
        let last_seq = rs.seq.min(start_seq + fitting - 1);
        let events = usize::try_from(last_seq - start_seq + 1)?;
        Ok(Some(MessageProof {
            start_seq,
            last_seq,
            payload: codec::payload(
                &[rs.height, start_seq, last_seq],
                events * data.event_size,
            ),
        }))
    }

    fn build_relay_message(&self, items: &[RelayMessageItem]) -> anyhow::Result<Bytes> {
        codec::encode(items)
    }

    fn height_for_seq(&self, seq: i64) -> Option<i64> {
        self.data.lock().height_for_seq(seq)
    }

    fn stop(&self) {
        self.data.lock().notify = None;
    }
}
