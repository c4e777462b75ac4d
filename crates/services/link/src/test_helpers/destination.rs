use super::codec::{
    self,
    Decoded,
};
use crate::ports::{
    BoxStream,
    Sender,
};
use anyhow::anyhow;
use async_trait::async_trait;
use btp_relay_types::{
    services::sender::{
        SenderMessage,
        TxStatus,
    },
    BmcLinkStatus,
    ErrorCode,
    RelayId,
    RevertCode,
};
use bytes::Bytes;
use parking_lot::Mutex;
use std::{
    collections::{
        HashMap,
        VecDeque,
    },
    sync::Arc,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// A relay transaction received by a [`MockDestination`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relayed {
    /// The id it was relayed with.
    pub id: RelayId,
    /// The size of the relay message.
    pub size: usize,
    /// The outcome of the transaction.
    pub outcome: TxStatus,
    /// The link status after the transaction.
    pub status: BmcLinkStatus,
}

/// The state of a [`MockDestination`].
#[derive(Debug)]
pub struct DestinationData {
    /// The link status held by the BMC.
    pub status: BmcLinkStatus,
    /// The maximum transaction size.
    pub tx_size_limit: usize,
    /// The margin kept for the message envelope. Every item adds 5 bytes of
    /// framing to the message.
    pub margin: i64,
    /// A block witness is too old once the verifier was more than this many
    /// blocks past it before the transaction. `None` never rejects a witness.
    pub witness_window: Option<i64>,
    /// The number of times a transaction is reported pending before its
    /// outcome. `u32::MAX` keeps every transaction pending.
    pub pending_polls: u32,
    /// Codes the next transactions revert with, without being applied.
    pub scripted_reverts: VecDeque<ErrorCode>,
    /// The number of relay calls left to fail.
    pub failing_relays: usize,
    /// Transactions received while stalled are never executed and stay
    /// pending.
    pub stalled: bool,
    /// Every transaction received, in order.
    pub relayed: Vec<Relayed>,
    txs: HashMap<RelayId, (TxStatus, u32)>,
    notify: Option<mpsc::UnboundedSender<SenderMessage>>,
}

impl Default for DestinationData {
    fn default() -> Self {
        Self {
            status: BmcLinkStatus::default(),
            tx_size_limit: 4096,
            margin: 1024,
            witness_window: None,
            pending_polls: 0,
            scripted_reverts: VecDeque::new(),
            failing_relays: 0,
            stalled: false,
            relayed: Vec::new(),
            txs: HashMap::new(),
            notify: None,
        }
    }
}

impl DestinationData {
    /// Applies the relay message to the link status, as the BMC and BMV do.
    fn verify(&self, message: &[u8]) -> anyhow::Result<Result<BmcLinkStatus, RevertCode>> {
        let mut status = self.status.clone();
        let mut applied = false;
        for item in codec::decode(message)? {
            match item {
                Decoded::BlockUpdate {
                    src_height,
                    target_height,
                } => {
                    if target_height <= status.height() {
                        continue
                    }
                    if src_height > status.height() {
                        return Ok(Err(RevertCode::BMVNotVerifiable))
                    }
                    status.verifier.height = target_height;
                    applied = true;
                }
                Decoded::BlockProof {
                    height,
                    witness_height,
                } => {
                    let too_old = self
                        .witness_window
                        .is_some_and(|window| witness_height + window < self.status.height());
                    if too_old {
                        return Ok(Err(RevertCode::BMVRevertInvalidBlockWitnessOld))
                    }
                    if height > status.height() {
                        return Ok(Err(RevertCode::BMVNotVerifiable))
                    }
                }
                Decoded::MessageProof {
                    height,
                    start_seq,
                    last_seq,
                } => {
                    if last_seq <= status.rx_seq {
                        continue
                    }
                    if start_seq != status.rx_seq + 1 || height > status.height() {
                        return Ok(Err(RevertCode::BMVNotVerifiable))
                    }
                    status.rx_seq = last_seq;
                    applied = true;
                }
            }
        }
        if !applied {
            return Ok(Err(RevertCode::BMVAlreadyVerified))
        }
        Ok(Ok(status))
    }

    fn set_status(&mut self, status: BmcLinkStatus) {
        self.status = status;
        if let Some(notify) = &self.notify {
            let _ = notify.send(SenderMessage::Status(self.status.clone()));
        }
    }
}

/// A destination chain kept in memory, verifying relay messages on receipt.
#[derive(Clone, Debug, Default)]
pub struct MockDestination {
    data: Arc<Mutex<DestinationData>>,
}

impl MockDestination {
    /// Creates a destination holding `status`.
    pub fn new(status: BmcLinkStatus) -> Self {
        let destination = Self::default();
        destination.update_data(|data| data.status = status);
        destination
    }

    /// Runs `f` on the chain state.
    pub fn update_data<T>(&self, f: impl FnOnce(&mut DestinationData) -> T) -> T {
        f(&mut self.data.lock())
    }

    /// The link status held by the BMC.
    pub fn status(&self) -> BmcLinkStatus {
        self.data.lock().status.clone()
    }

    /// Every transaction received so far.
    pub fn relayed(&self) -> Vec<Relayed> {
        self.data.lock().relayed.clone()
    }

    /// Makes the next transaction revert with `code`.
    pub fn script_revert(&self, code: impl Into<ErrorCode>) {
        self.data.lock().scripted_reverts.push_back(code.into());
    }

    /// Moves the link status as another relay would, and notifies the link.
    pub fn advance(&self, status: BmcLinkStatus) {
        self.data.lock().set_status(status);
    }
}

#[async_trait]
impl Sender for MockDestination {
    async fn start(&self) -> anyhow::Result<BoxStream<SenderMessage>> {
        let (notify, messages) = mpsc::unbounded_channel();
        let mut data = self.data.lock();
        let _ = notify.send(SenderMessage::Status(data.status.clone()));
        data.notify = Some(notify);
        Ok(Box::pin(UnboundedReceiverStream::new(messages)))
    }

    async fn relay(&self, id: RelayId, message: &Bytes) -> anyhow::Result<()> {
        let mut data = self.data.lock();
        if data.failing_relays > 0 {
            data.failing_relays -= 1;
            return Err(anyhow!("destination is unavailable"))
        }
        if message.len() > data.tx_size_limit {
            return Err(anyhow!(
                "transaction of {} bytes exceeds the limit of {}",
                message.len(),
                data.tx_size_limit
            ))
        }
        let outcome = if data.stalled {
            TxStatus::Pending
        } else if let Some(code) = data.scripted_reverts.pop_front() {
            TxStatus::Reverted(code)
        } else {
            match data.verify(message)? {
                Ok(status) => {
                    data.set_status(status);
                    TxStatus::Finalized
                }
                Err(revert) => TxStatus::Reverted(revert.code()),
            }
        };
        let relayed = Relayed {
            id,
            size: message.len(),
            outcome,
            status: data.status.clone(),
        };
        tracing::trace!(?relayed, "relay transaction received");
        data.relayed.push(relayed);
        let polls = if data.stalled {
            u32::MAX
        } else {
            data.pending_polls
        };
        data.txs.insert(id, (outcome, polls));
        Ok(())
    }

    async fn result(&self, id: RelayId) -> anyhow::Result<TxStatus> {
        let mut data = self.data.lock();
        let (outcome, pending) = data
            .txs
            .get_mut(&id)
            .ok_or_else(|| anyhow!("unknown transaction {id}"))?;
        if *pending == u32::MAX {
            return Ok(TxStatus::Pending)
        }
        if *pending > 0 {
            *pending -= 1;
            return Ok(TxStatus::Pending)
        }
        Ok(*outcome)
    }

    async fn get_status(&self) -> anyhow::Result<BmcLinkStatus> {
        Ok(self.status())
    }

    fn tx_size_limit(&self) -> usize {
        self.data.lock().tx_size_limit
    }

    fn margin_for_limit(&self) -> i64 {
        self.data.lock().margin
    }

    fn stop(&self) {
        self.data.lock().notify = None;
    }
}
