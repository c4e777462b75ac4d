//! Ports used by the link to access the source and destination chains.

use async_trait::async_trait;
use btp_relay_types::{
    services::sender::{
        SenderMessage,
        TxStatus,
    },
    BlockProof,
    BlockUpdate,
    BmcLinkStatus,
    MessageProof,
    ReceiveStatus,
    RelayId,
    RelayMessageItem,
};
use bytes::Bytes;

/// A boxed stream of the chain notifications.
pub type BoxStream<T> =
    core::pin::Pin<Box<dyn futures::Stream<Item = T> + Send + 'static>>;

#[cfg_attr(any(test, feature = "test-helpers"), mockall::automock)]
#[async_trait]
/// Port for reading the source chain and building the items of relay messages.
pub trait Receiver: Send + Sync {
    /// Starts following the source chain from the verifier height and the
    /// received sequence of `status`.
    ///
    /// The stream yields a checkpoint for every block carrying events, in
    /// increasing height order. It ends when the receiver stops.
    async fn start(
        &self,
        status: &BmcLinkStatus,
    ) -> anyhow::Result<BoxStream<ReceiveStatus>>;

    /// Builds the block updates bringing the verifier past `status`, up to
    /// `limit` bytes. The first update may exceed `limit` on its own.
    async fn build_block_updates(
        &self,
        status: &BmcLinkStatus,
        limit: i64,
    ) -> anyhow::Result<Vec<BlockUpdate>>;

    /// Builds the proof of the block at `height` against the verifier state of
    /// `status`. `None` if the chain doesn't need one.
    async fn build_block_proof(
        &self,
        status: &BmcLinkStatus,
        height: i64,
    ) -> anyhow::Result<Option<BlockProof>>;

    /// Builds the proof of the events following `status.rx_seq`, up to `limit`
    /// bytes. A proof of a single event may exceed `limit`.
    async fn build_message_proof(
        &self,
        status: &BmcLinkStatus,
        limit: i64,
    ) -> anyhow::Result<Option<MessageProof>>;

    /// Serializes the items into the wire format of the destination.
    fn build_relay_message(&self, items: &[RelayMessageItem]) -> anyhow::Result<Bytes>;

    /// The height of the block that emitted the event `seq`, if known.
    fn height_for_seq(&self, seq: i64) -> Option<i64>;

    /// Stops following the source chain and ends the stream.
    fn stop(&self);
}

#[cfg_attr(any(test, feature = "test-helpers"), mockall::automock)]
#[async_trait]
/// Port for delivering relay messages to the destination chain.
pub trait Sender: Send + Sync {
    /// Starts monitoring the destination. The stream yields every new link
    /// status, and the results the sender learns of on its own.
    async fn start(&self) -> anyhow::Result<BoxStream<SenderMessage>>;

    /// Submits the relay message under `id`.
    async fn relay(&self, id: RelayId, message: &Bytes) -> anyhow::Result<()>;

    /// The state of the transaction submitted under `id`.
    async fn result(&self, id: RelayId) -> anyhow::Result<TxStatus>;

    /// Reads the link status from the destination BMC.
    async fn get_status(&self) -> anyhow::Result<BmcLinkStatus>;

    /// The maximum size of a relay transaction in bytes.
    fn tx_size_limit(&self) -> usize;

    /// The bytes kept free in every transaction for the message envelope.
    fn margin_for_limit(&self) -> i64;

    /// Stops monitoring the destination and ends the stream.
    fn stop(&self);
}
