//! The relay messages submitted to the destination and not yet confirmed.

use crate::error::{
    Error,
    Result,
};
use btp_relay_types::{
    BlockProof,
    BmcLinkStatus,
    ItemKind,
    RelayId,
    RelayMessageItem,
};
use bytes::Bytes;
use core::fmt;
use std::collections::VecDeque;
use tokio::time::Instant;

#[cfg(test)]
mod tests;

/// A relay message waiting for its confirmation.
#[derive(Debug, Clone)]
pub struct InFlight {
    /// The id the message is relayed with.
    pub id: RelayId,
    /// The link status the destination reaches once the message is applied.
    pub target: BmcLinkStatus,
    /// The items of the message.
    pub items: Vec<RelayMessageItem>,
    /// The serialized message.
    pub message: Bytes,
    /// The number of times the message was handed to the sender.
    pub attempt: u32,
    /// When the current attempt was submitted, `None` if it has to be
    /// submitted again.
    pub submitted_at: Option<Instant>,
}

impl InFlight {
    /// Creates an entry that is not submitted yet.
    pub fn new(
        id: RelayId,
        target: BmcLinkStatus,
        items: Vec<RelayMessageItem>,
        message: Bytes,
    ) -> Self {
        Self {
            id,
            target,
            items,
            message,
            attempt: 0,
            submitted_at: None,
        }
    }

    /// Returns `true` if the current attempt reached the sender.
    pub fn is_submitted(&self) -> bool {
        self.submitted_at.is_some()
    }

    /// Records a new submission attempt and returns its number.
    pub fn mark_submitted(&mut self, at: Instant) -> u32 {
        self.attempt = self.attempt.saturating_add(1);
        self.submitted_at = Some(at);
        self.attempt
    }

    /// Forgets the current submission so that the entry is submitted again.
    pub fn clear_submission(&mut self) {
        self.submitted_at = None;
    }

    /// The block proof of the message with its position among the items.
    pub fn block_proof(&self) -> Option<(usize, &BlockProof)> {
        self.items
            .iter()
            .enumerate()
            .find_map(|(index, item)| item.as_block_proof().map(|proof| (index, proof)))
    }

    /// The total size of the items in bytes.
    pub fn size(&self) -> i64 {
        self.items
            .iter()
            .fold(0i64, |size, item| size.saturating_add(item.len()))
    }

    /// A summary of the entry for the logs.
    pub fn summary(&self) -> EntrySummary {
        let count = |kind| {
            self.items
                .iter()
                .filter(|item| item.kind() == kind)
                .count()
        };
        EntrySummary {
            id: self.id,
            target: self.target.clone(),
            block_updates: count(ItemKind::BlockUpdate),
            block_proofs: count(ItemKind::BlockProof),
            message_proofs: count(ItemKind::MessageProof),
            size: self.size(),
            attempt: self.attempt,
        }
    }
}

/// What an in-flight entry holds, without its payloads.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySummary {
    /// The id of the entry.
    pub id: RelayId,
    /// The target link status.
    pub target: BmcLinkStatus,
    /// The number of block updates.
    pub block_updates: usize,
    /// The number of block proofs.
    pub block_proofs: usize,
    /// The number of message proofs.
    pub message_proofs: usize,
    /// The size of the items in bytes.
    pub size: i64,
    /// The number of submission attempts.
    pub attempt: u32,
}

impl fmt::Display for EntrySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id:{} target:[{}] items:{}/{}/{} size:{} attempt:{}",
            self.id,
            self.target,
            self.block_updates,
            self.block_proofs,
            self.message_proofs,
            self.size,
            self.attempt
        )
    }
}

/// The in-flight entries, in submission order.
///
/// Every entry is built on top of the previous one, so the targets never
/// decrease along the window.
#[derive(Debug, Default)]
pub struct DeliveryWindow {
    entries: VecDeque<InFlight>,
}

impl DeliveryWindow {
    /// Creates an empty window.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entries in submission order.
    pub fn iter(&self) -> impl Iterator<Item = &InFlight> {
        self.entries.iter()
    }

    /// Returns `true` if an entry has the `id`.
    pub fn contains(&self, id: RelayId) -> bool {
        self.find(id).is_some()
    }

    /// The entry with the `id`.
    pub fn find(&self, id: RelayId) -> Option<&InFlight> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    /// The entry with the `id`.
    pub fn find_mut(&mut self, id: RelayId) -> Option<&mut InFlight> {
        self.entries.iter_mut().find(|entry| entry.id == id)
    }

    /// The target of the last entry.
    pub fn last_target(&self) -> Option<&BmcLinkStatus> {
        self.entries.back().map(|entry| &entry.target)
    }

    /// The ids of the entries waiting for a submission, in submission order.
    pub fn unsubmitted(&self) -> Vec<RelayId> {
        self.entries
            .iter()
            .filter(|entry| !entry.is_submitted())
            .map(|entry| entry.id)
            .collect()
    }

    /// Draws an id no entry uses.
    pub fn next_id<R: rand::Rng>(&self, rng: &mut R) -> RelayId {
        loop {
            let id = RelayId::new(rng.gen());
            if !self.contains(id) {
                return id
            }
        }
    }

    /// Appends the entry.
    pub fn submit(&mut self, entry: InFlight) {
        self.entries.push_back(entry);
    }

    /// Removes the entries whose target is reached by `status`.
    ///
    /// Only a prefix of the window can be reached. If an entry after an
    /// unreached one is reached, nothing is removed.
    pub fn confirm(&mut self, status: &BmcLinkStatus) -> Result<Vec<InFlight>> {
        let reached = self
            .entries
            .iter()
            .take_while(|entry| entry.target.is_reached_by(status))
            .count();
        if let Some(entry) = self
            .entries
            .iter()
            .skip(reached)
            .find(|entry| entry.target.is_reached_by(status))
        {
            return Err(Error::WindowOrder {
                id: entry.id,
                status: status.clone(),
            })
        }
        Ok(self.entries.drain(..reached).collect())
    }

    /// Removes the entry with the `id`.
    pub fn discard(&mut self, id: RelayId) -> Option<InFlight> {
        let index = self.position(id)?;
        self.entries.remove(index)
    }

    /// Removes the entry with the `id` and every entry submitted before it.
    pub fn discard_through(&mut self, id: RelayId) -> Vec<InFlight> {
        match self.position(id) {
            Some(index) => self.entries.drain(..=index).collect(),
            None => Vec::new(),
        }
    }

    /// Removes the entry with the `id` and every entry submitted after it.
    pub fn discard_from(&mut self, id: RelayId) -> Vec<InFlight> {
        match self.position(id) {
            Some(index) => self.entries.drain(index..).collect(),
            None => Vec::new(),
        }
    }

    fn position(&self, id: RelayId) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id == id)
    }
}
