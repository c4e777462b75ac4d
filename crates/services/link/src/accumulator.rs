//! Groups the relay message items into size bounded segments, one per
//! relay transaction.

use crate::error::{
    Error,
    Result,
};
use btp_relay_types::{
    BmcLinkStatus,
    ItemKind,
    RelayMessageItem,
};
use std::collections::VecDeque;


/// The items of one relay message.
///
/// Items are ordered as block updates, then at most one block proof, then
/// message proofs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Segment {
    items: Vec<RelayMessageItem>,
    size: i64,
}

impl Segment {
    /// The items of the segment.
    pub fn items(&self) -> &[RelayMessageItem] {
        &self.items
    }

    /// Takes the items out of the segment.
    pub fn into_items(self) -> Vec<RelayMessageItem> {
        self.items
    }

    /// The total size of the items in bytes.
    pub fn size(&self) -> i64 {
        self.size
    }

    /// The number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the segment holds no item.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns `true` if the segment updates the verifier to `height`.
    pub fn has_block_update_for(&self, height: i64) -> bool {
        self.items.iter().any(|item| {
            item.as_block_update()
                .is_some_and(|update| update.target_height == height)
        })
    }

    /// Applies every item to `status`.
    pub fn apply(&self, status: &mut BmcLinkStatus) {
        for item in &self.items {
            item.update_link_status(status);
        }
    }

    fn accepts(&self, kind: ItemKind) -> bool {
        match self.items.last().map(RelayMessageItem::kind) {
            None => true,
            Some(last) if last == kind => kind != ItemKind::BlockProof,
            Some(last) => last < kind,
        }
    }

    fn push(&mut self, item: RelayMessageItem) {
        self.size = self.size.saturating_add(item.len());
        self.items.push(item);
    }
}

/// Accumulates items into segments of at most `limit` bytes.
#[derive(Debug)]
pub struct Accumulator {
    limit: i64,
    open: Segment,
    closed: VecDeque<Segment>,
    last_seq: Option<i64>,
    last_height: Option<i64>,
}

impl Accumulator {
    /// Creates an empty accumulator of segments bounded by `limit` bytes.
    pub fn new(limit: i64) -> Self {
        Self {
            limit,
            open: Segment::default(),
            closed: VecDeque::new(),
            last_seq: None,
            last_height: None,
        }
    }

    /// The size bound of a segment.
    pub fn limit(&self) -> i64 {
        self.limit
    }

    /// The free capacity of the open segment.
    pub fn remaining(&self) -> i64 {
        self.limit.saturating_sub(self.open.size).max(0)
    }

    /// The segment items are currently appended to.
    pub fn open_segment(&self) -> &Segment {
        &self.open
    }

    /// Returns `true` if no item is waiting for submission.
    pub fn is_empty(&self) -> bool {
        self.open.is_empty() && self.closed.is_empty()
    }

    /// The number of closed segments waiting for submission.
    pub fn closed_len(&self) -> usize {
        self.closed.len()
    }

    /// Makes the accumulator continue from `status`: the next message proof
    /// must start right after `status.rx_seq` and the next block update must
    /// go past its verifier height.
    pub fn anchor(&mut self, status: &BmcLinkStatus) {
        self.last_seq = Some(status.rx_seq);
        self.last_height = Some(status.height());
    }

    /// Appends one item.
    pub fn add(&mut self, item: RelayMessageItem) -> Result<()> {
        self.add_group(vec![item])
    }

    /// Appends items that must land in the same segment, like a block proof
    /// and the message proof it anchors.
    ///
    /// Nothing is appended if an item breaks the sequence or height
    /// continuity, or if the group alone exceeds the limit.
    pub fn add_group(&mut self, items: Vec<RelayMessageItem>) -> Result<()> {
        let items: Vec<_> = items
            .into_iter()
            .filter(|item| {
                let empty = item.as_message_proof().is_some_and(|proof| proof.is_empty());
                if empty {
                    tracing::trace!("dropping message proof without events");
                }
                !empty
            })
            .collect();
        let Some(first) = items.first() else {
            return Ok(())
        };
        let (last_seq, last_height) = self.check_continuity(&items)?;
        let size = items
            .iter()
            .fold(0i64, |size, item| size.saturating_add(item.len()));

        if !self.open.is_empty()
            && (self.open.size.saturating_add(size) > self.limit
                || !self.open.accepts(first.kind()))
        {
            self.close();
        }
        if size > self.limit {
            let single_event = matches!(
                items.as_slice(),
                [RelayMessageItem::MessageProof(proof)] if proof.events() == 1
            );
            if !single_event {
                let kind = items
                    .iter()
                    .max_by_key(|item| item.len())
                    .map_or(first.kind(), RelayMessageItem::kind);
                return Err(Error::ItemTooLarge {
                    kind,
                    size,
                    limit: self.limit,
                })
            }
            tracing::warn!(
                size,
                limit = self.limit,
                "single event message proof exceeds the limit, relaying it alone"
            );
        }

        self.last_seq = last_seq;
        self.last_height = last_height;
        for item in items {
            self.open.push(item);
        }
        if self.open.size >= self.limit {
            self.close();
        }
        Ok(())
    }

    fn check_continuity(
        &self,
        items: &[RelayMessageItem],
    ) -> Result<(Option<i64>, Option<i64>)> {
        let mut last_seq = self.last_seq;
        let mut last_height = self.last_height;
        for item in items {
            match item {
                RelayMessageItem::MessageProof(proof) => {
                    if let Some(last) = last_seq {
                        let expected = last.saturating_add(1);
                        if proof.start_seq != expected {
                            return Err(Error::SequenceGap {
                                expected,
                                start_seq: proof.start_seq,
                            })
                        }
                    }
                    last_seq = Some(proof.last_seq);
                }
                RelayMessageItem::BlockUpdate(update) => {
                    if let Some(last) = last_height {
                        if update.target_height <= last {
                            return Err(Error::HeightGap {
                                last_height: last,
                                target_height: update.target_height,
                            })
                        }
                    }
                    last_height = Some(update.target_height);
                }
                RelayMessageItem::BlockProof(_) => {}
            }
        }
        Ok((last_seq, last_height))
    }

    /// Closes the open segment, if it holds any item.
    pub fn close(&mut self) {
        if !self.open.is_empty() {
            let segment = core::mem::take(&mut self.open);
            tracing::trace!(items = segment.len(), size = segment.size, "segment closed");
            self.closed.push_back(segment);
        }
    }

    /// Takes the segments closed so far, leaving the open one in place.
    pub fn take_closed(&mut self) -> Vec<Segment> {
        self.closed.drain(..).collect()
    }

    /// Closes the open segment and takes every segment.
    pub fn flush(&mut self) -> Vec<Segment> {
        self.close();
        self.take_closed()
    }

    /// Drops every segment and the continuity anchor.
    pub fn clear(&mut self) {
        self.open = Segment::default();
        self.closed.clear();
        self.last_seq = None;
        self.last_height = None;
    }
}
