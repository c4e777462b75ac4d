use crate::error::{
    Error,
    Result,
};
use btp_relay_types::{
    BmcLinkStatus,
    ReceiveStatus,
};
use std::collections::VecDeque;

/// The source chain checkpoints with events the destination did not confirm.
#[derive(Debug, Default)]
pub struct ReceiveStatuses {
    statuses: VecDeque<ReceiveStatus>,
}

impl ReceiveStatuses {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReceiveStatus> {
        self.statuses.iter()
    }

    /// Retains the checkpoint. A repeat of the last checkpoint is ignored.
    pub fn push(&mut self, status: ReceiveStatus) -> Result<()> {
        if let Some(last) = self.statuses.back() {
            if *last == status {
                return Ok(())
            }
            if status.height <= last.height || status.seq < last.seq {
                return Err(Error::ReceiveOrder {
                    last: *last,
                    received: status,
                })
            }
        }
        self.statuses.push_back(status);
        Ok(())
    }

    /// Drops the checkpoints fully confirmed by `status` and returns how many.
    pub fn prune(&mut self, status: &BmcLinkStatus) -> usize {
        let confirmed = self
            .statuses
            .iter()
            .take_while(|rs| rs.height <= status.height() && rs.seq <= status.rx_seq)
            .count();
        self.statuses.drain(..confirmed);
        confirmed
    }

    /// The height of the block that emitted the event `seq`.
    pub fn height_for_seq(&self, seq: i64) -> Option<i64> {
        self.statuses
            .iter()
            .find(|rs| rs.seq >= seq)
            .map(|rs| rs.height)
    }
}
