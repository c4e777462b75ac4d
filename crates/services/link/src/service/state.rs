use crate::{
    accumulator::Accumulator,
    error::Result,
    receive_statuses::ReceiveStatuses,
    window::{
        DeliveryWindow,
        InFlight,
    },
};
use btp_relay_types::RelayId;
use btp_relay_types::{
    BmcLinkStatus,
    RelayMessageItem,
};

/// The mutable state of a link, guarded by one lock.
#[derive(Debug)]
pub(crate) struct LinkState {
    /// The last status confirmed by the destination.
    pub confirmed: BmcLinkStatus,
    /// The status the destination reaches once every in-flight and
    /// accumulated item is applied.
    pub shadow: BmcLinkStatus,
    /// The furthest target the destination reported as already verified.
    pub verified: BmcLinkStatus,
    pub accumulator: Accumulator,
    pub window: DeliveryWindow,
    pub receive_statuses: ReceiveStatuses,
}

impl LinkState {
    pub fn new(limit: i64) -> Self {
        Self {
            confirmed: BmcLinkStatus::default(),
            shadow: BmcLinkStatus::default(),
            verified: BmcLinkStatus::default(),
            accumulator: Accumulator::new(limit),
            window: DeliveryWindow::new(),
            receive_statuses: ReceiveStatuses::new(),
        }
    }

    /// Starts over from the destination `status`.
    pub fn reset(&mut self, status: BmcLinkStatus) {
        self.verified = status.clone();
        self.confirmed = status;
        self.rebase();
    }

    /// The status the next segment is built on.
    pub fn base(&self) -> BmcLinkStatus {
        match self.window.last_target() {
            Some(target) => target.clone(),
            None => self.confirmed.furthest(&self.verified),
        }
    }

    /// Drops the entry `id` and every earlier one, which the destination
    /// already verified.
    pub fn discard_verified(&mut self, id: RelayId) -> Vec<InFlight> {
        let discarded = self.window.discard_through(id);
        if let Some(entry) = discarded.last() {
            self.verified = self.verified.furthest(&entry.target);
        }
        discarded
    }

    /// Drops the accumulated items and continues from the last in-flight entry.
    pub fn rebase(&mut self) {
        self.shadow = self.base();
        self.accumulator.clear();
        self.accumulator.anchor(&self.shadow);
    }

    /// Appends the items to the accumulator and advances the shadow status.
    pub fn append(&mut self, items: Vec<RelayMessageItem>) -> Result<()> {
        let mut shadow = self.shadow.clone();
        for item in &items {
            item.update_link_status(&mut shadow);
        }
        self.accumulator.add_group(items)?;
        self.shadow = shadow;
        Ok(())
    }

    /// Records the status confirmed by the destination and prunes what it
    /// covers. Returns `false` if the status is behind the last one.
    pub fn confirm(&mut self, status: BmcLinkStatus) -> Result<bool> {
        if self.confirmed.is_regressed_by(&status) {
            tracing::warn!(
                confirmed = %self.confirmed,
                received = %status,
                "ignoring link status behind the confirmed one"
            );
            return Ok(false)
        }
        let confirmed = self.window.confirm(&status)?;
        let pruned = self.receive_statuses.prune(&status);
        for entry in &confirmed {
            tracing::debug!(id = %entry.id, target = %entry.target, "relay message confirmed");
        }
        tracing::trace!(%status, pruned, "link status confirmed");
        self.confirmed = status;
        if self.shadow.is_reached_by(&self.confirmed) {
            if !self.accumulator.is_empty() {
                tracing::debug!(
                    confirmed = %self.confirmed,
                    "dropping accumulated items the destination already applied"
                );
            }
            self.rebase();
        }
        Ok(true)
    }
}
