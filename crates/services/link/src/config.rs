//! Settings of a link.

use btp_relay_types::BtpAddress;
use std::time::Duration;

#[derive(Clone, Debug)]
/// Configuration settings for a link.
pub struct Config {
    /// The BMC of the source chain, where the events are emitted.
    pub src: BtpAddress,
    /// The BMC of the destination chain, where the relay messages are delivered.
    pub dst: BtpAddress,
    /// Submit a segment only once it is full instead of at the end of every round.
    pub max_size_tx: bool,
    /// The delay between two polls of a pending relay transaction.
    pub result_poll_interval: Duration,
    /// Resubmit a relay message still pending after this long.
    /// `None` polls until the transaction is final.
    pub result_timeout: Option<Duration>,
    /// The capacity of the channel carrying polled results to the link.
    pub event_channel_capacity: usize,
}

#[allow(missing_docs)]
impl Config {
    pub const DEFAULT_MAX_SIZE_TX: bool = false;
    pub const DEFAULT_RESULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
    pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;
}

impl Config {
    /// Creates the configuration of the link `src -> dst` with default settings.
    pub fn new(src: BtpAddress, dst: BtpAddress) -> Self {
        Self {
            src,
            dst,
            max_size_tx: Self::DEFAULT_MAX_SIZE_TX,
            result_poll_interval: Self::DEFAULT_RESULT_POLL_INTERVAL,
            result_timeout: None,
            event_channel_capacity: Self::DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}
