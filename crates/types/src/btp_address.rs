//! BTP addresses identify a BMC contract on a network: `btp://<network>/<contract>`.

use core::{
    fmt,
    str::FromStr,
};

const SCHEME: &str = "btp://";

/// The error returned when a string is not a valid BTP address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    /// The address does not start with `btp://`.
    #[error("BTP address `{0}` must start with `btp://`")]
    InvalidScheme(String),
    /// The network part is missing or malformed.
    #[error("BTP address `{0}` has no network part")]
    MissingNetwork(String),
    /// The contract part is missing.
    #[error("BTP address `{0}` has no contract part")]
    MissingContract(String),
}

/// The address of a BMC contract, e.g. `btp://0x1.icon/cx0000000000000000000000000000000000000001`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BtpAddress {
    network: String,
    contract: String,
}

impl BtpAddress {
    /// The network address, e.g. `0x1.icon`.
    pub fn network_address(&self) -> &str {
        &self.network
    }

    /// The network id, e.g. `0x1`.
    pub fn network_id(&self) -> &str {
        self.network
            .split_once('.')
            .map(|(id, _)| id)
            .unwrap_or(&self.network)
    }

    /// The blockchain name, e.g. `icon`.
    pub fn blockchain(&self) -> &str {
        self.network
            .split_once('.')
            .map(|(_, chain)| chain)
            .unwrap_or_default()
    }

    /// The address of the BMC contract on that network.
    pub fn contract_address(&self) -> &str {
        &self.contract
    }
}

impl FromStr for BtpAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix(SCHEME)
            .ok_or_else(|| AddressError::InvalidScheme(s.to_string()))?;
        let (network, contract) = rest
            .split_once('/')
            .ok_or_else(|| AddressError::MissingContract(s.to_string()))?;
        let (id, chain) = network
            .split_once('.')
            .ok_or_else(|| AddressError::MissingNetwork(s.to_string()))?;
        if id.is_empty() || chain.is_empty() {
            return Err(AddressError::MissingNetwork(s.to_string()))
        }
        if contract.is_empty() {
            return Err(AddressError::MissingContract(s.to_string()))
        }

        Ok(Self {
            network: network.to_string(),
            contract: contract.to_string(),
        })
    }
}

impl TryFrom<String> for BtpAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BtpAddress> for String {
    fn from(address: BtpAddress) -> Self {
        address.to_string()
    }
}

impl fmt::Display for BtpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME}{}/{}", self.network, self.contract)
    }
}
