//! Recipient grouping strategies.
//!
//! A strategy splits the envelope recipients of one send into groups, each
//! group being delivered by its own send worker over its own connection.

use std::{collections::hash_map::Entry, fmt, str::FromStr};

use ahash::AHashMap;
use hamail_common::Address;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum GroupingStrategy {
    /// All recipients in a single group.
    #[default]
    PassThrough,
    /// One group per recipient host, compared case-insensitively.
    ByHost,
}

impl GroupingStrategy {
    /// Partition `addresses` into delivery groups.
    ///
    /// Every address lands in exactly one group. Inputs of at most one
    /// address are returned as a single group whatever the strategy.
    #[must_use]
    pub fn partition(self, addresses: &[Address]) -> Vec<Vec<Address>> {
        if addresses.len() <= 1 {
            return vec![addresses.to_vec()];
        }

        match self {
            Self::PassThrough => vec![addresses.to_vec()],
            Self::ByHost => group_by_host(addresses),
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::PassThrough => "none",
            Self::ByHost => "host",
        }
    }
}

/// Groups follow the order in which each host was first seen.
fn group_by_host(addresses: &[Address]) -> Vec<Vec<Address>> {
    let mut positions: AHashMap<String, usize> = AHashMap::with_capacity(addresses.len());
    let mut groups: Vec<Vec<Address>> = Vec::new();

    for address in addresses {
        match positions.entry(address.partition_key()) {
            Entry::Occupied(entry) => groups[*entry.get()].push(address.clone()),
            Entry::Vacant(entry) => {
                entry.insert(groups.len());
                groups.push(vec![address.clone()]);
            }
        }
    }

    groups
}

impl FromStr for GroupingStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "simple" | "pass-through" | "passthrough" => Ok(Self::PassThrough),
            "host" | "by-host" | "host-partition" => Ok(Self::ByHost),
            _ => Err(ConfigError::UnknownStrategy(s.to_string())),
        }
    }
}

impl TryFrom<String> for GroupingStrategy {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<GroupingStrategy> for String {
    fn from(value: GroupingStrategy) -> Self {
        value.name().to_string()
    }
}

impl fmt::Display for GroupingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
