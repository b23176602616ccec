use std::{
    fmt::{self, Debug, Display},
    ops::{Deref, DerefMut},
    str::FromStr,
};

use mailparse::MailAddr;
use serde::{Deserialize, Serialize};

use crate::error::AddressError;

/// A single recipient or sender mailbox.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    pub name: Option<String>,
    pub email: String,
}

impl Address {
    #[must_use]
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            name: None,
            email: email.into(),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The lower-cased host part, i.e. everything after the last `@`.
    ///
    /// An address without an `@` yields the whole address lower-cased.
    #[must_use]
    pub fn partition_key(&self) -> String {
        self.email
            .rsplit_once('@')
            .map_or(self.email.as_str(), |(_, host)| host)
            .to_lowercase()
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) if !name.is_empty() => write!(f, "{name} <{}>", self.email),
            _ => f.write_str(&self.email),
        }
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut list = AddressList::from_str(s)?;

        if list.len() != 1 {
            return Err(AddressError::NotSingle {
                input: s.to_string(),
                count: list.len(),
            });
        }

        Ok(list.0.remove(0))
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.to_string()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AddressList(pub Vec<Address>);

impl Display for AddressList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, addr) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            Display::fmt(addr, f)?;
        }
        Ok(())
    }
}

impl FromStr for AddressList {
    type Err = AddressError;

    /// Parses a comma separated header value. Groups are flattened into
    /// their member mailboxes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = mailparse::addrparse(s).map_err(|e| AddressError::Invalid {
            input: s.to_string(),
            reason: e.to_string(),
        })?;

        let addresses = parsed
            .iter()
            .flat_map(|addr| match addr {
                MailAddr::Single(info) => vec![info.clone()],
                MailAddr::Group(group) => group.addrs.clone(),
            })
            .map(|info| Address {
                name: info.display_name,
                email: info.addr,
            })
            .collect();

        Ok(Self(addresses))
    }
}

impl From<Vec<Address>> for AddressList {
    fn from(value: Vec<Address>) -> Self {
        Self(value)
    }
}

impl Deref for AddressList {
    type Target = Vec<Address>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for AddressList {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}
