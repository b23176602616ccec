use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::{Address, AddressList};

/// An outbound message.
///
/// Envelope recipients are supplied separately at send time; `to`, `cc` and
/// `bcc` are the header recipients, together forming [`Message::all_recipients`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub from: Option<Address>,
    #[serde(default)]
    pub to: AddressList,
    #[serde(default)]
    pub cc: AddressList,
    #[serde(default)]
    pub bcc: AddressList,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
}

impl Message {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_address(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    #[must_use]
    pub fn to(mut self, to: Address) -> Self {
        self.to.push(to);
        self
    }

    #[must_use]
    pub fn cc(mut self, cc: Address) -> Self {
        self.cc.push(cc);
        self
    }

    #[must_use]
    pub fn bcc(mut self, bcc: Address) -> Self {
        self.bcc.push(bcc);
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub const fn has_subject(&self) -> bool {
        self.subject.is_some()
    }

    #[must_use]
    pub const fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// Every header recipient: To, then Cc, then Bcc.
    pub fn all_recipients(&self) -> impl Iterator<Item = &Address> {
        self.to.iter().chain(self.cc.iter()).chain(self.bcc.iter())
    }

    #[must_use]
    pub fn recipient_count(&self) -> usize {
        self.to.len() + self.cc.len() + self.bcc.len()
    }

    /// Fills a missing subject and body with empty strings.
    pub fn apply_defaults(&mut self) {
        self.subject.get_or_insert_with(String::new);
        self.body.get_or_insert_with(String::new);
    }

    /// Renders the message as RFC 5322 text with CRLF line endings.
    ///
    /// Bcc recipients are never written to the headers.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        let date = self.date.unwrap_or_else(Utc::now);

        let _ = write!(out, "Date: {}\r\n", date.to_rfc2822());
        if let Some(from) = &self.from {
            let _ = write!(out, "From: {from}\r\n");
        }
        if !self.to.is_empty() {
            let _ = write!(out, "To: {}\r\n", self.to);
        }
        if !self.cc.is_empty() {
            let _ = write!(out, "Cc: {}\r\n", self.cc);
        }
        let _ = write!(out, "Subject: {}\r\n", self.subject.as_deref().unwrap_or_default());
        for (name, value) in &self.headers {
            let _ = write!(out, "{name}: {value}\r\n");
        }
        out.push_str("MIME-Version: 1.0\r\n");
        out.push_str("Content-Type: text/plain; charset=utf-8\r\n");
        out.push_str("\r\n");

        for line in self.body.as_deref().unwrap_or_default().lines() {
            out.push_str(line);
            out.push_str("\r\n");
        }

        out
    }
}
