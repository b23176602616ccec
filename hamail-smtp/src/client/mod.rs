//! Minimal SMTP client used by [`SmtpTransport`](crate::SmtpTransport).
//!
//! Unlike a one-shot delivery client, a session stays open across many
//! transactions: `MAIL`/`RCPT`/`DATA` are repeated on the same connection,
//! with `RSET` after a failed transaction.

mod error;
mod response;
mod smtp_client;

pub use error::{ClientError, Result};
pub use response::Response;
pub use smtp_client::SmtpClient;
