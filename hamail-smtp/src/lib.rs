//! SMTP transport provider for hamail.
//!
//! [`SmtpTransport`] keeps one SMTP session open and runs a full
//! `MAIL`/`RCPT`/`DATA` transaction per delivery, so it can sit behind a
//! connection pool. STARTTLS is used whenever offered, and required when
//! [`SmtpConfig::require_tls`] is set; credentials in the connect target are
//! sent with `AUTH PLAIN`.

pub mod client;
mod config;
mod transport;

pub use config::{SmtpConfig, SmtpTimeouts};
pub use transport::{PROTOCOL, SmtpProvider, SmtpTransport};
