//! A long-lived SMTP client session over plain TCP or STARTTLS.

use std::{sync::Arc, time::Duration};

use base64::{Engine, engine::general_purpose::STANDARD};
use hamail_common::tracing;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::{
    TlsConnector,
    rustls::{
        ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        pki_types::{CertificateDer, ServerName, UnixTime},
    },
};

use super::{
    error::{ClientError, Result},
    response::Response,
};

const BUFFER_SIZE: usize = 8192;

/// Upper bound for a single reply, multi-line replies included.
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

enum ClientConnection {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl ClientConnection {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Plain(stream) => stream.write_all(data).await?,
            Self::Tls(stream) => stream.write_all(data).await?,
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match self {
            Self::Plain(stream) => stream.read(buf).await?,
            Self::Tls(stream) => stream.read(buf).await?,
        };
        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(n)
    }

    async fn upgrade_to_tls(self, domain: &str, accept_invalid_certs: bool) -> Result<Self> {
        let Self::Plain(stream) = self else {
            return Err(ClientError::TlsError(
                "Connection is already TLS".to_string(),
            ));
        };

        let mut root_store = RootCertStore::empty();
        let certs = rustls_native_certs::load_native_certs();
        for cert in certs.certs {
            root_store
                .add(cert)
                .map_err(|e| ClientError::TlsError(format!("Failed to add certificate: {e}")))?;
        }
        if !certs.errors.is_empty() {
            tracing::warn!(?certs.errors, "Some certificates could not be loaded");
        }

        let mut config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        if accept_invalid_certs {
            config
                .dangerous()
                .set_certificate_verifier(Arc::new(NoVerifier));
        }

        let server_name = ServerName::try_from(domain.to_string())
            .map_err(|e| ClientError::TlsError(format!("Invalid domain: {e}")))?;

        let tls_stream = TlsConnector::from(Arc::new(config))
            .connect(server_name, stream)
            .await
            .map_err(|e| ClientError::TlsError(e.to_string()))?;

        Ok(Self::Tls(Box::new(tls_stream)))
    }
}

/// Accepts every certificate. Only for servers with self-signed certificates.
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ED25519,
        ]
    }
}

/// One SMTP session. Every command is bounded by the timeout passed to it.
pub struct SmtpClient {
    connection: Option<ClientConnection>,
    buffer: Vec<u8>,
    buffer_pos: usize,
    server_domain: String,
    accept_invalid_certs: bool,
}

impl SmtpClient {
    ///
    /// Open a TCP connection to `addr`.
    ///
    /// # Errors
    /// If the connection cannot be established within `timeout`.
    ///
    pub async fn connect(addr: &str, server_domain: String, timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::Timeout("connect"))??;

        Ok(Self {
            connection: Some(ClientConnection::Plain(stream)),
            buffer: vec![0u8; BUFFER_SIZE],
            buffer_pos: 0,
            server_domain,
            accept_invalid_certs: false,
        })
    }

    #[must_use]
    pub const fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self.connection, Some(ClientConnection::Tls(_)))
    }

    /// # Errors
    /// If the greeting cannot be read.
    pub async fn read_greeting(&mut self, timeout: Duration) -> Result<Response> {
        bounded(timeout, "greeting", self.read_response()).await
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        let data = format!("{line}\r\n");
        self.connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?
            .send(data.as_bytes())
            .await
    }

    ///
    /// Send `command` and read the reply.
    ///
    /// # Errors
    /// If the session failed or the reply did not arrive within `timeout`.
    ///
    pub async fn command(
        &mut self,
        command: &str,
        name: &'static str,
        timeout: Duration,
    ) -> Result<Response> {
        bounded(timeout, name, async {
            self.send_line(command).await?;
            self.read_response().await
        })
        .await
    }

    /// # Errors
    /// See [`command`](Self::command).
    pub async fn ehlo(&mut self, domain: &str, timeout: Duration) -> Result<Response> {
        self.command(&format!("EHLO {domain}"), "EHLO", timeout).await
    }

    /// # Errors
    /// See [`command`](Self::command).
    pub async fn helo(&mut self, domain: &str, timeout: Duration) -> Result<Response> {
        self.command(&format!("HELO {domain}"), "HELO", timeout).await
    }

    /// # Errors
    /// See [`command`](Self::command).
    pub async fn auth_plain(
        &mut self,
        user: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Response> {
        let token = STANDARD.encode(format!("\0{user}\0{password}"));
        self.command(&format!("AUTH PLAIN {token}"), "AUTH", timeout)
            .await
    }

    /// # Errors
    /// See [`command`](Self::command).
    pub async fn mail_from(&mut self, from: &str, timeout: Duration) -> Result<Response> {
        self.command(&format!("MAIL FROM:<{from}>"), "MAIL FROM", timeout)
            .await
    }

    /// # Errors
    /// See [`command`](Self::command).
    pub async fn rcpt_to(&mut self, to: &str, timeout: Duration) -> Result<Response> {
        self.command(&format!("RCPT TO:<{to}>"), "RCPT TO", timeout)
            .await
    }

    /// # Errors
    /// See [`command`](Self::command).
    pub async fn data(&mut self, timeout: Duration) -> Result<Response> {
        self.command("DATA", "DATA", timeout).await
    }

    ///
    /// Send the message content, dot-stuffed, followed by the end-of-data marker.
    ///
    /// # Errors
    /// If the session failed or the final reply did not arrive within `timeout`.
    ///
    pub async fn send_data(&mut self, content: &str, timeout: Duration) -> Result<Response> {
        let payload = dot_stuff(content);

        bounded(timeout, "message content", async {
            self.connection
                .as_mut()
                .ok_or(ClientError::ConnectionClosed)?
                .send(payload.as_bytes())
                .await?;
            self.read_response().await
        })
        .await
    }

    /// # Errors
    /// See [`command`](Self::command).
    pub async fn rset(&mut self, timeout: Duration) -> Result<Response> {
        self.command("RSET", "RSET", timeout).await
    }

    /// # Errors
    /// See [`command`](Self::command).
    pub async fn quit(&mut self, timeout: Duration) -> Result<Response> {
        self.command("QUIT", "QUIT", timeout).await
    }

    ///
    /// Send STARTTLS and, if the server agrees, upgrade the connection.
    ///
    /// # Errors
    /// If the command or the TLS handshake fails.
    ///
    pub async fn starttls(&mut self, timeout: Duration) -> Result<Response> {
        let response = self.command("STARTTLS", "STARTTLS", timeout).await?;

        if response.is_success() {
            let connection = self
                .connection
                .take()
                .ok_or(ClientError::ConnectionClosed)?;

            let upgraded = bounded(
                timeout,
                "TLS handshake",
                connection.upgrade_to_tls(&self.server_domain, self.accept_invalid_certs),
            )
            .await?;

            self.connection = Some(upgraded);
            self.buffer_pos = 0;
        }

        Ok(response)
    }

    async fn read_response(&mut self) -> Result<Response> {
        loop {
            if let Some((response, consumed)) = Response::parse(&self.buffer[..self.buffer_pos])? {
                self.buffer.copy_within(consumed..self.buffer_pos, 0);
                self.buffer_pos -= consumed;
                return Ok(response);
            }

            if self.buffer_pos >= self.buffer.len() {
                let new_size = self.buffer.len() * 2;
                if new_size > MAX_BUFFER_SIZE {
                    return Err(ClientError::ParseError(format!(
                        "Response too large (exceeds {MAX_BUFFER_SIZE} bytes)"
                    )));
                }
                self.buffer.resize(new_size, 0);
            }

            let connection = self
                .connection
                .as_mut()
                .ok_or(ClientError::ConnectionClosed)?;
            let n = connection.read(&mut self.buffer[self.buffer_pos..]).await?;
            self.buffer_pos += n;
        }
    }
}

async fn bounded<T>(
    timeout: Duration,
    name: &'static str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| ClientError::Timeout(name))?
}

/// Normalises line endings to CRLF, doubles leading dots and appends `.`.
fn dot_stuff(content: &str) -> String {
    let mut out = String::with_capacity(content.len() + 8);

    for line in content.lines() {
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
        out.push_str("\r\n");
    }

    out.push_str(".\r\n");
    out
}
