//! Client-side session transport
//!
//! One connection, one outstanding request: [`MailSession`] writes a
//! framed command and waits for exactly one framed reply, with a
//! fixed timeout. Transport failures are folded into synthetic
//! `ERROR|...` responses so callers branch on one shape; the session
//! never retries on its own -- re-invoking the operation reconnects.
//!
//! A timed-out request drops the connection. Keeping it open would
//! let the server's late reply be read back later as the answer to a
//! completely different command (the protocol has no correlation
//! ids), so the stale socket is discarded instead.

use crate::codec;
use crate::error::{Error, Result};
use crate::protocol::{Command, Response};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// How long to wait for a reply before giving up on the connection.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// A lazily-connected session to the mail server.
pub struct MailSession {
    host: String,
    port: u16,
    response_timeout: Duration,
    stream: Option<TcpStream>,
}

impl MailSession {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            response_timeout: RESPONSE_TIMEOUT,
            stream: None,
        }
    }

    /// Override the reply timeout (tests use short values).
    #[must_use]
    pub const fn with_timeout(mut self, response_timeout: Duration) -> Self {
        self.response_timeout = response_timeout;
        self
    }

    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Open the connection. One attempt, no retry.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the server is unreachable.
    pub async fn connect(&mut self) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        debug!(%addr, "Connecting to server");

        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| Error::Connection(format!("Cannot connect to server: {e}")))?;
        self.stream = Some(stream);
        Ok(())
    }

    /// Drop the connection, if any.
    pub fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            debug!("Disconnected from server");
        }
    }

    /// Send one command and wait for its reply.
    pub async fn send_command(&mut self, command: &Command) -> Response {
        self.send_raw(&command.encode()).await
    }

    /// Send one raw command line and wait for its reply.
    ///
    /// Connects on demand. Every transport failure surfaces as an
    /// `ERROR|...` response and marks the connection dead; the next
    /// call starts over with a fresh connect.
    pub async fn send_raw(&mut self, line: &str) -> Response {
        if self.stream.is_none() {
            if let Err(e) = self.connect().await {
                warn!(error = %e, "Connection attempt failed");
                return Response::error("Not connected to server");
            }
        }
        let Some(mut stream) = self.stream.take() else {
            return Response::error("Not connected to server");
        };

        if let Err(e) = codec::write_frame(&mut stream, line).await {
            warn!(error = %e, "Send failed, marking connection dead");
            return Response::error(e.to_string());
        }

        match timeout(self.response_timeout, codec::read_frame(&mut stream)).await {
            Ok(Ok(Some(reply))) => {
                // Only a successful exchange keeps the connection.
                self.stream = Some(stream);
                Response::parse(&reply)
            }
            Ok(Ok(None)) => {
                warn!("Server closed the connection");
                Response::error("Connection error")
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Receive failed, marking connection dead");
                Response::error(e.to_string())
            }
            Err(_) => {
                warn!("No reply within timeout, marking connection dead");
                Response::error("Server timeout")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Status;
    use tokio::net::TcpListener;

    /// A one-shot server that answers every frame with `reply`.
    async fn echo_server(reply: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            while let Ok(Some(_)) = codec::read_frame(&mut stream).await {
                codec::write_frame(&mut stream, reply).await.unwrap();
            }
        });
        port
    }

    #[tokio::test]
    async fn request_reply_round_trip() {
        let port = echo_server("OK|Welcome alice!").await;
        let mut session = MailSession::new("127.0.0.1", port);

        let resp = session.send_raw("LOGIN|alice|pw1").await;
        assert_eq!(resp, Response::ok("Welcome alice!"));
        assert!(session.is_connected());

        // The connection is reused for the next command.
        let resp = session.send_raw("STATUS|alice").await;
        assert!(resp.is_ok());
    }

    #[tokio::test]
    async fn refused_connection_is_reported_not_retried() {
        // Bind and immediately drop to get a dead port.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut session = MailSession::new("127.0.0.1", port);
        let resp = session.send_raw("STATUS").await;
        assert_eq!(resp.status, Status::Error);
        assert_eq!(resp.rest, "Not connected to server");
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn silent_server_times_out_and_drops_connection() {
        // Accepts but never replies.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            std::future::pending::<()>().await;
        });

        let mut session =
            MailSession::new("127.0.0.1", port).with_timeout(Duration::from_millis(50));
        let resp = session.send_raw("STATUS").await;
        assert_eq!(resp, Response::error("Server timeout"));
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn peer_close_is_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let mut session = MailSession::new("127.0.0.1", port);
        let resp = session.send_raw("STATUS").await;
        assert_eq!(resp, Response::error("Connection error"));
        assert!(!session.is_connected());
    }
}
