//! TCP server: connection multiplexing and command dispatch
//!
//! The accept loop spawns one task per connection; every command is
//! parsed into a [`Command`] and dispatched through an exhaustive
//! match while holding the store lock, so handler execution for one
//! command runs to completion (including snapshot persistence) before
//! any other command touches the store. A malformed command, a
//! misbehaving client, or a disconnect only ever ends that one
//! connection.

use crate::codec;
use crate::error::Result;
use crate::protocol::{Command, InboxEntry, MessageView, Response, SentEntry, encode_listing};
use crate::store::{MailStore, Message, StoreError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// The mail server: a bound listener plus the shared store.
pub struct MailServer {
    listener: TcpListener,
    state: Arc<ServerState>,
}

struct ServerState {
    store: Mutex<MailStore>,
    /// Live connection count, reported by the global STATUS command.
    sessions: AtomicUsize,
}

impl ServerState {
    fn store(&self) -> std::sync::MutexGuard<'_, MailStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MailServer {
    /// Bind to `host:port` (port 0 picks a free port) around the
    /// given store.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(host: &str, port: u16, store: MailStore) -> Result<Self> {
        let listener = TcpListener::bind(format!("{host}:{port}")).await?;
        info!(addr = %listener.local_addr()?, "Server listening");

        Ok(Self {
            listener,
            state: Arc::new(ServerState {
                store: Mutex::new(store),
                sessions: AtomicUsize::new(0),
            }),
        })
    }

    /// The bound address (useful after binding to port 0).
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Registered user and stored message counts, for shutdown logs.
    #[must_use]
    pub fn summary(&self) -> (usize, usize) {
        let status = self.state.store().global_status();
        (status.users, status.emails)
    }

    /// Accept connections forever, spawning one task per client.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener fails to accept.
    pub async fn run(&self) -> Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            info!(%peer, "New connection");
            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                handle_connection(stream, peer, &state).await;
            });
        }
    }
}

/// Serve one client: framed request in, framed response out, until
/// disconnect. Socket errors end this connection only.
async fn handle_connection(mut stream: TcpStream, peer: SocketAddr, state: &ServerState) {
    state.sessions.fetch_add(1, Ordering::Relaxed);

    loop {
        let line = match codec::read_frame(&mut stream).await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!(%peer, "Client disconnected");
                break;
            }
            Err(e) => {
                warn!(%peer, error = %e, "Socket error, dropping connection");
                break;
            }
        };

        let response = dispatch(state, &line);
        debug!(%peer, response = %truncate(&response), "Response sent");

        if let Err(e) = codec::write_frame(&mut stream, &response).await {
            warn!(%peer, error = %e, "Write failed, dropping connection");
            break;
        }
    }

    state.sessions.fetch_sub(1, Ordering::Relaxed);
}

/// First 80 characters of a line, for log output.
fn truncate(line: &str) -> &str {
    line.char_indices()
        .nth(80)
        .map_or(line, |(idx, _)| &line[..idx])
}

/// Parse and execute one command line, rendering every outcome as a
/// response line. Never panics a connection away: parse and domain
/// failures both become `ERROR|...`.
fn dispatch(state: &ServerState, line: &str) -> String {
    let command = match Command::parse(line) {
        Ok(command) => command,
        Err(e) => {
            debug!(error = %e, "Rejected command");
            return Response::error(e.to_string()).encode();
        }
    };

    if command.has_credentials() {
        debug!(verb = command.verb(), "Command received (credentials hidden)");
    } else {
        debug!(command = %truncate(line), "Command received");
    }

    execute(state, &command).encode()
}

fn execute(state: &ServerState, command: &Command) -> Response {
    let mut store = state.store();

    let result = match command {
        Command::Register { username, password } => store
            .register(username, password)
            .map(|()| Response::ok(format!("User {username} registered successfully"))),

        Command::Login { username, password } => store
            .authenticate(username, password)
            .map(|()| Response::ok(format!("Welcome {username}!"))),

        Command::Send {
            from,
            to,
            subject,
            body,
        } => store
            .deliver(from, to, subject, body)
            .map(|_| Response::ok(format!("Email sent to {to}"))),

        Command::Inbox { username } => {
            let inbox = store.list_inbox(username);
            if inbox.is_empty() {
                Ok(Response::empty("No emails in inbox"))
            } else {
                let listing = encode_listing(&inbox, InboxEntry::encode);
                Ok(Response::ok(format!("{}|{listing}", inbox.len())))
            }
        }

        Command::Sent { username } => {
            let sent = store.list_sent(username);
            if sent.is_empty() {
                Ok(Response::empty("No sent emails"))
            } else {
                let listing = encode_listing(&sent, SentEntry::encode);
                Ok(Response::ok(format!("{}|{listing}", sent.len())))
            }
        }

        Command::Read { username, id } => store
            .read(username, *id)
            .map(|message| Response::ok(view_of(&message).encode())),

        Command::Delete { username, id } => store
            .delete(username, *id)
            .map(|()| Response::ok(format!("Email #{id} deleted"))),

        Command::Forward { username, id, to } => store
            .forward(username, *id, to)
            .map(|_| Response::ok(format!("Email forwarded to {to}"))),

        Command::Export { username, id } => store
            .export(username, *id)
            .map(|(filename, content)| Response::ok(format!("{filename}|{content}"))),

        Command::Status {
            username: Some(username),
        } => {
            let status = store.user_status(username);
            Ok(Response::ok(format!(
                "Inbox: {} ({} unread)|Sent: {}",
                status.inbox_total, status.unread, status.sent_total
            )))
        }

        Command::Status { username: None } => {
            let status = store.global_status();
            let sessions = state.sessions.load(Ordering::Relaxed);
            Ok(Response::ok(format!(
                "Users: {}|Emails: {}|Active Clients: {sessions}",
                status.users, status.emails
            )))
        }
    };

    result.unwrap_or_else(|e: StoreError| Response::error(e.to_string()))
}

fn view_of(message: &Message) -> MessageView {
    MessageView {
        id: message.id,
        from: message.from.clone(),
        to: message.to.clone(),
        subject: message.subject.clone(),
        body: message.body.clone(),
        timestamp: message.timestamp.clone(),
    }
}
