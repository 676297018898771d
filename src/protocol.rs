//! Command grammar, responses, and listing formats
//!
//! A command is one text line, `VERB|arg1|arg2|...`. The verb set is
//! closed: parsing yields a [`Command`] variant and dispatch is an
//! exhaustive match, so adding a verb is a compile-time-checked
//! extension. Verbs whose final field is free text (a SEND body, a
//! REGISTER password) use bounded splitting, so that field may legally
//! contain `|`.
//!
//! Responses are one line whose first `|`-delimited token is `OK`,
//! `ERROR`, or `EMPTY`. List-bearing responses encode each item as
//! `field~field~...` joined by `;`; subjects are sanitized at capture
//! time so the sub-delimiters never appear inside a field.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error as ThisError;

/// Timestamp format shared by the store, the wire, and cache files.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current local time in the shared wire format.
#[must_use]
pub fn timestamp_now() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Replace delimiter characters in a subject line.
///
/// `|` and `~` become `-`, `;` becomes `,`. Applied when a subject is
/// captured (client compose) and again when the server stores it, so
/// listings always split back into the exact field count.
#[must_use]
pub fn sanitize_subject(subject: &str) -> String {
    subject
        .chars()
        .map(|c| match c {
            '|' | '~' => '-',
            ';' => ',',
            other => other,
        })
        .collect()
}

/// A parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Register {
        username: String,
        password: String,
    },
    Login {
        username: String,
        password: String,
    },
    Send {
        from: String,
        to: String,
        subject: String,
        body: String,
    },
    Inbox {
        username: String,
    },
    Sent {
        username: String,
    },
    Read {
        username: String,
        id: u64,
    },
    Delete {
        username: String,
        id: u64,
    },
    Forward {
        username: String,
        id: u64,
        to: String,
    },
    Export {
        username: String,
        id: u64,
    },
    /// Per-user aggregate when a username is given, global otherwise.
    Status {
        username: Option<String>,
    },
}

/// Why a command line failed to parse.
///
/// The `Display` strings are the exact texts sent back after the
/// `ERROR|` token.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum ParseError {
    #[error("Empty command")]
    Empty,

    #[error("Unknown command '{0}'")]
    UnknownVerb(String),

    #[error("Invalid {0} format")]
    BadFormat(&'static str),

    #[error("Invalid message id")]
    BadId,
}

/// Split into exactly `N` fields; extra fields are a format error.
fn split_exact<'a, const N: usize>(
    line: &'a str,
    verb: &'static str,
) -> std::result::Result<[&'a str; N], ParseError> {
    let mut fields = [""; N];
    let mut parts = line.split('|');
    for slot in &mut fields {
        *slot = parts.next().ok_or(ParseError::BadFormat(verb))?;
    }
    if parts.next().is_some() {
        return Err(ParseError::BadFormat(verb));
    }
    Ok(fields)
}

/// Split into `N` fields where the last one absorbs any remaining
/// `|`-separated text.
fn split_tail<'a, const N: usize>(
    line: &'a str,
    verb: &'static str,
) -> std::result::Result<[&'a str; N], ParseError> {
    let mut fields = [""; N];
    let mut parts = line.splitn(N, '|');
    for slot in &mut fields {
        *slot = parts.next().ok_or(ParseError::BadFormat(verb))?;
    }
    Ok(fields)
}

fn parse_id(field: &str) -> std::result::Result<u64, ParseError> {
    field.parse().map_err(|_| ParseError::BadId)
}

impl Command {
    /// Parse one wire line into a command.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] for an empty line, an unknown verb, a
    /// wrong field count, or a non-numeric message id.
    pub fn parse(line: &str) -> std::result::Result<Self, ParseError> {
        if line.is_empty() {
            return Err(ParseError::Empty);
        }

        let verb = line.split('|').next().unwrap_or_default();

        match verb {
            "REGISTER" => {
                let [_, username, password] = split_tail::<3>(line, "REGISTER")?;
                Ok(Self::Register {
                    username: username.to_string(),
                    password: password.to_string(),
                })
            }
            "LOGIN" => {
                let [_, username, password] = split_exact::<3>(line, "LOGIN")?;
                Ok(Self::Login {
                    username: username.to_string(),
                    password: password.to_string(),
                })
            }
            "SEND" => {
                let [_, from, to, subject, body] = split_tail::<5>(line, "SEND")?;
                Ok(Self::Send {
                    from: from.to_string(),
                    to: to.to_string(),
                    subject: subject.to_string(),
                    body: body.to_string(),
                })
            }
            "INBOX" => {
                let [_, username] = split_exact::<2>(line, "INBOX")?;
                Ok(Self::Inbox {
                    username: username.to_string(),
                })
            }
            "SENT" => {
                let [_, username] = split_exact::<2>(line, "SENT")?;
                Ok(Self::Sent {
                    username: username.to_string(),
                })
            }
            "READ" => {
                let [_, username, id] = split_exact::<3>(line, "READ")?;
                Ok(Self::Read {
                    username: username.to_string(),
                    id: parse_id(id)?,
                })
            }
            "DELETE" => {
                let [_, username, id] = split_exact::<3>(line, "DELETE")?;
                Ok(Self::Delete {
                    username: username.to_string(),
                    id: parse_id(id)?,
                })
            }
            "FORWARD" => {
                let [_, username, id, to] = split_exact::<4>(line, "FORWARD")?;
                Ok(Self::Forward {
                    username: username.to_string(),
                    id: parse_id(id)?,
                    to: to.to_string(),
                })
            }
            "EXPORT" => {
                let [_, username, id] = split_exact::<3>(line, "EXPORT")?;
                Ok(Self::Export {
                    username: username.to_string(),
                    id: parse_id(id)?,
                })
            }
            "STATUS" => {
                // Exactly one argument selects the per-user report;
                // any other shape falls back to the global one.
                let fields: Vec<&str> = line.split('|').collect();
                let username = if fields.len() == 2 {
                    Some(fields[1].to_string())
                } else {
                    None
                };
                Ok(Self::Status { username })
            }
            other => Err(ParseError::UnknownVerb(other.to_string())),
        }
    }

    /// Encode this command as its wire line.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Register { username, password } => format!("REGISTER|{username}|{password}"),
            Self::Login { username, password } => format!("LOGIN|{username}|{password}"),
            Self::Send {
                from,
                to,
                subject,
                body,
            } => format!("SEND|{from}|{to}|{subject}|{body}"),
            Self::Inbox { username } => format!("INBOX|{username}"),
            Self::Sent { username } => format!("SENT|{username}"),
            Self::Read { username, id } => format!("READ|{username}|{id}"),
            Self::Delete { username, id } => format!("DELETE|{username}|{id}"),
            Self::Forward { username, id, to } => format!("FORWARD|{username}|{id}|{to}"),
            Self::Export { username, id } => format!("EXPORT|{username}|{id}"),
            Self::Status { username } => username
                .as_ref()
                .map_or_else(|| "STATUS".to_string(), |u| format!("STATUS|{u}")),
        }
    }

    /// The verb token, for logging.
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Register { .. } => "REGISTER",
            Self::Login { .. } => "LOGIN",
            Self::Send { .. } => "SEND",
            Self::Inbox { .. } => "INBOX",
            Self::Sent { .. } => "SENT",
            Self::Read { .. } => "READ",
            Self::Delete { .. } => "DELETE",
            Self::Forward { .. } => "FORWARD",
            Self::Export { .. } => "EXPORT",
            Self::Status { .. } => "STATUS",
        }
    }

    /// Whether the command carries credentials that must not be logged.
    #[must_use]
    pub const fn has_credentials(&self) -> bool {
        matches!(self, Self::Register { .. } | Self::Login { .. })
    }
}

/// Status token of a response line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Error,
    Empty,
}

impl Status {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Error => "ERROR",
            Self::Empty => "EMPTY",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded server response: the status token plus everything after
/// the first `|`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub rest: String,
}

impl Response {
    #[must_use]
    pub fn ok(rest: impl Into<String>) -> Self {
        Self {
            status: Status::Ok,
            rest: rest.into(),
        }
    }

    #[must_use]
    pub fn error(rest: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            rest: rest.into(),
        }
    }

    #[must_use]
    pub fn empty(rest: impl Into<String>) -> Self {
        Self {
            status: Status::Empty,
            rest: rest.into(),
        }
    }

    /// Parse a response line. A line with an unrecognized status
    /// token is treated as an error response carrying the whole line.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let (token, rest) = line.split_once('|').unwrap_or((line, ""));
        match token {
            "OK" => Self::ok(rest),
            "ERROR" => Self::error(rest),
            "EMPTY" => Self::empty(rest),
            _ => Self::error(line),
        }
    }

    /// Encode as a wire line.
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{}|{}", self.status, self.rest)
    }

    /// First `|`-delimited field after the status token -- the
    /// human-readable message of OK/ERROR/EMPTY responses.
    #[must_use]
    pub fn message(&self) -> &str {
        self.rest.split('|').next().unwrap_or_default()
    }

    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self.status, Status::Ok)
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self.status, Status::Empty)
    }

    /// Turn a non-OK response into [`Error::Server`].
    ///
    /// # Errors
    ///
    /// Returns `Error::Server` with the response message when the
    /// status is not `OK`.
    pub fn into_ok(self) -> Result<Self> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(Error::Server(self.message().to_string()))
        }
    }
}

/// One inbox listing item: `id~from~subject~timestamp~READ|UNREAD`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxEntry {
    pub id: u64,
    pub from: String,
    pub subject: String,
    pub timestamp: String,
    pub read: bool,
}

impl InboxEntry {
    #[must_use]
    pub fn encode(&self) -> String {
        let status = if self.read { "READ" } else { "UNREAD" };
        format!(
            "{}~{}~{}~{}~{}",
            self.id, self.from, self.subject, self.timestamp, status
        )
    }
}

/// One sent listing item: `id~to~subject~timestamp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentEntry {
    pub id: u64,
    pub to: String,
    pub subject: String,
    pub timestamp: String,
}

impl SentEntry {
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{}~{}~{}~{}", self.id, self.to, self.subject, self.timestamp)
    }
}

/// Join listing items with `;`.
#[must_use]
pub fn encode_listing<T, F>(items: &[T], encode: F) -> String
where
    F: Fn(&T) -> String,
{
    items.iter().map(encode).collect::<Vec<_>>().join(";")
}

/// Parse the `;`-joined inbox listing. Malformed items are skipped.
#[must_use]
pub fn parse_inbox_listing(data: &str) -> Vec<InboxEntry> {
    data.split(';')
        .filter(|item| !item.trim().is_empty())
        .filter_map(|item| {
            let fields: Vec<&str> = item.split('~').collect();
            if fields.len() < 5 {
                return None;
            }
            Some(InboxEntry {
                id: fields[0].parse().ok()?,
                from: fields[1].to_string(),
                subject: fields[2].to_string(),
                timestamp: fields[3].to_string(),
                read: fields[4] == "READ",
            })
        })
        .collect()
}

/// Parse the `;`-joined sent listing. Malformed items are skipped.
#[must_use]
pub fn parse_sent_listing(data: &str) -> Vec<SentEntry> {
    data.split(';')
        .filter(|item| !item.trim().is_empty())
        .filter_map(|item| {
            let fields: Vec<&str> = item.split('~').collect();
            if fields.len() < 4 {
                return None;
            }
            Some(SentEntry {
                id: fields[0].parse().ok()?,
                to: fields[1].to_string(),
                subject: fields[2].to_string(),
                timestamp: fields[3].to_string(),
            })
        })
        .collect()
}

/// A full message as carried by the READ response:
/// `OK|id|from|to|subject|body|timestamp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageView {
    pub id: u64,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub timestamp: String,
}

impl MessageView {
    /// Parse the payload of an OK READ response (everything after the
    /// status token).
    ///
    /// The body is the second-to-last field and may contain `|`; the
    /// timestamp is recovered by splitting the remainder from its
    /// right end, where no `|` can legally appear.
    ///
    /// # Errors
    ///
    /// Returns a protocol error on a wrong field count or a
    /// non-numeric id.
    pub fn parse(rest: &str) -> Result<Self> {
        let malformed = || Error::Protocol(format!("Malformed READ response: {rest}"));

        let fields: Vec<&str> = rest.splitn(5, '|').collect();
        if fields.len() < 5 {
            return Err(malformed());
        }
        let (body, timestamp) = fields[4].rsplit_once('|').ok_or_else(malformed)?;

        Ok(Self {
            id: fields[0].parse().map_err(|_| malformed())?,
            from: fields[1].to_string(),
            to: fields[2].to_string(),
            subject: fields[3].to_string(),
            body: body.to_string(),
            timestamp: timestamp.to_string(),
        })
    }

    /// Encode the payload fields of the READ response.
    #[must_use]
    pub fn encode(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}",
            self.id, self.from, self.to, self.subject, self.body, self.timestamp
        )
    }
}
