#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! CLI for the SigMail messaging service
//!
//! Credentials come from `SIGMAIL_USERNAME` and `SIGMAIL_PASSWORD`
//! (a `.env` file works); the server address and data directory from
//! `SIGMAIL_HOST`, `SIGMAIL_PORT`, and `SIGMAIL_DATA_DIR`.

use clap::{Parser, Subcommand};
use sigmail::{ClientConfig, Draft, InboxEntry, MailClient, MessageView, SentEntry};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sigmail")]
#[command(about = "Command-line client for the SigMail messaging service")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Register a new account
    Register {
        username: String,
        password: String,
    },

    /// List received messages
    Inbox,

    /// List sent messages
    Sent,

    /// Send a message
    Send {
        to: String,
        subject: String,
        body: String,
    },

    /// Show a single message by id
    Read {
        id: u64,
    },

    /// Reply to a message, quoting its body
    Reply {
        id: u64,
        body: String,
    },

    /// Delete a message by id
    Delete {
        id: u64,
    },

    /// Forward a message to another user
    Forward {
        id: u64,
        to: String,
    },

    /// Export a message to a text file in the data directory
    Export {
        id: u64,
    },

    /// Show mailbox counters, or server-wide counters with --global
    Status {
        #[arg(long = "global")]
        global: bool,
    },

    /// List saved drafts
    Drafts,

    /// Save a draft locally
    SaveDraft {
        to: String,
        subject: String,
        body: String,
    },

    /// Send a saved draft by id
    SendDraft {
        id: u64,
    },

    /// Delete a saved draft by id
    DeleteDraft {
        id: u64,
    },
}

fn credentials() -> anyhow::Result<(String, String)> {
    let username = std::env::var("SIGMAIL_USERNAME")
        .map_err(|_| anyhow::anyhow!("SIGMAIL_USERNAME is not set"))?;
    let password = std::env::var("SIGMAIL_PASSWORD")
        .map_err(|_| anyhow::anyhow!("SIGMAIL_PASSWORD is not set"))?;
    Ok((username, password))
}

async fn login(client: &mut MailClient) -> anyhow::Result<()> {
    let (username, password) = credentials()?;
    client.login(&username, &password).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = ClientConfig::from_env()?;
    let mut client = MailClient::from_config(&config);

    match &args.command {
        Command::Register { username, password } => {
            let message = client.register(username, password).await?;
            println!("{message}");
        }

        Command::Inbox => {
            login(&mut client).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(client.inbox())?);
            } else {
                print_inbox_table(client.inbox());
            }
        }

        Command::Sent => {
            login(&mut client).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(client.sent())?);
            } else {
                print_sent_table(client.sent());
            }
        }

        Command::Send { to, subject, body } => {
            login(&mut client).await?;
            let message = client.send(to, subject, body).await?;
            println!("{message}");
        }

        Command::Read { id } => {
            login(&mut client).await?;
            let view = client.read(*id).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                print_message_detail(&view);
            }
        }

        Command::Reply { id, body } => {
            login(&mut client).await?;
            let message = client.reply(*id, body).await?;
            println!("{message}");
        }

        Command::Delete { id } => {
            login(&mut client).await?;
            let message = client.delete(*id).await?;
            println!("{message}");
        }

        Command::Forward { id, to } => {
            login(&mut client).await?;
            let message = client.forward(*id, to).await?;
            println!("{message}");
        }

        Command::Export { id } => {
            login(&mut client).await?;
            let path = client.export(*id).await?;
            println!("Exported to {}", path.display());
        }

        Command::Status { global } => {
            let report = if *global {
                client.global_status().await?
            } else {
                login(&mut client).await?;
                client.status().await?
            };
            // The report fields are `|`-separated on the wire.
            for field in report.split('|') {
                println!("{field}");
            }
        }

        Command::Drafts => {
            login(&mut client).await?;
            let drafts = client.drafts()?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&drafts)?);
            } else {
                print_draft_table(&drafts);
            }
        }

        Command::SaveDraft { to, subject, body } => {
            login(&mut client).await?;
            let draft = client.save_draft(to, subject, body)?;
            println!("Draft #{} saved", draft.id);
        }

        Command::SendDraft { id } => {
            login(&mut client).await?;
            let message = client.send_draft(*id).await?;
            println!("{message}");
        }

        Command::DeleteDraft { id } => {
            login(&mut client).await?;
            if client.delete_draft(*id)? {
                println!("Draft #{id} deleted");
            } else {
                println!("No draft #{id}");
            }
        }
    }

    client.logout()?;
    Ok(())
}

fn print_inbox_table(entries: &[InboxEntry]) {
    if entries.is_empty() {
        println!("No emails in inbox.");
        return;
    }

    println!(
        "{:<6} {:<8} {:<16} {:<20} {}",
        "ID", "Status", "From", "Date", "Subject"
    );
    println!("{}", "-".repeat(80));

    for entry in entries {
        println!(
            "{:<6} {:<8} {:<16} {:<20} {}",
            entry.id,
            if entry.read { "read" } else { "UNREAD" },
            truncate(&entry.from, 14),
            entry.timestamp,
            truncate(&entry.subject, 30),
        );
    }

    println!("\n{} email(s)", entries.len());
}

fn print_sent_table(entries: &[SentEntry]) {
    if entries.is_empty() {
        println!("No sent emails.");
        return;
    }

    println!("{:<6} {:<16} {:<20} {}", "ID", "To", "Date", "Subject");
    println!("{}", "-".repeat(80));

    for entry in entries {
        println!(
            "{:<6} {:<16} {:<20} {}",
            entry.id,
            truncate(&entry.to, 14),
            entry.timestamp,
            truncate(&entry.subject, 30),
        );
    }

    println!("\n{} email(s)", entries.len());
}

fn print_draft_table(drafts: &[Draft]) {
    if drafts.is_empty() {
        println!("No drafts.");
        return;
    }

    println!("{:<6} {:<16} {:<20} {}", "ID", "To", "Date", "Subject");
    println!("{}", "-".repeat(80));

    for draft in drafts {
        println!(
            "{:<6} {:<16} {:<20} {}",
            draft.id,
            truncate(&draft.to, 14),
            draft.timestamp,
            truncate(&draft.subject, 30),
        );
    }

    println!("\n{} draft(s)", drafts.len());
}

fn print_message_detail(view: &MessageView) {
    println!("ID:      {}", view.id);
    println!("Date:    {}", view.timestamp);
    println!("From:    {}", view.from);
    println!("To:      {}", view.to);
    println!("Subject: {}", view.subject);
    println!("\n--- Body ---\n");
    println!("{}", view.body);
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}
