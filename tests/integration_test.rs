//! End-to-end tests: a real [`MailServer`] on an ephemeral port,
//! driven through the high-level [`MailClient`] and, where the exact
//! wire shape matters, through the raw [`MailSession`] transport.

use sigmail::{MailClient, MailServer, MailSession, MailStore, Status};
use std::path::Path;
use tokio::task::JoinHandle;

async fn spawn_server(store: MailStore) -> (u16, JoinHandle<()>) {
    let server = MailServer::bind("127.0.0.1", 0, store).await.unwrap();
    let port = server.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let _ = server.run().await;
    });
    (port, handle)
}

fn client(port: u16, dir: &Path) -> MailClient {
    MailClient::new(MailSession::new("127.0.0.1", port), dir)
}

#[tokio::test]
async fn full_mail_flow() {
    let (port, _server) = spawn_server(MailStore::in_memory()).await;
    let dir = tempfile::tempdir().unwrap();

    let mut alice = client(port, dir.path());
    alice.register("alice", "pw1").await.unwrap();
    alice.register("bob", "pw2").await.unwrap();
    alice.login("alice", "pw1").await.unwrap();

    alice.send("bob", "Project", "Ready for review").await.unwrap();
    assert_eq!(alice.sent().len(), 1);
    assert_eq!(alice.sent()[0].to, "bob");

    let mut bob = client(port, dir.path());
    bob.login("bob", "pw2").await.unwrap();
    assert_eq!(bob.inbox().len(), 1);
    assert!(!bob.inbox()[0].read);

    let id = bob.inbox()[0].id;
    let view = bob.read(id).await.unwrap();
    assert_eq!(view.from, "alice");
    assert_eq!(view.subject, "Project");
    assert_eq!(view.body, "Ready for review");

    // The read flag is visible to a fresh sync.
    bob.sync_inbox().await.unwrap();
    assert!(bob.inbox()[0].read);

    bob.delete(id).await.unwrap();
    assert!(bob.inbox().is_empty());

    // The sender's copy is gone too; only the recipient side is
    // tracked per message, and this one no longer exists.
    alice.sync_sent().await.unwrap();
    assert!(alice.sent().is_empty());
}

#[tokio::test]
async fn wire_level_responses() {
    let (port, _server) = spawn_server(MailStore::in_memory()).await;
    let mut session = MailSession::new("127.0.0.1", port);

    let resp = session.send_raw("REGISTER|alice|pw1").await;
    assert_eq!(resp.rest, "User alice registered successfully");
    session.send_raw("REGISTER|bob|pw2").await;

    assert_eq!(
        session.send_raw("LOGIN|alice|wrong").await.rest,
        "Invalid password"
    );
    assert_eq!(
        session.send_raw("LOGIN|ghost|pw").await.rest,
        "Username not found"
    );
    assert_eq!(
        session.send_raw("REGISTER|alice|pw1").await.rest,
        "Username already exists"
    );

    assert_eq!(
        session.send_raw("INBOX|bob").await,
        sigmail::Response::empty("No emails in inbox")
    );

    session.send_raw("SEND|alice|bob|Hi|Hello there").await;
    let inbox = session.send_raw("INBOX|bob").await;
    assert_eq!(inbox.status, Status::Ok);
    assert!(inbox.rest.starts_with("1|1~alice~Hi~"));
    assert!(inbox.rest.ends_with("~UNREAD"));

    assert_eq!(
        session.send_raw("DELETE|bob|1").await.rest,
        "Email #1 deleted"
    );
    assert_eq!(
        session.send_raw("READ|bob|1").await.rest,
        "Email not found"
    );
}

#[tokio::test]
async fn delimiters_in_subject_and_body_survive() {
    let (port, _server) = spawn_server(MailStore::in_memory()).await;
    let dir = tempfile::tempdir().unwrap();

    let mut alice = client(port, dir.path());
    alice.register("alice", "pw1").await.unwrap();
    alice.register("bob", "pw2").await.unwrap();
    alice.login("alice", "pw1").await.unwrap();

    alice
        .send("bob", "bill | invoice; a~b", "line one|line two\nwith; all~chars")
        .await
        .unwrap();

    let mut bob = client(port, dir.path());
    bob.login("bob", "pw2").await.unwrap();

    // The subject was sanitized, so the listing still parses into
    // exactly five fields per item.
    assert_eq!(bob.inbox().len(), 1);
    assert_eq!(bob.inbox()[0].subject, "bill - invoice, a-b");

    // The body is carried verbatim.
    let view = bob.read(bob.inbox()[0].id).await.unwrap();
    assert_eq!(view.body, "line one|line two\nwith; all~chars");
}

#[tokio::test]
async fn forward_creates_an_independent_copy() {
    let (port, _server) = spawn_server(MailStore::in_memory()).await;
    let dir = tempfile::tempdir().unwrap();

    let mut alice = client(port, dir.path());
    alice.register("alice", "pw1").await.unwrap();
    alice.register("bob", "pw2").await.unwrap();
    alice.register("carol", "pw3").await.unwrap();
    alice.login("alice", "pw1").await.unwrap();
    alice.send("bob", "Plans", "See attached").await.unwrap();

    let mut bob = client(port, dir.path());
    bob.login("bob", "pw2").await.unwrap();
    let original_id = bob.inbox()[0].id;

    let err = bob.forward(original_id, "ghost").await.unwrap_err();
    assert_eq!(err.to_string(), "Recipient not found");

    bob.forward(original_id, "carol").await.unwrap();
    assert_eq!(bob.sent().len(), 1);
    let copy_id = bob.sent()[0].id;
    assert_ne!(copy_id, original_id);

    let mut carol = client(port, dir.path());
    carol.login("carol", "pw3").await.unwrap();
    let copy = carol.read(copy_id).await.unwrap();
    assert_eq!(copy.from, "bob");
    assert_eq!(copy.subject, "FWD: Plans");
    assert!(copy.body.starts_with("[Forwarded from alice]\n\n"));

    // The original is untouched and still unread for bob.
    bob.sync_inbox().await.unwrap();
    let entry = bob.inbox().iter().find(|e| e.id == original_id).unwrap();
    assert_eq!(entry.subject, "Plans");
    assert!(!entry.read);
}

#[tokio::test]
async fn third_parties_are_denied() {
    let (port, _server) = spawn_server(MailStore::in_memory()).await;
    let mut session = MailSession::new("127.0.0.1", port);

    for cmd in [
        "REGISTER|alice|pw1",
        "REGISTER|bob|pw2",
        "REGISTER|eve|pw3",
        "SEND|alice|bob|Hi|Hello",
    ] {
        assert!(session.send_raw(cmd).await.is_ok());
    }

    for cmd in ["READ|eve|1", "DELETE|eve|1", "FORWARD|eve|1|alice", "EXPORT|eve|1"] {
        assert_eq!(session.send_raw(cmd).await.rest, "Access denied");
    }

    // Nothing was mutated by the denied attempts.
    let inbox = session.send_raw("INBOX|bob").await;
    assert!(inbox.rest.ends_with("~UNREAD"));
}

#[tokio::test]
async fn state_survives_a_server_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("server_db.json");

    let (port, server) = spawn_server(MailStore::open(&db)).await;
    let mut alice = client(port, dir.path());
    alice.register("alice", "pw1").await.unwrap();
    alice.register("bob", "pw2").await.unwrap();
    alice.login("alice", "pw1").await.unwrap();
    alice.send("bob", "Persist me", "Still here?").await.unwrap();
    alice.logout().unwrap();
    server.abort();

    let (port, _server) = spawn_server(MailStore::open(&db)).await;
    let mut bob = client(port, dir.path());
    bob.login("bob", "pw2").await.unwrap();
    assert_eq!(bob.inbox().len(), 1);
    assert_eq!(bob.inbox()[0].subject, "Persist me");

    // The id counter survived too: the next message gets a fresh id.
    bob.send("alice", "Re", "Yes").await.unwrap();
    assert_eq!(bob.sent()[0].id, 2);
}

#[tokio::test]
async fn repeated_sync_is_idempotent() {
    let (port, _server) = spawn_server(MailStore::in_memory()).await;
    let dir = tempfile::tempdir().unwrap();

    let mut alice = client(port, dir.path());
    alice.register("alice", "pw1").await.unwrap();
    alice.register("bob", "pw2").await.unwrap();
    alice.login("alice", "pw1").await.unwrap();
    alice.send("bob", "One", "1").await.unwrap();
    alice.send("bob", "Two", "2").await.unwrap();

    let mut bob = client(port, dir.path());
    bob.login("bob", "pw2").await.unwrap();

    let first = bob.sync_inbox().await.unwrap().into_entries();
    let second = bob.sync_inbox().await.unwrap().into_entries();
    assert_eq!(first, second);
    assert_eq!(bob.inbox().len(), 2);
}

#[tokio::test]
async fn concurrent_clients_get_distinct_ids() {
    let (port, _server) = spawn_server(MailStore::in_memory()).await;

    let mut setup = MailSession::new("127.0.0.1", port);
    for cmd in ["REGISTER|alice|pw1", "REGISTER|bob|pw2", "REGISTER|sink|pw3"] {
        assert!(setup.send_raw(cmd).await.is_ok());
    }

    let send_five = |from: &'static str| async move {
        let mut session = MailSession::new("127.0.0.1", port);
        for i in 0..5 {
            let resp = session
                .send_raw(&format!("SEND|{from}|sink|msg {i}|body"))
                .await;
            assert!(resp.is_ok());
        }
    };
    tokio::join!(send_five("alice"), send_five("bob"));

    let inbox = setup.send_raw("INBOX|sink").await;
    let (count, listing) = inbox.rest.split_once('|').unwrap();
    assert_eq!(count, "10");

    let mut ids: Vec<u64> = sigmail::protocol::parse_inbox_listing(listing)
        .iter()
        .map(|e| e.id)
        .collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 10);
}

#[tokio::test]
async fn malformed_commands_never_kill_the_connection() {
    let (port, _server) = spawn_server(MailStore::in_memory()).await;
    let mut session = MailSession::new("127.0.0.1", port);

    assert_eq!(session.send_raw("").await.rest, "Empty command");
    assert_eq!(
        session.send_raw("PURGE|alice").await.rest,
        "Unknown command 'PURGE'"
    );
    assert_eq!(
        session.send_raw("READ|alice|abc").await.rest,
        "Invalid message id"
    );
    assert_eq!(
        session.send_raw("LOGIN|alice").await.rest,
        "Invalid LOGIN format"
    );

    // Same connection still serves valid commands.
    assert!(session.send_raw("STATUS").await.is_ok());
    assert!(session.is_connected());
}

#[tokio::test]
async fn status_tracks_reads_and_sends() {
    let (port, _server) = spawn_server(MailStore::in_memory()).await;
    let dir = tempfile::tempdir().unwrap();

    let mut alice = client(port, dir.path());
    alice.register("alice", "pw1").await.unwrap();
    alice.register("bob", "pw2").await.unwrap();
    alice.login("alice", "pw1").await.unwrap();
    alice.send("bob", "One", "1").await.unwrap();
    alice.send("bob", "Two", "2").await.unwrap();

    let mut bob = client(port, dir.path());
    bob.login("bob", "pw2").await.unwrap();
    bob.read(bob.inbox()[0].id).await.unwrap();

    assert_eq!(bob.status().await.unwrap(), "Inbox: 2 (1 unread)|Sent: 0");
    assert_eq!(
        alice.status().await.unwrap(),
        "Inbox: 0 (0 unread)|Sent: 2"
    );

    let global = bob.global_status().await.unwrap();
    assert!(global.starts_with("Users: 2|Emails: 2|"));
}
