//! Integration tests for the HTTP provider driving a session.

use std::fs;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use mockito::Matcher;
use tempfile::TempDir;

use tempbox::error::TempboxError;
use tempbox::provider::{HttpProvider, MailProvider};
use tempbox::session::Session;
use tempbox::store::FileEngine;

fn fixture(name: &str) -> String {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    fs::read_to_string(path).unwrap()
}

fn session(dir: &TempDir) -> Session {
    Session::open(Arc::new(FileEngine::new(dir.path())), 20).unwrap()
}

#[tokio::test]
async fn it_generates_then_fetches() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let _generate = server
        .mock("GET", "/api")
        .match_query(Matcher::UrlEncoded("action".into(), "generate".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"success":true,"result":{"email":"quiet-fox@tmp.example"}}"#)
        .create_async()
        .await;
    let inbox = server
        .mock("GET", "/api")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("action".into(), "inbox".into()),
            Matcher::UrlEncoded("email".into(), "quiet-fox@tmp.example".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(fixture("inbox.json"))
        .expect(2)
        .create_async()
        .await;

    let dir = TempDir::new()?;
    let mut session = session(&dir);
    let provider = HttpProvider::new(&server.url(), Duration::from_secs(5))?;

    let address = session.generate_address(&provider).await?;
    assert_eq!(address, "quiet-fox@tmp.example");
    assert_eq!(
        session.accounts().active_record().email_address.as_deref(),
        Some("quiet-fox@tmp.example")
    );

    let first = session.refresh(&provider).await?;
    assert_eq!(first.inserted, 3);
    assert_eq!(first.duplicates, 1);
    assert_eq!(first.malformed, 1);

    let second = session.refresh(&provider).await?;
    assert_eq!(second.inserted, 0);
    assert_eq!(second.duplicates, 4);
    inbox.assert_async().await;

    let view = session.view()?;
    assert_eq!(view.unread_total_count, 3);
    let placeholder = view
        .unread_items
        .iter()
        .find(|m| m.from == "friend@mail.example")
        .unwrap();
    assert_eq!(placeholder.subject, "(No subject)");
    assert_eq!(placeholder.body, "(Empty)");

    assert_eq!(session.analytics().emails_generated, 1);
    assert!(session.events().iter().any(|e| e.name == "messages_received"));
    assert!(session.events().iter().any(|e| e.name == "email_generated"));
    Ok(())
}

#[tokio::test]
async fn it_skips_refresh_without_address() -> Result<()> {
    let server = mockito::Server::new_async().await;
    let dir = TempDir::new()?;
    let mut session = session(&dir);
    let provider = HttpProvider::new(&server.url(), Duration::from_secs(5))?;

    let outcome = session.refresh(&provider).await?;
    assert_eq!(outcome.inserted, 0);
    Ok(())
}

#[tokio::test]
async fn it_keeps_state_when_generate_fails() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/api")
        .match_query(Matcher::Any)
        .with_status(503)
        .create_async()
        .await;

    let dir = TempDir::new()?;
    let mut session = session(&dir);
    let provider = HttpProvider::new(&server.url(), Duration::from_secs(5))?;

    let err = session.generate_address(&provider).await.unwrap_err();
    assert!(matches!(err, TempboxError::NetworkFailure(_)));
    assert!(session.accounts().active_record().email_address.is_none());
    assert_eq!(session.analytics().emails_generated, 0);
    Ok(())
}

#[tokio::test]
async fn it_times_out() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    // Headers go out at once; the body stalls past the client timeout
    let _slow = server
        .mock("GET", "/api")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_chunked_body(|w| {
            std::thread::sleep(Duration::from_millis(1_000));
            w.write_all(br#"{"success":true,"result":{"email":"late@tmp.example"}}"#)
        })
        .create_async()
        .await;

    let provider = HttpProvider::new(&server.url(), Duration::from_millis(200))?;
    let err = provider.generate_address().await.unwrap_err();
    assert!(
        matches!(err, TempboxError::NetworkTimeout(200)),
        "expected a 200 ms timeout, got {err:?}"
    );
    Ok(())
}
