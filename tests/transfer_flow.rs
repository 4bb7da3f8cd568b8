//! End-to-end share → receive flow over a real HTTP listener.

mod common;

use common::{cursor_fixture, start_test_share};
use cursor_kit::receive::{receive, ApplyAction, ConflictStrategy, ReceiveOptions, ReceiveOutcome};
use cursor_kit::share::Phase;

fn no_prompt_options() -> ReceiveOptions {
    ReceiveOptions {
        force: false,
        strategy: None,
    }
}

#[tokio::test]
async fn receive_into_empty_destination_extracts_and_confirms() {
    let source = tempfile::tempdir().unwrap();
    let share = start_test_share(vec![cursor_fixture(source.path())]).await;
    let dest = tempfile::tempdir().unwrap();

    // No conflicts: must not prompt, must behave like overwrite.
    let outcome = receive(&share.url, dest.path(), no_prompt_options())
        .await
        .expect("receive should succeed");

    match outcome {
        ReceiveOutcome::Applied {
            configs,
            bytes_received,
        } => {
            assert_eq!(configs.len(), 1);
            assert_eq!(configs[0].action, ApplyAction::Added);
            assert!(bytes_received > 0);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let rules = dest.path().join(".cursor").join("rules");
    assert_eq!(std::fs::read(rules.join("a.mdc")).unwrap(), b"rule a from share");
    assert_eq!(std::fs::read(rules.join("b.mdc")).unwrap(), b"rule b from share");

    // The engine delivered its confirmation before returning.
    assert_eq!(share.session.phase(), Phase::Confirmed { assumed: false });
}

#[tokio::test]
async fn merge_keeps_local_file_and_adds_missing_one() {
    let source = tempfile::tempdir().unwrap();
    let share = start_test_share(vec![cursor_fixture(source.path())]).await;

    let dest = tempfile::tempdir().unwrap();
    let rules = dest.path().join(".cursor").join("rules");
    std::fs::create_dir_all(&rules).unwrap();
    std::fs::write(rules.join("a.mdc"), b"local edit").unwrap();

    let outcome = receive(
        &share.url,
        dest.path(),
        ReceiveOptions {
            force: false,
            strategy: Some(ConflictStrategy::Merge),
        },
    )
    .await
    .expect("receive should succeed");

    match outcome {
        ReceiveOutcome::Applied { configs, .. } => {
            assert_eq!(configs[0].action, ApplyAction::Merged);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    assert_eq!(std::fs::read(rules.join("a.mdc")).unwrap(), b"local edit");
    assert_eq!(std::fs::read(rules.join("b.mdc")).unwrap(), b"rule b from share");
}

#[tokio::test]
async fn cancel_leaves_destination_untouched() {
    let source = tempfile::tempdir().unwrap();
    let share = start_test_share(vec![cursor_fixture(source.path())]).await;

    let dest = tempfile::tempdir().unwrap();
    let rules = dest.path().join(".cursor").join("rules");
    std::fs::create_dir_all(&rules).unwrap();
    std::fs::write(rules.join("a.mdc"), b"local edit").unwrap();

    let outcome = receive(
        &share.url,
        dest.path(),
        ReceiveOptions {
            force: false,
            strategy: Some(ConflictStrategy::Cancel),
        },
    )
    .await
    .expect("cancel is not an error at the engine level");

    assert!(matches!(outcome, ReceiveOutcome::Cancelled));
    assert_eq!(std::fs::read(rules.join("a.mdc")).unwrap(), b"local edit");
    assert!(!rules.join("b.mdc").exists());
}

#[tokio::test]
async fn force_overwrites_conflicting_directory_without_prompting() {
    let source = tempfile::tempdir().unwrap();
    let share = start_test_share(vec![cursor_fixture(source.path())]).await;

    let dest = tempfile::tempdir().unwrap();
    let cursor = dest.path().join(".cursor");
    std::fs::create_dir_all(cursor.join("rules")).unwrap();
    std::fs::write(cursor.join("rules").join("a.mdc"), b"local edit").unwrap();
    std::fs::write(cursor.join("stale.json"), b"{}").unwrap();

    let outcome = receive(
        &share.url,
        dest.path(),
        ReceiveOptions {
            force: true,
            strategy: None,
        },
    )
    .await
    .expect("receive should succeed");

    match outcome {
        ReceiveOutcome::Applied { configs, .. } => {
            assert_eq!(configs[0].action, ApplyAction::Replaced);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    assert_eq!(
        std::fs::read(cursor.join("rules").join("a.mdc")).unwrap(),
        b"rule a from share"
    );
    assert!(!cursor.join("stale.json").exists());
}

#[tokio::test]
async fn unknown_paths_and_methods_are_not_found() {
    let source = tempfile::tempdir().unwrap();
    let share = start_test_share(vec![cursor_fixture(source.path())]).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/manifest", share.url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    let response = client.post(&share.url).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn confirm_endpoint_is_idempotent() {
    let source = tempfile::tempdir().unwrap();
    let share = start_test_share(vec![cursor_fixture(source.path())]).await;
    let client = reqwest::Client::new();
    let confirm_url = format!("{}/confirm", share.url);

    let first: serde_json::Value = client
        .get(&confirm_url)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first["status"], "confirmed");

    let second: serde_json::Value = client
        .get(&confirm_url)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(second["status"], "already_confirmed");
}

#[tokio::test]
async fn download_while_awaiting_confirmation_is_rejected() {
    let source = tempfile::tempdir().unwrap();
    let share = start_test_share(vec![cursor_fixture(source.path())]).await;

    // Drive the session to the post-stream wait.
    share.session.connection_received().unwrap();
    share.session.stream_finished();

    let response = reqwest::get(&share.url).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CONFLICT);
}

#[tokio::test]
async fn response_headers_announce_a_zip_attachment() {
    let source = tempfile::tempdir().unwrap();
    let share = start_test_share(vec![cursor_fixture(source.path())]).await;

    let response = reqwest::get(&share.url).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "application/zip"
    );
    assert_eq!(
        response.headers()["content-disposition"],
        "attachment; filename=\"cursor-kit-configs.zip\""
    );
    // Streamed body: no up-front length.
    assert!(response.headers().get("content-length").is_none());
}

#[tokio::test]
async fn invalid_url_fails_before_any_network_io() {
    let dest = tempfile::tempdir().unwrap();
    let err = receive("ftp://example.com", dest.path(), no_prompt_options())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("scheme"));
}

#[tokio::test]
async fn refused_connection_maps_to_a_friendly_error() {
    let dest = tempfile::tempdir().unwrap();
    // Port from the ephemeral range with nothing listening.
    let err = receive("http://127.0.0.1:49151", dest.path(), no_prompt_options())
        .await
        .unwrap_err();
    assert!(
        err.to_string().contains("refused"),
        "unexpected error: {err:#}"
    );
}
