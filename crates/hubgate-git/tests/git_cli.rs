//! Exercises the subprocess driver against the real git binary.
//!
//! Skipped when git is not installed.

use futures::StreamExt;
use hubgate_git::protocol::{PktLine, PktLineReader};
use hubgate_git::{Error, GitProcess, Service};
use std::process::Command;
use tempfile::tempdir;

fn git_available() -> bool {
    Command::new("git").arg("--version").output().map(|o| o.status.success()).unwrap_or(false)
}

#[tokio::test]
async fn test_advertise_refs_on_empty_repo() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let dir = tempdir().unwrap();
    let repo = dir.path().join("demo.git");
    let git = GitProcess::new();
    git.init_bare(&repo).await.unwrap();

    let adv = git.advertise_refs(&repo, Service::ReceivePack, None).await.unwrap();
    let mut reader = PktLineReader::new(&adv);
    let first = reader.next_line().unwrap();
    match first {
        Some(PktLine::Data(line)) => {
            let text = String::from_utf8_lossy(line);
            assert!(text.contains("capabilities^{}"), "unexpected first line: {}", text);
        }
        other => panic!("expected data line, got {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_repo_is_reported() {
    let dir = tempdir().unwrap();
    let git = GitProcess::new();
    let err = git
        .advertise_refs(&dir.path().join("absent.git"), Service::UploadPack, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RepoNotFound(_)));

    let err = git
        .stateless_rpc(&dir.path().join("absent.git"), Service::UploadPack, None, tokio::io::empty())
        .err()
        .unwrap();
    assert!(matches!(err, Error::RepoNotFound(_)));
}

#[tokio::test]
async fn test_receive_pack_with_empty_command_list() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let dir = tempdir().unwrap();
    let repo = dir.path().join("demo.git");
    let git = GitProcess::new();
    git.init_bare(&repo).await.unwrap();

    // A flush-only request means "nothing to update"
    let input = std::io::Cursor::new(b"0000".to_vec());
    let mut out = git.stateless_rpc(&repo, Service::ReceivePack, None, input).unwrap();
    let mut collected = Vec::new();
    while let Some(chunk) = out.next().await {
        collected.extend_from_slice(&chunk.unwrap());
    }
    assert!(collected.len() < 64, "unexpected output: {:?}", collected);
}
