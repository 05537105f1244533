//! LFS locking endpoints

mod support;

use hubgate_lfs::lock::{
    CreateLockResponse, ListLocksResponse, LockErrorResponse, UnlockResponse, VerifyLocksResponse,
};
use serde_json::json;
use std::net::SocketAddr;
use support::{as_user, test_client, Harness};

fn locks_url(addr: &SocketAddr) -> String {
    format!("http://{}/models/alice/demo/info/lfs/locks", addr)
}

async fn create(addr: &SocketAddr, user: &str, path: &str) -> reqwest::Response {
    as_user(test_client().post(locks_url(addr)), user)
        .json(&json!({"path": path}))
        .send()
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_create_then_find_by_path() {
    let (harness, _, _, _) = Harness::stubs();
    let (addr, _shutdown) = harness.start().await;

    let resp = create(&addr, "alice", "weights/model.bin").await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "application/vnd.git-lfs+json");
    let created: CreateLockResponse = resp.json().await.unwrap();
    assert_eq!(created.lock.path, "weights/model.bin");
    assert_eq!(created.lock.owner.as_ref().unwrap().name, "alice");

    let resp = test_client()
        .get(format!("{}?path=weights/model.bin", locks_url(&addr)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let listed: ListLocksResponse = resp.json().await.unwrap();
    assert_eq!(listed.locks, vec![created.lock.clone()]);

    let resp = test_client()
        .get(format!("{}?id={}", locks_url(&addr), created.lock.id))
        .send()
        .await
        .unwrap();
    let listed: ListLocksResponse = resp.json().await.unwrap();
    assert_eq!(listed.locks.len(), 1);

    let resp = test_client()
        .get(format!("{}?path=other.bin", locks_url(&addr)))
        .send()
        .await
        .unwrap();
    let listed: ListLocksResponse = resp.json().await.unwrap();
    assert!(listed.locks.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_conflict_echoes_existing_lock() {
    let (harness, _, _, _) = Harness::stubs();
    let (addr, _shutdown) = harness.start().await;

    let first: CreateLockResponse = create(&addr, "alice", "a.bin").await.json().await.unwrap();
    let resp = create(&addr, "carol", "a.bin").await;
    assert_eq!(resp.status(), 409);
    let body: LockErrorResponse = resp.json().await.unwrap();
    assert_eq!(body.message, "already created lock");
    assert_eq!(body.lock, Some(first.lock));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unlock_requires_owner_or_force() {
    let (harness, _, _, _) = Harness::stubs();
    let (addr, _shutdown) = harness.start().await;
    let client = test_client();

    let created: CreateLockResponse = create(&addr, "alice", "a.bin").await.json().await.unwrap();
    let unlock_url = format!("{}/{}/unlock", locks_url(&addr), created.lock.id);

    let resp = as_user(client.post(&unlock_url), "carol").send().await.unwrap();
    assert_eq!(resp.status(), 405);
    let body: LockErrorResponse = resp.json().await.unwrap();
    assert!(body.message.contains("try --force"), "{}", body.message);

    let resp = as_user(client.post(&unlock_url), "carol")
        .json(&json!({"force": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let released: UnlockResponse = resp.json().await.unwrap();
    assert_eq!(released.lock.id, created.lock.id);

    let listed: ListLocksResponse = client
        .get(locks_url(&addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(listed.locks.is_empty());

    let resp = as_user(client.post(&unlock_url), "alice").send().await.unwrap();
    assert_eq!(resp.status(), 404);
    let body: LockErrorResponse = resp.json().await.unwrap();
    assert_eq!(body.message, "unable to delete lock : not found");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invalid_ids() {
    let (harness, _, _, _) = Harness::stubs();
    let (addr, _shutdown) = harness.start().await;
    let client = test_client();

    let resp = as_user(client.post(format!("{}/abc/unlock", locks_url(&addr))), "alice")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: LockErrorResponse = resp.json().await.unwrap();
    assert_eq!(body.message, "unable to delete lock : Invalid id");

    let resp = client
        .get(format!("{}?id=abc", locks_url(&addr)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: LockErrorResponse = resp.json().await.unwrap();
    assert_eq!(body.message, "unable to delete lock : Invalid request");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_paging_clamps_negative_values() {
    let (harness, _, _, _) = Harness::stubs();
    let (addr, _shutdown) = harness.start().await;
    let client = test_client();

    for path in ["a.bin", "b.bin", "c.bin"] {
        assert_eq!(create(&addr, "alice", path).await.status(), 200);
    }

    let page: ListLocksResponse = client
        .get(format!("{}?cursor=-5&limit=2", locks_url(&addr)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page.locks.len(), 2);
    assert_eq!(page.locks[0].path, "a.bin");
    assert_eq!(page.next_cursor.as_deref(), Some("2"));

    let rest: ListLocksResponse = client
        .get(format!("{}?cursor=2&limit=2", locks_url(&addr)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rest.locks.len(), 1);
    assert_eq!(rest.locks[0].path, "c.bin");
    assert_eq!(rest.next_cursor, None);

    let all: ListLocksResponse = client
        .get(format!("{}?limit=-1", locks_url(&addr)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all.locks.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_verify_partitions_by_owner() {
    let (harness, _, _, _) = Harness::stubs();
    let (addr, _shutdown) = harness.start().await;

    create(&addr, "alice", "a.bin").await;
    create(&addr, "carol", "b.bin").await;

    let resp = as_user(
        test_client().post(format!("{}/verify", locks_url(&addr))),
        "carol",
    )
    .form(&[("cursor", "0"), ("limit", "10")])
    .send()
    .await
    .unwrap();
    assert_eq!(resp.status(), 200);
    let body: VerifyLocksResponse = resp.json().await.unwrap();
    assert_eq!(body.ours.len(), 1);
    assert_eq!(body.ours[0].path, "b.bin");
    assert_eq!(body.theirs.len(), 1);
    assert_eq!(body.theirs[0].path, "a.bin");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_denials_ask_for_credentials() {
    let (harness, _, _, _) = Harness::stubs();
    let (addr, _shutdown) = harness.start().await;

    let resp = test_client()
        .post(locks_url(&addr))
        .json(&json!({"path": "a.bin"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    assert_eq!(resp.headers()["www-authenticate"], "Basic realm=hubgate-git");
    let body: LockErrorResponse = resp.json().await.unwrap();
    assert_eq!(body.message, "You must have push access to create locks");

    // dave can read demo but not write it
    let resp = create(&addr, "dave", "a.bin").await;
    assert_eq!(resp.status(), 401);

    let resp = as_user(
        test_client().get(format!("http://{}/models/alice/secret/info/lfs/locks", addr)),
        "dave",
    )
    .send()
    .await
    .unwrap();
    assert_eq!(resp.status(), 401);
    let body: LockErrorResponse = resp.json().await.unwrap();
    assert_eq!(body.message, "You must have access to read locks");
}
