use blob_copy::{
    BlobCopyService, BlobRef, BlobStorageProvider, CancellationToken, CopyError, CopySettings,
    CopyStatus, LocalBlobStore, StorageError,
};
use bytes::Bytes;
use std::time::Duration;
use tempfile::TempDir;

async fn open_store() -> (TempDir, LocalBlobStore) {
    let dir = tempfile::tempdir().unwrap();
    let db_url = format!("sqlite://{}", dir.path().join("meta.db").display());
    let store = LocalBlobStore::connect(&db_url, dir.path().join("blobs"))
        .await
        .unwrap();
    for account in ["devacct", "backupacct"] {
        store.create_account(account).await.unwrap();
    }
    (dir, store)
}

fn fast_settings() -> CopySettings {
    CopySettings {
        poll_interval: Duration::from_millis(10),
        ..CopySettings::default()
    }
}

fn blob(url: &str) -> BlobRef {
    BlobRef::parse(url).unwrap()
}

async fn seed(store: &LocalBlobStore, target: &BlobRef, body: &'static [u8]) {
    store
        .create_container_if_missing(target.container())
        .await
        .unwrap();
    store
        .upload_blob(target, Bytes::from_static(body))
        .await
        .unwrap();
}

#[tokio::test]
async fn copies_into_new_container_of_other_account() {
    let (_dir, store) = open_store().await;
    let source = blob("http://127.0.0.1:10000/devacct/media/2024/report.pdf");
    let target = blob("http://127.0.0.1:10000/backupacct/archive/2024/report.pdf");
    seed(&store, &source, b"quarterly numbers").await;

    let service = BlobCopyService::new(store.clone()).with_settings(fast_settings());
    let operation = service
        .server_side_copy(&source, &target, &CancellationToken::new())
        .await
        .unwrap()
        .expect("copy performed");

    assert_eq!(operation.status, CopyStatus::Success);
    assert_eq!(operation.target, *target.url());

    let source_properties = store.get_properties(&source).await.unwrap();
    let target_properties = store.get_properties(&target).await.unwrap();
    assert_eq!(target_properties.copy_status, Some(CopyStatus::Success));
    assert_eq!(target_properties.content_md5, source_properties.content_md5);
}

#[tokio::test]
async fn identical_blob_in_other_account_is_left_alone() {
    let (_dir, store) = open_store().await;
    let source = blob("http://127.0.0.1:10000/devacct/media/a.txt");
    let target = blob("http://127.0.0.1:10000/backupacct/media/a.txt");
    seed(&store, &source, b"same").await;
    seed(&store, &target, b"same").await;
    let before = store.get_properties(&target).await.unwrap();

    let service = BlobCopyService::new(store.clone()).with_settings(fast_settings());
    let outcome = service
        .server_side_copy(&source, &target, &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.is_none());
    let after = store.get_properties(&target).await.unwrap();
    assert_eq!(after, before);
}

#[tokio::test]
async fn stale_blob_in_other_account_is_replaced() {
    let (_dir, store) = open_store().await;
    let source = blob("http://127.0.0.1:10000/devacct/media/a.txt");
    let target = blob("http://127.0.0.1:10000/backupacct/media/a.txt");
    seed(&store, &source, b"new content").await;
    seed(&store, &target, b"old").await;

    let service = BlobCopyService::new(store.clone()).with_settings(fast_settings());
    service
        .server_side_copy(&source, &target, &CancellationToken::new())
        .await
        .unwrap()
        .expect("copy performed");

    let target_properties = store.get_properties(&target).await.unwrap();
    assert_eq!(target_properties.content_length, 11);
    assert_eq!(target_properties.copy_status, Some(CopyStatus::Success));
}

#[tokio::test]
async fn missing_source_leaves_target_untouched() {
    let (_dir, store) = open_store().await;
    let source = blob("http://127.0.0.1:10000/devacct/media/missing.txt");
    let target = blob("http://127.0.0.1:10000/backupacct/fresh/missing.txt");

    let service = BlobCopyService::new(store.clone());
    let outcome = service
        .server_side_copy(&source, &target, &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.is_none());
    assert!(!store.exists(&target).await.unwrap());
}

#[tokio::test]
async fn unknown_target_account_is_a_hard_error() {
    let (_dir, store) = open_store().await;
    let source = blob("http://127.0.0.1:10000/devacct/media/a.txt");
    let target = blob("http://127.0.0.1:10000/nosuchacct/media/a.txt");
    seed(&store, &source, b"payload").await;

    let err = BlobCopyService::new(store.clone())
        .server_side_copy(&source, &target, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CopyError::Storage(StorageError::AccountNotFound(_))
    ));
}
