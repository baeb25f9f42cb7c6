use std::sync::Arc;
use tempfile::tempdir;
use thumbsmith_storage::{ArtifactIngestor, ArtifactStore, LocalStorage, SourceFetcher, StorageError};

const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfake-image-body";

async fn local_ingestor(dir: &std::path::Path, max_bytes: usize) -> ArtifactIngestor {
    let storage = Arc::new(
        LocalStorage::new(dir, "http://localhost:4000/media".to_string())
            .await
            .unwrap(),
    );
    let fetcher = SourceFetcher::new(max_bytes).unwrap();
    ArtifactIngestor::new(storage, fetcher)
}

#[tokio::test]
async fn ingests_http_source_into_local_storage() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/outputs/x.png")
        .with_status(200)
        .with_header("content-type", "image/png")
        .with_body(PNG_BYTES)
        .create_async()
        .await;

    let dir = tempdir().unwrap();
    let ingestor = local_ingestor(dir.path(), 1024).await;

    let artifacts = ingestor
        .ingest_from_url(&format!("{}/outputs/x.png", server.url()))
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(artifacts.len(), 1);
    let artifact = &artifacts[0];
    assert!(artifact.key.starts_with("thumbnails/"));
    assert!(artifact.key.ends_with(".png"));
    assert_eq!(
        artifact.url,
        format!("http://localhost:4000/media/{}", artifact.key)
    );
    let stored = std::fs::read(dir.path().join(&artifact.key)).unwrap();
    assert_eq!(stored, PNG_BYTES);
}

#[tokio::test]
async fn ingests_data_uri() {
    let dir = tempdir().unwrap();
    let ingestor = local_ingestor(dir.path(), 1024).await;

    // "fake-jpeg" in base64
    let artifacts = ingestor
        .ingest_from_url("data:image/jpeg;base64,ZmFrZS1qcGVn")
        .await
        .unwrap();

    assert!(artifacts[0].key.ends_with(".jpg"));
    let stored = std::fs::read(dir.path().join(&artifacts[0].key)).unwrap();
    assert_eq!(stored, b"fake-jpeg");
}

#[tokio::test]
async fn source_error_status_is_download_failure() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/gone.png")
        .with_status(404)
        .create_async()
        .await;

    let dir = tempdir().unwrap();
    let ingestor = local_ingestor(dir.path(), 1024).await;

    let err = ingestor
        .ingest_from_url(&format!("{}/gone.png", server.url()))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::DownloadFailed(_)));
}

#[tokio::test]
async fn oversized_source_is_rejected() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/big.png")
        .with_status(200)
        .with_header("content-type", "image/png")
        .with_body(vec![0u8; 4096])
        .create_async()
        .await;

    let dir = tempdir().unwrap();
    let ingestor = local_ingestor(dir.path(), 1024).await;

    let err = ingestor
        .ingest_from_url(&format!("{}/big.png", server.url()))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::TooLarge { .. }));
}

#[tokio::test]
async fn html_source_is_rejected() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/page")
        .with_status(200)
        .with_header("content-type", "text/html; charset=utf-8")
        .with_body("<html></html>")
        .create_async()
        .await;

    let dir = tempdir().unwrap();
    let ingestor = local_ingestor(dir.path(), 1024).await;

    let err = ingestor
        .ingest_from_url(&format!("{}/page", server.url()))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidSource(_)));
}

#[tokio::test]
async fn delete_is_idempotent() {
    let dir = tempdir().unwrap();
    let ingestor = local_ingestor(dir.path(), 1024).await;

    let artifacts = ingestor
        .ingest_from_url("data:image/png;base64,ZmFrZS1wbmc=")
        .await
        .unwrap();
    let key = &artifacts[0].key;

    ingestor.delete(key).await.unwrap();
    assert!(!dir.path().join(key).exists());
    ingestor.delete(key).await.unwrap();

    let err = ingestor.delete("../outside.png").await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidKey(_)));
}
