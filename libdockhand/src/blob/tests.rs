use super::*;
use crate::cache::{BlobCache, DiskBlobCache};
use crate::client::Client;
use crate::oci::MEDIA_TYPE_LAYER;
use crate::reference::ImageReference;
use mockito::Matcher;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tempfile::tempdir;
use tokio::io::AsyncReadExt;

fn session(server: &mockito::ServerGuard) -> Registry {
    let reference = ImageReference::new(server.host_with_port(), "team/app", "v1", false);
    Registry::new(reference, Client::new().unwrap())
}

fn blob_path(digest: &Digest) -> String {
    format!("/v2/team/app/blobs/{}", digest)
}

#[tokio::test]
async fn test_blob_source_into_bytes() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("layer.tar");
    std::fs::write(&path, b"from disk").unwrap();

    assert_eq!(
        BlobSource::from(path).into_bytes().await.unwrap(),
        b"from disk"
    );
    assert_eq!(
        BlobSource::from(&b"in memory"[..]).into_bytes().await.unwrap(),
        b"in memory"
    );

    let missing = BlobSource::Path(temp_dir.path().join("missing"));
    assert!(matches!(
        missing.into_bytes().await,
        Err(DockhandError::Io { .. })
    ));
}

#[tokio::test]
async fn test_pull_blob_from_registry() {
    let mut server = mockito::Server::new_async().await;
    let data = b"layer bytes".to_vec();
    let digest = Digest::sha256(&data);
    let mock = server
        .mock("GET", blob_path(&digest).as_str())
        .with_status(200)
        .with_body(&data)
        .create_async()
        .await;

    let registry = session(&server);
    let pulled = registry.pull_blob(&digest, false).await.unwrap();

    mock.assert_async().await;
    assert_eq!(pulled, data);
}

#[tokio::test]
async fn test_pull_blob_cache_hit_skips_network() {
    let mut server = mockito::Server::new_async().await;
    let data = b"cached layer".to_vec();
    let digest = Digest::sha256(&data);
    let mock = server
        .mock("GET", blob_path(&digest).as_str())
        .expect(0)
        .create_async()
        .await;

    let temp_dir = tempdir().unwrap();
    let cache = Arc::new(DiskBlobCache::new(
        temp_dir.path().to_path_buf(),
        NonZeroUsize::new(4).unwrap(),
    ));
    cache.put(&digest, &data).unwrap();
    let registry = session(&server).with_blob_cache(cache);

    let pulled = registry.pull_blob(&digest, true).await.unwrap();

    mock.assert_async().await;
    assert_eq!(pulled, data);
}

#[tokio::test]
async fn test_pull_blob_writes_through_to_cache() {
    let mut server = mockito::Server::new_async().await;
    let data = b"fresh layer".to_vec();
    let digest = Digest::sha256(&data);
    let mock = server
        .mock("GET", blob_path(&digest).as_str())
        .with_status(200)
        .with_body(&data)
        .expect(1)
        .create_async()
        .await;

    let temp_dir = tempdir().unwrap();
    let cache = Arc::new(DiskBlobCache::new(
        temp_dir.path().to_path_buf(),
        NonZeroUsize::new(4).unwrap(),
    ));
    let registry = session(&server).with_blob_cache(cache.clone());

    registry.pull_blob(&digest, true).await.unwrap();
    // Served from the cache the second time
    registry.pull_blob(&digest, true).await.unwrap();

    mock.assert_async().await;
    assert_eq!(cache.get(&digest).unwrap(), Some(data));
}

#[tokio::test]
async fn test_pull_blob_without_cache_does_not_write_it() {
    let mut server = mockito::Server::new_async().await;
    let data = b"uncached".to_vec();
    let digest = Digest::sha256(&data);
    let _mock = server
        .mock("GET", blob_path(&digest).as_str())
        .with_status(200)
        .with_body(&data)
        .create_async()
        .await;

    let temp_dir = tempdir().unwrap();
    let cache = Arc::new(DiskBlobCache::new(
        temp_dir.path().to_path_buf(),
        NonZeroUsize::new(4).unwrap(),
    ));
    let registry = session(&server).with_blob_cache(cache.clone());

    registry.pull_blob(&digest, false).await.unwrap();

    assert_eq!(cache.get(&digest).unwrap(), None);
}

#[tokio::test]
async fn test_pull_blob_digest_mismatch() {
    let mut server = mockito::Server::new_async().await;
    let digest = Digest::sha256(b"expected");
    let _mock = server
        .mock("GET", blob_path(&digest).as_str())
        .with_status(200)
        .with_body("tampered")
        .create_async()
        .await;

    let temp_dir = tempdir().unwrap();
    let cache = Arc::new(DiskBlobCache::new(
        temp_dir.path().to_path_buf(),
        NonZeroUsize::new(4).unwrap(),
    ));
    let registry = session(&server).with_blob_cache(cache.clone());

    let result = registry.pull_blob(&digest, true).await;

    assert!(matches!(result, Err(DockhandError::Validation { .. })));
    assert_eq!(cache.get(&digest).unwrap(), None);
}

#[tokio::test]
async fn test_pull_blob_not_found() {
    let mut server = mockito::Server::new_async().await;
    let digest = Digest::sha256(b"gone");
    let _mock = server
        .mock("GET", blob_path(&digest).as_str())
        .with_status(404)
        .create_async()
        .await;

    let registry = session(&server);
    match registry.pull_blob(&digest, false).await {
        Err(DockhandError::NotFound {
            resource_type,
            name,
        }) => {
            assert_eq!(resource_type, "blob");
            assert_eq!(name, digest.to_string());
        }
        other => panic!("Expected NotFound, got {:?}", other),
    }
}

#[tokio::test]
async fn test_pull_blob_into_file_rewinds() {
    let mut server = mockito::Server::new_async().await;
    let data = vec![42u8; 200_000];
    let digest = Digest::sha256(&data);
    let _mock = server
        .mock("GET", blob_path(&digest).as_str())
        .with_status(200)
        .with_body(&data)
        .create_async()
        .await;

    let temp_dir = tempdir().unwrap();
    let mut file = tokio::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(temp_dir.path().join("layer.tar"))
        .await
        .unwrap();

    let registry = session(&server);
    let written = registry
        .pull_blob_into(&digest, &mut file, false)
        .await
        .unwrap();

    assert_eq!(written, data.len() as u64);
    let mut read_back = Vec::new();
    file.read_to_end(&mut read_back).await.unwrap();
    assert_eq!(read_back, data);
}

#[tokio::test]
async fn test_push_blob_existing_skips_upload() {
    let mut server = mockito::Server::new_async().await;
    let data = b"already there".to_vec();
    let digest = Digest::sha256(&data);
    let head = server
        .mock("HEAD", blob_path(&digest).as_str())
        .with_status(200)
        .expect(1)
        .create_async()
        .await;
    let post = server
        .mock("POST", "/v2/team/app/blobs/uploads/")
        .expect(0)
        .create_async()
        .await;

    let registry = session(&server);
    let descriptor = registry
        .push_blob(data.clone().into(), MEDIA_TYPE_LAYER, false)
        .await
        .unwrap();

    head.assert_async().await;
    post.assert_async().await;
    assert!(descriptor.existing);
    assert_eq!(descriptor.digest, digest);
    assert_eq!(descriptor.size, data.len() as u64);
    assert_eq!(descriptor.media_type, MEDIA_TYPE_LAYER);
}

#[tokio::test]
async fn test_push_blob_monolithic_upload() {
    let mut server = mockito::Server::new_async().await;
    let data = b"new layer".to_vec();
    let digest = Digest::sha256(&data);
    let _head = server
        .mock("HEAD", blob_path(&digest).as_str())
        .with_status(404)
        .create_async()
        .await;
    let post = server
        .mock("POST", "/v2/team/app/blobs/uploads/")
        .with_status(202)
        .with_header("Location", "/v2/team/app/blobs/uploads/uuid-1?_state=abc")
        .expect(1)
        .create_async()
        .await;
    let put = server
        .mock("PUT", "/v2/team/app/blobs/uploads/uuid-1")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("_state".into(), "abc".into()),
            Matcher::UrlEncoded("digest".into(), digest.to_string()),
        ]))
        .match_body(Matcher::Exact("new layer".to_string()))
        .with_status(201)
        .expect(1)
        .create_async()
        .await;

    let registry = session(&server);
    let descriptor = registry
        .push_blob(data.clone().into(), MEDIA_TYPE_LAYER, false)
        .await
        .unwrap();

    post.assert_async().await;
    put.assert_async().await;
    assert!(!descriptor.existing);
    assert_eq!(descriptor.digest, digest);
}

#[tokio::test]
async fn test_push_blob_absolute_location() {
    let mut server = mockito::Server::new_async().await;
    let data = b"absolute".to_vec();
    let digest = Digest::sha256(&data);
    let _head = server
        .mock("HEAD", blob_path(&digest).as_str())
        .with_status(404)
        .create_async()
        .await;
    let _post = server
        .mock("POST", "/v2/team/app/blobs/uploads/")
        .with_status(202)
        .with_header(
            "Location",
            &format!("{}/v2/team/app/blobs/uploads/uuid-2", server.url()),
        )
        .create_async()
        .await;
    let put = server
        .mock("PUT", "/v2/team/app/blobs/uploads/uuid-2")
        .match_query(Matcher::UrlEncoded("digest".into(), digest.to_string()))
        .with_status(201)
        .expect(1)
        .create_async()
        .await;

    let registry = session(&server);
    registry
        .push_blob(data.into(), MEDIA_TYPE_LAYER, false)
        .await
        .unwrap();

    put.assert_async().await;
}

#[tokio::test]
async fn test_push_blob_force_uploads_existing_blob() {
    let mut server = mockito::Server::new_async().await;
    let data = b"forced".to_vec();
    let digest = Digest::sha256(&data);
    let _head = server
        .mock("HEAD", blob_path(&digest).as_str())
        .with_status(200)
        .create_async()
        .await;
    let _post = server
        .mock("POST", "/v2/team/app/blobs/uploads/")
        .with_status(202)
        .with_header("Location", "/v2/team/app/blobs/uploads/uuid-3")
        .create_async()
        .await;
    let put = server
        .mock("PUT", "/v2/team/app/blobs/uploads/uuid-3")
        .match_query(Matcher::Any)
        .with_status(201)
        .expect(1)
        .create_async()
        .await;

    let registry = session(&server);
    let descriptor = registry
        .push_blob(data.into(), MEDIA_TYPE_LAYER, true)
        .await
        .unwrap();

    put.assert_async().await;
    assert!(!descriptor.existing);
}

#[tokio::test]
async fn test_push_blob_rejected_upload() {
    let mut server = mockito::Server::new_async().await;
    let data = b"rejected".to_vec();
    let digest = Digest::sha256(&data);
    let _head = server
        .mock("HEAD", blob_path(&digest).as_str())
        .with_status(404)
        .create_async()
        .await;
    let _post = server
        .mock("POST", "/v2/team/app/blobs/uploads/")
        .with_status(202)
        .with_header("Location", "/v2/team/app/blobs/uploads/uuid-4")
        .create_async()
        .await;
    let _put = server
        .mock("PUT", "/v2/team/app/blobs/uploads/uuid-4")
        .match_query(Matcher::Any)
        .with_status(400)
        .with_body(r#"{"errors":[{"code":"DIGEST_INVALID"}]}"#)
        .create_async()
        .await;

    let registry = session(&server);
    match registry
        .push_blob(data.into(), MEDIA_TYPE_LAYER, false)
        .await
    {
        Err(DockhandError::UploadFailed {
            digest: failed,
            status_code,
            body,
        }) => {
            assert_eq!(failed, digest.to_string());
            assert_eq!(status_code, 400);
            assert!(body.contains("DIGEST_INVALID"));
        }
        other => panic!("Expected UploadFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_push_blob_upload_session_refused() {
    let mut server = mockito::Server::new_async().await;
    let data = b"denied".to_vec();
    let digest = Digest::sha256(&data);
    let _head = server
        .mock("HEAD", blob_path(&digest).as_str())
        .with_status(404)
        .create_async()
        .await;
    let _post = server
        .mock("POST", "/v2/team/app/blobs/uploads/")
        .with_status(403)
        .with_body("denied")
        .create_async()
        .await;

    let registry = session(&server);
    let result = registry.push_blob(data.into(), MEDIA_TYPE_LAYER, false).await;

    assert!(matches!(
        result,
        Err(DockhandError::UploadFailed {
            status_code: 403,
            ..
        })
    ));
}

#[tokio::test]
async fn test_push_blob_reauthenticates_with_push_scope() {
    let mut server = mockito::Server::new_async().await;
    let data = b"needs auth".to_vec();
    let digest = Digest::sha256(&data);
    let challenge = format!(
        r#"Bearer realm="{}/token",service="reg",scope="repository:team/app:pull""#,
        server.url()
    );
    let unauthorized = server
        .mock("HEAD", blob_path(&digest).as_str())
        .match_header("authorization", Matcher::Missing)
        .with_status(401)
        .with_header("WWW-Authenticate", &challenge)
        .expect(1)
        .create_async()
        .await;
    let token = server
        .mock("GET", "/token")
        .match_query(Matcher::UrlEncoded(
            "scope".into(),
            "repository:team/app:pull,push".into(),
        ))
        .with_status(200)
        .with_body(r#"{"token":"push-tok"}"#)
        .expect(1)
        .create_async()
        .await;
    let authorized = server
        .mock("HEAD", blob_path(&digest).as_str())
        .match_header("authorization", "Bearer push-tok")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let registry = session(&server);
    let descriptor = registry
        .push_blob(data.into(), MEDIA_TYPE_LAYER, false)
        .await
        .unwrap();

    unauthorized.assert_async().await;
    token.assert_async().await;
    authorized.assert_async().await;
    assert!(descriptor.existing);
}
