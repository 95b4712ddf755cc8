use super::*;
use crate::auth::MemoryCredentialStore;
use crate::error::DockhandError;
use crate::oci::{
    BlobReference, MEDIA_TYPE_CONTAINER_CONFIG, MEDIA_TYPE_LAYER, MEDIA_TYPE_MANIFEST_V2,
    SchemaTwoManifest,
};
use mockito::Matcher;
use tempfile::TempDir;

const CONFIG: &[u8] = br#"{"architecture":"amd64","os":"linux"}"#;
const BASE: &[u8] = b"base";
const TOP: &[u8] = b"top";

fn offline_config() -> Config {
    let mut config = Config::default();
    config.cache.enabled = false;
    config
}

fn dockhand(store: Arc<MemoryCredentialStore>, config: Config) -> Dockhand {
    Dockhand::builder()
        .with_config(config)
        .with_credential_store(store)
        .build()
        .unwrap()
}

fn image_manifest() -> String {
    SchemaTwoManifest::new(
        BlobReference::new(
            MEDIA_TYPE_CONTAINER_CONFIG,
            CONFIG.len() as u64,
            &Digest::sha256(CONFIG),
        ),
        vec![
            BlobReference::new(MEDIA_TYPE_LAYER, BASE.len() as u64, &Digest::sha256(BASE)),
            BlobReference::new(MEDIA_TYPE_LAYER, TOP.len() as u64, &Digest::sha256(TOP)),
        ],
    )
    .to_json()
    .unwrap()
}

/// Serves `team/app:v1` and counts downloads. Blobs are expected once.
async fn serve_image(
    server: &mut mockito::ServerGuard,
    manifest_hits: usize,
) -> Vec<mockito::Mock> {
    let mut mocks = vec![
        server
            .mock("GET", "/v2/team/app/manifests/v1")
            .with_status(200)
            .with_header("Content-Type", MEDIA_TYPE_MANIFEST_V2)
            .with_body(image_manifest())
            .expect(manifest_hits)
            .create_async()
            .await,
    ];
    for blob in [CONFIG, BASE, TOP] {
        mocks.push(
            server
                .mock(
                    "GET",
                    format!("/v2/team/app/blobs/{}", Digest::sha256(blob)).as_str(),
                )
                .with_status(200)
                .with_body(blob)
                .expect(1)
                .create_async()
                .await,
        );
    }
    mocks
}

#[test]
fn test_registry_reference() {
    let reference = registry_reference("http://localhost:5000/");
    assert_eq!(reference.registry(), "localhost:5000");
    assert!(!reference.use_tls());
    assert_eq!(reference.v2_url(), "http://localhost:5000/v2");

    let reference = registry_reference("registry.example.com");
    assert_eq!(reference.registry(), "registry.example.com");
    assert!(reference.use_tls());
}

#[test]
fn test_build_platform_from_config() {
    let mut config = offline_config();
    config.platform = Some("linux/arm64/v8".to_string());

    let dockhand = dockhand(Arc::new(MemoryCredentialStore::new()), config);
    assert_eq!(
        dockhand.platform(),
        Some(&Platform::new("linux", "arm64").with_variant("v8"))
    );
}

#[test]
fn test_build_explicit_platform_wins() {
    let mut config = offline_config();
    config.platform = Some("linux/arm64".to_string());

    let dockhand = Dockhand::builder()
        .with_config(config)
        .with_credential_store(Arc::new(MemoryCredentialStore::new()))
        .with_platform(Platform::new("linux", "amd64"))
        .build()
        .unwrap();
    assert_eq!(dockhand.platform(), Some(&Platform::new("linux", "amd64")));
}

#[test]
fn test_build_rejects_malformed_platform() {
    let mut config = offline_config();
    config.platform = Some("linux".to_string());

    let result = Dockhand::builder()
        .with_config(config)
        .with_credential_store(Arc::new(MemoryCredentialStore::new()))
        .build();
    assert!(matches!(result, Err(DockhandError::Validation { .. })));
}

#[test]
fn test_cache_maintenance_without_disk_cache() {
    let dockhand = dockhand(Arc::new(MemoryCredentialStore::new()), offline_config());
    assert_eq!(dockhand.cache_stats().unwrap(), None);
    assert_eq!(dockhand.clear_cache().unwrap(), None);
}

#[test]
fn test_cache_with_zero_memory_entries() {
    let temp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.cache.dir = Some(temp.path().to_path_buf());
    config.cache.memory_entries = 0;

    let dockhand = dockhand(Arc::new(MemoryCredentialStore::new()), config);
    assert_eq!(dockhand.cache_stats().unwrap(), Some(CacheStats::default()));
}

#[tokio::test]
async fn test_pull_writes_through_disk_cache() {
    let mut server = mockito::Server::new_async().await;
    let mocks = serve_image(&mut server, 2).await;
    let temp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.cache.dir = Some(temp.path().join("blobs"));
    let dockhand = dockhand(Arc::new(MemoryCredentialStore::new()), config);
    let reference = format!("http://{}/team/app:v1", server.host_with_port());

    let mut first = Vec::new();
    dockhand
        .pull(&reference, ArchiveTarget::Buffer(&mut first))
        .await
        .unwrap();
    // The manifest is fetched again, blobs come from the cache
    let mut second = Vec::new();
    dockhand
        .pull(&reference, ArchiveTarget::Buffer(&mut second))
        .await
        .unwrap();

    for mock in &mocks {
        mock.assert_async().await;
    }
    assert_eq!(first, second);
    let stats = dockhand.cache_stats().unwrap().unwrap();
    assert_eq!(stats.disk_entries, 3);

    let cleared = dockhand.clear_cache().unwrap().unwrap();
    assert_eq!(cleared.removed_files, 3);
}

#[tokio::test]
async fn test_pull_then_push_keeps_layer_order() {
    let mut server = mockito::Server::new_async().await;
    let _image = serve_image(&mut server, 1).await;
    let dockhand = dockhand(Arc::new(MemoryCredentialStore::new()), offline_config());
    let host = server.host_with_port();

    let mut archive = Vec::new();
    dockhand
        .pull(
            &format!("http://{}/team/app:v1", host),
            ArchiveTarget::Buffer(&mut archive),
        )
        .await
        .unwrap();

    let _missing = server
        .mock("HEAD", Matcher::Regex(r"^/v2/team/copy/blobs/sha256:".to_string()))
        .with_status(404)
        .expect(3)
        .create_async()
        .await;
    let _session = server
        .mock("POST", "/v2/team/copy/blobs/uploads/")
        .with_status(202)
        .with_header("Location", "/v2/team/copy/blobs/uploads/session")
        .expect(3)
        .create_async()
        .await;
    let uploads = server
        .mock("PUT", "/v2/team/copy/blobs/uploads/session")
        .match_query(Matcher::Regex("digest=sha256".to_string()))
        .with_status(201)
        .expect(3)
        .create_async()
        .await;
    let published = Digest::sha256(image_manifest().as_bytes());
    let manifest = server
        .mock("PUT", "/v2/team/copy/manifests/v2")
        .match_body(Matcher::Regex(format!(
            "{}.*{}.*{}",
            Digest::sha256(CONFIG),
            Digest::sha256(BASE),
            Digest::sha256(TOP)
        )))
        .with_status(201)
        .with_header("docker-content-digest", &published.to_string())
        .expect(1)
        .create_async()
        .await;

    let digest = dockhand
        .push(
            ArchiveSource::Bytes(archive),
            &format!("http://{}/team/copy:v2", host),
        )
        .await
        .unwrap();

    uploads.assert_async().await;
    manifest.assert_async().await;
    assert_eq!(digest, published);
}

#[tokio::test]
async fn test_list_repositories_for_registry_host() {
    let mut server = mockito::Server::new_async().await;
    let _catalog = server
        .mock("GET", "/v2/_catalog")
        .with_status(200)
        .with_body(r#"{"repositories":["team/app","team/copy"]}"#)
        .create_async()
        .await;

    let dockhand = dockhand(Arc::new(MemoryCredentialStore::new()), offline_config());
    let repositories = dockhand
        .list_repositories(
            &format!("http://{}", server.host_with_port()),
            None,
            None,
            false,
        )
        .await
        .unwrap();

    assert_eq!(repositories, vec!["team/app", "team/copy"]);
}

#[tokio::test]
async fn test_list_tags_lazy_from_cursor() {
    let mut server = mockito::Server::new_async().await;
    let first = server
        .mock("GET", "/v2/team/app/tags/list")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("last".into(), "v1".into()),
            Matcher::UrlEncoded("n".into(), "1".into()),
        ]))
        .with_status(200)
        .with_header("link", "</v2/team/app/tags/list?last=v2&n=1>")
        .with_body(r#"{"name":"team/app","tags":["v2"]}"#)
        .expect(1)
        .create_async()
        .await;
    let rest = server
        .mock("GET", "/v2/team/app/tags/list")
        .match_query(Matcher::UrlEncoded("last".into(), "v2".into()))
        .with_status(200)
        .with_body(r#"{"name":"team/app","tags":["v3"]}"#)
        .expect(0)
        .create_async()
        .await;

    let dockhand = dockhand(Arc::new(MemoryCredentialStore::new()), offline_config());
    let tags = dockhand
        .list_tags(
            &format!("http://{}/team/app", server.host_with_port()),
            Some("v1"),
            Some(1),
            true,
        )
        .await
        .unwrap();

    first.assert_async().await;
    rest.assert_async().await;
    assert_eq!(tags, vec!["v2"]);
}

#[tokio::test]
async fn test_login_saves_verified_credentials() {
    let mut server = mockito::Server::new_async().await;
    let challenge = format!(r#"Bearer realm="{}/token",service="reg""#, server.url());
    let _probe = server
        .mock("GET", "/v2/")
        .with_status(401)
        .with_header("www-authenticate", &challenge)
        .create_async()
        .await;
    let token = server
        .mock("GET", "/token")
        .match_query(Matcher::Any)
        .match_header("authorization", "Basic dXNlcjpwYXNz")
        .with_status(200)
        .with_body(r#"{"token":"tok"}"#)
        .expect(1)
        .create_async()
        .await;

    let store = Arc::new(MemoryCredentialStore::new());
    let dockhand = dockhand(store.clone(), offline_config());
    let registry = format!("http://{}", server.host_with_port());
    dockhand.login(&registry, "user", "pass").await.unwrap();

    token.assert_async().await;
    assert_eq!(
        store.lookup(&server.host_with_port()),
        Some("dXNlcjpwYXNz".to_string())
    );

    dockhand.logout(&registry).unwrap();
    assert_eq!(store.lookup(&server.host_with_port()), None);
}

#[tokio::test]
async fn test_login_rejected_stores_nothing() {
    let mut server = mockito::Server::new_async().await;
    let challenge = format!(r#"Bearer realm="{}/token",service="reg""#, server.url());
    let _probe = server
        .mock("GET", "/v2/")
        .with_status(401)
        .with_header("www-authenticate", &challenge)
        .create_async()
        .await;
    let _token = server
        .mock("GET", "/token")
        .match_query(Matcher::Any)
        .with_status(401)
        .with_body("bad credentials")
        .create_async()
        .await;

    let store = Arc::new(MemoryCredentialStore::new());
    let dockhand = dockhand(store.clone(), offline_config());
    let result = dockhand
        .login(&format!("http://{}", server.host_with_port()), "user", "wrong")
        .await;

    assert!(matches!(
        result,
        Err(DockhandError::Authentication {
            status_code: Some(401),
            ..
        })
    ));
    assert!(store.list().is_empty());
}
