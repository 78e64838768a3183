use std::fs;
use std::sync::Arc;
use std::time::Duration;

use proxless_core::RouteSpec;
use proxless_discovery::{FileDiscovery, SyncStats};
use proxless_state::RouteIndex;
use tokio::sync::watch;

const TWO_ROUTES: &str = r#"
[[routes]]
id = "web"
service = "web"
port = 8080
deployment = "web"
namespace = "apps"
domains = ["web.example.com"]

[[routes]]
id = "api"
service = "api"
deployment = "api"
namespace = "apps"
domains = ["api.example.com"]
"#;

const ONE_ROUTE: &str = r#"
[[routes]]
id = "web"
service = "web"
port = 9090
deployment = "web"
namespace = "apps"
domains = ["www.example.com"]
"#;

#[test]
fn sync_installs_updates_and_removes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("routes.toml");
    fs::write(&path, TWO_ROUTES).unwrap();

    let index = RouteIndex::new();
    let discovery = FileDiscovery::new(&path, Arc::new(index.clone()));

    let stats = discovery.sync().unwrap();
    assert_eq!(
        stats,
        SyncStats {
            upserted: 2,
            deleted: 0,
            failed: 0
        }
    );
    assert_eq!(index.get_by_domain("web.example.com").unwrap().port, 8080);
    assert_eq!(index.get_by_domain("api.example.com").unwrap().port, 80);

    fs::write(&path, ONE_ROUTE).unwrap();
    let stats = discovery.sync().unwrap();
    assert_eq!(stats.upserted, 1);
    assert_eq!(stats.deleted, 1);
    assert!(index.get_by_id("api").is_err());
    assert!(index.get_by_domain("web.example.com").is_err());
    assert_eq!(index.get_by_domain("www.example.com").unwrap().port, 9090);
}

#[test]
fn foreign_routes_survive_sync() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("routes.toml");
    fs::write(&path, ONE_ROUTE).unwrap();

    let index = RouteIndex::new();
    index
        .upsert(RouteSpec::new("pushed", "svc", "d9", "apps", vec!["pushed.io".into()]))
        .unwrap();

    let discovery = FileDiscovery::new(&path, Arc::new(index.clone()));
    discovery.sync().unwrap();
    fs::write(&path, "").unwrap();
    let stats = discovery.sync().unwrap();

    assert_eq!(stats.deleted, 1);
    assert!(index.get_by_id("pushed").is_ok());
    assert_eq!(index.len(), 1);
}

#[test]
fn broken_file_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("routes.toml");
    fs::write(&path, TWO_ROUTES).unwrap();

    let index = RouteIndex::new();
    let discovery = FileDiscovery::new(&path, Arc::new(index.clone()));
    discovery.sync().unwrap();

    fs::write(&path, "[[routes]\nnot toml").unwrap();
    assert!(discovery.sync().is_err());
    assert_eq!(index.len(), 2);
}

#[test]
fn rejected_entry_does_not_block_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("routes.toml");
    fs::write(
        &path,
        r#"
[[routes]]
id = "a"
service = "a"
deployment = "shared"
namespace = "apps"
domains = ["a.io"]

[[routes]]
id = "b"
service = "b"
deployment = "shared"
namespace = "apps"
domains = ["b.io"]

[[routes]]
id = "c"
service = "c"
deployment = "c"
namespace = "apps"
domains = []
"#,
    )
    .unwrap();

    let index = RouteIndex::new();
    let discovery = FileDiscovery::new(&path, Arc::new(index.clone()));
    let stats = discovery.sync().unwrap();

    assert_eq!(stats.upserted, 1);
    assert_eq!(stats.failed, 2);
    assert!(index.get_by_domain("a.io").is_ok());
    assert!(index.get_by_domain("b.io").is_err());
}

#[tokio::test]
async fn run_picks_up_changes_until_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("routes.toml");
    fs::write(&path, ONE_ROUTE).unwrap();

    let index = RouteIndex::new();
    let discovery = Arc::new(FileDiscovery::new(&path, Arc::new(index.clone())));
    let (tx, rx) = watch::channel(false);

    let task = {
        let discovery = discovery.clone();
        tokio::spawn(async move { discovery.run(Duration::from_millis(20), rx).await })
    };

    for _ in 0..100 {
        if index.len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(index.get_by_id("web").is_ok());

    fs::write(&path, TWO_ROUTES).unwrap();
    for _ in 0..100 {
        if index.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(index.get_by_id("api").is_ok());

    tx.send(true).unwrap();
    task.await.unwrap();
}
