//! Running lifecycle of a route: cold, scaled up on demand, idle, scaled down.

use std::sync::Arc;
use std::time::Duration;

use proxless_core::{RouteDefaults, RouteSpec};
use proxless_scale::{FakeCluster, ScaleConfig, ScaleController, SweepStats};
use proxless_state::RouteIndex;

#[tokio::test]
async fn cold_up_idle_down() {
    let index = RouteIndex::with_defaults(RouteDefaults {
        ttl_seconds: 30,
        readiness_timeout_seconds: 30,
    });
    let cluster = Arc::new(FakeCluster::new());
    let controller = ScaleController::new(index.clone(), cluster.clone(), ScaleConfig::default());

    index
        .upsert(RouteSpec::new("r1", "svc1", "d1", "n1", vec!["a.io".into()]))
        .unwrap();
    let route = index.get_by_id("r1").unwrap();
    assert!(!route.is_running);

    // Cold: nothing to sweep.
    assert_eq!(
        controller.scale_down_idle(route.last_used + 31).await,
        SweepStats::default()
    );

    // A request claims the scale-up and drives it.
    assert!(index.begin_scale_up("r1").unwrap());
    controller
        .ensure_up(&route, route.effective_readiness_timeout(&index.defaults()))
        .await
        .unwrap();
    assert_eq!(cluster.replicas("d1", "n1"), 1);

    // Still in use: not idle.
    index.mark_used("r1", route.last_used + 100).unwrap();
    assert_eq!(controller.scale_down_idle(route.last_used + 120).await.idle, 0);

    // Idle for 31s past the last use: scaled down and flagged stopped.
    let stats = controller.scale_down_idle(route.last_used + 131).await;
    assert_eq!(stats.scaled_down, 1);
    assert_eq!(cluster.replicas("d1", "n1"), 0);
    assert!(!index.get_by_id("r1").unwrap().is_running);

    // The next cold request may claim a scale-up again.
    assert!(index.begin_scale_up("r1").unwrap());
}

#[tokio::test]
async fn per_route_ttl_override_wins() {
    let index = RouteIndex::new();
    let cluster = Arc::new(FakeCluster::new());
    let controller = ScaleController::new(index.clone(), cluster.clone(), ScaleConfig::default());

    let mut spec = RouteSpec::new("r1", "svc1", "d1", "n1", vec!["a.io".into()]);
    spec.ttl_seconds = Some(600);
    spec.is_running = Some(true);
    index.upsert(spec).unwrap();
    let last_used = index.get_by_id("r1").unwrap().last_used;

    assert_eq!(controller.scale_down_idle(last_used + 31).await.idle, 0);
    assert_eq!(controller.scale_down_idle(last_used + 600).await.scaled_down, 1);
    assert_eq!(cluster.scale_down_calls(), 1);

    // Bounded waits are honoured even with generous budgets.
    let route = index.get_by_id("r1").unwrap();
    assert_eq!(
        route.effective_readiness_timeout(&index.defaults()),
        Duration::from_secs(30)
    );
}
