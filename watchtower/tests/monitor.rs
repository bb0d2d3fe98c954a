use std::time::Duration;
use watchtower::{HttpHealthChecker, RegionMonitor, RegionMonitorOptions};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn fast_options() -> RegionMonitorOptions {
    RegionMonitorOptions {
        probe_interval: Duration::from_millis(50),
        failure_threshold: 3,
        initial_delay: Duration::ZERO,
    }
}

async fn mount_health(server: &MockServer, status: u16) {
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

#[tokio::test]
async fn healthy_region_stays_healthy() {
    init_logger();
    let server = MockServer::start().await;
    mount_health(&server, 200).await;

    let checker = HttpHealthChecker::new(format!("{}/health", server.uri()));
    let monitor = RegionMonitor::start_with_opt("us-west", checker, fast_options());

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(monitor.is_healthy());
    assert!(monitor.probes() >= 3);
    assert_eq!(monitor.failed_probes(), 0);
    assert_eq!(monitor.transitions(), 0);
}

#[tokio::test]
async fn region_goes_down_after_threshold_failures() {
    init_logger();
    let server = MockServer::start().await;
    mount_health(&server, 500).await;

    let checker = HttpHealthChecker::new(format!("{}/health", server.uri()));
    let monitor = RegionMonitor::start_with_opt("eu-central", checker, fast_options());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!monitor.is_healthy());
    assert!(monitor.failed_probes() >= 3);
    assert_eq!(monitor.transitions(), 1);
}

#[tokio::test]
async fn single_failure_does_not_flip_liveness() {
    init_logger();
    let server = MockServer::start().await;
    mount_health(&server, 500).await;

    let opt = RegionMonitorOptions {
        probe_interval: Duration::from_millis(200),
        failure_threshold: 3,
        initial_delay: Duration::ZERO,
    };
    let checker = HttpHealthChecker::new(format!("{}/health", server.uri()));
    let monitor = RegionMonitor::start_with_opt("us-east", checker, opt);

    // Only one probe fits in this window
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(monitor.is_healthy());
    assert!(monitor.failed_probes() >= 1);
}

#[tokio::test]
async fn region_recovers_after_health_is_restored() {
    init_logger();
    let server = MockServer::start().await;
    mount_health(&server, 503).await;

    let checker = HttpHealthChecker::new(format!("{}/health", server.uri()));
    let monitor = RegionMonitor::start_with_opt("ap-south", checker, fast_options());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!monitor.is_healthy());

    // Restore the endpoint and wait for the monitor to notice
    server.reset().await;
    mount_health(&server, 200).await;

    monitor
        .wait_for_healthy(Duration::from_secs(5))
        .await
        .expect("region should recover");
    assert!(monitor.is_healthy());
    assert_eq!(monitor.transitions(), 2);
}

#[tokio::test]
async fn subscribers_observe_liveness_changes() {
    init_logger();
    let server = MockServer::start().await;
    mount_health(&server, 500).await;

    let checker = HttpHealthChecker::new(format!("{}/health", server.uri()));
    let monitor = RegionMonitor::start_with_opt("sa-east", checker, fast_options());
    let mut receiver = monitor.subscribe();

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            receiver.changed().await.expect("monitor alive");
            if !*receiver.borrow() {
                break;
            }
        }
    })
    .await
    .expect("should observe the down transition");
}

#[tokio::test]
async fn unreachable_endpoint_counts_as_failure() {
    init_logger();
    // Nothing is listening on this port
    let checker = HttpHealthChecker::with_options(
        "http://127.0.0.1:1/health".to_string(),
        200,
        Duration::from_millis(100),
    );
    let monitor = RegionMonitor::start_with_opt("offline", checker, fast_options());

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(!monitor.is_healthy());
    assert!(monitor.failed_probes() >= 3);
}
