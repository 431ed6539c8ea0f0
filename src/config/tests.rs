use super::*;
use std::io::Write;

async fn load(yaml: &str) -> Result<Config> {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    Config::from_file(file.path()).await
}

#[test]
fn defaults_are_sensible() {
    let config = Config::default();
    assert_eq!(config.balancer.algorithm, BalancingAlgorithm::RoundRobin);
    assert_eq!(config.health.check_interval_secs, 10);
    assert_eq!(config.deploy.canary_ramp, vec![5, 10, 25, 50, 100]);
    assert!(config.backends.is_empty());
    config.validate().unwrap();
}

#[tokio::test]
async fn full_config_round_trips_from_yaml() {
    let config = load(
        r#"
balancer:
  algorithm: least-connections
  drain_poll_ms: 25
health:
  check_interval_secs: 5
  probe_timeout_secs: 2
deploy:
  canary_ramp: [10, 50, 100]
  thresholds:
    max_error_rate: 2.5
    min_health_score: 90.0
    max_latency_ms: 1000.0
  monitor_window_secs: 120
backends:
  - id: api-1
    host: 10.0.0.1
    port: 8080
    service: api
    weight: 3
  - id: api-2
    host: 10.0.0.2
    port: 8080
"#,
    )
    .await
    .unwrap();

    assert_eq!(config.balancer.algorithm, BalancingAlgorithm::LeastConnections);
    assert_eq!(config.health.probe_timeout_secs, 2);
    assert_eq!(config.deploy.canary_ramp, vec![10, 50, 100]);
    assert_eq!(config.deploy.thresholds.max_error_rate, 2.5);
    assert_eq!(config.deploy.monitor_window_secs, 120);
    // Unspecified fields keep their defaults
    assert_eq!(config.deploy.rollback_retention, 50);
    assert_eq!(config.backends.len(), 2);
    assert_eq!(config.backends[0].weight, Some(3));
    assert_eq!(config.backends[1].service, None);
}

#[tokio::test]
async fn empty_document_yields_defaults() {
    let config = load("{}").await.unwrap();
    assert_eq!(config.health.check_interval_secs, 10);
}

#[tokio::test]
async fn unknown_fields_are_rejected() {
    let err = load("proxy:\n  port: 8080\n").await.unwrap_err();
    assert!(matches!(err, RollgateError::Config(_)));
}

#[tokio::test]
async fn invalid_ramp_is_rejected() {
    let err = load("deploy:\n  canary_ramp: [0, 50]\n").await.unwrap_err();
    assert!(matches!(err, RollgateError::Config(_)));
}

#[tokio::test]
async fn zero_interval_is_rejected() {
    let err = load("health:\n  check_interval_secs: 0\n").await.unwrap_err();
    assert!(matches!(err, RollgateError::Config(_)));
}

#[tokio::test]
async fn zero_weight_backend_is_rejected() {
    let err = load(
        "backends:\n  - id: b1\n    host: 10.0.0.1\n    port: 8080\n    weight: 0\n",
    )
    .await
    .unwrap_err();
    assert!(matches!(err, RollgateError::Config(_)));
}

#[tokio::test]
async fn missing_file_is_a_config_error() {
    let err = Config::from_file("/nonexistent/rollgate.yaml").await.unwrap_err();
    assert!(matches!(err, RollgateError::Config(_)));
}

#[test]
fn settings_convert_to_runtime_configs() {
    let settings = DeploySettings {
        monitor_window_secs: 90,
        ..DeploySettings::default()
    };
    let config: OrchestratorConfig = (&settings).into();
    assert_eq!(config.monitor_window, Duration::from_secs(90));
    assert_eq!(config.canary_ramp, vec![5, 10, 25, 50, 100]);

    let health: HealthMonitorConfig = (&HealthSettings::default()).into();
    assert_eq!(health.check_interval, Duration::from_secs(10));
    assert_eq!(health.probe_timeout, Duration::from_secs(5));

    let router: RouterConfig = (&BalancerSettings::default()).into();
    assert_eq!(router.drain_poll_interval, Duration::from_millis(50));
}
