use httpmock::{
    Method::{GET, HEAD},
    Mock, MockServer,
};
use serial_test::serial;

mod common;

// Paths used in benchmarks performed during these tests.
const INDEX_PATH: &str = "/";
const ABOUT_PATH: &str = "/about.html";

// Indexes to the above paths.
const INDEX_KEY: usize = 0;
const ABOUT_KEY: usize = 1;

const INDEX_BODY: &str = "<html><body>index</body></html>";

// All tests in this file run against common endpoints.
fn setup_mock_server_endpoints(server: &MockServer) -> Vec<Mock> {
    vec![
        server.mock(|when, then| {
            when.method(GET).path(INDEX_PATH);
            then.status(200).body(INDEX_BODY);
        }),
        server.mock(|when, then| {
            when.method(HEAD).path(ABOUT_PATH);
            then.status(200);
        }),
    ]
}

#[test]
#[serial]
// Benchmark the index with a single client for two seconds.
fn test_single_client() {
    let server = MockServer::start();
    let mock_endpoints = setup_mock_server_endpoints(&server);

    let configuration = common::build_configuration(&server, vec!["--time", "2"]);
    let stats = common::run_benchmark(configuration);

    assert!(stats.succeeded() > 0);
    assert_eq!(stats.failed(), 0);
    assert_eq!(stats.reported, 1);
    assert!(mock_endpoints[INDEX_KEY].hits() >= stats.succeeded());
    // Every response carries at least the body.
    assert!(stats.bytes() >= (stats.succeeded() * INDEX_BODY.len()) as u64);
    assert!(stats.started.is_some());
    assert!(stats.stopped >= stats.started);

    let report = stats.to_string();
    assert!(report.contains("pages/min"));
    assert!(report.contains("bytes/sec"));
    assert!(report.contains(&format!("Requests: {} successful, 0 failed.", stats.succeeded())));
}

#[test]
#[serial]
// Every client reports its results.
fn test_multiple_clients() {
    let server = MockServer::start();
    let mock_endpoints = setup_mock_server_endpoints(&server);

    let configuration = common::build_configuration(&server, vec!["--clients", "4", "-2"]);
    let stats = common::run_benchmark(configuration);

    assert_eq!(stats.clients, 4);
    assert_eq!(stats.reported, 4);
    assert!(stats.succeeded() >= 4);
    assert!(mock_endpoints[INDEX_KEY].hits() >= stats.succeeded());
}

#[test]
#[serial]
// HEAD is upgraded to HTTP/1.0 even when HTTP/0.9 is requested.
fn test_head_request() {
    let server = MockServer::start();
    let mock_endpoints = setup_mock_server_endpoints(&server);

    let url = server.url(ABOUT_PATH);
    let configuration = common::build_configuration_for(&url, vec!["--head", "-9"]);
    let stats = common::run_benchmark(configuration);

    assert!(stats.succeeded() > 0);
    assert_eq!(stats.failed(), 0);
    assert!(mock_endpoints[ABOUT_KEY].hits() > 0);
    assert_eq!(mock_endpoints[INDEX_KEY].hits(), 0);
}

#[test]
#[serial]
// Closing without reading still counts every request as succeeded, but no bytes.
fn test_force() {
    let server = MockServer::start();
    let _mock_endpoints = setup_mock_server_endpoints(&server);

    let configuration = common::build_configuration(&server, vec!["--force"]);
    let stats = common::run_benchmark(configuration);

    assert!(stats.succeeded() > 0);
    assert_eq!(stats.bytes(), 0);
}
