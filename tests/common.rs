use gumdrop::Options;
use httpmock::MockServer;
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use webbench::config::BenchConfiguration;
use webbench::metrics::AggregateStats;
use webbench::Webbench;

/// Not all functions are used by all tests, so we enable allow(dead_code) to avoid
/// compiler warnings during testing.

/// The following options are configured by default, if not set to a custom value:
///  --clients 1
///  --time 1
/// and the URL of the mock server root is appended.
#[allow(dead_code)]
pub fn build_configuration(server: &MockServer, custom: Vec<&str>) -> BenchConfiguration {
    let url = server.url("/");
    build_configuration_for(&url, custom)
}

/// Like [`build_configuration`], benchmarking any URL.
pub fn build_configuration_for(url: &str, custom: Vec<&str>) -> BenchConfiguration {
    let mut configuration: Vec<&str> = vec![];
    configuration.extend_from_slice(&custom);

    // Default to testing with 1 client if not otherwise configured.
    if !configuration.contains(&"--clients") && !configuration.contains(&"-c") {
        configuration.extend_from_slice(&["--clients", "1"]);
    }

    // Default to running for 1 second if not otherwise configured.
    if !configuration.contains(&"--time") && !configuration.contains(&"-t") {
        configuration.extend_from_slice(&["--time", "1"]);
    }

    configuration.push(url);

    BenchConfiguration::parse_args_default(&configuration)
        .expect("failed to parse options and generate a configuration")
}

/// Run the benchmark, returning the AggregateStats.
#[allow(dead_code)]
pub fn run_benchmark(configuration: BenchConfiguration) -> AggregateStats {
    Webbench::initialize_with_config(configuration)
        .execute()
        .unwrap()
}

/// A port nothing is listening on.
#[allow(dead_code)]
pub fn refused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Write a test artifact under the system temp directory, returning its path.
#[allow(dead_code)]
pub fn write_upload(name: &str, content: &[u8]) -> PathBuf {
    let path = std::env::temp_dir().join(format!("{}-{}", std::process::id(), name));
    std::fs::write(&path, content).expect("failed to write upload file");
    path
}

/// Helper to delete test artifacts, if existing.
#[allow(dead_code)]
pub fn cleanup_files(files: Vec<&PathBuf>) {
    for file in files {
        if file.exists() {
            std::fs::remove_file(file).expect("failed to remove file");
        }
    }
}

/// A raw HTTP server capturing every request it receives.
///
/// Reads the request headers and, when a `Content-Length` is sent, exactly that
/// many body bytes. Without headers (HTTP/0.9) reads until the client half-closes.
/// It then answers with `response` and closes the connection.
#[allow(dead_code)]
pub struct CapturingServer {
    pub port: u16,
    pub requests: flume::Receiver<Vec<u8>>,
    runtime: tokio::runtime::Runtime,
}

#[allow(dead_code)]
impl CapturingServer {
    pub fn start(response: &'static [u8]) -> CapturingServer {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .expect("failed to build server runtime");
        let listener = runtime
            .block_on(TcpListener::bind("127.0.0.1:0"))
            .expect("failed to bind server");
        let port = listener.local_addr().unwrap().port();
        let (requests_tx, requests) = flume::unbounded();

        runtime.spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let requests_tx = requests_tx.clone();
                tokio::spawn(async move {
                    if let Some(request) = read_request(&mut socket).await {
                        let _ = socket.write_all(response).await;
                        let _ = requests_tx.send(request);
                    }
                });
            }
        });

        CapturingServer {
            port,
            requests,
            runtime,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    /// Every request captured so far.
    pub fn captured(&self) -> Vec<Vec<u8>> {
        self.requests.try_iter().collect()
    }
}

#[allow(dead_code)]
async fn read_request(socket: &mut tokio::net::TcpStream) -> Option<Vec<u8>> {
    let mut request = Vec::new();
    let mut buffer = [0u8; 4096];
    let header_end = loop {
        if let Some(position) = find(&request, b"\r\n\r\n") {
            break position + 4;
        }
        match socket.read(&mut buffer).await {
            // A request without headers ends with the stream.
            Ok(0) => return if request.is_empty() { None } else { Some(request) },
            Ok(read) => request.extend_from_slice(&buffer[..read]),
            Err(_) => return None,
        }
    };

    let headers = String::from_utf8_lossy(&request[..header_end]).to_string();
    let content_length = headers
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while request.len() < header_end + content_length {
        match socket.read(&mut buffer).await {
            Ok(0) | Err(_) => return None,
            Ok(read) => request.extend_from_slice(&buffer[..read]),
        }
    }
    Some(request)
}

/// Position of `needle` in `haystack`.
#[allow(dead_code)]
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
