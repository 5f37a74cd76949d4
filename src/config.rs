//! Functions and structures related to configuring a benchmark.
//!
//! Webbench is configured at run time by passing in the options and flags defined by
//! the [`BenchConfiguration`] structure. Once validated with
//! [`BenchConfiguration::build`] the result is an immutable [`BenchConfig`], shared
//! read-only by every client.

use gumdrop::Options;
use simplelog::*;
use std::path::PathBuf;
use std::time::Duration;

use crate::request::{Endpoint, HttpVersion, Method};
use crate::util;
use crate::BenchError;

/// Run time used when `--time` is not set, or is invalid.
pub const DEFAULT_RUN_TIME: usize = 30;

/// Port used for a proxy configured without one, or with an invalid one.
pub const DEFAULT_PROXY_PORT: u16 = 80;

/// Longest accepted `--post` value, either the body or the name of the file to upload.
pub const MAX_POST_SIZE: usize = 1024;

/// Runtime options available when launching a benchmark.
///
/// Webbench leverages [`gumdrop`](https://docs.rs/gumdrop/) to derive help from
/// the below structure.
#[derive(Options, Debug, Clone, Default)]
#[options(help = r#"webbench [option]... URL

Drives concurrent HTTP clients at URL for a fixed time and reports throughput.

The following runtime options are available:"#)]
pub struct BenchConfiguration {
    /// URL to benchmark (ie http://10.21.32.33/)
    #[options(free)]
    pub url: Vec<String>,

    /// Displays this help
    #[options(short = "h")]
    pub help: bool,
    /// Prints version information
    #[options(short = "V")]
    pub version: bool,

    /// Doesn't wait for a reply from the server
    #[options(short = "f")]
    pub force: bool,
    /// Sends a reload request (Pragma: no-cache)
    #[options(short = "r")]
    pub reload: bool,
    /// Runs benchmark for (30, 30s, 20m, 1h30m, etc), default 30 seconds
    #[options(short = "t", meta = "TIME")]
    pub time: String,
    /// Uses a proxy server for the request
    #[options(short = "p", meta = "SERVER:PORT")]
    pub proxy: String,
    /// Runs N HTTP clients at once, default one
    #[options(short = "c", meta = "N")]
    pub clients: Option<usize>,

    /// Uses HTTP/0.9 style requests
    #[options(short = "9")]
    pub http09: bool,
    /// Uses HTTP/1.0 protocol (default)
    #[options(short = "1")]
    pub http10: bool,
    /// Uses HTTP/1.1 protocol
    #[options(short = "2")]
    pub http11: bool,

    /// Uses GET request method (default)
    #[options(no_short)]
    pub get: bool,
    /// Uses HEAD request method
    #[options(no_short)]
    pub head: bool,
    /// Uses OPTIONS request method
    #[options(no_short, long = "options")]
    pub options_method: bool,
    /// Uses TRACE request method
    #[options(no_short)]
    pub trace: bool,
    /// Uses POST request method, sending CONTENT (or with --file, the file named CONTENT)
    #[options(short = "o", meta = "CONTENT")]
    pub post: Option<String>,
    /// Uses multipart/form-data for POST request method
    #[options(short = "i")]
    pub file: bool,
    /// Specifies a custom header, can be repeated
    #[options(short = "d", meta = "HEADER:VALUE")]
    pub header: Vec<String>,
    /// Sets how many times a failed upload read is retried (default: 1)
    // Add a blank line and then a 'Logging:' header after this option
    #[options(
        no_short,
        meta = "N",
        help = "Sets how many times a failed upload read is retried (default: 1)\n\nLogging:"
    )]
    pub reread: Option<usize>,

    /// Enables log file and sets name
    #[options(short = "G", meta = "NAME")]
    pub bench_log: String,
    /// Increases log file level (-g, -gg, etc)
    #[options(short = "g", count)]
    pub log_level: u8,
    /// Decreases verbosity (-q, -qq, etc)
    #[options(count, short = "q")]
    pub quiet: u8,
    /// Increases verbosity (-v, -vv, etc)
    #[options(count, short = "v")]
    pub verbose: u8,
}

/// The validated, immutable configuration of one benchmark run.
#[derive(Clone, Debug, PartialEq)]
pub struct BenchConfig {
    /// The URL every client requests.
    pub url: String,
    /// When set, connect here and pass the absolute URL to the proxy.
    pub proxy: Option<Endpoint>,
    /// The requested protocol version, before any upgrade a method requires.
    pub version: HttpVersion,
    pub method: Method,
    pub clients: usize,
    pub duration: Duration,
    /// Close the connection without reading the response.
    pub force: bool,
    /// Ask a proxy not to serve from its cache.
    pub force_reload: bool,
    /// Custom headers, sent in the order given.
    pub headers: Vec<(String, String)>,
    pub body: Option<PostBody>,
    /// How many times in a row a failed upload read is retried by reopening the file.
    pub reread_limit: usize,
}

/// What a `POST` request sends.
#[derive(Clone, Debug, PartialEq)]
pub enum PostBody {
    /// Sent verbatim as `application/x-www-form-urlencoded`.
    Inline(Vec<u8>),
    /// Streamed from a file as a `multipart/form-data` upload.
    File { path: PathBuf, boundary: String },
}

impl BenchConfiguration {
    /// Validate the run time options, building the [`BenchConfig`] shared by all
    /// clients.
    pub fn build(&self) -> Result<BenchConfig, BenchError> {
        let url = match self.url.as_slice() {
            [url] => url.to_string(),
            [] => {
                return Err(BenchError::InvalidOption {
                    option: "URL".to_string(),
                    value: "".to_string(),
                    detail: "Missing URL!".to_string(),
                })
            }
            _ => {
                return Err(BenchError::InvalidOption {
                    option: "URL".to_string(),
                    value: self.url.join(" "),
                    detail: "Only one URL can be benchmarked at a time.".to_string(),
                })
            }
        };

        let proxy = if self.proxy.is_empty() {
            None
        } else {
            Some(parse_proxy(&self.proxy)?)
        };

        let mut headers = Vec::with_capacity(self.header.len());
        for header in &self.header {
            headers.push(parse_header(header)?);
        }

        let body = match self.post.as_ref() {
            Some(content) => {
                if content.len() > MAX_POST_SIZE {
                    return Err(BenchError::InvalidOption {
                        option: "--post".to_string(),
                        value: util::truncate_string(content, 32),
                        detail: "Content or file name too large.".to_string(),
                    });
                }
                if self.file {
                    Some(PostBody::File {
                        path: PathBuf::from(content),
                        boundary: util::boundary_token(),
                    })
                } else {
                    Some(PostBody::Inline(content.as_bytes().to_vec()))
                }
            }
            None => {
                if self.file {
                    return Err(BenchError::InvalidOption {
                        option: "--file".to_string(),
                        value: "".to_string(),
                        detail: "--post not specified.".to_string(),
                    });
                }
                None
            }
        };

        Ok(BenchConfig {
            url,
            proxy,
            version: self.http_version()?,
            method: self.method()?,
            clients: self.clients(),
            duration: Duration::from_secs(self.run_time() as u64),
            force: self.force,
            force_reload: self.reload,
            headers,
            body,
            reread_limit: self.reread.unwrap_or(1),
        })
    }

    // At most one protocol version flag can be set, HTTP/1.0 if none is.
    fn http_version(&self) -> Result<HttpVersion, BenchError> {
        let selected: Vec<HttpVersion> = [
            (self.http09, HttpVersion::Http09),
            (self.http10, HttpVersion::Http10),
            (self.http11, HttpVersion::Http11),
        ]
        .iter()
        .filter(|(set, _)| *set)
        .map(|(_, version)| *version)
        .collect();

        match selected.as_slice() {
            [] => Ok(HttpVersion::Http10),
            [version] => Ok(*version),
            _ => Err(BenchError::InvalidOption {
                option: "--http09, --http10, --http11".to_string(),
                value: format!("{:?}", selected),
                detail: "Only one HTTP version can be selected.".to_string(),
            }),
        }
    }

    // At most one method can be selected, GET if none is.
    fn method(&self) -> Result<Method, BenchError> {
        let selected: Vec<Method> = [
            (self.get, Method::Get),
            (self.head, Method::Head),
            (self.options_method, Method::Options),
            (self.trace, Method::Trace),
            (self.post.is_some(), Method::Post),
        ]
        .iter()
        .filter(|(set, _)| *set)
        .map(|(_, method)| *method)
        .collect();

        match selected.as_slice() {
            [] => Ok(Method::Get),
            [method] => Ok(*method),
            _ => Err(BenchError::InvalidOption {
                option: "--get, --head, --options, --trace, --post".to_string(),
                value: format!("{:?}", selected),
                detail: "Only one request method can be selected.".to_string(),
            }),
        }
    }

    fn clients(&self) -> usize {
        match self.clients {
            Some(0) => {
                eprintln!("Warning in option --clients 0: Invalid clients, defaults to 1.");
                1
            }
            Some(clients) => clients,
            None => 1,
        }
    }

    fn run_time(&self) -> usize {
        if self.time.is_empty() {
            return DEFAULT_RUN_TIME;
        }
        match util::parse_timespan(&self.time) {
            0 => {
                eprintln!(
                    "Warning in option --time {}: Invalid value, defaults to {}.",
                    self.time, DEFAULT_RUN_TIME
                );
                DEFAULT_RUN_TIME
            }
            run_time => run_time,
        }
    }

    /// Optionally initialize the logger which writes to standard error and/or to
    /// a configurable log file.
    pub(crate) fn initialize_logger(&self) {
        // Configure debug output level.
        let debug_level = match self.verbose {
            0 => match self.quiet {
                0 => LevelFilter::Warn,
                _ => LevelFilter::Error,
            },
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Configure log file level.
        let log_level = match self.log_level {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
            debug_level,
            Config::default(),
            TerminalMode::Stderr,
            ColorChoice::Auto,
        )];

        // Open the log file if configured.
        if !self.bench_log.is_empty() {
            let log_to_file = PathBuf::from(&self.bench_log);
            match std::fs::File::create(&log_to_file) {
                Ok(file) => loggers.push(WriteLogger::new(log_level, Config::default(), file)),
                Err(e) => eprintln!(
                    "failed to create log file {}: {}",
                    log_to_file.display(),
                    e
                ),
            }
        }

        match CombinedLogger::init(loggers) {
            Ok(_) => (),
            Err(e) => {
                info!("failed to initialize CombinedLogger: {}", e);
            }
        }

        if !self.bench_log.is_empty() {
            info!("Writing to log file: {}", self.bench_log);
        }
        info!("Output verbosity level: {}", debug_level);
        info!("Logfile verbosity level: {}", log_level);
    }
}

/// Parse a `--proxy` value of the form `server:port`.
///
/// The port may be omitted, in which case it defaults to 80. An unparsable or zero
/// port warns and also defaults to 80.
pub fn parse_proxy(proxy: &str) -> Result<Endpoint, BenchError> {
    let (host, port) = match proxy.rfind(':') {
        None => (proxy, None),
        Some(0) => {
            return Err(BenchError::InvalidOption {
                option: "--proxy".to_string(),
                value: proxy.to_string(),
                detail: "Missing hostname.".to_string(),
            })
        }
        Some(position) if position == proxy.len() - 1 => {
            return Err(BenchError::InvalidOption {
                option: "--proxy".to_string(),
                value: proxy.to_string(),
                detail: "Port number is missing.".to_string(),
            })
        }
        Some(position) => (&proxy[..position], Some(&proxy[position + 1..])),
    };

    let port = match port.map(|port| port.parse::<u16>()) {
        None => DEFAULT_PROXY_PORT,
        Some(Ok(port)) if port > 0 => port,
        Some(_) => {
            eprintln!(
                "Warning in option --proxy {}: Invalid proxy port, defaults to {}.",
                proxy, DEFAULT_PROXY_PORT
            );
            DEFAULT_PROXY_PORT
        }
    };

    Ok(Endpoint {
        host: host.to_string(),
        port,
    })
}

/// Parse a `--header` value of the form `name: value`.
///
/// The name ends at the first `:`, leading spaces are stripped from the value.
pub fn parse_header(header: &str) -> Result<(String, String), BenchError> {
    let invalid = |detail: &str| BenchError::InvalidOption {
        option: "--header".to_string(),
        value: header.to_string(),
        detail: detail.to_string(),
    };

    let (name, value) = header
        .split_once(':')
        .ok_or_else(|| invalid("Bad format."))?;
    if name.is_empty() {
        return Err(invalid("Missing custom header."));
    }
    let value = value.trim_start_matches(' ');
    if value.is_empty() {
        return Err(invalid("Header value is missing."));
    }

    Ok((name.to_string(), value.to_string()))
}
