//! # Webbench
//!
//! Webbench is a simple web benchmark. It drives a configurable number of
//! concurrent clients against a single URL for a fixed amount of time, and then
//! reports how many requests succeeded, how many failed, and how many bytes were
//! transferred.
//!
//! Each client is an independent [`tokio`](https://docs.rs/tokio) task that owns
//! its own copy of a pre-built request. A client repeatedly opens a new connection,
//! writes the request, optionally reads the response until the server closes the
//! connection, and then starts over. Clients never share counters: each returns its
//! own [`WorkerResult`](metrics/struct.WorkerResult.html) when its deadline expires,
//! and the results are only summed once every client is done.
//!
//! ## Running a benchmark
//!
//! ```bash
//! $ webbench --clients 10 --time 30 http://127.0.0.1/
//! ```
//!
//! Requests can use HTTP/0.9, HTTP/1.0 (default) or HTTP/1.1, any of the `GET`,
//! `HEAD`, `OPTIONS`, `TRACE` or `POST` methods, custom headers, a proxy, and for
//! `POST` either an inline url-encoded body or a file streamed as a
//! `multipart/form-data` upload.
//!
//! ## Embedding
//!
//! ```rust,no_run
//! use gumdrop::Options;
//! use webbench::config::BenchConfiguration;
//! use webbench::Webbench;
//!
//! let configuration =
//!     BenchConfiguration::parse_args_default(&["--time", "5", "http://127.0.0.1/"]).unwrap();
//! let stats = Webbench::initialize_with_config(configuration).execute().unwrap();
//! println!("{} successful requests", stats.succeeded());
//! ```
//!
//! ## Exit codes
//!
//! - `0`: the benchmark ran
//! - `1`: the server (or proxy) could not be reached
//! - `2`: bad parameters
//! - `3`: internal error, the runtime could not be created

#[macro_use]
extern crate log;

pub mod config;
pub mod connection;
pub mod metrics;
pub mod request;
mod timer;
pub mod util;
mod worker;

use chrono::prelude::*;
use gumdrop::Options;
use lazy_static::lazy_static;
use num_format::{Locale, ToFormattedString};
use std::sync::Arc;
use std::{fmt, io};
use tokio::sync::watch;

use crate::config::{BenchConfig, BenchConfiguration};
use crate::connection::{ConnectionFactory, TcpConnector};
use crate::metrics::AggregateStats;
use crate::request::RequestTemplate;
use crate::worker::Worker;

// Tripped by the ctrl-c handler, observed by every client's timer.
lazy_static! {
    static ref CANCELED: watch::Sender<bool> = watch::channel(false).0;
}

/// An enumeration of all errors [`Webbench`](./struct.Webbench.html) can return.
#[derive(Debug)]
pub enum BenchError {
    /// Wraps a [`std::io::Error`](https://doc.rust-lang.org/std/io/struct.Error.html).
    Io(io::Error),
    /// Invalid option or value specified, may only be invalid in context.
    InvalidOption {
        /// The invalid option that caused this error, may be only invalid in context.
        option: String,
        /// The invalid value that caused this error, may be only invalid in context.
        value: String,
        /// An optional explanation of the error.
        detail: String,
    },
    /// The URL to benchmark is malformed or unsupported.
    InvalidUrl {
        /// The URL that caused this error.
        url: String,
        /// An optional explanation of the error.
        detail: String,
    },
    /// Failed to parse a hostname.
    InvalidHost {
        /// The invalid hostname that caused this error.
        host: String,
        /// An optional explanation of the error.
        detail: String,
        /// Wraps a [`url::ParseError`](https://docs.rs/url/*/url/enum.ParseError.html).
        parse_error: url::ParseError,
    },
    /// The assembled request does not fit within the request size ceiling.
    RequestTooLarge {
        /// The size the request would have been.
        size: usize,
        /// The ceiling it exceeded.
        limit: usize,
    },
    /// The upfront connection to the server (or proxy) failed.
    Unreachable {
        /// The `host:port` that could not be reached.
        endpoint: String,
        /// The underlying connection error.
        source: io::Error,
    },
    /// Failed to create the runtime that hosts the clients.
    Runtime(io::Error),
}
/// Implement a helper to provide a text description of all possible types of errors.
impl BenchError {
    fn describe(&self) -> &str {
        match *self {
            BenchError::Io(_) => "io::Error",
            BenchError::InvalidOption { .. } => "invalid option or value specified",
            BenchError::InvalidUrl { .. } => "invalid url",
            BenchError::InvalidHost { .. } => "failed to parse hostname",
            BenchError::RequestTooLarge { .. } => "request size overflowed",
            BenchError::Unreachable { .. } => "connect to server failed, aborting benchmark",
            BenchError::Runtime(_) => "failed to create runtime",
        }
    }

    /// The process exit code matching this error.
    ///
    /// An unreachable server exits with `1`, an internal failure exits with `3`,
    /// and everything else is a bad parameter exiting with `2`.
    pub fn exit_code(&self) -> i32 {
        match *self {
            BenchError::Unreachable { .. } => 1,
            BenchError::Runtime(_) => 3,
            _ => 2,
        }
    }
}

/// Implement format trait to allow displaying errors.
impl fmt::Display for BenchError {
    // Implement display of error with `{}` marker.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            BenchError::Io(ref source) => write!(f, "BenchError: {} ({})", self.describe(), source),
            BenchError::InvalidOption {
                ref option,
                ref value,
                ref detail,
            } => write!(
                f,
                "BenchError: {} ({} {}: {})",
                self.describe(),
                option,
                value,
                detail
            ),
            BenchError::InvalidUrl {
                ref url,
                ref detail,
            } => write!(f, "BenchError: {} ({}: {})", self.describe(), url, detail),
            BenchError::InvalidHost {
                ref host,
                ref parse_error,
                ..
            } => write!(f, "BenchError: {} ({}: {})", self.describe(), host, parse_error),
            BenchError::RequestTooLarge { size, limit } => write!(
                f,
                "BenchError: {} ({} bytes, limit {})",
                self.describe(),
                size,
                limit
            ),
            BenchError::Unreachable {
                ref endpoint,
                ref source,
            } => write!(f, "BenchError: {} ({}: {})", self.describe(), endpoint, source),
            BenchError::Runtime(ref source) => {
                write!(f, "BenchError: {} ({})", self.describe(), source)
            }
        }
    }
}

// Define the lower level source of this error, if any.
impl std::error::Error for BenchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            BenchError::Io(ref source) => Some(source),
            BenchError::InvalidHost {
                ref parse_error, ..
            } => Some(parse_error),
            BenchError::Unreachable { ref source, .. } => Some(source),
            BenchError::Runtime(ref source) => Some(source),
            _ => None,
        }
    }
}

/// Auto-convert IO errors.
impl From<io::Error> for BenchError {
    fn from(err: io::Error) -> BenchError {
        BenchError::Io(err)
    }
}

/// A configured benchmark, ready to [`execute`](#method.execute).
pub struct Webbench {
    configuration: BenchConfiguration,
}
impl Webbench {
    /// Load configuration from the command line.
    ///
    /// Exits with code `2` if the command line can't be parsed.
    pub fn initialize() -> Webbench {
        Webbench {
            configuration: BenchConfiguration::parse_args_default_or_exit(),
        }
    }

    /// Initialize a [`Webbench`](./struct.Webbench.html) with an already loaded
    /// configuration. This is generally used by tests.
    pub fn initialize_with_config(configuration: BenchConfiguration) -> Webbench {
        Webbench { configuration }
    }

    /// Validate the configuration, build the request, run every client until its
    /// deadline and print the summary.
    pub fn execute(self) -> Result<AggregateStats, BenchError> {
        // If version flag is set, display package name and version and exit.
        if self.configuration.version {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
            std::process::exit(0);
        }

        self.configuration.initialize_logger();

        let config = self.configuration.build()?;
        let template = RequestTemplate::build(&config)?;

        eprintln!(
            "Webbench - Simple Web Benchmark {}",
            env!("CARGO_PKG_VERSION")
        );
        println!("\n{}", describe_benchmark(&config, &template));

        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(BenchError::Runtime)?;

        util::setup_ctrlc_handler();

        let stats = rt.block_on(run(Arc::new(config), template, Arc::new(TcpConnector)))?;
        println!("\n{}", stats);

        Ok(stats)
    }
}

/// Check the server is reachable, then run one client per configured `clients` until each
/// deadline expires, summing every result that gets reported.
///
/// Fails with [`BenchError::Unreachable`](./enum.BenchError.html#variant.Unreachable)
/// without starting any client if a first connection can't be opened. That
/// connection is closed right away and never used for benchmarking.
pub async fn run<C: ConnectionFactory>(
    config: Arc<BenchConfig>,
    template: RequestTemplate,
    connector: Arc<C>,
) -> Result<AggregateStats, BenchError> {
    match connector.connect(&template.endpoint).await {
        Ok(check) => drop(check),
        Err(source) => {
            return Err(BenchError::Unreachable {
                endpoint: template.endpoint.to_string(),
                source,
            })
        }
    }
    debug!("{} is reachable", template.endpoint);

    let mut stats = AggregateStats::new(config.duration, config.clients);
    stats.started = Some(Local::now());

    let mut clients = Vec::with_capacity(config.clients);
    let mut results = Vec::with_capacity(config.clients);
    for index in 0..config.clients {
        // Each client reports exactly once, on its own channel.
        let (result_tx, result_rx) = flume::bounded(1);
        // We number clients from 1 as they're human-visible (in the logs).
        let worker = Worker::new(
            index + 1,
            &config,
            template.clone(),
            Arc::clone(&connector),
            CANCELED.subscribe(),
        );
        clients.push(tokio::spawn(worker.run(result_tx)));
        results.push(result_rx);
    }
    info!(
        "launched {} clients...",
        config.clients.to_formatted_string(&Locale::en)
    );

    for (index, result_rx) in results.into_iter().enumerate() {
        match result_rx.recv_async().await {
            Ok(result) => stats.record(result),
            Err(_) => warn!("client {} died without reporting its results", index + 1),
        }
    }

    for joined in futures::future::join_all(clients).await {
        if let Err(e) = joined {
            warn!("client task failed: {}", e);
        }
    }
    stats.stopped = Some(Local::now());

    if stats.reported < stats.clients {
        warn!(
            "only {} of {} clients reported results",
            stats.reported.to_formatted_string(&Locale::en),
            stats.clients.to_formatted_string(&Locale::en)
        );
    }
    info!(
        "{} requests sent, {} bytes transferred",
        stats.requests().to_formatted_string(&Locale::en),
        stats.bytes().to_formatted_string(&Locale::en)
    );

    Ok(stats)
}

// The human readable description printed before a benchmark starts.
fn describe_benchmark(config: &BenchConfig, template: &RequestTemplate) -> String {
    let mut description = format!("Benchmarking: {} {}", template.method, config.url);
    if let Some(content_type) = template.content_type.as_ref() {
        description.push_str(&format!(" Content-Type: {}", content_type));
    }
    description.push_str(&format!(" (using {})\n", template.version));

    if config.clients == 1 {
        description.push_str("1 client");
    } else {
        description.push_str(&format!("{} clients", config.clients));
    }
    description.push_str(&format!(", running {} sec", config.duration.as_secs()));
    if config.force {
        description.push_str(", early socket close");
    }
    if let Some(proxy) = config.proxy.as_ref() {
        description.push_str(&format!(", via proxy server {}", proxy));
    }
    for (name, value) in &config.headers {
        description.push_str(&format!(", custom header: \"{}: {}\"", name, value));
    }
    if config.force_reload {
        description.push_str(", forcing reload");
    }
    description.push('.');
    description
}
