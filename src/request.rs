//! Building the request every client sends.
//!
//! A [`RequestTemplate`] is built once from the [`BenchConfig`] and copied into each
//! client. For every method except a file upload it holds the complete request. For
//! a `multipart/form-data` upload it holds everything up to the file content (the
//! headers, and the multipart preamble), the file to stream with its length
//! measured up front, and the closing boundary written after the file.
//!
//! The `Content-Length` of an upload is computed before anything is sent:
//!
//! ```text
//! --<boundary>\r\n                                                 \
//! Content-Disposition: form-data; name="webbench"; filename="x"\r\n | preamble
//! Content-Type: application/octet-stream\r\n\r\n                   /
//! <file content>                                                   | file length
//! \r\n--<boundary>--\r\n                                           | trailer
//! ```

use std::fmt;
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use url::{Host, Url};

use crate::config::{BenchConfig, PostBody};
use crate::BenchError;

/// Longest URL that can be benchmarked.
pub const MAX_URL_LENGTH: usize = 2048;

/// Ceiling on the size of a built request, not counting streamed file content.
pub const MAX_REQUEST_SIZE: usize = 2048;

/// Sent as the `User-Agent` header.
pub const USER_AGENT: &str = concat!("WebBench ", env!("CARGO_PKG_VERSION"));

const MIME_URLENCODED: &str = "application/x-www-form-urlencoded";
const MIME_MULTIPART: &str = "multipart/form-data; boundary=";
const CONTENT_DISPOSITION: &str = "Content-Disposition: form-data; name=\"webbench\"; ";
const UPLOAD_CONTENT_TYPE: &str = "Content-Type: application/octet-stream";

/// HTTP protocol versions, ordered from oldest to newest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum HttpVersion {
    /// A bare request line, no headers, and the server closes after responding.
    Http09,
    Http10,
    Http11,
}
impl HttpVersion {
    // The protocol suffix of the request line, HTTP/0.9 has none.
    fn suffix(self) -> Option<&'static str> {
        match self {
            HttpVersion::Http09 => None,
            HttpVersion::Http10 => Some("HTTP/1.0"),
            HttpVersion::Http11 => Some("HTTP/1.1"),
        }
    }
}
impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HttpVersion::Http09 => write!(f, "HTTP/0.9"),
            HttpVersion::Http10 => write!(f, "HTTP/1.0"),
            HttpVersion::Http11 => write!(f, "HTTP/1.1"),
        }
    }
}

/// Supported request methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Options,
    Trace,
    Post,
}
impl Method {
    /// The method token sent on the request line.
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Post => "POST",
        }
    }

    // The oldest protocol version that defines this method.
    fn minimum_version(self, file_upload: bool) -> HttpVersion {
        match self {
            Method::Get => HttpVersion::Http09,
            Method::Head => HttpVersion::Http10,
            Method::Options | Method::Trace => HttpVersion::Http11,
            Method::Post if file_upload => HttpVersion::Http11,
            Method::Post => HttpVersion::Http10,
        }
    }
}
impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where clients connect: the server, or the proxy when one is configured.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}
impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A file streamed as the body of a `multipart/form-data` upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Upload {
    pub path: PathBuf,
    /// Length of the file when the request was built, exactly this many bytes are sent.
    pub len: u64,
    /// The closing boundary, sent once the file is exhausted.
    pub trailer: Vec<u8>,
}

/// The request a client sends, built once and copied into every client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestTemplate {
    pub endpoint: Endpoint,
    pub method: Method,
    /// The protocol version actually used, after any upgrade the method requires.
    pub version: HttpVersion,
    /// The complete request or, for an upload, everything before the file content.
    pub head: Vec<u8>,
    pub upload: Option<Upload>,
    /// The `Content-Type` injected for a `POST`, if the caller didn't set one.
    pub content_type: Option<String>,
}

impl RequestTemplate {
    /// Build the request described by `config`.
    ///
    /// Fails if the URL is malformed, longer than [`MAX_URL_LENGTH`], isn't `http://`
    /// without a proxy, if HTTP/0.9 is combined with `POST`, if the file to upload
    /// can't be measured, or if the request doesn't fit in [`MAX_REQUEST_SIZE`].
    pub fn build(config: &BenchConfig) -> Result<RequestTemplate, BenchError> {
        if config.version == HttpVersion::Http09 && config.method == Method::Post {
            return Err(BenchError::InvalidOption {
                option: "--http09".to_string(),
                value: config.method.to_string(),
                detail: "HTTP/0.9 does not support POST method.".to_string(),
            });
        }

        let file_upload = matches!(config.body, Some(PostBody::File { .. }));
        let mut version = config
            .version
            .max(config.method.minimum_version(file_upload));
        // A proxy is only asked not to cache with a header.
        if config.force_reload && config.proxy.is_some() {
            version = version.max(HttpVersion::Http10);
        }
        if version != config.version {
            debug!(
                "upgraded {} to {} for {} request",
                config.version, version, config.method
            );
        }

        let target = Target::parse(&config.url, config.proxy.as_ref())?;

        let mut head = format!("{} {}", config.method, target.request_target);
        if let Some(suffix) = version.suffix() {
            head.push(' ');
            head.push_str(suffix);
        }
        head.push_str("\r\n");

        let mut content_type = None;
        if version >= HttpVersion::Http10 {
            head.push_str(&format!("User-Agent: {}\r\n", USER_AGENT));
            if let Some(host) = target.host_header.as_ref() {
                head.push_str(&format!("Host: {}\r\n", host));
            }
            if config.force_reload && config.proxy.is_some() {
                head.push_str("Pragma: no-cache\r\n");
            }
            if version >= HttpVersion::Http11 {
                head.push_str("Connection: close\r\n");
            }
            for (name, value) in &config.headers {
                head.push_str(&format!("{}: {}\r\n", name, value));
            }

            let explicit_content_type = config
                .headers
                .iter()
                .any(|(name, _)| name.eq_ignore_ascii_case("content-type"));
            if config.method == Method::Post && !explicit_content_type {
                let injected = match config.body.as_ref() {
                    Some(PostBody::File { boundary, .. }) => {
                        format!("{}{}", MIME_MULTIPART, boundary)
                    }
                    _ => MIME_URLENCODED.to_string(),
                };
                head.push_str(&format!("Content-Type: {}\r\n", injected));
                content_type = Some(injected);
            }
        } else if !config.headers.is_empty() {
            warn!(
                "HTTP/0.9 requests have no headers, ignoring {} custom header(s)",
                config.headers.len()
            );
        }

        let mut head = head.into_bytes();
        let mut upload = None;
        match (config.method, config.body.as_ref()) {
            (Method::Post, Some(PostBody::File { path, boundary })) => {
                let preamble = format!(
                    "--{}\r\n{}filename=\"{}\"\r\n{}\r\n\r\n",
                    boundary,
                    CONTENT_DISPOSITION,
                    path.display(),
                    UPLOAD_CONTENT_TYPE
                );
                let trailer = format!("\r\n--{}--\r\n", boundary).into_bytes();
                let len = file_len(path)?;
                let content_length = preamble.len() as u64 + len + trailer.len() as u64;
                head.extend_from_slice(
                    format!("Content-Length: {}\r\n\r\n", content_length).as_bytes(),
                );
                head.extend_from_slice(preamble.as_bytes());
                upload = Some(Upload {
                    path: path.clone(),
                    len,
                    trailer,
                });
            }
            (Method::Post, body) => {
                let body: &[u8] = match body {
                    Some(PostBody::Inline(body)) => body,
                    _ => &[],
                };
                head.extend_from_slice(
                    format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes(),
                );
                head.extend_from_slice(body);
            }
            _ => {
                if version >= HttpVersion::Http10 {
                    head.extend_from_slice(b"\r\n");
                }
            }
        }

        if head.len() > MAX_REQUEST_SIZE {
            return Err(BenchError::RequestTooLarge {
                size: head.len(),
                limit: MAX_REQUEST_SIZE,
            });
        }

        Ok(RequestTemplate {
            endpoint: target.endpoint,
            method: config.method,
            version,
            head,
            upload,
            content_type,
        })
    }

    /// `POST` counts the bytes it sends, every other method the bytes it receives.
    pub fn counts_sent_bytes(&self) -> bool {
        self.method == Method::Post
    }

    /// Total bytes written to the connection for one request.
    pub fn wire_len(&self) -> u64 {
        let head = self.head.len() as u64;
        match self.upload.as_ref() {
            Some(upload) => head + upload.len + upload.trailer.len() as u64,
            None => head,
        }
    }
}

// The pieces of the URL a request needs.
struct Target {
    endpoint: Endpoint,
    // The path, or the absolute URL when talking to a proxy.
    request_target: String,
    // Only set when not talking to a proxy.
    host_header: Option<String>,
}

impl Target {
    fn parse(url: &str, proxy: Option<&Endpoint>) -> Result<Target, BenchError> {
        let invalid = |detail: &str| BenchError::InvalidUrl {
            url: url.to_string(),
            detail: detail.to_string(),
        };

        let delimiter = url
            .find("://")
            .ok_or_else(|| invalid("is not a valid URL."))?;
        if url.len() > MAX_URL_LENGTH {
            return Err(invalid("URL is too long."));
        }
        if proxy.is_none() && !url[..delimiter].eq_ignore_ascii_case("http") {
            return Err(invalid(
                "Only HTTP protocol is directly supported, set --proxy for others.",
            ));
        }

        let rest = &url[delimiter + 3..];
        let slash = rest
            .find('/')
            .ok_or_else(|| invalid("Invalid URL syntax - hostname doesn't end with '/'."))?;

        // A proxy resolves the URL itself.
        if let Some(proxy) = proxy {
            return Ok(Target {
                endpoint: proxy.clone(),
                request_target: url.to_string(),
                host_header: None,
            });
        }

        let authority = &rest[..slash];
        if authority.is_empty() {
            return Err(invalid("Missing hostname."));
        }
        let parsed = Url::parse(&format!("http://{}/", authority)).map_err(|parse_error| {
            BenchError::InvalidHost {
                host: authority.to_string(),
                detail: "Invalid host.".to_string(),
                parse_error,
            }
        })?;
        let host = match parsed.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(address)) => address.to_string(),
            Some(Host::Ipv6(address)) => address.to_string(),
            None => return Err(invalid("Missing hostname.")),
        };
        // Port 0 is as good as no port.
        let port = match parsed.port() {
            Some(0) | None => 80,
            Some(port) => port,
        };

        Ok(Target {
            endpoint: Endpoint { host, port },
            request_target: rest[slash..].to_string(),
            host_header: parsed.host_str().map(|host| host.to_string()),
        })
    }
}

// Measure the file to upload by seeking to its end.
fn file_len(path: &Path) -> Result<u64, BenchError> {
    let invalid = |e: std::io::Error| BenchError::InvalidOption {
        option: "--post".to_string(),
        value: path.display().to_string(),
        detail: format!("Error in file open: {}", e),
    };
    let mut file = File::open(path).map_err(invalid)?;
    file.seek(SeekFrom::End(0)).map_err(invalid)
}
