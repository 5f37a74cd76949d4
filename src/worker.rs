use async_trait::async_trait;
use std::cmp;
use std::fmt;
use std::future::Future;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::watch;

use crate::config::BenchConfig;
use crate::connection::ConnectionFactory;
use crate::metrics::WorkerResult;
use crate::request::{HttpVersion, RequestTemplate, Upload};
use crate::timer::Timer;

/// Most bytes read from the upload file, or from the server, at once.
const CHUNK_SIZE: usize = 2048;

/// One simulated client.
///
/// Repeatedly connects, sends the request, reads the response until the server
/// closes the connection (unless forced not to), and closes, until its timer
/// expires. Nothing is shared with other clients; all results are reported at once
/// when the client exits.
pub(crate) struct Worker<C: ConnectionFactory> {
    number: usize,
    template: RequestTemplate,
    connector: Arc<C>,
    duration: Duration,
    force: bool,
    reread_limit: usize,
    canceled: watch::Receiver<bool>,
}

// The steps of an attempt, named in logs when one fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Connect,
    Send,
    Stream,
    HalfClose,
    Receive,
    Close,
}
impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let stage = match self {
            Stage::Connect => "connect",
            Stage::Send => "send",
            Stage::Stream => "upload",
            Stage::HalfClose => "half-close",
            Stage::Receive => "receive",
            Stage::Close => "close",
        };
        f.write_str(stage)
    }
}

// Why an attempt didn't complete.
#[derive(Debug)]
enum Interrupt {
    /// The timer expired, the client is done.
    Expired,
    /// The attempt failed and is counted as such.
    Failed(Stage, io::Error),
}

// Run one step of an attempt under the timer.
async fn bounded<F, T>(timer: &mut Timer, stage: Stage, fut: F) -> Result<T, Interrupt>
where
    F: Future<Output = io::Result<T>>,
{
    match timer.guard(fut).await {
        None => Err(Interrupt::Expired),
        Some(Ok(output)) => Ok(output),
        Some(Err(e)) => Err(Interrupt::Failed(stage, e)),
    }
}

impl<C: ConnectionFactory> Worker<C> {
    pub(crate) fn new(
        number: usize,
        config: &BenchConfig,
        template: RequestTemplate,
        connector: Arc<C>,
        canceled: watch::Receiver<bool>,
    ) -> Worker<C> {
        Worker {
            number,
            template,
            connector,
            duration: config.duration,
            force: config.force,
            reread_limit: config.reread_limit,
            canceled,
        }
    }

    /// Benchmark until the timer expires, then report the results on `result_tx`.
    pub(crate) async fn run(self, result_tx: flume::Sender<WorkerResult>) {
        debug!("launching client {}...", self.number);
        let result = self.benchmark().await;
        debug!(
            "exiting client {}: {} succeeded, {} failed, {} bytes",
            self.number, result.succeeded, result.failed, result.bytes
        );
        if result_tx.send_async(result).await.is_err() {
            warn!("client {} failed to report its results", self.number);
        }
    }

    async fn benchmark(&self) -> WorkerResult {
        let mut timer = Timer::start(self.duration, self.canceled.clone());
        let mut result = WorkerResult::default();

        let mut upload = match self.template.upload.as_ref() {
            Some(upload) => match UploadCursor::open(FileOpener, upload, self.reread_limit).await {
                Ok(cursor) => Some(cursor),
                Err(e) => {
                    error!(
                        "client {} failed to open {}: {}",
                        self.number,
                        upload.path.display(),
                        e
                    );
                    return result;
                }
            },
            None => None,
        };

        loop {
            if timer.expired() {
                break;
            }
            match self.attempt(&mut timer, upload.as_mut(), &mut result.bytes).await {
                Ok(()) => result.succeeded += 1,
                // The attempt cut short by the deadline counts neither way.
                Err(Interrupt::Expired) => break,
                Err(Interrupt::Failed(stage, e)) => {
                    trace!("client {}: {} failed: {}", self.number, stage, e);
                    result.failed += 1;
                }
            }
        }
        result
    }

    // One connect, send, receive and close cycle. Bytes are counted as they are
    // transferred, whether or not the attempt completes.
    async fn attempt(
        &self,
        timer: &mut Timer,
        upload: Option<&mut UploadCursor>,
        bytes: &mut u64,
    ) -> Result<(), Interrupt> {
        let template = &self.template;
        let counts_sent = template.counts_sent_bytes();

        let mut stream = bounded(
            timer,
            Stage::Connect,
            self.connector.connect(&template.endpoint),
        )
        .await?;

        bounded(timer, Stage::Send, stream.write_all(&template.head)).await?;
        if counts_sent {
            *bytes += template.head.len() as u64;
        }

        if let (Some(cursor), Some(Upload { trailer, .. })) = (upload, template.upload.as_ref()) {
            cursor.rewind(timer).await?;
            while let Some(chunk) = cursor.next_chunk(timer).await? {
                bounded(timer, Stage::Stream, stream.write_all(chunk)).await?;
                *bytes += chunk.len() as u64;
            }
            bounded(timer, Stage::Stream, stream.write_all(trailer)).await?;
            *bytes += trailer.len() as u64;
        }

        // Without headers the server needs the end of the stream to see the request.
        if template.version == HttpVersion::Http09 {
            bounded(timer, Stage::HalfClose, stream.shutdown()).await?;
        }

        if !self.force {
            let mut buffer = [0u8; CHUNK_SIZE];
            loop {
                match bounded(timer, Stage::Receive, stream.read(&mut buffer)).await? {
                    0 => break,
                    received => {
                        if !counts_sent {
                            *bytes += received as u64;
                        }
                    }
                }
            }
        }

        if template.version != HttpVersion::Http09 {
            bounded(timer, Stage::Close, stream.shutdown()).await?;
        }
        Ok(())
    }
}

// Opens the file to upload.
#[async_trait]
trait Opener: Send + Sync {
    type Reader: AsyncRead + AsyncSeek + Unpin + Send;

    async fn open(&self, path: &Path) -> io::Result<Self::Reader>;
}

struct FileOpener;

#[async_trait]
impl Opener for FileOpener {
    type Reader = File;

    async fn open(&self, path: &Path) -> io::Result<File> {
        File::open(path).await
    }
}

// A client's private handle on the file it uploads.
struct UploadCursor<O: Opener = FileOpener> {
    opener: O,
    path: PathBuf,
    len: u64,
    file: Option<O::Reader>,
    offset: u64,
    reread_limit: usize,
    buffer: Vec<u8>,
}

impl<O: Opener> UploadCursor<O> {
    async fn open(opener: O, upload: &Upload, reread_limit: usize) -> io::Result<UploadCursor<O>> {
        let file = opener.open(&upload.path).await?;
        Ok(UploadCursor {
            opener,
            path: upload.path.clone(),
            len: upload.len,
            file: Some(file),
            offset: 0,
            reread_limit,
            buffer: vec![0; CHUNK_SIZE],
        })
    }

    // Start over from the beginning of the file.
    async fn rewind(&mut self, timer: &mut Timer) -> Result<(), Interrupt> {
        self.offset = 0;
        if let Some(file) = self.file.as_mut() {
            match timer.guard(file.seek(SeekFrom::Start(0))).await {
                None => return Err(Interrupt::Expired),
                Some(Ok(_)) => return Ok(()),
                Some(Err(e)) => debug!("failed to rewind {}: {}", self.path.display(), e),
            }
        }
        self.reopen(timer).await
    }

    // Open the file again, continuing from the current offset.
    async fn reopen(&mut self, timer: &mut Timer) -> Result<(), Interrupt> {
        self.file = None;
        let opener = &self.opener;
        let path = &self.path;
        let offset = self.offset;
        let file = bounded(timer, Stage::Stream, async move {
            let mut file = opener.open(path).await?;
            file.seek(SeekFrom::Start(offset)).await?;
            Ok::<O::Reader, io::Error>(file)
        })
        .await?;
        self.file = Some(file);
        Ok(())
    }

    /// The next chunk of the file, `None` once the measured length has been read.
    ///
    /// A failed read reopens the file and tries again, at most `reread_limit` times
    /// in a row. A file that ends early fails the attempt.
    async fn next_chunk(&mut self, timer: &mut Timer) -> Result<Option<&[u8]>, Interrupt> {
        let remaining = self.len - self.offset;
        if remaining == 0 {
            return Ok(None);
        }
        let want = cmp::min(CHUNK_SIZE as u64, remaining) as usize;

        let mut rereads = 0;
        let filled = loop {
            let read = match self.file.as_mut() {
                Some(file) => match timer.guard(fill(file, &mut self.buffer[..want])).await {
                    None => return Err(Interrupt::Expired),
                    Some(read) => read,
                },
                None => Err(io::Error::new(io::ErrorKind::NotFound, "upload file is closed")),
            };
            match read {
                Ok(filled) => break filled,
                Err(e) if rereads < self.reread_limit => {
                    rereads += 1;
                    warn!(
                        "failed to read {} at offset {}, reopening: {}",
                        self.path.display(),
                        self.offset,
                        e
                    );
                    self.reopen(timer).await?;
                }
                Err(e) => return Err(Interrupt::Failed(Stage::Stream, e)),
            }
        };

        if filled < want {
            return Err(Interrupt::Failed(
                Stage::Stream,
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "{} ended after {} of {} bytes",
                        self.path.display(),
                        self.offset + filled as u64,
                        self.len
                    ),
                ),
            ));
        }
        self.offset += filled as u64;
        Ok(Some(&self.buffer[..filled]))
    }
}

// Read until `buffer` is full or the file ends.
async fn fill<R: AsyncRead + Unpin>(file: &mut R, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match file.read(&mut buffer[filled..]).await? {
            0 => break,
            read => filled += read,
        }
    }
    Ok(filled)
}
