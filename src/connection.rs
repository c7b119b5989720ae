//! Per-client HTTP connection: owns the read/write buffers, a peer address, a descriptor, and a
//! keep-alive flag; delegates parsing/serialization to [`crate::http`].

use std::io::{self, ErrorKind, IoSlice, Write};
use std::net::TcpStream;
use std::ops::Range;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use memmap2::Mmap;
use tracing::warn;

use crate::auth;
use crate::http::{ParseOutcome, Request, Response, Status, Version};
use crate::pool::DbPool;
use crate::resource::Resources;
use crate::Buffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Reading,
    Processing,
    Writing,
    Closed,
}

/// A file region queued behind `write_buf`, written as a trailing `IoSlice` so the head and body
/// go out in a single `writev`.
struct FileRegion {
    mmap: Arc<Mmap>,
    range: Range<usize>,
    sent: usize,
}

impl FileRegion {
    fn remaining(&self) -> &[u8] {
        &self.mmap[self.range.start + self.sent..self.range.end]
    }

    fn is_empty(&self) -> bool {
        self.sent >= self.range.len()
    }
}

pub struct Connection {
    stream: TcpStream,
    pub peer_addr: std::net::SocketAddr,
    read_buf: Buffer,
    write_buf: Buffer,
    keep_alive: bool,
    state: State,
    file_region: Option<FileRegion>,
    resources: Resources,
    user_count: Arc<AtomicUsize>,
}

impl Connection {
    pub fn init(
        stream: TcpStream,
        peer_addr: std::net::SocketAddr,
        resources: Resources,
        user_count: Arc<AtomicUsize>,
    ) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        user_count.fetch_add(1, Ordering::Relaxed);
        Ok(Self {
            stream,
            peer_addr,
            read_buf: Buffer::new(),
            write_buf: Buffer::new(),
            keep_alive: true,
            state: State::Idle,
            file_region: None,
            resources,
            user_count,
        })
    }

    /// Scatter-reads from the socket into `read_buf`. Returns `Ok(0)` on orderly EOF.
    pub fn read(&mut self) -> io::Result<usize> {
        self.state = State::Reading;
        self.read_buf.read_from_fd(&mut self.stream)
    }

    /// Parses and handles as many complete requests as are buffered, writing responses into
    /// `write_buf`. Returns `true` once at least one full request was handled.
    pub fn process(&mut self, db: &DbPool) -> bool {
        self.state = State::Processing;
        let mut handled_any = false;

        loop {
            match Request::parse(self.read_buf.peek()) {
                Ok(ParseOutcome::Complete(request, consumed)) => {
                    self.read_buf.retrieve(consumed);
                    self.keep_alive = request.keep_alive();
                    let response = self.route(db, &request);
                    self.queue_response(response);
                    handled_any = true;
                    if !self.keep_alive {
                        break;
                    }
                }
                Ok(ParseOutcome::Incomplete) => break,
                Err(e) => {
                    warn!(error = %e, "request parse failed");
                    self.keep_alive = false;
                    let response = Response::new(Version::H1_1, Status::BadRequest)
                        .with_body("text/plain", b"bad request".to_vec());
                    self.queue_response(response);
                    handled_any = true;
                    break;
                }
            }
        }

        handled_any
    }

    fn route(&self, db: &DbPool, request: &Request) -> Response {
        use crate::http::Method;

        match (request.method, request.target.as_str()) {
            (Method::Post, "/register") => auth::register(db, request.version, &request.body),
            (Method::Post, "/login") => auth::login(db, request.version, &request.body),
            (Method::Get | Method::Head, path) => match self.resources.resolve(path) {
                Ok(mapped) => {
                    let len = mapped.mmap.len();
                    Response::new(request.version, Status::Ok).with_file_body(
                        mapped.content_type,
                        mapped.mmap,
                        0..len,
                    )
                }
                Err(_) => Response::new(request.version, Status::NotFound)
                    .with_body("text/plain", b"not found".to_vec()),
            },
            _ => Response::new(request.version, Status::BadRequest)
                .with_body("text/plain", b"unsupported method".to_vec()),
        }
    }

    fn queue_response(&mut self, response: Response) {
        let _ = response.write_head(&mut self.write_buf, self.keep_alive);
        match response.body {
            crate::http::ResponseBody::File(mmap, range) => {
                self.file_region = Some(FileRegion {
                    mmap,
                    range,
                    sent: 0,
                });
            }
            crate::http::ResponseBody::Inline(bytes) => {
                let _ = self.write_buf.write_all(&bytes);
            }
            crate::http::ResponseBody::Empty => {}
        }
    }

    /// Gather-writes `write_buf` plus any pending file region. Returns `Ok(0)` once both are
    /// fully drained.
    pub fn write(&mut self) -> io::Result<usize> {
        self.state = State::Writing;
        let extra: [IoSlice; 1];
        let slices: &[IoSlice] = match &self.file_region {
            Some(region) if !region.is_empty() => {
                extra = [IoSlice::new(region.remaining())];
                &extra
            }
            _ => &[],
        };

        let readable_before = self.write_buf.readable_bytes();
        let n = self.write_buf.write_to_fd(&mut self.stream, slices)?;

        if let Some(region) = &mut self.file_region {
            let file_contribution = n.saturating_sub(readable_before);
            region.sent += file_contribution.min(region.range.len() - region.sent);
            if region.is_empty() {
                self.file_region = None;
            }
        }

        if self.to_write_bytes() == 0 {
            self.state = State::Idle;
        }
        Ok(n)
    }

    pub fn to_write_bytes(&self) -> usize {
        self.write_buf.readable_bytes()
            + self
                .file_region
                .as_ref()
                .map(|r| r.range.len() - r.sent)
                .unwrap_or(0)
    }

    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn close(&mut self) {
        if self.state == State::Closed {
            return;
        }
        self.state = State::Closed;
        self.file_region = None;
        self.user_count.fetch_sub(1, Ordering::Relaxed);
    }
}

impl AsRawFd for Connection {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

/// Helper for callers that need to distinguish a would-block pause from a real I/O error.
pub fn would_block(err: &io::Error) -> bool {
    err.kind() == ErrorKind::WouldBlock
}
