//! HTTP/1.1 response serialization, including zero-copy static file bodies.

use std::io::{self, Write};
use std::ops::Range;
use std::sync::Arc;

use memmap2::Mmap;

use super::{Status, Version};

/// A response body, either fully buffered or a mapped file region served without copying it
/// into the connection's write buffer.
#[derive(Clone)]
pub enum ResponseBody {
    Inline(Vec<u8>),
    File(Arc<Mmap>, Range<usize>),
    Empty,
}

impl ResponseBody {
    pub fn len(&self) -> usize {
        match self {
            Self::Inline(bytes) => bytes.len(),
            Self::File(_, range) => range.len(),
            Self::Empty => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct Response {
    pub version: Version,
    pub status: Status,
    pub headers: Vec<(String, String)>,
    pub body: ResponseBody,
}

impl Response {
    pub fn new(version: Version, status: Status) -> Self {
        Self {
            version,
            status,
            headers: Vec::new(),
            body: ResponseBody::Empty,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn with_body(self, content_type: &str, body: Vec<u8>) -> Self {
        let mut resp = self.with_header("Content-Type", content_type);
        resp.body = ResponseBody::Inline(body);
        resp
    }

    pub fn with_file_body(self, content_type: &str, mmap: Arc<Mmap>, range: Range<usize>) -> Self {
        let mut resp = self.with_header("Content-Type", content_type);
        resp.body = ResponseBody::File(mmap, range);
        resp
    }

    /// Writes the status line and headers into `sink`. The caller is responsible for writing the
    /// body itself, since only it knows whether that's a plain write (`ResponseBody::Inline`) or
    /// a trailing `IoSlice` gathered into a `writev` alongside this head (`ResponseBody::File`).
    pub fn write_head<W: Write>(&self, sink: &mut W, keep_alive: bool) -> io::Result<()> {
        write!(sink, "{} {}\r\n", self.version, self.status)?;
        for (name, value) in &self.headers {
            write!(sink, "{name}: {value}\r\n")?;
        }
        write!(sink, "Content-Length: {}\r\n", self.body.len())?;
        write!(
            sink,
            "Connection: {}\r\n",
            if keep_alive { "keep-alive" } else { "close" }
        )?;
        sink.write_all(b"\r\n")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_status_line_and_headers() {
        let resp = Response::new(Version::H1_1, Status::Ok).with_body("text/plain", b"hi".to_vec());
        let mut out = Vec::new();
        resp.write_head(&mut out, true).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Type: text/plain\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.contains("Connection: keep-alive\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn close_connection_header_reflects_keep_alive_flag() {
        let resp = Response::new(Version::H1_1, Status::NotFound);
        let mut out = Vec::new();
        resp.write_head(&mut out, false).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("Connection: close\r\n"));
    }

    #[test]
    fn empty_body_has_zero_length() {
        let resp = Response::new(Version::H1_1, Status::NoContent);
        assert!(resp.body.is_empty());
    }
}
