// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! HTTP/1.1 request line + header + body parsing.

use std::fmt::Display;

use super::{Method, Version};

/// Failures while parsing a request line or header block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    Method,
    Target,
    Version,
    HeaderLine,
}

impl Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Method => "invalid or unsupported method",
            Self::Target => "invalid request target",
            Self::Version => "invalid HTTP version",
            Self::HeaderLine => "malformed header line",
        })
    }
}

impl std::error::Error for ParseError {}

/// A fully parsed HTTP/1.1 request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub target: String,
    pub version: Version,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// `Connection: keep-alive` / `close`, defaulting per the HTTP version (HTTP/1.1 defaults to
    /// keep-alive, HTTP/1.0 defaults to close).
    pub fn keep_alive(&self) -> bool {
        match self.header("connection") {
            Some(v) if v.eq_ignore_ascii_case("close") => false,
            Some(v) if v.eq_ignore_ascii_case("keep-alive") => true,
            _ => self.version == Version::H1_1,
        }
    }
}

/// Result of attempting to parse a request out of a connection's readable buffer region.
#[derive(Debug)]
pub enum ParseOutcome {
    /// A full request was recognized; `consumed` is how many bytes of the input it occupied.
    Complete(Request, usize),
    /// The input so far is a valid prefix of a request, but more bytes are needed.
    Incomplete,
}

impl Request {
    /// Attempts to parse a request out of `buf`. Never panics on malformed input; returns
    /// `Err(ParseError)` instead.
    pub fn parse(buf: &[u8]) -> Result<ParseOutcome, ParseError> {
        let Some(header_end) = find_subslice(buf, b"\r\n\r\n") else {
            return Ok(ParseOutcome::Incomplete);
        };
        let head = &buf[..header_end];

        let mut lines = head.split(|&b| b == b'\n').map(strip_cr);
        let request_line = lines.next().ok_or(ParseError::HeaderLine)?;
        let (method, target, version) = parse_request_line(request_line)?;

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let colon = line
                .iter()
                .position(|&b| b == b':')
                .ok_or(ParseError::HeaderLine)?;
            let name = std::str::from_utf8(&line[..colon])
                .map_err(|_| ParseError::HeaderLine)?
                .trim()
                .to_string();
            let value = std::str::from_utf8(&line[colon + 1..])
                .map_err(|_| ParseError::HeaderLine)?
                .trim()
                .to_string();
            headers.push((name, value));
        }

        let content_length = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.parse::<usize>().ok())
            .unwrap_or(0);

        let body_start = header_end + 4;
        let available_body = buf.len().saturating_sub(body_start);
        if available_body < content_length {
            return Ok(ParseOutcome::Incomplete);
        }

        let body = buf[body_start..body_start + content_length].to_vec();
        let consumed = body_start + content_length;

        Ok(ParseOutcome::Complete(
            Request {
                method,
                target,
                version,
                headers,
                body,
            },
            consumed,
        ))
    }
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn parse_request_line(line: &[u8]) -> Result<(Method, String, Version), ParseError> {
    let mut parts = line.split(|&b| b == b' ');
    let method = parts.next().ok_or(ParseError::Method)?;
    let method = Method::from_bytes(method).ok_or(ParseError::Method)?;

    let target = parts.next().ok_or(ParseError::Target)?;
    if target.is_empty() {
        return Err(ParseError::Target);
    }
    let target = std::str::from_utf8(target)
        .map_err(|_| ParseError::Target)?
        .to_string();

    let version = parts.next().ok_or(ParseError::Version)?;
    let version = Version::from_bytes(version).ok_or(ParseError::Version)?;

    Ok((method, target, version))
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_get() {
        let raw = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n";
        match Request::parse(raw).unwrap() {
            ParseOutcome::Complete(req, consumed) => {
                assert_eq!(req.method, Method::Get);
                assert_eq!(req.target, "/");
                assert_eq!(req.version, Version::H1_1);
                assert_eq!(req.header("host"), Some("x"));
                assert_eq!(consumed, raw.len());
            }
            ParseOutcome::Incomplete => panic!("expected a complete parse"),
        }
    }

    #[test]
    fn incomplete_without_header_terminator() {
        let raw = b"GET / HTTP/1.1\r\nHost: x\r\n";
        assert!(matches!(
            Request::parse(raw).unwrap(),
            ParseOutcome::Incomplete
        ));
    }

    #[test]
    fn incomplete_while_body_still_arriving() {
        let raw = b"POST /login HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc";
        assert!(matches!(
            Request::parse(raw).unwrap(),
            ParseOutcome::Incomplete
        ));
    }

    #[test]
    fn complete_once_body_fully_arrived() {
        let raw = b"POST /login HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        match Request::parse(raw).unwrap() {
            ParseOutcome::Complete(req, consumed) => {
                assert_eq!(req.body, b"hello");
                assert_eq!(consumed, raw.len());
            }
            ParseOutcome::Incomplete => panic!("expected a complete parse"),
        }
    }

    #[test]
    fn rejects_unknown_method() {
        let raw = b"FOO / HTTP/1.1\r\n\r\n";
        assert_eq!(Request::parse(raw).unwrap_err(), ParseError::Method);
    }

    #[test]
    fn keep_alive_defaults_by_version() {
        let raw_11 = b"GET / HTTP/1.1\r\n\r\n";
        let ParseOutcome::Complete(req, _) = Request::parse(raw_11).unwrap() else {
            panic!()
        };
        assert!(req.keep_alive());

        let raw_10 = b"GET / HTTP/1.0\r\n\r\n";
        let ParseOutcome::Complete(req, _) = Request::parse(raw_10).unwrap() else {
            panic!()
        };
        assert!(!req.keep_alive());
    }
}
