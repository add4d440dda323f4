// Copyright 2026 The kvikk authors
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

//! HTTP request header scanner.
//!
//! Fills a fixed-shape [`HttpHeader`] record from the bytes of one request.
//! The reactor only consumes the request-target; the distinguished header
//! fields are retained because the record is also the unit handed to any
//! future access logging.

use std::fmt::Display;

use super::{HttpMethod, HttpVersion};

/// Scan failures. All of them are per-connection fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanError {
    /// Request line did not have three tokens.
    RequestLine,
    /// Unrecognized method token.
    Method,
    /// Version other than HTTP/1.0 or HTTP/1.1.
    Version,
    /// A header line without a `:` separator.
    HeaderField,
    /// The terminating blank line never arrived.
    Incomplete,
}

impl Display for ScanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::RequestLine => "malformed request line",
            Self::Method => "unsupported method",
            Self::Version => "unsupported HTTP version",
            Self::HeaderField => "malformed header field",
            Self::Incomplete => "incomplete header",
        })
    }
}

impl std::error::Error for ScanError {}

/// Parsed request header.
#[derive(Debug, Default)]
pub struct HttpHeader {
    /// Request method. `None` until scanned.
    pub method: Option<HttpMethod>,
    /// Request-target, e.g. `/index.html` or `/cgi-bin/echo`.
    pub target: String,
    /// Protocol version of the request line.
    pub version: Option<HttpVersion>,
    /// `Host` header value.
    pub host: String,
    /// `User-Agent` header value.
    pub user_agent: String,
    /// `Connection` header value.
    pub connection: String,
    /// `Proxy-Connection` header value.
    pub proxy_connection: String,
    /// Remaining header fields in arrival order.
    pub other_headers: Vec<(String, String)>,
}

/// True once `buf` contains a full header (terminated by a blank line).
#[inline]
pub fn is_complete(buf: &[u8]) -> bool {
    buf.windows(4).any(|w| w == b"\r\n\r\n") || buf.windows(2).any(|w| w == b"\n\n")
}

/// Scans one request's header out of `buf`.
///
/// `buf` must hold at least the request line and the terminating blank
/// line; anything after the blank line is ignored (the server accepts no
/// request bodies).
pub fn scan(buf: &[u8]) -> Result<HttpHeader, ScanError> {
    let text = std::str::from_utf8(buf).map_err(|_| ScanError::RequestLine)?;
    let mut lines = text.split("\r\n").flat_map(|l| l.split('\n'));

    let request_line = lines.next().ok_or(ScanError::RequestLine)?;
    let mut tokens = request_line.split_ascii_whitespace();
    let method = tokens.next().ok_or(ScanError::RequestLine)?;
    let target = tokens.next().ok_or(ScanError::RequestLine)?;
    let version = tokens.next().ok_or(ScanError::RequestLine)?;
    if tokens.next().is_some() {
        return Err(ScanError::RequestLine);
    }

    let mut header = HttpHeader {
        method: Some(HttpMethod::parse(method).ok_or(ScanError::Method)?),
        target: target.to_owned(),
        version: Some(HttpVersion::parse(version).ok_or(ScanError::Version)?),
        ..HttpHeader::default()
    };

    for line in lines {
        if line.is_empty() {
            return Ok(header);
        }
        let (key, value) = line.split_once(':').ok_or(ScanError::HeaderField)?;
        let value = value.trim_start();
        match key {
            "Host" => header.host = value.to_owned(),
            "User-Agent" => header.user_agent = value.to_owned(),
            "Connection" => header.connection = value.to_owned(),
            "Proxy-Connection" => header.proxy_connection = value.to_owned(),
            _ => header.other_headers.push((key.to_owned(), value.to_owned())),
        }
    }
    Err(ScanError::Incomplete)
}
