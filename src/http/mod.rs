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

//! HTTP/1.0 surface: request-line types, response status lines and
//! resource classification.

use std::fmt::Display;
use std::io::{self, Write};

pub mod header;

/// Representation of the requested HTTP Method
/// [IETF RFC 9110 Section 9](https://www.rfc-editor.org/rfc/rfc9110#section-9)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// RFC 9110 9.3.1
    Get,
    /// RFC 9110 9.3.2
    Head,
    /// RFC 9110 9.3.3
    Post,
    /// RFC 9110 9.3.4
    Put,
    /// RFC 9110 9.3.5
    Delete,
    /// RFC 9110 9.3.6
    Connect,
    /// RFC 9110 9.3.7
    Options,
    /// RFC 9110 9.3.8
    Trace,
}

impl HttpMethod {
    pub(crate) fn parse(token: &str) -> Option<Self> {
        match token {
            "GET" => Some(Self::Get),
            "HEAD" => Some(Self::Head),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "DELETE" => Some(Self::Delete),
            "CONNECT" => Some(Self::Connect),
            "OPTIONS" => Some(Self::Options),
            "TRACE" => Some(Self::Trace),
            _ => None,
        }
    }
}

impl Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Connect => "CONNECT",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
        })
    }
}

/// Representation of the requested HTTP version. Only 1.x is accepted;
/// the server behaves as 1.0 regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    /// HTTP/1.0
    H1_0,
    /// HTTP/1.1
    H1_1,
}

impl HttpVersion {
    pub(crate) fn parse(token: &str) -> Option<Self> {
        match token {
            "HTTP/1.0" => Some(Self::H1_0),
            "HTTP/1.1" => Some(Self::H1_1),
            _ => None,
        }
    }
}

impl Display for HttpVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::H1_0 => "HTTP/1.0",
            Self::H1_1 => "HTTP/1.1",
        })
    }
}

/// Status lines the server emits. Responses carry no further headers;
/// the resource bytes follow the blank line directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// 200 OK
    Ok,
    /// 404 Not Found
    NotFound,
}

impl Status {
    /// The full serialized status line including the terminating blank line.
    #[inline]
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Self::Ok => b"HTTP/1.0 200 OK\r\n\r\n",
            Self::NotFound => b"HTTP/1.0 404 Not Found\r\n\r\n",
        }
    }
}

/// Writes a status line to `w`.
pub fn write_status_line<W: Write>(w: &mut W, status: Status) -> io::Result<()> {
    w.write_all(status.as_bytes())
}

/// Request classes the reactor dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    /// `/cgi-bin/<name>`, served by a worker agent.
    CgiBin,
    /// `.html`
    Html,
    /// `.txt`
    Txt,
    /// `.gif`
    Gif,
    /// `.jpg`
    Jpg,
    /// Anything else. Logged and dropped.
    Unknown,
}

impl ResourceType {
    /// True for the kinds streamed straight off the filesystem.
    #[inline]
    pub fn is_static(&self) -> bool {
        matches!(self, Self::Html | Self::Txt | Self::Gif | Self::Jpg)
    }
}

/// Classifies a request-target and yields the resource name the dispatch
/// paths use: the part after `/cgi-bin/` for dynamic requests, the path
/// without its leading slash for static ones.
pub fn classify(target: &str) -> (ResourceType, &str) {
    if let Some(name) = target.strip_prefix("/cgi-bin/") {
        return (ResourceType::CgiBin, name);
    }
    let name = target.strip_prefix('/').unwrap_or(target);
    let kind = match name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("html") => ResourceType::Html,
        Some("txt") => ResourceType::Txt,
        Some("gif") => ResourceType::Gif,
        Some("jpg") => ResourceType::Jpg,
        _ => ResourceType::Unknown,
    };
    (kind, name)
}
