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

#![deny(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unused_imports
)]
// Disallow warnings in examples.
#![doc(test(attr(deny(warnings))))]

//! kvikk is a high-throughput HTTP/1.0 origin server. One reactor thread
//! multiplexes every client; static resources stream from the filesystem
//! with zero-copy transfer on short-lived worker threads, and dynamic
//! resources run as loadable `cgi_function` modules on a fixed pool of
//! worker agents behind a shared loopback endpoint. Loaded modules live in
//! a size-bounded LRU cache that a background task revalidates against the
//! files they came from.

pub mod cache;
pub mod config;
pub mod connection;
pub mod dynlib;
pub mod http;
pub mod net;
pub mod reactor;
pub mod revalidate;
pub mod static_worker;
pub mod stats;
pub mod worker;
