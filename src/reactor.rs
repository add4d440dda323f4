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

//! The master reactor: a single-threaded readiness loop that accepts
//! clients, classifies their requests, and wires responses back.
//!
//! Static requests leave the reactor entirely: the client socket is handed
//! to a detached worker thread at dispatch. Dynamic requests open an
//! internal connection to the worker-agent endpoint, send one fixed-size
//! request record, and register the worker-side descriptor; the agents'
//! output is then piped back to the client chunk by chunk as readiness
//! events arrive. mio delivers edge-triggered readiness, so every read path
//! drains its socket to `WouldBlock`; a partial worker response simply
//! resumes on the next readiness event.
//!
//! Within one client, events are serialized by this thread. Across clients
//! there is no ordering at all.

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::os::unix::io::{FromRawFd, IntoRawFd};
use std::sync::Arc;

use log::{debug, error, info, warn};
use mio::event::Event;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use slab::Slab;

use crate::config::{ServerConfig, MAX_LISTEN_QUEUE, MAX_POLL_EVENTS, MAX_READ_LENGTH};
use crate::connection::{ClientConn, ConnState, WorkerConn};
use crate::http::{self, header, HttpMethod, ResourceType};
use crate::net::{self, Sharing};
use crate::static_worker;
use crate::stats::Stats;
use crate::worker::RequestRecord;

const LISTEN_TOKEN: Token = Token(usize::MAX);

/// How one pass over a worker descriptor ended.
enum Drain {
    /// EOF: the whole response has been forwarded.
    Complete,
    /// `WouldBlock`: more output is coming, stay registered.
    Partial,
    /// The client side failed mid-forward.
    ClientGone,
}

/// The single-threaded event loop multiplexing all descriptors.
#[derive(Debug)]
pub struct Reactor {
    listener: TcpListener,
    poll: Poll,
    num_events: usize,
    connections: Slab<ConnState>,
    config: Arc<ServerConfig>,
    worker_port: u16,
    stats: Arc<Stats>,
}

impl Reactor {
    /// Binds the front listener and sets up the poll instance.
    ///
    /// `worker_port` is the port the agent pool actually bound, which may
    /// differ from the configured one when that was 0.
    pub fn new(config: Arc<ServerConfig>, worker_port: u16, stats: Arc<Stats>) -> io::Result<Self> {
        let listener = net::bind_listener(
            net::server_addr(config.port),
            MAX_LISTEN_QUEUE,
            Sharing::Private,
        )?;
        listener.set_nonblocking(true)?;
        let mut listener = TcpListener::from_std(listener);

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTEN_TOKEN, Interest::READABLE)?;

        Ok(Self {
            listener,
            poll,
            num_events: MAX_POLL_EVENTS,
            connections: Slab::new(),
            config,
            worker_port,
            stats,
        })
    }

    /// Address the front listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the event loop. Never returns except on process-fatal errors.
    pub fn run(&mut self) -> io::Result<()> {
        info!("serving on {}", self.local_addr()?);
        let mut events = Events::with_capacity(self.num_events);
        loop {
            match self.poll.poll(&mut events, None) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
            for event in events.iter() {
                match event.token() {
                    LISTEN_TOKEN => self.accept()?,
                    token => self.connection_event(event, token)?,
                }
            }
        }
    }

    /// Accepts the whole burst of pending connections.
    fn accept(&mut self) -> io::Result<()> {
        loop {
            match self.listener.accept() {
                Ok((mut stream, _)) => {
                    self.stats.count_request();
                    let entry = self.connections.vacant_entry();
                    let token = Token(entry.key());
                    self.poll
                        .registry()
                        .register(&mut stream, token, Interest::READABLE)?;
                    entry.insert(ConnState::Client(ClientConn::new(stream)));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn connection_event(&mut self, event: &Event, token: Token) -> io::Result<()> {
        // The pair cleanup can retire a token whose event is still queued
        // in this batch.
        if !self.connections.contains(token.0) {
            return Ok(());
        }
        if event.is_error() {
            self.cleanup(token);
            return Ok(());
        }
        if matches!(self.connections[token.0], ConnState::Client(_)) {
            self.client_readable(token)
        } else {
            self.worker_readable(token)
        }
    }

    /// Drains a client socket and dispatches once the header is complete.
    fn client_readable(&mut self, token: Token) -> io::Result<()> {
        let (complete, closed) = {
            let ConnState::Client(client) = &mut self.connections[token.0] else {
                return Ok(());
            };
            if client.worker.is_some() {
                // Response already in flight; nothing further is read from
                // this peer.
                return Ok(());
            }
            let mut chunk = [0u8; MAX_READ_LENGTH];
            let mut closed = false;
            loop {
                match client.stream.read(&mut chunk) {
                    Ok(0) => {
                        closed = true;
                        break;
                    }
                    Ok(n) => client.buf.extend_from_slice(&chunk[..n]),
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        debug!("client read failed: {e}");
                        closed = true;
                        break;
                    }
                }
            }
            (header::is_complete(&client.buf), closed)
        };

        if complete {
            self.classify_and_dispatch(token)
        } else {
            if closed {
                self.cleanup(token);
            }
            // Otherwise the header is still on its way; the next readable
            // event resumes the drain.
            Ok(())
        }
    }

    fn classify_and_dispatch(&mut self, token: Token) -> io::Result<()> {
        let parsed = {
            let ConnState::Client(client) = &self.connections[token.0] else {
                return Ok(());
            };
            header::scan(&client.buf)
        };
        let parsed = match parsed {
            Ok(header) => header,
            Err(e) => {
                debug!("dropping client: {e}");
                self.cleanup(token);
                return Ok(());
            }
        };
        if parsed.method != Some(HttpMethod::Get) {
            debug!("dropping client: only GET is served");
            self.cleanup(token);
            return Ok(());
        }

        let (kind, name) = http::classify(&parsed.target);
        let name = name.to_owned();
        match kind {
            ResourceType::CgiBin => self.dispatch_dynamic(token, &name),
            kind if kind.is_static() => {
                self.dispatch_static(token, &name);
                Ok(())
            }
            _ => {
                debug!("unknown resource {}", parsed.target);
                self.cleanup(token);
                Ok(())
            }
        }
    }

    /// Opens the internal dispatch connection, sends the request record in
    /// one write and registers the worker edge with a back-reference to the
    /// client edge.
    fn dispatch_dynamic(&mut self, token: Token, resource: &str) -> io::Result<()> {
        let record = RequestRecord {
            resource: resource.to_owned(),
            client_fd: -1,
        };
        let dispatched = record.encode().and_then(|encoded| {
            let mut stream = std::net::TcpStream::connect(net::worker_addr(self.worker_port))?;
            stream.write_all(&encoded)?;
            stream.set_nonblocking(true)?;
            Ok(stream)
        });
        let stream = match dispatched {
            Ok(stream) => stream,
            Err(e) => {
                warn!("worker dispatch failed: {e}");
                self.cleanup(token);
                return Ok(());
            }
        };

        let mut stream = TcpStream::from_std(stream);
        let entry = self.connections.vacant_entry();
        let worker_token = Token(entry.key());
        self.poll
            .registry()
            .register(&mut stream, worker_token, Interest::READABLE)?;
        entry.insert(ConnState::Worker(WorkerConn {
            stream,
            client: token,
        }));
        if let Some(ConnState::Client(client)) = self.connections.get_mut(token.0) {
            client.worker = Some(worker_token);
        }
        Ok(())
    }

    /// Hands the client socket to a detached static worker and forgets it.
    fn dispatch_static(&mut self, token: Token, name: &str) {
        let ConnState::Client(mut client) = self.connections.remove(token.0) else {
            return;
        };
        if let Err(e) = self.poll.registry().deregister(&mut client.stream) {
            warn!("deregister failed: {e}");
        }
        let path = self.config.static_root.join(name);
        // Ownership of the descriptor moves to the worker thread.
        let stream = unsafe { std::net::TcpStream::from_raw_fd(client.stream.into_raw_fd()) };
        static_worker::spawn(stream, path);
    }

    /// Forwards whatever the worker produced so far to the client.
    fn worker_readable(&mut self, worker_token: Token) -> io::Result<()> {
        let client_token = {
            let ConnState::Worker(worker) = &self.connections[worker_token.0] else {
                return Ok(());
            };
            worker.client
        };
        if !matches!(
            self.connections.get(client_token.0),
            Some(ConnState::Client(_))
        ) {
            // Pair cleanup keeps both edges in lockstep; a missing client
            // means the pairing is gone and the worker edge goes too.
            self.cleanup(worker_token);
            return Ok(());
        }

        let outcome = {
            let (worker_state, client_state) = self
                .connections
                .get2_mut(worker_token.0, client_token.0)
                .expect("paired records verified above");
            let (ConnState::Worker(worker), ConnState::Client(client)) =
                (worker_state, client_state)
            else {
                return Ok(());
            };

            let mut chunk = [0u8; MAX_READ_LENGTH];
            loop {
                match worker.stream.read(&mut chunk) {
                    Ok(0) => break Drain::Complete,
                    Ok(n) => {
                        if let Err(e) = write_all(&mut client.stream, &chunk[..n]) {
                            debug!("forward to client failed: {e}");
                            break Drain::ClientGone;
                        }
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break Drain::Partial,
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        error!("worker read failed: {e}");
                        return Err(e);
                    }
                }
            }
        };

        match outcome {
            Drain::Complete => {
                self.cleanup(worker_token);
                self.stats.count_reply();
            }
            Drain::ClientGone => self.cleanup(worker_token),
            Drain::Partial => {}
        }
        Ok(())
    }

    /// Closes a descriptor and its paired one, freeing both records.
    ///
    /// Worker edges follow the back-reference to their client edge; client
    /// edges reclaim a recorded in-flight worker edge. Either way the pair
    /// leaves the slab together, so a reused token can never be mistaken
    /// for a stale partner.
    fn cleanup(&mut self, token: Token) {
        if !self.connections.contains(token.0) {
            return;
        }
        match self.connections.remove(token.0) {
            ConnState::Client(mut client) => {
                let _ = self.poll.registry().deregister(&mut client.stream);
                if let Some(worker_token) = client.worker {
                    if let Some(ConnState::Worker(_)) = self.connections.get(worker_token.0) {
                        let ConnState::Worker(mut worker) = self.connections.remove(worker_token.0)
                        else {
                            return;
                        };
                        let _ = self.poll.registry().deregister(&mut worker.stream);
                    }
                }
            }
            ConnState::Worker(mut worker) => {
                let _ = self.poll.registry().deregister(&mut worker.stream);
                if let Some(ConnState::Client(_)) = self.connections.get(worker.client.0) {
                    let ConnState::Client(mut client) = self.connections.remove(worker.client.0)
                    else {
                        return;
                    };
                    let _ = self.poll.registry().deregister(&mut client.stream);
                }
            }
        }
    }
}

/// Robust write-all against a non-blocking client socket: short writes and
/// `WouldBlock` are retried until the chunk is fully forwarded.
fn write_all(stream: &mut TcpStream, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        match stream.write(buf) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "client accepted no bytes",
                ))
            }
            Ok(n) => buf = &buf[n..],
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_an_ephemeral_port() {
        let config = Arc::new(ServerConfig {
            port: 0,
            ..ServerConfig::default()
        });
        let reactor = Reactor::new(config, 0, Arc::new(Stats::new())).unwrap();
        assert_ne!(reactor.local_addr().unwrap().port(), 0);
    }
}
