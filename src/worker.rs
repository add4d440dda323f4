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

//! Worker agent pool for dynamic content.
//!
//! A fixed set of long-lived agents each binds its own listener to the
//! shared loopback endpoint with `SO_REUSEPORT`, letting the kernel
//! round-robin the reactor's dispatch connections across them. There is no
//! userspace queue and no queue lock; backpressure is the agents' accept
//! rate. Each agent is sequential: accept, read one request record, run the
//! module, close.

use std::io::{self, Read};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;

use log::warn;

use crate::config::{ServerConfig, MAX_LISTEN_QUEUE, MAX_RESOURCE_NAME_LENGTH};
use crate::dynlib::ModuleLoader;
use crate::net::{self, Sharing};

/// The fixed-size message the reactor writes to an agent.
///
/// On the wire: `MAX_RESOURCE_NAME_LENGTH` bytes of NUL-padded resource
/// name followed by a little-endian descriptor number. The descriptor field
/// rides along for the static path; dynamic dispatch never reads it because
/// the agent answers on its own accepted socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    /// Resource name, e.g. `echo` for `/cgi-bin/echo`.
    pub resource: String,
    /// Client descriptor number; `-1` when not applicable.
    pub client_fd: i32,
}

impl RequestRecord {
    /// Encoded size in bytes. Records are written in one syscall and read
    /// with exactly this length.
    pub const SIZE: usize = MAX_RESOURCE_NAME_LENGTH + 4;

    /// Serializes the record, rejecting resource names that do not fit the
    /// bounded buffer (one byte is reserved for the NUL terminator).
    pub fn encode(&self) -> io::Result<[u8; Self::SIZE]> {
        let name = self.resource.as_bytes();
        if name.len() >= MAX_RESOURCE_NAME_LENGTH {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "resource name too long for request record",
            ));
        }
        let mut buf = [0u8; Self::SIZE];
        buf[..name.len()].copy_from_slice(name);
        buf[MAX_RESOURCE_NAME_LENGTH..].copy_from_slice(&self.client_fd.to_le_bytes());
        Ok(buf)
    }

    /// Deserializes a record from exactly [`Self::SIZE`] bytes.
    pub fn decode(buf: &[u8; Self::SIZE]) -> io::Result<Self> {
        let name = &buf[..MAX_RESOURCE_NAME_LENGTH];
        let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
        let resource = std::str::from_utf8(&name[..end])
            .map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidData, "resource name is not UTF-8")
            })?
            .to_owned();
        let mut fd = [0u8; 4];
        fd.copy_from_slice(&buf[MAX_RESOURCE_NAME_LENGTH..]);
        Ok(Self {
            resource,
            client_fd: i32::from_le_bytes(fd),
        })
    }
}

/// Spawns the agent pool and returns the port it actually listens on.
///
/// The first agent binds the configured port (which may be 0 to pick an
/// ephemeral one); the rest join it via `SO_REUSEPORT`. Threads are
/// detached; agents live for the whole process.
pub fn spawn_agents(config: &ServerConfig, loader: Arc<ModuleLoader>) -> io::Result<u16> {
    let first = net::bind_listener(
        net::worker_addr(config.worker_port),
        MAX_LISTEN_QUEUE,
        Sharing::Shared,
    )?;
    let port = first.local_addr()?.port();

    let mut listeners = vec![first];
    for _ in 1..config.worker_count.max(1) {
        listeners.push(net::bind_listener(
            net::worker_addr(port),
            MAX_LISTEN_QUEUE,
            Sharing::Shared,
        )?);
    }

    for (i, listener) in listeners.into_iter().enumerate() {
        let loader = Arc::clone(&loader);
        thread::Builder::new()
            .name(format!("agent-{i}"))
            .spawn(move || agent_loop(listener, loader))?;
    }
    Ok(port)
}

/// One agent: a sequential server over the shared endpoint.
fn agent_loop(listener: TcpListener, loader: Arc<ModuleLoader>) {
    loop {
        let (mut conn, _) = match listener.accept() {
            Ok(pair) => pair,
            Err(e) => {
                warn!("agent accept failed: {e}");
                continue;
            }
        };
        let mut buf = [0u8; RequestRecord::SIZE];
        // A short read here is an internal protocol violation: drop the
        // socket, keep the agent.
        if let Err(e) = conn.read_exact(&mut buf) {
            warn!("short request record: {e}");
            continue;
        }
        match RequestRecord::decode(&buf) {
            Ok(record) => loader.handle_dynamic(&mut conn, &record.resource),
            Err(e) => warn!("malformed request record: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::net::TcpStream;

    use super::*;

    #[test]
    fn record_round_trip() {
        let record = RequestRecord {
            resource: "echo".to_owned(),
            client_fd: 17,
        };
        let buf = record.encode().unwrap();
        assert_eq!(RequestRecord::decode(&buf).unwrap(), record);
    }

    #[test]
    fn record_rejects_oversized_name() {
        let record = RequestRecord {
            resource: "x".repeat(MAX_RESOURCE_NAME_LENGTH),
            client_fd: -1,
        };
        assert!(record.encode().is_err());
    }

    #[test]
    fn record_rejects_non_utf8_name() {
        let mut buf = [0u8; RequestRecord::SIZE];
        buf[0] = 0xff;
        buf[1] = 0xfe;
        assert!(RequestRecord::decode(&buf).is_err());
    }

    #[test]
    fn longest_allowed_name_survives() {
        let record = RequestRecord {
            resource: "y".repeat(MAX_RESOURCE_NAME_LENGTH - 1),
            client_fd: 0,
        };
        let buf = record.encode().unwrap();
        assert_eq!(RequestRecord::decode(&buf).unwrap(), record);
    }

    #[test]
    fn agent_answers_missing_module_with_404() {
        let dir = tempfile::tempdir().unwrap();
        let loader = Arc::new(ModuleLoader::new(dir.path().to_path_buf(), None));
        let config = ServerConfig {
            worker_port: 0,
            worker_count: 2,
            ..ServerConfig::default()
        };
        let port = spawn_agents(&config, loader).unwrap();

        let mut conn = TcpStream::connect(net::worker_addr(port)).unwrap();
        let record = RequestRecord {
            resource: "nope".to_owned(),
            client_fd: -1,
        };
        conn.write_all(&record.encode().unwrap()).unwrap();
        let mut reply = Vec::new();
        conn.read_to_end(&mut reply).unwrap();
        assert_eq!(reply, crate::http::Status::NotFound.as_bytes());
    }
}
