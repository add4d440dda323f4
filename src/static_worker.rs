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

//! Short-lived workers streaming static resources.
//!
//! The reactor hands the client socket over wholesale and forgets about it;
//! one detached thread writes the status line and pushes the file with
//! `sendfile`, skipping the kernel-to-user copy, then exits. Broken pipes are
//! expected (the peer may vanish mid-transfer) and only logged.

use std::fs::File;
use std::io;
use std::net::TcpStream;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread;

use log::{debug, warn};

use crate::config::MAX_READ_LENGTH;
use crate::http::{write_status_line, Status};

/// Spawns a detached worker that streams `path` to `stream` and closes it.
pub fn spawn(stream: TcpStream, path: PathBuf) {
    thread::spawn(move || serve(stream, &path));
}

fn serve(mut stream: TcpStream, path: &Path) {
    // The descriptor arrives non-blocking from the reactor; this thread
    // wants plain blocking writes.
    if let Err(e) = stream.set_nonblocking(false) {
        warn!("cannot make client socket blocking: {e}");
        return;
    }
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            debug!("static resource {} unavailable: {e}", path.display());
            let _ = write_status_line(&mut stream, Status::NotFound);
            return;
        }
    };
    if let Err(e) = write_status_line(&mut stream, Status::Ok) {
        debug!("client went away before response: {e}");
        return;
    }
    if let Err(e) = stream_file(&stream, &file) {
        debug!("streaming {} aborted: {e}", path.display());
    }
}

/// Pushes the whole file through the socket with zero-copy transfer, in
/// chunks of at most `MAX_READ_LENGTH`.
fn stream_file(stream: &TcpStream, file: &File) -> io::Result<()> {
    let out_fd = stream.as_raw_fd();
    let in_fd = file.as_raw_fd();
    loop {
        let sent = unsafe {
            libc::sendfile(out_fd, in_fd, std::ptr::null_mut(), MAX_READ_LENGTH)
        };
        match sent {
            0 => return Ok(()),
            n if n > 0 => continue,
            _ => {
                let e = io::Error::last_os_error();
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::net::TcpListener;

    use super::*;

    fn stream_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (server, client)
    }

    #[test]
    fn streams_file_after_status_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.html");
        std::fs::write(&path, b"HELLO").unwrap();

        let (server, mut client) = stream_pair();
        spawn(server, path);

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).unwrap();
        let mut expected = Status::Ok.as_bytes().to_vec();
        expected.extend_from_slice(b"HELLO");
        assert_eq!(reply, expected);
    }

    #[test]
    fn missing_file_yields_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (server, mut client) = stream_pair();
        spawn(server, dir.path().join("missing.html"));

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).unwrap();
        assert_eq!(reply, Status::NotFound.as_bytes());
    }

    #[test]
    fn large_file_arrives_intact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.txt");
        let body: Vec<u8> = (0..64 * 1024u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &body).unwrap();

        let (server, mut client) = stream_pair();
        spawn(server, path);

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).unwrap();
        assert_eq!(&reply[..Status::Ok.as_bytes().len()], Status::Ok.as_bytes());
        assert_eq!(&reply[Status::Ok.as_bytes().len()..], &body[..]);
    }
}
