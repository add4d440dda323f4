//! Per-descriptor connection state.
//!
//! Every descriptor the reactor watches owns one of these records; the slab
//! key of the record doubles as its poll token. A worker-edge record keeps
//! the token of its paired client edge so both are reclaimed together when
//! the response completes or either side fails. The back-reference runs
//! worker to client, never the reverse; the client edge merely remembers
//! whether a worker is in flight.

use mio::net::TcpStream;
use mio::Token;

/// State attached to one registered descriptor.
#[derive(Debug)]
pub enum ConnState {
    /// A descriptor speaking HTTP with a remote peer.
    Client(ClientConn),
    /// A descriptor speaking the internal byte stream with a worker agent.
    Worker(WorkerConn),
}

/// Client-edge record: the accepted socket plus the request bytes read so
/// far (edge-triggered reads may deliver the header across events).
#[derive(Debug)]
pub struct ClientConn {
    /// The accepted client socket.
    pub stream: TcpStream,
    /// Request bytes accumulated so far.
    pub buf: Vec<u8>,
    /// Token of the in-flight worker edge, when one exists.
    pub worker: Option<Token>,
}

impl ClientConn {
    /// Fresh state for a just-accepted socket.
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            buf: Vec::new(),
            worker: None,
        }
    }
}

/// Worker-edge record: the dispatch socket and the client it answers for.
#[derive(Debug)]
pub struct WorkerConn {
    /// Reactor-side end of the internal dispatch connection.
    pub stream: TcpStream,
    /// Back-reference to the paired client-edge record.
    pub client: Token,
}
