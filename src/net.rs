//! Listener construction and process-level socket setup.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener};

use socket2::{Domain, Protocol, Socket, Type};

/// Whether a listening endpoint is shared between several threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sharing {
    /// Single listener; `SO_REUSEADDR` only.
    Private,
    /// One listener per agent on the same port; adds `SO_REUSEPORT` so the
    /// kernel load-balances incoming connections across them.
    Shared,
}

/// Binds a blocking TCP listener on `addr` with the given backlog.
pub fn bind_listener(addr: SocketAddr, backlog: i32, sharing: Sharing) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    if sharing == Sharing::Shared {
        socket.set_reuse_port(true)?;
    }
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    Ok(socket.into())
}

/// Address of the front listening socket: all interfaces, given port.
#[inline]
pub fn server_addr(port: u16) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))
}

/// Address of the internal worker endpoint: loopback only.
#[inline]
pub fn worker_addr(port: u16) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))
}

/// Raises the soft and hard `RLIMIT_NOFILE` to `max_fds`.
///
/// Fails for unprivileged processes whose hard limit is below `max_fds`;
/// callers log and carry on, same as running with the inherited limit.
pub fn raise_fd_limit(max_fds: u64) -> io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: max_fds,
        rlim_max: max_fds,
    };
    if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &limit) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Ignores `SIGPIPE` so a peer closing mid-write surfaces as `EPIPE` on the
/// write instead of killing the process.
pub fn ignore_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}
