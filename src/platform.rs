//! Platform shim: nonblocking socket creation, pending-error retrieval and
//! the per-platform constants. No platform branches appear above this
//! module.

use std::io;
use std::net::SocketAddrV4;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

/// On-wire bytes of one SYN: 14 ethernet + 20 IP + 20 TCP + 20 TCP options.
#[cfg(not(windows))]
pub const PACKET_OVERHEAD_BYTES: u64 = 74;
/// Windows sends a SYN without TCP options: 14 + 20 + 20.
#[cfg(windows)]
pub const PACKET_OVERHEAD_BYTES: u64 = 54;

/// Hard ceiling on simultaneously open probe sockets, below the point
/// where the platform's readiness interface stops coping.
#[cfg(not(windows))]
pub const MAX_SOCKETS_CEILING: usize = 1021;
#[cfg(windows)]
pub const MAX_SOCKETS_CEILING: usize = 500;

/// Whether a refused connection (RST) is distinguishable from a timeout on
/// a nonblocking connect. Where it is not, every non-open outcome is
/// reported as filtered.
#[cfg(not(windows))]
pub const CAN_DETECT_REFUSED: bool = true;
#[cfg(windows)]
pub const CAN_DETECT_REFUSED: bool = false;

/// Descriptors kept free for stdio, the readiness backend and whatever
/// else the process needs besides probe sockets.
pub const RESERVED_DESCRIPTORS: u64 = 10;

/// How a nonblocking `connect` came back.
#[derive(Debug)]
pub enum ConnectStart {
    /// Handshake in progress; the socket must be watched for readiness.
    Pending(Socket),
    /// The handshake completed inside `connect` itself. The socket has
    /// already been closed.
    Connected,
    /// The peer refused immediately.
    Refused,
    /// No route to the host or network, typically a broadcast address.
    Unreachable,
    /// The process is out of file descriptors; no socket was created.
    OutOfDescriptors,
}

/// Starts a nonblocking connect to `addr`.
///
/// Transient outcomes are folded into [`ConnectStart`]; an `Err` here
/// means the platform rejected the destination outright and the caller
/// should abort with a diagnostic naming the address.
pub fn connect_nonblocking(addr: SocketAddrV4) -> io::Result<ConnectStart> {
    let socket = match Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)) {
        Ok(socket) => socket,
        Err(e) if is_descriptor_exhaustion(&e) => return Ok(ConnectStart::OutOfDescriptors),
        Err(e) => return Err(e),
    };
    socket.set_nonblocking(true)?;
    // Plenty of send buffer so the kernel never delays the SYN on space.
    let _ = socket.set_send_buffer_size(1_000_000);

    match socket.connect(&SockAddr::from(addr)) {
        Ok(()) => Ok(ConnectStart::Connected),
        Err(e) => match classify_connect_error(&e) {
            ConnectErrorKind::InProgress => Ok(ConnectStart::Pending(socket)),
            ConnectErrorKind::Refused => Ok(ConnectStart::Refused),
            ConnectErrorKind::Unreachable => Ok(ConnectStart::Unreachable),
            ConnectErrorKind::Fatal => Err(e),
        },
    }
}

/// Reads and clears the socket's pending error (`SO_ERROR`). This is the
/// authoritative completion signal once the multiplexer reports readiness;
/// event flags are only consulted when no error is pending.
pub fn pending_error(socket: &Socket) -> io::Result<Option<io::Error>> {
    socket.take_error()
}

/// Classification of a pending socket error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketErrorKind {
    Refused,
    Unreachable,
    Other,
}

#[cfg(unix)]
pub fn classify_socket_error(e: &io::Error) -> SocketErrorKind {
    match e.raw_os_error() {
        Some(libc::ECONNREFUSED) | Some(libc::ECONNRESET) => SocketErrorKind::Refused,
        Some(libc::ENETUNREACH) | Some(libc::EHOSTUNREACH) => SocketErrorKind::Unreachable,
        _ => SocketErrorKind::Other,
    }
}

#[cfg(windows)]
pub fn classify_socket_error(e: &io::Error) -> SocketErrorKind {
    match e.raw_os_error() {
        Some(WSAECONNREFUSED) | Some(WSAECONNRESET) => SocketErrorKind::Refused,
        Some(WSAENETUNREACH) | Some(WSAEHOSTUNREACH) => SocketErrorKind::Unreachable,
        _ => SocketErrorKind::Other,
    }
}

enum ConnectErrorKind {
    InProgress,
    Refused,
    Unreachable,
    Fatal,
}

#[cfg(unix)]
fn classify_connect_error(e: &io::Error) -> ConnectErrorKind {
    match e.raw_os_error() {
        Some(libc::EINPROGRESS) | Some(libc::EWOULDBLOCK) | Some(libc::EINTR) => {
            ConnectErrorKind::InProgress
        }
        Some(libc::ECONNREFUSED) => ConnectErrorKind::Refused,
        Some(libc::ENETUNREACH) | Some(libc::EHOSTUNREACH) => ConnectErrorKind::Unreachable,
        _ => ConnectErrorKind::Fatal,
    }
}

#[cfg(unix)]
fn is_descriptor_exhaustion(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::EMFILE) | Some(libc::ENFILE))
}

#[cfg(windows)]
const WSAEMFILE: i32 = 10024;
#[cfg(windows)]
const WSAEWOULDBLOCK: i32 = 10035;
#[cfg(windows)]
const WSAEINPROGRESS: i32 = 10036;
#[cfg(windows)]
const WSAECONNRESET: i32 = 10054;
#[cfg(windows)]
const WSAECONNREFUSED: i32 = 10061;
#[cfg(windows)]
const WSAENETUNREACH: i32 = 10051;
#[cfg(windows)]
const WSAEHOSTUNREACH: i32 = 10065;

#[cfg(windows)]
fn classify_connect_error(e: &io::Error) -> ConnectErrorKind {
    match e.raw_os_error() {
        Some(WSAEWOULDBLOCK) | Some(WSAEINPROGRESS) => ConnectErrorKind::InProgress,
        Some(WSAECONNREFUSED) => ConnectErrorKind::Refused,
        Some(WSAENETUNREACH) | Some(WSAEHOSTUNREACH) => ConnectErrorKind::Unreachable,
        _ => ConnectErrorKind::Fatal,
    }
}

#[cfg(windows)]
fn is_descriptor_exhaustion(e: &io::Error) -> bool {
    e.raw_os_error() == Some(WSAEMFILE)
}

/// Soft limit on open files for this process, if the platform exposes one.
#[cfg(unix)]
pub fn soft_descriptor_limit() -> Option<u64> {
    rlimit::Resource::NOFILE.get().ok().map(|(soft, _)| soft)
}

#[cfg(not(unix))]
pub fn soft_descriptor_limit() -> Option<u64> {
    None
}

/// Attempts to raise the open-files soft limit. Returns whether it took.
#[cfg(unix)]
pub fn raise_descriptor_limit(limit: u64) -> bool {
    rlimit::Resource::NOFILE.set(limit, limit).is_ok()
}

#[cfg(not(unix))]
pub fn raise_descriptor_limit(_limit: u64) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn connect_to_listener_starts_or_completes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = match listener.local_addr().unwrap() {
            std::net::SocketAddr::V4(v4) => v4,
            _ => unreachable!(),
        };

        match connect_nonblocking(addr).unwrap() {
            ConnectStart::Pending(_) | ConnectStart::Connected => {}
            other => panic!("unexpected connect outcome: {other:?}"),
        }
    }

    #[test]
    fn connect_to_closed_port_never_reports_open() {
        // Bind then drop to find a port that nothing is listening on.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = match listener.local_addr().unwrap() {
            std::net::SocketAddr::V4(v4) => v4,
            _ => unreachable!(),
        };
        drop(listener);

        match connect_nonblocking(addr).unwrap() {
            ConnectStart::Refused | ConnectStart::Pending(_) => {}
            other => panic!("unexpected connect outcome: {other:?}"),
        }
    }

    #[test]
    fn constants_are_sane() {
        assert!(PACKET_OVERHEAD_BYTES >= 54);
        assert!(MAX_SOCKETS_CEILING <= 1021);
        assert!(RESERVED_DESCRIPTORS > 0);
    }

    #[cfg(unix)]
    #[test]
    fn soft_limit_is_readable() {
        assert!(soft_descriptor_limit().unwrap() > 0);
    }
}
