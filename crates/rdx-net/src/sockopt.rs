//! Raw socket option plumbing that `mio` doesn't expose directly.
//!
//! Mirrors `connect_nodelay` / `connect_keepalive` / `connect_close_on_exec`
//! in the system this mesh is modeled on: nonblocking is handled by mio
//! itself, but `TCP_NODELAY`, `SO_KEEPALIVE`, and close-on-exec need a raw
//! `setsockopt`/`fcntl` call.

use std::os::fd::{AsRawFd, RawFd};

use tracing::warn;

fn setsockopt_bool(fd: RawFd, level: libc::c_int, name: libc::c_int, value: bool) -> bool {
    let v: libc::c_int = value as libc::c_int;
    let ret = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &v as *const _ as *const libc::c_void,
            core::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    ret == 0
}

/// Disable Nagle's algorithm. Reduce-exchange traffic is latency sensitive
/// and frames are already coalesced at the application layer.
pub fn set_nodelay(stream: &mio::net::TcpStream) {
    let fd = stream.as_raw_fd();
    if !setsockopt_bool(fd, libc::IPPROTO_TCP, libc::TCP_NODELAY, true) {
        warn!("couldn't set TCP_NODELAY on fd {fd}");
    }
}

/// Enable TCP keepalive so a half-open peer is eventually detected even
/// with no application traffic.
pub fn set_keepalive(stream: &mio::net::TcpStream) {
    let fd = stream.as_raw_fd();
    if !setsockopt_bool(fd, libc::SOL_SOCKET, libc::SO_KEEPALIVE, true) {
        warn!("couldn't set SO_KEEPALIVE on fd {fd}");
    }
}

/// Mark the descriptor close-on-exec so a forked plan worker never
/// inherits mesh sockets.
pub fn set_close_on_exec(stream: &mio::net::TcpStream) {
    let fd = stream.as_raw_fd();
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) < 0 {
            warn!("couldn't set FD_CLOEXEC on fd {fd}");
        }
    }
}

/// Set kernel `SO_SNDBUF`/`SO_RCVBUF`. Used on both directions of a mesh
/// socket to size it for the expected tuple-batch traffic.
pub fn set_socket_buf_size(stream: &mio::net::TcpStream, size: usize) {
    let fd = stream.as_raw_fd();
    let size = size as libc::c_int;
    unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_SNDBUF,
            &size as *const _ as *const libc::c_void,
            core::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            &size as *const _ as *const libc::c_void,
            core::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }
}

/// Apply the full set of options a freshly-connected or freshly-accepted
/// mesh socket needs.
pub fn configure(stream: &mio::net::TcpStream) {
    set_nodelay(stream);
    set_keepalive(stream);
    set_close_on_exec(stream);
}
