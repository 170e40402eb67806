use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

/// Bind a UDP socket with address and port reuse enabled, so several
/// listeners on one host can receive the same hub broadcasts.
pub fn bind_reusable(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = bind_std(addr)?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket)
}

#[cfg(unix)]
fn bind_std(addr: SocketAddr) -> io::Result<std::net::UdpSocket> {
    use std::os::unix::io::FromRawFd;

    let SocketAddr::V4(addr) = addr else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "hub broadcasts are IPv4 only",
        ));
    };

    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // Owns the descriptor from here on, so every early return closes it.
    let socket = unsafe { std::net::UdpSocket::from_raw_fd(fd) };

    set_flag(fd, libc::SO_REUSEADDR)?;
    set_flag(fd, libc::SO_REUSEPORT)?;

    let mut sin: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    sin.sin_family = libc::AF_INET as libc::sa_family_t;
    sin.sin_port = addr.port().to_be();
    sin.sin_addr = libc::in_addr {
        s_addr: u32::from(*addr.ip()).to_be(),
    };

    let rc = unsafe {
        libc::bind(
            fd,
            &sin as *const libc::sockaddr_in as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(socket)
}

#[cfg(unix)]
fn set_flag(fd: libc::c_int, option: libc::c_int) -> io::Result<()> {
    let enable: libc::c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            option,
            &enable as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn bind_std(addr: SocketAddr) -> io::Result<std::net::UdpSocket> {
    std::net::UdpSocket::bind(addr)
}
