use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;

use crate::error::{Error, Result};
use crate::ioda::{Ioda, MAX_REGIONS, PAGE_SIZE};

/// Outcome of draining a readable socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Bytes appended; zero if the readiness was spurious.
    Data(usize),
    /// Orderly shutdown from the peer.
    Closed,
}

/// What a watcher does after a readiness event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Continue,
    Stop,
}

/// Receiver of read readiness for one socket.
pub trait Selected: Send + Sync + 'static {
    /// Runs on the pump thread; must not block.
    fn selected(&self, socket: &TcpStream) -> Selection;
}

/// Address families a host name may resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Family {
    #[default]
    Any,
    Inet,
    Inet6,
}

impl Family {
    pub fn admits(&self, addr: &SocketAddr) -> bool {
        match self {
            Family::Any => true,
            Family::Inet => addr.is_ipv4(),
            Family::Inet6 => addr.is_ipv6(),
        }
    }
}

/// Resolves `name:port`, `[v6]:port` or a bare name to addresses of
/// `family`, in resolver order. The port may be numeric, `http` or `https`.
/// An empty name stands for the unspecified address.
pub fn resolve(host: &str, default_port: u16, family: Family) -> Result<Vec<SocketAddr>> {
    let (name, port) = split_host(host, default_port)?;
    let addrs: Vec<SocketAddr> = if name.is_empty() {
        let v4 = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        let v6 = SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port);
        vec![v4, v6]
    } else {
        (name, port)
            .to_socket_addrs()
            .map_err(|e| Error::InvalidArgument(format!("{host}: {e}")))?
            .collect()
    };

    let addrs: Vec<SocketAddr> = addrs.into_iter().filter(|a| family.admits(a)).collect();
    if addrs.is_empty() {
        return Err(Error::InvalidArgument(format!("{host}: no usable address")));
    }
    Ok(addrs)
}

fn split_host(host: &str, default_port: u16) -> Result<(&str, u16)> {
    if let Some(rest) = host.strip_prefix('[') {
        let (name, tail) = rest
            .split_once(']')
            .ok_or_else(|| Error::InvalidArgument(format!("{host}: unterminated '['")))?;
        let port = match tail.strip_prefix(':') {
            Some(service) => service_port(service)?,
            None if tail.is_empty() => default_port,
            None => return Err(Error::InvalidArgument(format!("{host}: junk after ']'"))),
        };
        return Ok((name, port));
    }
    match host.rsplit_once(':') {
        // a second colon means a bare IPv6 literal
        Some((name, service)) if !name.contains(':') => Ok((name, service_port(service)?)),
        _ => Ok((host, default_port)),
    }
}

fn service_port(service: &str) -> Result<u16> {
    match service {
        "http" => Ok(80),
        "https" => Ok(443),
        _ => service
            .parse()
            .map_err(|_| Error::InvalidArgument(format!("bad port: {service}"))),
    }
}

/// Opens a non-blocking connection registered with the pump's multiplexer.
pub fn connect(pump: &Handle, addr: SocketAddr, timeout: Duration) -> io::Result<TcpStream> {
    let socket = std::net::TcpStream::connect_timeout(&addr, timeout)?;
    socket.set_nonblocking(true)?;
    socket.set_nodelay(true)?;
    let _guard = pump.enter();
    TcpStream::from_std(socket)
}

/// Binds a non-blocking listener registered with the pump's multiplexer.
pub fn bind(pump: &Handle, addr: SocketAddr) -> io::Result<TcpListener> {
    let listener = std::net::TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    let _guard = pump.enter();
    TcpListener::from_std(listener)
}

/// First scatter size of a readiness event.
const FIRST_READ: usize = 2 * PAGE_SIZE;

/// Scatter size after a read of `n` bytes into `window`: doubles while reads
/// fill the buffer, otherwise drops back to [`FIRST_READ`].
fn next_window(window: usize, n: usize) -> usize {
    if n < window {
        FIRST_READ
    } else {
        (window * 2).min(PAGE_SIZE * MAX_REGIONS)
    }
}

/// Reads whatever is available, at most `limit` bytes, without blocking.
///
/// Starts with a small scatter list and grows it only while the socket keeps
/// filling it.
pub fn read_available(socket: &TcpStream, limit: usize, into: &mut Ioda) -> io::Result<ReadStatus> {
    let mut total = 0;
    let mut window = FIRST_READ;
    while total < limit {
        let want = (limit - total).min(window);
        match into.read_with(want, |bufs| socket.try_read_vectored(bufs)) {
            Ok(0) if total == 0 => return Ok(ReadStatus::Closed),
            Ok(0) => break,
            Ok(n) => {
                total += n;
                window = next_window(want, n);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(ReadStatus::Data(total))
}

/// Writes all of `data`, waiting for write readiness as needed.
pub async fn send_all(socket: &TcpStream, data: &mut Ioda) -> io::Result<usize> {
    let mut sent = 0;
    while !data.is_empty() {
        socket.writable().await?;
        let result = {
            let slices = data.io_slices();
            socket.try_write_vectored(&slices)
        };
        match result {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                data.discard(n);
                sent += n;
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(sent)
}

/// Watcher task: waits for read readiness and hands each event to `target`
/// until it asks to stop or goes away.
pub async fn watch_readable<S: Selected>(socket: Arc<TcpStream>, target: Weak<S>) {
    loop {
        if let Err(e) = socket.readable().await {
            tracing::warn!(error = %e, "readiness wait failed");
            break;
        }
        let Some(target) = target.upgrade() else {
            break;
        };
        if target.selected(&socket) == Selection::Stop {
            break;
        }
    }
}
