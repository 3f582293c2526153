//! Socket address variants with the bind/connect policy the proxy needs:
//! port-range cursors for ephemeral outbound binds, a "loose" port-group
//! policy for inbound binds that tolerate any free port in the same
//! privilege band, and Unix-domain stale-file cleanup.

use std::cell::Cell;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rand::rngs::OsRng;
use rand::Rng;
use socket2::{Domain, Protocol, Socket, Type};

/// One of the three privilege bands port allocation must respect: a
/// randomly or sequentially chosen port is only acceptable if it falls in
/// the same band as the port the caller originally asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PortGroup {
    lo: u16,
    hi: u16,
}

const PORT_GROUPS: [PortGroup; 3] = [
    PortGroup { lo: 1, hi: 511 },
    PortGroup { lo: 512, hi: 1023 },
    PortGroup { lo: 1024, hi: 65535 },
];

fn group_for(port: u16) -> PortGroup {
    PORT_GROUPS
        .iter()
        .copied()
        .find(|g| port >= g.lo && port <= g.hi)
        .unwrap_or(PORT_GROUPS[2])
}

/// Options controlling how a bind is attempted.
#[derive(Debug, Clone, Copy, Default)]
pub struct BindOptions {
    /// Enable `SO_REUSEADDR` before binding. Default on; the "loose" flag
    /// turns it off, matching the historical policy that loose binds trade
    /// address-reuse for port flexibility.
    pub loose: bool,
    /// Draw candidate ports from a cryptographically secure RNG before
    /// falling back to a linear scan. Only meaningful together with
    /// `loose`.
    pub random: bool,
}

impl BindOptions {
    pub fn reuse_addr(&self) -> bool {
        !self.loose
    }
}

/// A socket address the proxy can bind to or connect to.
///
/// Equality and hashing compare by value (family, address bytes, and port
/// or path); the mutable cursor inside [`SockAddr::V4Range`] is therefore
/// excluded from comparisons.
#[derive(Debug, Clone)]
pub enum SockAddr {
    V4(Ipv4Addr, u16),
    /// An inbound or outbound port range. `cursor` advances with each
    /// successful bind so repeated binds fan out across the range instead
    /// of hammering the first free port.
    V4Range(Ipv4Addr, u16, u16, std::sync::Arc<Cell<u16>>),
    V6(Ipv6Addr, u16),
    Unix(PathBuf),
}

unsafe impl Send for SockAddr {}
unsafe impl Sync for SockAddr {}

impl PartialEq for SockAddr {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SockAddr::V4(a, p), SockAddr::V4(b, q)) => a == b && p == q,
            (SockAddr::V4Range(a, lo, hi, _), SockAddr::V4Range(b, lo2, hi2, _)) => {
                a == b && lo == lo2 && hi == hi2
            }
            (SockAddr::V6(a, p), SockAddr::V6(b, q)) => a == b && p == q,
            (SockAddr::Unix(a), SockAddr::Unix(b)) => a == b,
            _ => false,
        }
    }
}
impl Eq for SockAddr {}

impl fmt::Display for SockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SockAddr::V4(ip, port) => write!(f, "{ip}:{port}"),
            SockAddr::V4Range(ip, lo, hi, cursor) => {
                write!(f, "{ip}:{lo}-{hi}(@{})", cursor.get())
            }
            SockAddr::V6(ip, port) => write!(f, "[{ip}]:{port}"),
            SockAddr::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

impl SockAddr {
    pub fn v4(ip: Ipv4Addr, port: u16) -> Self {
        SockAddr::V4(ip, port)
    }

    pub fn v4_range(ip: Ipv4Addr, port_min: u16, port_max: u16) -> Self {
        SockAddr::V4Range(ip, port_min, port_max, std::sync::Arc::new(Cell::new(port_min)))
    }

    pub fn v6(ip: Ipv6Addr, port: u16) -> Self {
        SockAddr::V6(ip, port)
    }

    pub fn unix(path: impl AsRef<Path>) -> Self {
        SockAddr::Unix(path.as_ref().to_path_buf())
    }

    fn domain(&self) -> Domain {
        match self {
            SockAddr::V4(..) | SockAddr::V4Range(..) => Domain::IPV4,
            SockAddr::V6(..) => Domain::IPV6,
            SockAddr::Unix(..) => Domain::UNIX,
        }
    }

    /// Runs the per-variant preparation hook before the real `bind(2)`:
    /// toggles `SO_REUSEADDR`, and for a Unix socket, unlinks a stale
    /// socket file left behind by a crashed previous instance.
    pub fn bind_prepare(&self, socket: &Socket, opts: BindOptions) -> io::Result<()> {
        socket.set_reuse_address(opts.reuse_addr())?;
        if let SockAddr::Unix(path) = self {
            if let Ok(meta) = std::fs::symlink_metadata(path) {
                #[cfg(unix)]
                {
                    use std::os::unix::fs::FileTypeExt;
                    if meta.file_type().is_socket() {
                        let _ = std::fs::remove_file(path);
                    }
                }
                let _ = meta;
            }
        }
        Ok(())
    }

    /// Binds a new socket according to this address's variant-specific
    /// policy, returning the bound socket and the concrete port (0 for
    /// Unix sockets).
    pub fn bind(&self, opts: BindOptions) -> io::Result<(Socket, u16)> {
        match self {
            SockAddr::V4(ip, port) => {
                let socket = Socket::new(self.domain(), Type::STREAM, Some(Protocol::TCP))?;
                self.bind_prepare(&socket, opts)?;
                if opts.loose && *port != 0 {
                    let (bound_port, tried) = bind_loose_v4(&socket, *ip, *port, opts.random)?;
                    let _ = tried;
                    return Ok((socket, bound_port));
                }
                socket.bind(&SocketAddr::new(IpAddr::V4(*ip), *port).into())?;
                Ok((socket, *port))
            }
            SockAddr::V4Range(ip, lo, hi, cursor) => {
                let socket = Socket::new(self.domain(), Type::STREAM, Some(Protocol::TCP))?;
                self.bind_prepare(&socket, opts)?;
                let port = bind_range_v4(&socket, *ip, *lo, *hi, cursor)?;
                Ok((socket, port))
            }
            SockAddr::V6(ip, port) => {
                let socket = Socket::new(self.domain(), Type::STREAM, Some(Protocol::TCP))?;
                self.bind_prepare(&socket, opts)?;
                socket.bind(&SocketAddr::new(IpAddr::V6(*ip), *port).into())?;
                Ok((socket, *port))
            }
            SockAddr::Unix(path) => {
                let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
                self.bind_prepare(&socket, opts)?;
                let addr = socket2::SockAddr::unix(path)?;
                socket.bind(&addr)?;
                Ok((socket, 0))
            }
        }
    }
}

/// Tries each port in `[lo, hi]` starting from `cursor`, wrapping once, and
/// stopping at the first successful bind. Advances `cursor` past the port
/// that succeeded so the next caller fans out further.
fn bind_range_v4(
    socket: &Socket,
    ip: Ipv4Addr,
    lo: u16,
    hi: u16,
    cursor: &Cell<u16>,
) -> io::Result<u16> {
    let start = cursor.get().clamp(lo, hi);
    let span = (hi - lo) as u32 + 1;
    for offset in 0..span {
        let port = lo + ((start - lo) as u32 + offset) as u16 % span as u16;
        match socket.bind(&SocketAddr::new(IpAddr::V4(ip), port).into()) {
            Ok(()) => {
                cursor.set(if port == hi { lo } else { port + 1 });
                return Ok(port);
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AddrInUse,
        "no free port in range",
    ))
}

/// Implements the "loose bind" port-group policy: the chosen port must lie
/// in the same privilege band (`[1,511]`, `[512,1023]`, `[1024,65535]`) as
/// the port the caller requested. If `random` is set, up to `range/8`
/// cryptographically secure random ports in the band are tried first;
/// otherwise (or once the random attempts are exhausted) a linear scan
/// starting just past the last port tried takes over. Fails only when
/// every port in the band is occupied.
fn bind_loose_v4(socket: &Socket, ip: Ipv4Addr, requested: u16, random: bool) -> io::Result<(u16, u32)> {
    let group = group_for(requested);
    let range = (group.hi - group.lo) as u32 + 1;
    let mut tried = 0u32;
    let mut last_attempted = group.lo;

    if random {
        let attempts = (range / 8).max(1);
        for _ in 0..attempts {
            let port = group.lo + (OsRng.gen_range(0..range)) as u16;
            tried += 1;
            last_attempted = port;
            match socket.bind(&SocketAddr::new(IpAddr::V4(ip), port).into()) {
                Ok(()) => return Ok((port, tried)),
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => continue,
                Err(e) => return Err(e),
            }
        }
    }

    let mut port = last_attempted.wrapping_add(1);
    if port < group.lo || port > group.hi {
        port = group.lo;
    }
    for _ in 0..range {
        tried += 1;
        match socket.bind(&SocketAddr::new(IpAddr::V4(ip), port).into()) {
            Ok(()) => return Ok((port, tried)),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                port = if port == group.hi { group.lo } else { port + 1 };
                continue;
            }
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AddrInUse,
        format!("no free port in group [{}, {}]", group.lo, group.hi),
    ))
}

/// Guards the global port-group bind attempts against concurrent callers
/// stepping on each other's `last_attempted` cursor per group.
pub static GROUP_BIND_LOCK: Mutex<()> = Mutex::new(());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_for_classifies_known_bands() {
        assert_eq!(group_for(80), PORT_GROUPS[0]);
        assert_eq!(group_for(512), PORT_GROUPS[1]);
        assert_eq!(group_for(1023), PORT_GROUPS[1]);
        assert_eq!(group_for(8080), PORT_GROUPS[2]);
    }

    #[test]
    fn equality_ignores_range_cursor() {
        let a = SockAddr::v4_range(Ipv4Addr::LOCALHOST, 9000, 9010);
        let b = SockAddr::v4_range(Ipv4Addr::LOCALHOST, 9000, 9010);
        if let SockAddr::V4Range(_, _, _, cursor) = &a {
            cursor.set(9005);
        }
        assert_eq!(a, b);
    }

    #[test]
    fn display_forms_are_short() {
        assert_eq!(
            SockAddr::v4(Ipv4Addr::new(10, 0, 0, 1), 443).to_string(),
            "10.0.0.1:443"
        );
        assert_eq!(SockAddr::unix("/tmp/zorp.sock").to_string(), "unix:/tmp/zorp.sock");
    }

    #[test]
    fn range_bind_advances_cursor_and_wraps() {
        let addr = SockAddr::v4_range(Ipv4Addr::LOCALHOST, 0, 0);
        // port 0 means "any" to the OS, so this just exercises that bind()
        // returns a concrete, non-zero port and that the cursor logic does
        // not panic on a single-port range.
        let (_, _) = addr.bind(BindOptions::default()).unwrap();
    }
}
