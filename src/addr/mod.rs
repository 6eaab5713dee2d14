//! Socket address values.
//!
//! `SockAddr` is a tagged union over every family the engine opens:
//! - `V4` / `V6`: IP
//! - `Unix`: filesystem path or abstract name
//! - `Link`: `sockaddr_ll` for interface sockets
//!
//! `RawSockAddr` is the syscall form: a `sockaddr_storage` buffer plus the
//! effective length. The two only meet in `encode`/`decode`.

mod ipv4;
mod ipv6;
mod link;
mod unix;
pub use self::ipv4::SocketAddrV4;
pub use self::ipv6::SocketAddrV6;
pub use self::link::LinkAddr;
pub use self::unix::{UnixAddr, build_unix_address, UNIX_PATH_MAX};

/// Protocol family of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
	Unspec,
	Inet,
	Inet6,
	Unix,
	Packet,
}

impl Family {
	/// Returns the libc constant for this address family.
	#[inline]
	pub fn raw(self) -> libc::c_int {
		match self {
			Family::Unspec => libc::AF_UNSPEC,
			Family::Inet => libc::AF_INET,
			Family::Inet6 => libc::AF_INET6,
			Family::Unix => libc::AF_UNIX,
			Family::Packet => libc::AF_PACKET,
		}
	}

	pub fn from_raw(raw: libc::c_int) -> Option<Self> {
		match raw {
			libc::AF_UNSPEC => Some(Family::Unspec),
			libc::AF_INET => Some(Family::Inet),
			libc::AF_INET6 => Some(Family::Inet6),
			libc::AF_UNIX => Some(Family::Unix),
			libc::AF_PACKET => Some(Family::Packet),
			_ => None,
		}
	}

	/// Parses a protocol-family option value: a name or a number.
	pub fn from_name(name: &str) -> Option<Self> {
		match name.to_ascii_lowercase().as_str() {
			"ip4" | "ipv4" | "inet" | "4" => Some(Family::Inet),
			"ip6" | "ipv6" | "inet6" | "6" => Some(Family::Inet6),
			"unix" | "local" => Some(Family::Unix),
			"packet" => Some(Family::Packet),
			"unspec" => Some(Family::Unspec),
			other => other.parse::<libc::c_int>().ok().and_then(Self::from_raw),
		}
	}
}

/// A socket address of any supported family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SockAddr {
	Unspec,
	V4(SocketAddrV4),
	V6(SocketAddrV6),
	Unix(UnixAddr),
	Link(LinkAddr),
}

/// Raw `sockaddr_storage` plus effective length, as passed to syscalls.
#[derive(Clone, Copy)]
pub struct RawSockAddr {
	storage: libc::sockaddr_storage,
	len: libc::socklen_t,
}

impl RawSockAddr {
	/// Zeroed buffer with full capacity, ready for accept/getsockname/recvfrom.
	pub fn empty() -> Self {
		Self {
			storage: unsafe { std::mem::zeroed() },
			len: Self::capacity(),
		}
	}

	#[inline]
	pub fn capacity() -> libc::socklen_t {
		std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t
	}

	fn from_struct<T: Copy>(value: &T, len: libc::socklen_t) -> Self {
		let mut raw = Self::empty();
		debug_assert!(std::mem::size_of::<T>() <= std::mem::size_of::<libc::sockaddr_storage>());
		unsafe {
			std::ptr::write(&mut raw.storage as *mut _ as *mut T, *value);
		}
		raw.len = len.min(Self::capacity());
		raw
	}

	/// Copies a kernel- or libc-owned address, e.g. `ai_addr` of getaddrinfo.
	///
	/// # Safety
	/// `ptr` must be valid for reads of `len` bytes.
	pub(crate) unsafe fn from_raw_parts(ptr: *const libc::sockaddr, len: libc::socklen_t) -> Self {
		let mut raw = Self::empty();
		let len = len.min(Self::capacity());
		unsafe {
			std::ptr::copy_nonoverlapping(
				ptr as *const u8,
				&mut raw.storage as *mut _ as *mut u8,
				len as usize,
			);
		}
		raw.len = len;
		raw
	}

	pub fn len(&self) -> libc::socklen_t {
		self.len
	}

	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	pub fn family(&self) -> libc::c_int {
		self.storage.ss_family as libc::c_int
	}

	pub fn as_ptr(&self) -> *const libc::sockaddr {
		&self.storage as *const _ as *const libc::sockaddr
	}

	/// Pointer and length slot for syscalls that fill the address in.
	pub(crate) fn as_mut_parts(&mut self) -> (*mut libc::sockaddr, &mut libc::socklen_t) {
		(&mut self.storage as *mut _ as *mut libc::sockaddr, &mut self.len)
	}
}

impl SockAddr {
	pub fn family(&self) -> Family {
		match self {
			SockAddr::Unspec => Family::Unspec,
			SockAddr::V4(_) => Family::Inet,
			SockAddr::V6(_) => Family::Inet6,
			SockAddr::Unix(_) => Family::Unix,
			SockAddr::Link(_) => Family::Packet,
		}
	}

	/// Wildcard address of an IP family.
	pub fn wildcard(family: Family, port: u16) -> Option<Self> {
		match family {
			Family::Inet => Some(SockAddr::V4(SocketAddrV4::any(port))),
			Family::Inet6 => Some(SockAddr::V6(SocketAddrV6::any(port))),
			_ => None,
		}
	}

	pub fn port(&self) -> Option<u16> {
		match self {
			SockAddr::V4(a) => Some(a.port()),
			SockAddr::V6(a) => Some(a.port()),
			_ => None,
		}
	}

	/// Returns a copy with only the port replaced. Non-IP addresses are unchanged.
	pub fn with_port(&self, port: u16) -> Self {
		let mut out = self.clone();
		match &mut out {
			SockAddr::V4(a) => a.set_port(port),
			SockAddr::V6(a) => a.set_port(port),
			_ => {}
		}
		out
	}

	pub fn as_unix(&self) -> Option<&UnixAddr> {
		match self {
			SockAddr::Unix(u) => Some(u),
			_ => None,
		}
	}

	/// Encodes into the syscall representation.
	pub fn encode(&self) -> RawSockAddr {
		match self {
			SockAddr::Unspec => {
				let mut raw = RawSockAddr::empty();
				raw.len = std::mem::size_of::<libc::sa_family_t>() as libc::socklen_t;
				raw
			}
			SockAddr::V4(a) => RawSockAddr::from_struct(
				&a.to_raw(),
				std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
			),
			SockAddr::V6(a) => RawSockAddr::from_struct(
				&a.to_raw(),
				std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
			),
			SockAddr::Unix(a) => RawSockAddr::from_struct(&a.to_raw(), a.socklen()),
			SockAddr::Link(a) => RawSockAddr::from_struct(
				&a.to_raw(),
				std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
			),
		}
	}

	/// Decodes a kernel-filled address. Short or unknown input yields `Unspec`.
	pub fn decode(raw: &RawSockAddr) -> Self {
		let len = raw.len() as usize;
		if len < std::mem::size_of::<libc::sa_family_t>() {
			return SockAddr::Unspec;
		}
		let ptr = raw.as_ptr();
		match raw.family() {
			libc::AF_INET if len >= std::mem::size_of::<libc::sockaddr_in>() => {
				let sin = unsafe { &*(ptr as *const libc::sockaddr_in) };
				SockAddr::V4(SocketAddrV4::from_raw(sin))
			}
			libc::AF_INET6 if len >= std::mem::size_of::<libc::sockaddr_in6>() => {
				let sin6 = unsafe { &*(ptr as *const libc::sockaddr_in6) };
				SockAddr::V6(SocketAddrV6::from_raw(sin6))
			}
			libc::AF_UNIX => {
				let sun = unsafe { &*(ptr as *const libc::sockaddr_un) };
				SockAddr::Unix(UnixAddr::from_raw(sun, raw.len()))
			}
			libc::AF_PACKET if len >= std::mem::size_of::<libc::sockaddr_ll>() => {
				let sll = unsafe { &*(ptr as *const libc::sockaddr_ll) };
				SockAddr::Link(LinkAddr::from_raw(sll))
			}
			_ => SockAddr::Unspec,
		}
	}

	/// Calls the provided closure with a pointer to the raw sockaddr and its size.
	pub fn with_raw<F, R>(&self, f: F) -> R
	where
		F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R,
	{
		let raw = self.encode(); // lives on this stack frame until f returns
		f(raw.as_ptr(), raw.len())
	}
}

/*
Why a closure for with_raw? The encoded storage lives on this stack frame.
Handing out a pointer to it is only sound while the frame is alive, so
the syscall runs inside the closure.
*/

impl From<std::net::SocketAddr> for SockAddr {
	fn from(addr: std::net::SocketAddr) -> Self {
		match addr {
			std::net::SocketAddr::V4(a) => SockAddr::V4(a.into()),
			std::net::SocketAddr::V6(a) => SockAddr::V6(a.into()),
		}
	}
}

impl From<UnixAddr> for SockAddr {
	fn from(addr: UnixAddr) -> Self {
		SockAddr::Unix(addr)
	}
}

impl std::fmt::Display for SockAddr {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			SockAddr::Unspec => write!(f, "AF=0"),
			SockAddr::V4(a) => a.fmt(f),
			SockAddr::V6(a) => a.fmt(f),
			SockAddr::Unix(a) => write!(f, "AF={} {}", libc::AF_UNIX, a),
			SockAddr::Link(a) => a.fmt(f),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn every_family_decodes_what_it_encodes() {
		let addrs = [
			SockAddr::V4(SocketAddrV4::new([10, 0, 0, 1], 4000)),
			SockAddr::V6(SocketAddrV6::new(std::net::Ipv6Addr::LOCALHOST.octets(), 9)),
			SockAddr::Unix(UnixAddr::new("/tmp/x.sock")),
			SockAddr::Unix(UnixAddr::abstract_socket("x")),
			SockAddr::Link(LinkAddr::new(2, libc::ETH_P_ALL as u16)),
		];
		for addr in addrs {
			let raw = addr.encode();
			assert!(raw.len() <= RawSockAddr::capacity());
			assert_eq!(raw.family(), addr.family().raw());
			assert_eq!(SockAddr::decode(&raw), addr);
		}
	}

	#[test]
	fn truncated_buffer_decodes_unspec() {
		let mut raw = SockAddr::V4(SocketAddrV4::new([1, 2, 3, 4], 5)).encode();
		raw.len = 4;
		assert_eq!(SockAddr::decode(&raw), SockAddr::Unspec);
	}

	#[test]
	fn port_rewrite_keeps_host() {
		let addr = SockAddr::V4(SocketAddrV4::new([127, 0, 0, 1], 1));
		let moved = addr.with_port(2000);
		assert_eq!(moved.port(), Some(2000));
		assert_eq!(moved.to_string(), "127.0.0.1:2000");
		let unix = SockAddr::Unix(UnixAddr::new("/a"));
		assert_eq!(unix.with_port(9), unix);
	}

	#[test]
	fn family_names() {
		assert_eq!(Family::from_name("ip6"), Some(Family::Inet6));
		assert_eq!(Family::from_name("UNIX"), Some(Family::Unix));
		assert_eq!(Family::from_name("2"), Some(Family::Inet));
		assert_eq!(Family::from_name("bogus"), None);
	}
}
