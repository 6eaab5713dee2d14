use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

use crate::addr::{Family, RawSockAddr, SockAddr};
use crate::error::{SocketError, errno};
use super::SockType;

/// A socket whose family and type are known at runtime.
///
/// The engine drives every address type through the same
/// socket → bind → connect/listen sequence, so the family and type are
/// values here rather than type parameters.
#[derive(Debug)]
pub struct Socket {
	fd: OwnedFd,
	family: Family,
	sock_type: SockType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
	Read,   // SHUT_RD
	Write,  // SHUT_WR
	ReadWrite,   // SHUT_RDWR
}

impl Socket {
	/// Creates a new socket.
	///
	/// Calls the `socket()` syscall with the given domain, type and protocol.
	/// The socket is created with `SOCK_CLOEXEC` (close on exec).
	pub fn new(family: Family, sock_type: SockType, protocol: libc::c_int) -> Result<Self, SocketError> {
		let fd = unsafe {
			libc::socket(family.raw(), sock_type.raw() | libc::SOCK_CLOEXEC, protocol)
		};
		if fd == -1 {
			return Err(SocketError::Create { errno: errno() });
		}
		let fd = unsafe { OwnedFd::from_raw_fd(fd) };

		Ok(Self { fd, family, sock_type })
	}

	/// Wraps a descriptor whose family and type the caller already knows.
	pub fn from_parts(fd: OwnedFd, family: Family, sock_type: SockType) -> Self {
		Self { fd, family, sock_type }
	}

	/// Wraps an existing descriptor, asking the kernel for its family and type.
	pub fn adopt(fd: OwnedFd) -> Result<Self, SocketError> {
		let mut ty: libc::c_int = 0;
		let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
		let result = unsafe {
			libc::getsockopt(
				fd.as_raw_fd(),
				libc::SOL_SOCKET,
				libc::SO_TYPE,
				&mut ty as *mut _ as *mut libc::c_void,
				&mut len,
			)
		};
		if result == -1 {
			return Err(SocketError::GetOption { errno: errno(), option: "SO_TYPE" });
		}
		let sock_type = SockType::from_raw(ty)
			.ok_or(SocketError::InvalidAddress { reason: "unsupported socket type" })?;
		let family = match local_addr_of(fd.as_raw_fd()) {
			Ok(addr) => addr.family(),
			Err(_) => Family::Unspec,
		};
		Ok(Self { fd, family, sock_type })
	}

	pub fn family(&self) -> Family {
		self.family
	}

	pub fn sock_type(&self) -> SockType {
		self.sock_type
	}

	/// Binds the socket to an address.
	pub fn bind(&self, addr: &SockAddr) -> Result<(), SocketError> {
		let result = addr.with_raw(|ptr, len| unsafe {
			libc::bind(self.as_raw_fd(), ptr, len)
		});

		if result == -1 {
			return Err(SocketError::Bind { errno: errno(), addr: addr.to_string() });
		}
		Ok(())
	}

	/// Connects to a remote address.
	///
	/// Blocking; an interrupted connect is reported as a connect failure.
	pub fn connect(&self, addr: &SockAddr) -> Result<(), SocketError> {
		let result = addr.with_raw(|ptr, len| unsafe {
			libc::connect(self.as_raw_fd(), ptr, len)
		});

		if result == -1 {
			return Err(SocketError::Connect { errno: errno(), addr: addr.to_string() });
		}
		Ok(())
	}

	/// Marks the socket as passive.
	pub fn listen(&self, backlog: i32) -> Result<(), SocketError> {
		let result = unsafe { libc::listen(self.as_raw_fd(), backlog) };

		if result == -1 {
			return Err(SocketError::Listen { errno: errno(), backlog });
		}
		Ok(())
	}

	/// Accepts a connection, returning the new descriptor and the peer address.
	pub fn accept(&self) -> Result<(OwnedFd, SockAddr), SocketError> {
		let mut peer = RawSockAddr::empty();
		let (ptr, len) = peer.as_mut_parts();
		let fd = unsafe {
			libc::accept4(self.as_raw_fd(), ptr, len, libc::SOCK_CLOEXEC)
		};

		if fd == -1 {
			return Err(SocketError::Accept { errno: errno() });
		}

		let fd = unsafe { OwnedFd::from_raw_fd(fd) };
		Ok((fd, SockAddr::decode(&peer)))
	}

	/// Returns the address the socket is bound to.
	pub fn local_addr(&self) -> Result<SockAddr, SocketError> {
		local_addr_of(self.as_raw_fd())
	}

	/// Extracts the owned file descriptor, consuming self.
	pub fn into_fd(self) -> OwnedFd {
		self.fd
	}
}

pub(crate) fn local_addr_of(fd: RawFd) -> Result<SockAddr, SocketError> {
	let mut raw = RawSockAddr::empty();
	let (ptr, len) = raw.as_mut_parts();
	let result = unsafe { libc::getsockname(fd, ptr, len) };
	if result == -1 {
		return Err(SocketError::GetOption { errno: errno(), option: "getsockname" });
	}
	Ok(SockAddr::decode(&raw))
}

pub(crate) fn shutdown_fd(fd: RawFd, how: Shutdown) -> Result<(), SocketError> {
	let how = match how {
		Shutdown::Read => libc::SHUT_RD,
		Shutdown::Write => libc::SHUT_WR,
		Shutdown::ReadWrite => libc::SHUT_RDWR,
	};

	let result = unsafe { libc::shutdown(fd, how) };

	if result == -1 {
		Err(SocketError::SetOption { errno: errno(), option: "shutdown" })
	} else {
		Ok(())
	}
}

impl AsRawFd for Socket {
	fn as_raw_fd(&self) -> RawFd {
		self.fd.as_raw_fd()
	}
}

impl AsFd for Socket {
	fn as_fd(&self) -> BorrowedFd<'_> {
		self.fd.as_fd()
	}
}

impl IntoRawFd for Socket {
	fn into_raw_fd(self) -> RawFd {
		self.fd.into_raw_fd()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::addr::UnixAddr;

	#[test]
	fn bind_listen_accept_over_unix() {
		let dir = tempfile::tempdir().expect("create temp dir");
		let path = dir.path().join("raw.sock");
		let addr = SockAddr::Unix(UnixAddr::new(path.as_os_str().as_encoded_bytes()));

		let server = Socket::new(Family::Unix, SockType::Stream, 0).expect("socket");
		server.bind(&addr).expect("bind");
		server.listen(4).expect("listen");
		assert_eq!(server.local_addr().expect("getsockname"), addr);

		let client = Socket::new(Family::Unix, SockType::Stream, 0).expect("socket");
		client.connect(&addr).expect("connect");
		let (_conn, _peer) = server.accept().expect("accept");
	}

	#[test]
	fn adopt_reads_type_and_family() {
		let (a, _b) = std::os::unix::net::UnixDatagram::pair().expect("pair");
		let sock = Socket::adopt(OwnedFd::from(a)).expect("adopt");
		assert_eq!(sock.sock_type(), SockType::Datagram);
		assert_eq!(sock.family(), Family::Unix);
	}

	#[test]
	fn connect_to_missing_path_fails_with_errno() {
		let dir = tempfile::tempdir().expect("create temp dir");
		let addr = SockAddr::Unix(UnixAddr::new(dir.path().join("none").as_os_str().as_encoded_bytes()));
		let client = Socket::new(Family::Unix, SockType::Stream, 0).expect("socket");
		let err = client.connect(&addr).unwrap_err();
		assert_eq!(err.errno(), Some(libc::ENOENT));
	}
}
