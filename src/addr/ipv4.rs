use std::net::Ipv4Addr;

/// `sockaddr_in` as a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketAddrV4 {
	addr: Ipv4Addr,
	port: u16,
}

impl SocketAddrV4 {
	pub fn new(octets: [u8; 4], port: u16) -> Self {
		Self { addr: Ipv4Addr::from(octets), port }
	}

	/// `0.0.0.0:port`, what a listener binds without a `bind` option.
	pub fn any(port: u16) -> Self {
		Self { addr: Ipv4Addr::UNSPECIFIED, port }
	}

	pub fn ip(&self) -> Ipv4Addr {
		self.addr
	}

	pub fn port(&self) -> u16 {
		self.port
	}

	pub fn set_port(&mut self, port: u16) {
		self.port = port;
	}

	pub(crate) fn from_raw(raw: &libc::sockaddr_in) -> Self {
		// s_addr is already in wire order, so its memory bytes are the octets
		Self::new(raw.sin_addr.s_addr.to_ne_bytes(), u16::from_be(raw.sin_port))
	}

	pub(crate) fn to_raw(&self) -> libc::sockaddr_in {
		libc::sockaddr_in {
			sin_family: libc::AF_INET as libc::sa_family_t,
			sin_port: self.port.to_be(),
			sin_addr: libc::in_addr { s_addr: u32::from_ne_bytes(self.addr.octets()) },
			sin_zero: [0; 8],
		}
	}
}

impl From<std::net::SocketAddrV4> for SocketAddrV4 {
	fn from(addr: std::net::SocketAddrV4) -> Self {
		Self { addr: *addr.ip(), port: addr.port() }
	}
}

impl From<SocketAddrV4> for std::net::SocketAddrV4 {
	fn from(addr: SocketAddrV4) -> Self {
		std::net::SocketAddrV4::new(addr.addr, addr.port)
	}
}

impl std::fmt::Display for SocketAddrV4 {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		std::fmt::Display::fmt(&std::net::SocketAddrV4::from(*self), f)
	}
}
