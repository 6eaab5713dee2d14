use std::net::Ipv6Addr;

/// `sockaddr_in6` as a value. Flow info and scope survive a round trip
/// through the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketAddrV6 {
	addr: Ipv6Addr,
	port: u16,
	flowinfo: u32,
	scope_id: u32,
}

impl SocketAddrV6 {
	pub fn new(octets: [u8; 16], port: u16) -> Self {
		Self::with_scope(octets, port, 0)
	}

	/// Link-local targets (`fe80::/10`) need the interface index as scope.
	pub fn with_scope(octets: [u8; 16], port: u16, scope_id: u32) -> Self {
		Self { addr: Ipv6Addr::from(octets), port, flowinfo: 0, scope_id }
	}

	pub fn any(port: u16) -> Self {
		Self::with_scope(Ipv6Addr::UNSPECIFIED.octets(), port, 0)
	}

	pub fn ip(&self) -> Ipv6Addr {
		self.addr
	}

	pub fn port(&self) -> u16 {
		self.port
	}

	pub fn set_port(&mut self, port: u16) {
		self.port = port;
	}

	pub fn scope_id(&self) -> u32 {
		self.scope_id
	}

	pub(crate) fn to_raw(&self) -> libc::sockaddr_in6 {
		libc::sockaddr_in6 {
			sin6_family: libc::AF_INET6 as libc::sa_family_t,
			sin6_port: self.port.to_be(),
			sin6_flowinfo: self.flowinfo,
			sin6_addr: libc::in6_addr { s6_addr: self.addr.octets() },
			sin6_scope_id: self.scope_id,
		}
	}

	pub(crate) fn from_raw(raw: &libc::sockaddr_in6) -> Self {
		Self {
			addr: Ipv6Addr::from(raw.sin6_addr.s6_addr),
			port: u16::from_be(raw.sin6_port),
			flowinfo: raw.sin6_flowinfo,
			scope_id: raw.sin6_scope_id,
		}
	}
}

impl From<std::net::SocketAddrV6> for SocketAddrV6 {
	fn from(addr: std::net::SocketAddrV6) -> Self {
		Self { addr: *addr.ip(), port: addr.port(), flowinfo: addr.flowinfo(), scope_id: addr.scope_id() }
	}
}

impl From<SocketAddrV6> for std::net::SocketAddrV6 {
	fn from(addr: SocketAddrV6) -> Self {
		std::net::SocketAddrV6::new(addr.addr, addr.port, addr.flowinfo, addr.scope_id)
	}
}

impl std::fmt::Display for SocketAddrV6 {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		// no %scope suffix, matching how candidates are logged
		write!(f, "[{}]:{}", self.addr, self.port)
	}
}
