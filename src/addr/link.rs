/// Link-layer address (`sockaddr_ll`) used by raw interface sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkAddr {
	/// Ethernet protocol in host byte order (e.g. `ETH_P_ALL`).
	protocol: u16,
	ifindex: i32,
	hatype: u16,
	pkttype: u8,
	halen: u8,
	hwaddr: [u8; 8],
}

impl LinkAddr {
	/// Address that selects all packets of `protocol` on the interface `ifindex`.
	pub fn new(ifindex: i32, protocol: u16) -> Self {
		Self { protocol, ifindex, hatype: 0, pkttype: 0, halen: 0, hwaddr: [0; 8] }
	}

	pub fn ifindex(&self) -> i32 {
		self.ifindex
	}

	pub fn protocol(&self) -> u16 {
		self.protocol
	}

	/// Hardware address bytes actually in use.
	pub fn hwaddr(&self) -> &[u8] {
		&self.hwaddr[..(self.halen as usize).min(8)]
	}

	pub(crate) fn to_raw(&self) -> libc::sockaddr_ll {
		libc::sockaddr_ll {
			sll_family: libc::AF_PACKET as libc::c_ushort,
			sll_protocol: self.protocol.to_be(),
			sll_ifindex: self.ifindex,
			sll_hatype: self.hatype,
			sll_pkttype: self.pkttype,
			sll_halen: self.halen,
			sll_addr: self.hwaddr,
		}
	}

	pub(crate) fn from_raw(raw: &libc::sockaddr_ll) -> Self {
		Self {
			protocol: u16::from_be(raw.sll_protocol),
			ifindex: raw.sll_ifindex,
			hatype: raw.sll_hatype,
			pkttype: raw.sll_pkttype,
			halen: raw.sll_halen,
			hwaddr: raw.sll_addr,
		}
	}
}

impl std::fmt::Display for LinkAddr {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "AF={} ifindex {} proto 0x{:04x}", libc::AF_PACKET, self.ifindex, self.protocol)
	}
}
