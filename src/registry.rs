//! Address type table and the open entry points.
//!
//! An address is opened from its tokens: the type name followed by the
//! positional arguments. The descriptor found for the name decides arity,
//! allowed directions, the option groups that are legal, and which opener
//! runs.

use bitflags::bitflags;
use log::{debug, info};

use crate::config::XioConfig;
use crate::endpoint::{Direction, Endpoint};
use crate::engine::{OpenContext, SysDialer};
use crate::error::OpenError;
use crate::openers::{fdnum, interface, ipapp, unix};
use crate::opts::{Group, OptSet};
use crate::process::ForkSpawner;
use crate::resolve::SystemResolver;
use crate::socket::SockType;

bitflags! {
	/// Transfer directions an address type supports.
	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	pub struct Directions: u8 {
		const READ = 0x1;
		const WRITE = 0x2;
		const RDWR = Self::READ.bits() | Self::WRITE.bits();
	}
}

impl Directions {
	fn allows(self, dir: Direction) -> bool {
		match dir {
			Direction::Read => self.contains(Directions::READ),
			Direction::Write => self.contains(Directions::WRITE),
			Direction::ReadWrite => self.contains(Directions::RDWR),
		}
	}
}

/// Opener of one address type. Receives the positional arguments without the
/// type name; arity, direction and groups are already checked.
pub type OpenFn = fn(&mut OpenContext<'_>, &mut Endpoint, &AddrDesc, &[&str], OptSet) -> Result<(), OpenError>;

/// Static description of an address type.
pub struct AddrDesc {
	pub name: &'static str,
	pub dirs: Directions,
	pub open: OpenFn,
	pub min_args: usize,
	pub max_args: usize,
	pub groups: Group,
	/// Opener hints. UNIX types: 1 for abstract. IP types: family, socket
	/// type, protocol. INTERFACE: family.
	pub arg1: i32,
	pub arg2: i32,
	pub arg3: i32,
}

impl std::fmt::Debug for AddrDesc {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AddrDesc")
			.field("name", &self.name)
			.field("dirs", &self.dirs)
			.field("args", &(self.min_args..=self.max_args))
			.field("groups", &self.groups)
			.finish()
	}
}

const UNIX_GROUPS: Group = Group::FD.union(Group::NAMED).union(Group::SOCKET).union(Group::SOCK_UNIX).union(Group::RETRY);
const ABSTRACT_GROUPS: Group = UNIX_GROUPS.difference(Group::NAMED);
const IP_GROUPS: Group = Group::FD.union(Group::SOCKET).union(Group::SOCK_IP).union(Group::IPAPP).union(Group::RETRY);

const fn unix_desc(name: &'static str, dirs: Directions, open: OpenFn, groups: Group, is_abstract: bool) -> AddrDesc {
	AddrDesc { name, dirs, open, min_args: 1, max_args: 1, groups, arg1: is_abstract as i32, arg2: 0, arg3: 0 }
}

const fn ip_desc(name: &'static str, open: OpenFn, groups: Group, family: i32, sock_type: i32, protocol: i32) -> AddrDesc {
	AddrDesc {
		name,
		dirs: Directions::RDWR,
		open,
		min_args: 1,
		max_args: 1,
		groups,
		arg1: family,
		arg2: sock_type,
		arg3: protocol,
	}
}

const TCP_CONNECT: Group = IP_GROUPS.union(Group::TCP).union(Group::CHILD);
const TCP_LISTEN: Group = IP_GROUPS.union(Group::TCP).union(Group::LISTEN).union(Group::CHILD).union(Group::RANGE);
const UDP_CONNECT: Group = IP_GROUPS.union(Group::CHILD);

const STREAM: i32 = libc::SOCK_STREAM;
const DGRAM: i32 = libc::SOCK_DGRAM;

pub static ADDRESSES: &[AddrDesc] = &[
	unix_desc("UNIX-CONNECT", Directions::RDWR, unix::open_connect, UNIX_GROUPS.union(Group::CHILD), false),
	unix_desc("UNIX-LISTEN", Directions::RDWR, unix::open_listen, UNIX_GROUPS.union(Group::LISTEN).union(Group::CHILD), false),
	unix_desc("UNIX-SENDTO", Directions::RDWR, unix::open_sendto, UNIX_GROUPS, false),
	unix_desc("UNIX-RECVFROM", Directions::RDWR, unix::open_recvfrom, UNIX_GROUPS, false),
	unix_desc("UNIX-RECV", Directions::READ, unix::open_recv, UNIX_GROUPS, false),
	unix_desc("UNIX-CLIENT", Directions::RDWR, unix::open_client, UNIX_GROUPS.union(Group::CHILD), false),
	unix_desc("ABSTRACT-CONNECT", Directions::RDWR, unix::open_connect, ABSTRACT_GROUPS.union(Group::CHILD), true),
	unix_desc("ABSTRACT-LISTEN", Directions::RDWR, unix::open_listen, ABSTRACT_GROUPS.union(Group::LISTEN).union(Group::CHILD), true),
	unix_desc("ABSTRACT-SENDTO", Directions::RDWR, unix::open_sendto, ABSTRACT_GROUPS, true),
	unix_desc("ABSTRACT-RECVFROM", Directions::RDWR, unix::open_recvfrom, ABSTRACT_GROUPS, true),
	unix_desc("ABSTRACT-RECV", Directions::READ, unix::open_recv, ABSTRACT_GROUPS, true),
	unix_desc("ABSTRACT-CLIENT", Directions::RDWR, unix::open_client, ABSTRACT_GROUPS.union(Group::CHILD), true),
	ip_desc("TCP", ipapp::open_connect, TCP_CONNECT, libc::AF_UNSPEC, STREAM, libc::IPPROTO_TCP),
	ip_desc("TCP4", ipapp::open_connect, TCP_CONNECT, libc::AF_INET, STREAM, libc::IPPROTO_TCP),
	ip_desc("TCP6", ipapp::open_connect, TCP_CONNECT, libc::AF_INET6, STREAM, libc::IPPROTO_TCP),
	ip_desc("TCP-LISTEN", ipapp::open_listen, TCP_LISTEN, libc::AF_UNSPEC, STREAM, libc::IPPROTO_TCP),
	ip_desc("TCP4-LISTEN", ipapp::open_listen, TCP_LISTEN, libc::AF_INET, STREAM, libc::IPPROTO_TCP),
	ip_desc("TCP6-LISTEN", ipapp::open_listen, TCP_LISTEN, libc::AF_INET6, STREAM, libc::IPPROTO_TCP),
	ip_desc("UDP", ipapp::open_connect, UDP_CONNECT, libc::AF_UNSPEC, DGRAM, libc::IPPROTO_UDP),
	ip_desc("UDP4", ipapp::open_connect, UDP_CONNECT, libc::AF_INET, DGRAM, libc::IPPROTO_UDP),
	ip_desc("UDP6", ipapp::open_connect, UDP_CONNECT, libc::AF_INET6, DGRAM, libc::IPPROTO_UDP),
	AddrDesc {
		name: "INTERFACE",
		dirs: Directions::RDWR,
		open: interface::open_interface,
		min_args: 1,
		max_args: 1,
		groups: Group::FD.union(Group::SOCKET).union(Group::INTERFACE),
		arg1: libc::AF_PACKET,
		arg2: 0,
		arg3: 0,
	},
	AddrDesc {
		name: "FD",
		dirs: Directions::RDWR,
		open: fdnum::open_fd,
		min_args: 1,
		max_args: 1,
		groups: Group::FD
			.union(Group::FIFO)
			.union(Group::CHR)
			.union(Group::BLK)
			.union(Group::FILE)
			.union(Group::SOCKET)
			.union(Group::TERMIOS)
			.union(Group::SOCK_UNIX)
			.union(Group::SOCK_IP)
			.union(Group::IPAPP),
		arg1: 0,
		arg2: 0,
		arg3: 0,
	},
	AddrDesc {
		name: "ACCEPT-FD",
		dirs: Directions::RDWR,
		open: fdnum::open_accept_fd,
		min_args: 1,
		max_args: 1,
		groups: Group::FD
			.union(Group::SOCKET)
			.union(Group::SOCK_UNIX)
			.union(Group::SOCK_IP)
			.union(Group::IPAPP)
			.union(Group::CHILD)
			.union(Group::RANGE)
			.union(Group::RETRY),
		arg1: 0,
		arg2: 0,
		arg3: 0,
	},
];

/// Finds an address type by name, ignoring case.
pub fn lookup(name: &str) -> Option<&'static AddrDesc> {
	ADDRESSES.iter().find(|desc| desc.name.eq_ignore_ascii_case(name))
}

impl AddrDesc {
	pub(crate) fn family(&self) -> crate::addr::Family {
		crate::addr::Family::from_raw(self.arg1).unwrap_or(crate::addr::Family::Unspec)
	}

	pub(crate) fn sock_type(&self) -> Option<SockType> {
		SockType::from_raw(self.arg2)
	}

	pub(crate) fn is_abstract(&self) -> bool {
		self.arg1 == 1
	}

	fn expected(&self) -> String {
		if self.min_args == self.max_args {
			self.min_args.to_string()
		} else {
			format!("{}..{}", self.min_args, self.max_args)
		}
	}
}

/// Opens an address with the real resolver, syscalls and `fork(2)`.
pub fn open(config: &XioConfig, tokens: &[&str], opts: OptSet, dir: Direction) -> Result<Endpoint, OpenError> {
	let resolver = SystemResolver;
	let mut dialer = SysDialer;
	let mut spawner = ForkSpawner::new();
	let mut ctx = OpenContext { config, resolver: &resolver, dialer: &mut dialer, spawner: &mut spawner };
	open_with(&mut ctx, tokens, opts, dir)
}

/// Opens an address through the given context.
///
/// Returns the endpoint in the process that keeps it: the caller, or the
/// forked child when `fork` is in effect.
pub fn open_with(ctx: &mut OpenContext<'_>, tokens: &[&str], mut opts: OptSet, dir: Direction) -> Result<Endpoint, OpenError> {
	let (&name, args) = tokens.split_first().ok_or_else(|| OpenError::UnknownAddress(String::new()))?;
	let desc = lookup(name).ok_or_else(|| OpenError::UnknownAddress(name.to_owned()))?;
	opts.set_label(desc.name);

	if args.len() < desc.min_args || args.len() > desc.max_args {
		return Err(OpenError::Arity { addr: desc.name.to_owned(), given: args.len(), expected: desc.expected() });
	}
	if !desc.dirs.allows(dir) {
		return Err(OpenError::Direction { addr: desc.name.to_owned(), requested: dir.name() });
	}
	opts.check_groups(desc.groups)?;

	let mut ep = Endpoint::new(desc.name, dir);
	opts.apply_params(&mut ep.params);
	debug!("{}: opening for {} with {} option(s)", desc.name, dir.name(), opts.len());

	(desc.open)(ctx, &mut ep, desc, args, opts)?;
	info!("{}: open, {:?}", desc.name, ep.transfer);
	Ok(ep)
}
