//! Name resolution: remote candidates and local bind addresses.

use std::ffi::{CStr, CString};

use log::{debug, trace};

use crate::addr::{Family, RawSockAddr, SockAddr, build_unix_address};
use crate::config::XioConfig;
use crate::error::{OpenError, errno_to_str};
use crate::socket::SockType;

/// Turns a host and port into candidate socket addresses.
pub trait Resolver {
	/// Returns candidates in the order the name service gave them.
	///
	/// `passive` asks for addresses suitable for bind; an empty host then
	/// means the wildcard address.
	fn resolve(
		&self,
		host: &str,
		port: &str,
		family: Family,
		sock_type: SockType,
		protocol: libc::c_int,
		passive: bool,
	) -> Result<Vec<SockAddr>, OpenError>;
}

/// Resolver backed by `getaddrinfo(3)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
	fn resolve(
		&self,
		host: &str,
		port: &str,
		family: Family,
		sock_type: SockType,
		protocol: libc::c_int,
		passive: bool,
	) -> Result<Vec<SockAddr>, OpenError> {
		let fail = |reason: String| OpenError::Resolve { host: host.to_owned(), port: port.to_owned(), reason };

		let c_host = if host.is_empty() {
			None
		} else {
			Some(CString::new(host).map_err(|_| fail("embedded NUL".into()))?)
		};
		let c_port = if port.is_empty() {
			None
		} else {
			Some(CString::new(port).map_err(|_| fail("embedded NUL".into()))?)
		};

		let mut hints: libc::addrinfo = unsafe { std::mem::zeroed() };
		hints.ai_family = family.raw();
		hints.ai_socktype = sock_type.raw();
		hints.ai_protocol = protocol;
		hints.ai_flags = if passive { libc::AI_PASSIVE } else { 0 };

		let mut list: *mut libc::addrinfo = std::ptr::null_mut();
		let rc = unsafe {
			libc::getaddrinfo(
				c_host.as_ref().map_or(std::ptr::null(), |h| h.as_ptr()),
				c_port.as_ref().map_or(std::ptr::null(), |p| p.as_ptr()),
				&hints,
				&mut list,
			)
		};
		if rc != 0 {
			let reason = if rc == libc::EAI_SYSTEM {
				errno_to_str(crate::error::errno())
			} else {
				unsafe { CStr::from_ptr(libc::gai_strerror(rc)) }.to_string_lossy().into_owned()
			};
			return Err(fail(reason));
		}

		let mut out = Vec::new();
		let mut cursor = list;
		while !cursor.is_null() {
			let info = unsafe { &*cursor };
			if !info.ai_addr.is_null() {
				let raw = unsafe { RawSockAddr::from_raw_parts(info.ai_addr, info.ai_addrlen) };
				let addr = SockAddr::decode(&raw);
				if addr != SockAddr::Unspec && !out.contains(&addr) {
					out.push(addr);
				}
			}
			cursor = info.ai_next;
		}
		unsafe { libc::freeaddrinfo(list) };
		Ok(out)
	}
}

/// Resolves the remote side of a client.
///
/// An empty answer is a resolution failure like any other. With no family
/// requested, addresses of the preferred family are moved to the front,
/// keeping resolver order otherwise.
pub fn resolve_remote(
	resolver: &dyn Resolver,
	config: &XioConfig,
	host: &str,
	port: &str,
	family: Family,
	sock_type: SockType,
	protocol: libc::c_int,
) -> Result<Vec<SockAddr>, OpenError> {
	let mut candidates = resolver.resolve(host, port, family, sock_type, protocol, false)?;
	if candidates.is_empty() {
		return Err(OpenError::Resolve {
			host: host.to_owned(),
			port: port.to_owned(),
			reason: "no addresses".into(),
		});
	}
	if family == Family::Unspec {
		if let Some(preferred) = config.preferred_family() {
			candidates.sort_by_key(|addr| addr.family() != preferred);
		}
	}
	for addr in &candidates {
		trace!("\"{}:{}\" -> {}", host, port, addr);
	}
	Ok(candidates)
}

/// Splits an IP bind string into host and port.
///
/// Accepted: `host`, `host<sep>port`, `<sep>port`, `[v6]`, `[v6]<sep>port`.
/// A bare IPv6 literal (more than one colon, no brackets) is all host.
pub fn split_host_port<'a>(text: &'a str, config: &XioConfig) -> Result<(&'a str, &'a str), &'static str> {
	if let Some(rest) = text.strip_prefix('[') {
		let close = rest.find(']').ok_or("missing ']'")?;
		let host = &rest[..close];
		let tail = &rest[close + 1..];
		if tail.is_empty() {
			return Ok((host, ""));
		}
		let port = tail.strip_prefix(config.ip6_port_sep).ok_or("garbage after ']'")?;
		return Ok((host, port));
	}
	if text.matches(':').count() > 1 && config.ip4_port_sep == ':' {
		return Ok((text, ""));
	}
	match text.split_once(config.ip4_port_sep) {
		Some((host, port)) => Ok((host, port)),
		None => Ok((text, "")),
	}
}

/// Parameters for turning a `bind` value into a local address.
#[derive(Debug, Clone, Copy)]
pub struct LocalSpec {
	pub family: Family,
	pub sock_type: SockType,
	pub protocol: libc::c_int,
	/// UNIX only: abstract namespace.
	pub is_abstract: bool,
	/// UNIX only: tight address length.
	pub tight: bool,
}

/// Turns the value of a `bind` option into a local socket address.
///
/// `None` for `bind` means no bind was requested and the kernel chooses.
pub fn resolve_local(
	resolver: &dyn Resolver,
	config: &XioConfig,
	addr: &str,
	bind: Option<&str>,
	spec: LocalSpec,
) -> Result<Option<SockAddr>, OpenError> {
	let Some(bind) = bind else {
		return Ok(None);
	};

	if spec.family == Family::Unix {
		let unix = build_unix_address(bind.as_bytes(), spec.is_abstract, spec.tight);
		debug!("{}: binding to {}", addr, unix);
		return Ok(Some(SockAddr::Unix(unix)));
	}

	let (host, port) = split_host_port(bind, config).map_err(|reason| OpenError::BadArgument {
		addr: addr.to_owned(),
		arg: bind.to_owned(),
		reason,
	})?;
	let port = if port.is_empty() { "0" } else { port };
	let candidates = resolver.resolve(host, port, spec.family, spec.sock_type, spec.protocol, true)?;
	let local = candidates
		.into_iter()
		.find(|a| spec.family == Family::Unspec || a.family() == spec.family)
		.ok_or_else(|| OpenError::Resolve {
			host: host.to_owned(),
			port: port.to_owned(),
			reason: "no address of the requested family".into(),
		})?;
	debug!("{}: binding to {}", addr, local);
	Ok(Some(local))
}

/// Applies `sourceport`: rewrites the port of the local address, creating a
/// wildcard address of `family` when there was none.
pub fn with_source_port(local: Option<SockAddr>, family: Family, port: u16) -> Option<SockAddr> {
	match local {
		Some(addr) => Some(addr.with_port(port)),
		None => SockAddr::wildcard(family, port),
	}
}
