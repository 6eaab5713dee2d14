//! Network interface lookup and flag ioctls (SIOCGIFFLAGS / SIOCSIFFLAGS).

use std::ffi::CString;
use std::os::fd::AsRawFd;

use bitflags::bitflags;
use log::debug;

use crate::error::{SocketError, errno};

bitflags! {
	/// Interface flags as reported in `ifr_flags`.
	///
	/// Each `iff-*` option maps onto exactly one of these bits, going into
	/// either the set mask or the clear mask of the interface parameters.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
	pub struct IfFlags: u16 {
		const UP = libc::IFF_UP as u16;
		const BROADCAST = libc::IFF_BROADCAST as u16;
		const DEBUG = libc::IFF_DEBUG as u16;
		const LOOPBACK = libc::IFF_LOOPBACK as u16;
		const POINTOPOINT = libc::IFF_POINTOPOINT as u16;
		const NOTRAILERS = libc::IFF_NOTRAILERS as u16;
		const RUNNING = libc::IFF_RUNNING as u16;
		const NOARP = libc::IFF_NOARP as u16;
		const PROMISC = libc::IFF_PROMISC as u16;
		const ALLMULTI = libc::IFF_ALLMULTI as u16;
		const MASTER = libc::IFF_MASTER as u16;
		const SLAVE = libc::IFF_SLAVE as u16;
		const MULTICAST = libc::IFF_MULTICAST as u16;
		const PORTSEL = libc::IFF_PORTSEL as u16;
		const AUTOMEDIA = libc::IFF_AUTOMEDIA as u16;
	}
}

/// `struct ifreq` restricted to the flags member of its union.
#[repr(C)]
struct IfReqFlags {
	name: [libc::c_char; libc::IFNAMSIZ],
	flags: libc::c_short,
	_pad: [u8; 22],
}

impl IfReqFlags {
	fn new(name: &str) -> Self {
		let mut req = IfReqFlags { name: [0; libc::IFNAMSIZ], flags: 0, _pad: [0; 22] };
		// strncpy semantics: at most IFNAMSIZ - 1 bytes, always NUL terminated
		for (dst, &src) in req.name.iter_mut().zip(name.as_bytes().iter().take(libc::IFNAMSIZ - 1)) {
			*dst = src as libc::c_char;
		}
		req
	}
}

/// Looks up the kernel index of a network interface.
///
/// Returns `None` when no interface has that name.
pub fn if_index(name: &str) -> Option<u32> {
	let cname = CString::new(name).ok()?;
	let index = unsafe { libc::if_nametoindex(cname.as_ptr()) };
	if index == 0 { None } else { Some(index) }
}

/// Reads the current flags of interface `name` through the socket `fd`.
pub fn get_iff<S: AsRawFd>(fd: &S, name: &str) -> Result<IfFlags, SocketError> {
	let mut req = IfReqFlags::new(name);
	let result = unsafe {
		libc::ioctl(fd.as_raw_fd(), libc::SIOCGIFFLAGS as _, &mut req as *mut IfReqFlags)
	};
	if result == -1 {
		return Err(SocketError::Ioctl { errno: errno(), request: "SIOCGIFFLAGS", name: name.to_owned() });
	}
	Ok(IfFlags::from_bits_retain(req.flags as u16))
}

/// Writes `flags` as the complete flag word of interface `name`.
pub fn set_iff<S: AsRawFd>(fd: &S, name: &str, flags: IfFlags) -> Result<(), SocketError> {
	let mut req = IfReqFlags::new(name);
	req.flags = flags.bits() as libc::c_short;
	let result = unsafe {
		libc::ioctl(fd.as_raw_fd(), libc::SIOCSIFFLAGS as _, &mut req as *mut IfReqFlags)
	};
	if result == -1 {
		return Err(SocketError::Ioctl { errno: errno(), request: "SIOCSIFFLAGS", name: name.to_owned() });
	}
	Ok(())
}

/// Merges the set and clear masks into the current interface flags.
///
/// Returns the flags as they were before the change, for restoring at close.
/// When the masks do not change anything no SIOCSIFFLAGS is issued, so an
/// unprivileged process can open an interface without touching its flags.
pub fn apply_iff<S: AsRawFd>(fd: &S, name: &str, set: IfFlags, clear: IfFlags) -> Result<IfFlags, SocketError> {
	let current = get_iff(fd, name)?;
	debug!("\"{}\": system set flags: 0x{:x}", name, current.bits());

	let merged = (current | set) & !clear;
	debug!("\"{}\": merged flags: 0x{:x}", name, merged.bits());
	if merged == current {
		return Ok(current);
	}

	set_iff(fd, name, merged)?;
	let now = get_iff(fd, name)?;
	debug!("\"{}\": resulting flags: 0x{:x}", name, now.bits());
	Ok(current)
}
