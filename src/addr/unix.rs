//! UNIX domain socket addresses, filesystem and abstract.

use log::warn;

/// Capacity of `sun_path` on this platform.
pub const UNIX_PATH_MAX: usize = 108;

/// Byte offset of `sun_path` inside `sockaddr_un`.
pub(crate) const SUN_PATH_OFFSET: usize = std::mem::size_of::<libc::sa_family_t>();

/// Unix domain socket address (file path or abstract).
///
/// The path is stored already truncated to what fits in `sun_path`, together
/// with the length policy used when the address is handed to the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnixAddr {
	path: Vec<u8>,
	/// True if this is an abstract socket (Linux-only, no filesystem entry).
	is_abstract: bool,
	/// Length computed from the path instead of the full structure size.
	tight: bool,
}

impl UnixAddr {
	/// Creates a filesystem address with tight length.
	pub fn new<P: AsRef<[u8]>>(path: P) -> Self {
		build_unix_address(path.as_ref(), false, true)
	}

	/// Creates an abstract socket address (Linux-only) with tight length.
	///
	/// Abstract names have no filesystem entry.
	pub fn abstract_socket<P: AsRef<[u8]>>(name: P) -> Self {
		build_unix_address(name.as_ref(), true, true)
	}

	/// Returns true if this is an abstract socket.
	pub fn is_abstract(&self) -> bool {
		self.is_abstract
	}

	/// Returns true if the reported length follows the path length.
	pub fn is_tight(&self) -> bool {
		self.tight
	}

	/// Returns the path bytes (without the leading NUL of abstract names).
	pub fn path(&self) -> &[u8] {
		&self.path
	}

	/// Returns the path as a filesystem path, `None` for abstract names.
	pub fn as_pathname(&self) -> Option<&std::path::Path> {
		use std::os::unix::ffi::OsStrExt;
		if self.is_abstract {
			None
		} else {
			Some(std::path::Path::new(std::ffi::OsStr::from_bytes(&self.path)))
		}
	}

	/// Effective length handed to bind/connect/sendto.
	pub fn socklen(&self) -> libc::socklen_t {
		let len = if self.tight {
			let used = if self.is_abstract { self.path.len() + 1 } else { self.path.len() };
			SUN_PATH_OFFSET + used.min(UNIX_PATH_MAX)
		} else {
			std::mem::size_of::<libc::sockaddr_un>()
		};
		len as libc::socklen_t
	}

	/// Converts to the raw sockaddr_un for syscalls.
	pub(crate) fn to_raw(&self) -> libc::sockaddr_un {
		let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
		addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
		let start = if self.is_abstract { 1 } else { 0 };
		// sun_path[0] is already 0 from zeroed() for abstract names
		for (i, &byte) in self.path.iter().enumerate() {
			addr.sun_path[start + i] = byte as libc::c_char;
		}
		addr
	}

	/// Creates from raw sockaddr_un and the length the kernel reported.
	pub(crate) fn from_raw(raw: &libc::sockaddr_un, len: libc::socklen_t) -> Self {
		let len = len as usize;
		let full = std::mem::size_of::<libc::sockaddr_un>();
		let tight = len < full;
		let used = len.saturating_sub(SUN_PATH_OFFSET).min(UNIX_PATH_MAX);
		let bytes: Vec<u8> = raw.sun_path[..used].iter().map(|&c| c as u8).collect();

		if used > 0 && bytes[0] == 0 {
			// Abstract: NULs are significant, only padding of a full-size address is dropped
			let mut name = bytes[1..].to_vec();
			if !tight {
				while name.last() == Some(&0) {
					name.pop();
				}
			}
			Self { path: name, is_abstract: true, tight }
		} else {
			let end = bytes.iter().position(|&c| c == 0).unwrap_or(bytes.len());
			Self { path: bytes[..end].to_vec(), is_abstract: false, tight }
		}
	}
}

/// Builds a UNIX socket address from a path or abstract name.
///
/// Over-long input is truncated to what `sun_path` can hold and reported with
/// a warning; the result stays usable. `tight` selects whether the reported
/// length is computed from the path or is the full structure size.
pub fn build_unix_address(path: &[u8], is_abstract: bool, tight: bool) -> UnixAddr {
	let capacity = if is_abstract { UNIX_PATH_MAX - 1 } else { UNIX_PATH_MAX };
	let mut path = path.to_vec();
	if is_abstract {
		if path.len() >= UNIX_PATH_MAX {
			warn!("socket address {} characters long, truncating to {}", path.len() + 1, UNIX_PATH_MAX);
		}
	} else if path.len() > UNIX_PATH_MAX {
		warn!("unix socket address {} characters long, truncating to {}", path.len(), UNIX_PATH_MAX);
	}
	path.truncate(capacity);
	UnixAddr { path, is_abstract, tight }
}

impl std::fmt::Display for UnixAddr {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let text = String::from_utf8_lossy(&self.path);
		if self.is_abstract {
			write!(f, "\"\\0{}\"", text)
		} else {
			write!(f, "\"{}\"", text)
		}
	}
}

/*
Length policy:
  tight     -> offsetof(sun_path) + bytes used (abstract counts its leading NUL)
  not tight -> sizeof(struct sockaddr_un) = 110 on Linux

A filesystem path of exactly 108 bytes fills sun_path with no terminating NUL.
The kernel accepts that because the length bounds the path.
*/
