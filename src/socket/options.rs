use std::os::fd::AsRawFd;
use crate::error::{SocketError, errno};

/// Sets an integer socket option.
///
/// `label` names the option in the error when the kernel refuses it.
pub fn set_int_option<S: AsRawFd>(
	socket: &S,
	level: libc::c_int,
	name: libc::c_int,
	value: libc::c_int,
	label: &'static str,
) -> Result<(), SocketError> {
	let result = unsafe {
		libc::setsockopt(
			socket.as_raw_fd(),
			level,
			name,
			&value as *const _ as *const libc::c_void,
			std::mem::size_of::<libc::c_int>() as libc::socklen_t,
		)
	};
	if result == -1 {
		Err(SocketError::SetOption { errno: errno(), option: label })
	} else {
		Ok(())
	}
}

/// Sets a boolean socket option (passed to the kernel as 0/1).
pub fn set_bool_option<S: AsRawFd>(
	socket: &S,
	level: libc::c_int,
	name: libc::c_int,
	enable: bool,
	label: &'static str,
) -> Result<(), SocketError> {
	set_int_option(socket, level, name, if enable { 1 } else { 0 }, label)
}

/// Sets SO_REUSEADDR on a socket.
///
/// Allows binding to an address that's in TIME_WAIT state.
/// Listeners turn it on before bind so a restarted relay can take its port back.
pub fn set_reuse_addr<S: AsRawFd>(socket: &S, enable: bool) -> Result<(), SocketError> {
	set_bool_option(socket, libc::SOL_SOCKET, libc::SO_REUSEADDR, enable, "SO_REUSEADDR")
}

/// Sets socket linger behavior (SO_LINGER).
///
/// Controls what happens when close() is called with unsent data:
/// - `None`: close returns at once and the kernel flushes in the background
/// - `Some(0)`: close sends RST and drops unsent data
/// - `Some(n)`: close blocks for up to n seconds while data drains
pub fn set_linger<S: AsRawFd>(socket: &S, linger: Option<u32>) -> Result<(), SocketError> {
	let val = match linger {
		None => libc::linger { l_onoff: 0, l_linger: 0 },
		Some(seconds) => libc::linger {
			l_onoff: 1,
			l_linger: seconds as libc::c_int
		},
	};
	let result = unsafe {
		libc::setsockopt(
			socket.as_raw_fd(),
			libc::SOL_SOCKET,
			libc::SO_LINGER,
			&val as *const _ as *const libc::c_void,
			std::mem::size_of::<libc::linger>() as libc::socklen_t,
		)
	};
	if result == -1 {
		Err(SocketError::SetOption { errno: errno(), option: "SO_LINGER" })
	} else {
		Ok(())
	}
}

/// Binds the socket to a network device (SO_BINDTODEVICE).
///
/// Requires CAP_NET_RAW. An empty name removes the binding.
pub fn set_bind_to_device<S: AsRawFd>(socket: &S, device: &str) -> Result<(), SocketError> {
	let result = unsafe {
		libc::setsockopt(
			socket.as_raw_fd(),
			libc::SOL_SOCKET,
			libc::SO_BINDTODEVICE,
			device.as_ptr() as *const libc::c_void,
			device.len() as libc::socklen_t,
		)
	};
	if result == -1 {
		Err(SocketError::SetOption { errno: errno(), option: "SO_BINDTODEVICE" })
	} else {
		Ok(())
	}
}

/// Turns one file status flag (`O_NONBLOCK`, `O_APPEND`, ...) on or off.
pub fn set_status_flag<S: AsRawFd>(fd: &S, flag: libc::c_int, enable: bool) -> Result<(), SocketError> {
	let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL) };
	if flags == -1 {
		return Err(SocketError::Fcntl { errno: errno(), op: "F_GETFL" });
	}

	let new_flags = if enable { flags | flag } else { flags & !flag };
	if new_flags == flags {
		return Ok(());
	}

	let result = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFL, new_flags) };
	if result == -1 {
		return Err(SocketError::Fcntl { errno: errno(), op: "F_SETFL" });
	}
	Ok(())
}

/// Turns one descriptor flag (only `FD_CLOEXEC` exists on Linux) on or off.
pub fn set_descriptor_flag<S: AsRawFd>(fd: &S, flag: libc::c_int, enable: bool) -> Result<(), SocketError> {
	let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFD) };
	if flags == -1 {
		return Err(SocketError::Fcntl { errno: errno(), op: "F_GETFD" });
	}

	let new_flags = if enable { flags | flag } else { flags & !flag };
	let result = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, new_flags) };
	if result == -1 {
		return Err(SocketError::Fcntl { errno: errno(), op: "F_SETFD" });
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::os::unix::net::UnixStream;

	fn get_int<S: AsRawFd>(s: &S, level: libc::c_int, name: libc::c_int) -> libc::c_int {
		let mut val: libc::c_int = 0;
		let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
		let rc = unsafe {
			libc::getsockopt(s.as_raw_fd(), level, name, &mut val as *mut _ as *mut libc::c_void, &mut len)
		};
		assert_eq!(rc, 0);
		val
	}

	#[test]
	fn bool_option_reaches_kernel() {
		let (a, _b) = UnixStream::pair().unwrap();
		set_bool_option(&a, libc::SOL_SOCKET, libc::SO_KEEPALIVE, true, "SO_KEEPALIVE").unwrap();
		assert_ne!(get_int(&a, libc::SOL_SOCKET, libc::SO_KEEPALIVE), 0);
		set_bool_option(&a, libc::SOL_SOCKET, libc::SO_KEEPALIVE, false, "SO_KEEPALIVE").unwrap();
		assert_eq!(get_int(&a, libc::SOL_SOCKET, libc::SO_KEEPALIVE), 0);
	}

	#[test]
	fn status_and_descriptor_flags() {
		let (a, _b) = UnixStream::pair().unwrap();
		set_status_flag(&a, libc::O_NONBLOCK, true).unwrap();
		let fl = unsafe { libc::fcntl(a.as_raw_fd(), libc::F_GETFL) };
		assert_ne!(fl & libc::O_NONBLOCK, 0);

		set_descriptor_flag(&a, libc::FD_CLOEXEC, false).unwrap();
		let fd = unsafe { libc::fcntl(a.as_raw_fd(), libc::F_GETFD) };
		assert_eq!(fd & libc::FD_CLOEXEC, 0);
	}

	#[test]
	fn failure_names_the_option() {
		let (a, _b) = UnixStream::pair().unwrap();
		// TCP level on a UNIX socket is refused
		let err = set_int_option(&a, libc::IPPROTO_TCP, libc::TCP_NODELAY, 1, "TCP_NODELAY").unwrap_err();
		assert!(err.to_string().starts_with("setsockopt(TCP_NODELAY)"));
		assert!(err.errno().is_some());
	}
}
