//! Undo actions owed by an endpoint at close.
//!
//! A bound UNIX path is removed at most once, by the one process that keeps
//! the bound socket after a fork. Interface flags and terminal attributes
//! that were changed while opening are put back.

use std::os::fd::{AsRawFd, BorrowedFd};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::error::{OpenError, SocketError};
use crate::socket::{IfFlags, set_iff};

/// Interface flags as found before the endpoint changed them.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SavedIface {
	name: String,
	flags: IfFlags,
}

/// Pending cleanup of one endpoint.
#[derive(Default)]
pub struct Cleanup {
	unlink: Option<PathBuf>,
	iface: Option<SavedIface>,
	termios: Option<libc::termios>,
}

impl Cleanup {
	pub fn new() -> Self {
		Self::default()
	}

	/// Makes this endpoint responsible for removing `path` at close.
	///
	/// Only the first call has an effect. Returns whether it took.
	pub fn schedule_unlink(&mut self, path: impl Into<PathBuf>) -> bool {
		let path = path.into();
		if let Some(existing) = &self.unlink {
			debug!("unlink of \"{}\" already scheduled, ignoring \"{}\"", existing.display(), path.display());
			return false;
		}
		self.unlink = Some(path);
		true
	}

	/// Drops unlink responsibility, returning the path that was owned.
	///
	/// Called on the side of a fork that does not keep the bound socket.
	pub fn disown_unlink(&mut self) -> Option<PathBuf> {
		self.unlink.take()
	}

	pub fn unlink_path(&self) -> Option<&Path> {
		self.unlink.as_deref()
	}

	pub fn save_iff(&mut self, name: &str, flags: IfFlags) {
		self.iface = Some(SavedIface { name: name.to_owned(), flags });
	}

	pub fn saved_iff(&self) -> Option<IfFlags> {
		self.iface.as_ref().map(|saved| saved.flags)
	}

	/// Captures the terminal attributes of `fd` if it is a terminal.
	///
	/// Returns whether anything was captured.
	pub fn capture_termios(&mut self, fd: BorrowedFd<'_>) -> bool {
		if unsafe { libc::isatty(fd.as_raw_fd()) } != 1 {
			return false;
		}
		let mut tio: libc::termios = unsafe { std::mem::zeroed() };
		if unsafe { libc::tcgetattr(fd.as_raw_fd(), &mut tio) } == -1 {
			warn!("tcgetattr({}): {}", fd.as_raw_fd(), std::io::Error::last_os_error());
			return false;
		}
		self.termios = Some(tio);
		true
	}

	pub fn has_termios(&self) -> bool {
		self.termios.is_some()
	}

	/// Puts back interface flags and terminal attributes. Errors are logged,
	/// the descriptor is about to go away anyway.
	pub(crate) fn restore(&mut self, fd: BorrowedFd<'_>) {
		if let Some(saved) = self.iface.take() {
			if let Err(err) = set_iff(&fd, &saved.name, saved.flags) {
				warn!("restoring flags of \"{}\": {}", saved.name, err);
			}
		}
		if let Some(tio) = self.termios.take() {
			if unsafe { libc::tcsetattr(fd.as_raw_fd(), libc::TCSADRAIN, &tio) } == -1 {
				warn!("tcsetattr({}): {}", fd.as_raw_fd(), std::io::Error::last_os_error());
			}
		}
	}

	/// Removes the owned path, if any.
	pub(crate) fn run_unlink(&mut self) {
		if let Some(path) = self.unlink.take() {
			info!("removing \"{}\"", path.display());
			if let Err(err) = std::fs::remove_file(&path) {
				if err.kind() != std::io::ErrorKind::NotFound {
					warn!("unlink(\"{}\"): {}", path.display(), err);
				}
			}
		}
	}
}

impl std::fmt::Debug for Cleanup {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Cleanup")
			.field("unlink", &self.unlink)
			.field("iface", &self.iface)
			.field("termios", &self.termios.is_some())
			.finish()
	}
}

/// Removes a stale entry before bind. A missing path is fine.
pub fn unlink_early(path: &Path) -> Result<(), OpenError> {
	match std::fs::remove_file(path) {
		Ok(()) => {
			info!("removed stale \"{}\"", path.display());
			Ok(())
		}
		Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
		Err(err) => Err(SocketError::Unlink {
			errno: err.raw_os_error().unwrap_or(libc::EIO),
			path: path.to_owned(),
		}
		.into()),
	}
}

/// Fails with `Exists` when anything, even a dangling symlink, is at `path`.
/// Only a missing entry counts as absent; any other lstat failure is passed on.
pub fn ensure_absent(path: &Path) -> Result<(), OpenError> {
	match std::fs::symlink_metadata(path) {
		Ok(_) => Err(OpenError::Exists { path: path.to_owned() }),
		Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
		Err(err) => Err(SocketError::Stat {
			errno: err.raw_os_error().unwrap_or(libc::EIO),
			path: path.to_owned(),
		}
		.into()),
	}
}
