//! Process spawning for fork-per-connection mode.
//!
//! The engine only ever asks "am I the parent or the child now?", so that
//! question sits behind `Spawner` and tests can answer it without forking.

use log::{debug, info};

use crate::error::{OpenError, errno};

/// A child process seen from its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildHandle {
	pub pid: libc::pid_t,
}

/// Result of a spawn, as seen by the calling process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Spawned {
	Parent(ChildHandle),
	Child,
}

pub trait Spawner {
	fn spawn_child(&mut self) -> Result<Spawned, OpenError>;
}

/// Spawns with `fork(2)`.
///
/// Finished children are reaped before each fork so long-running fork loops
/// do not pile up zombies.
#[derive(Debug, Default)]
pub struct ForkSpawner {
	children: u64,
}

impl ForkSpawner {
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of children spawned so far.
	pub fn children(&self) -> u64 {
		self.children
	}

	fn reap(&self) {
		loop {
			let mut status: libc::c_int = 0;
			let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
			if pid <= 0 {
				break;
			}
			debug!("child process {} terminated with status {}", pid, status);
		}
	}
}

impl Spawner for ForkSpawner {
	fn spawn_child(&mut self) -> Result<Spawned, OpenError> {
		self.reap();
		let pid = unsafe { libc::fork() };
		match pid {
			-1 => Err(OpenError::Fork { errno: errno() }),
			0 => Ok(Spawned::Child),
			pid => {
				self.children += 1;
				info!("forked off child process {}", pid);
				Ok(Spawned::Parent(ChildHandle { pid }))
			}
		}
	}
}
