use std::collections::VecDeque;
use std::io::Read;
use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::{UnixDatagram, UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once};
use std::thread;
use std::time::Duration;

use addrlane::{
	ChildHandle, Dialer, Direction, ErrorClass, Family, OpenContext, OpenError, OptSet, OptValue, Resolver,
	SockAddr, SockType, Socket, SocketAddrV4, SocketError, Spawned, Spawner, SysDialer, TransferMode, UnixAddr,
	XioConfig, build_unix_address, open, open_with, UNIX_PATH_MAX,
};

/// Real syscalls, except that the first `refuse` connects fail and pauses
/// are only recorded.
#[derive(Default)]
struct CountingDialer {
	refuse: usize,
	sockets: usize,
	connects: usize,
	pauses: Vec<Duration>,
}

impl CountingDialer {
	fn refusing(refuse: usize) -> Self {
		Self { refuse, ..Default::default() }
	}
}

impl Dialer for CountingDialer {
	fn socket(&mut self, family: Family, sock_type: SockType, protocol: libc::c_int) -> Result<Socket, SocketError> {
		self.sockets += 1;
		SysDialer.socket(family, sock_type, protocol)
	}

	fn bind(&mut self, sock: &Socket, addr: &SockAddr) -> Result<(), SocketError> {
		SysDialer.bind(sock, addr)
	}

	fn connect(&mut self, sock: &Socket, addr: &SockAddr) -> Result<(), SocketError> {
		self.connects += 1;
		if self.connects <= self.refuse {
			return Err(SocketError::Connect { errno: libc::ECONNREFUSED, addr: addr.to_string() });
		}
		SysDialer.connect(sock, addr)
	}

	fn listen(&mut self, sock: &Socket, backlog: i32) -> Result<(), SocketError> {
		SysDialer.listen(sock, backlog)
	}

	fn accept(&mut self, sock: &Socket) -> Result<(OwnedFd, SockAddr), SocketError> {
		SysDialer.accept(sock)
	}

	fn pause(&mut self, interval: Duration) {
		self.pauses.push(interval);
	}
}

/// Plays back spawn results, then behaves like the child.
#[derive(Default)]
struct ScriptedSpawner {
	script: VecDeque<Spawned>,
}

impl ScriptedSpawner {
	fn parents(pids: &[libc::pid_t]) -> Self {
		Self { script: pids.iter().map(|&pid| Spawned::Parent(ChildHandle { pid })).collect() }
	}
}

impl Spawner for ScriptedSpawner {
	fn spawn_child(&mut self) -> Result<Spawned, OpenError> {
		Ok(self.script.pop_front().unwrap_or(Spawned::Child))
	}
}

struct Answer(Vec<SockAddr>);

impl Resolver for Answer {
	fn resolve(&self, _: &str, _: &str, _: Family, _: SockType, _: libc::c_int, _: bool) -> Result<Vec<SockAddr>, OpenError> {
		Ok(self.0.clone())
	}
}

struct Capture(Mutex<Vec<String>>);

impl log::Log for Capture {
	fn enabled(&self, metadata: &log::Metadata) -> bool {
		metadata.level() <= log::Level::Warn
	}

	fn log(&self, record: &log::Record) {
		if self.enabled(record.metadata()) {
			if let Ok(mut lines) = self.0.lock() {
				lines.push(record.args().to_string());
			}
		}
	}

	fn flush(&self) {}
}

static CAPTURE: Capture = Capture(Mutex::new(Vec::new()));

fn captured() -> &'static Capture {
	static INIT: Once = Once::new();
	INIT.call_once(|| {
		let _ = log::set_logger(&CAPTURE);
		log::set_max_level(log::LevelFilter::Warn);
	});
	&CAPTURE
}

fn text(path: &Path) -> &str {
	path.to_str().expect("utf-8 temp path")
}

fn opts(items: &[(&str, OptValue)]) -> OptSet {
	let mut set = OptSet::new();
	for (name, value) in items {
		set.insert(name, value.clone()).expect("valid option");
	}
	set
}

/// Connects to `path` as soon as something listens there, `count` times.
fn connect_later(path: PathBuf, count: usize) -> thread::JoinHandle<Vec<UnixStream>> {
	thread::spawn(move || {
		let mut out = Vec::new();
		for _ in 0..500 {
			if out.len() == count {
				break;
			}
			match UnixStream::connect(&path) {
				Ok(stream) => out.push(stream),
				Err(_) => thread::sleep(Duration::from_millis(10)),
			}
		}
		out
	})
}

fn is_open(fd: i32) -> bool {
	(unsafe { libc::fcntl(fd, libc::F_GETFD) }) != -1
}

#[test]
fn long_path_is_truncated_with_warning() {
	let log = captured();
	let addr = build_unix_address(&[b'p'; 200], false, true);
	assert_eq!(addr.path().len(), UNIX_PATH_MAX);

	let lines = log.0.lock().unwrap();
	assert!(lines.iter().any(|l| l.contains("200 characters long, truncating to 108")), "{lines:?}");
}

#[test]
fn stream_connect_falls_back_to_seqpacket() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("seq");
	let server = Socket::new(Family::Unix, SockType::SeqPacket, 0).unwrap();
	server.bind(&SockAddr::Unix(UnixAddr::new(path.as_os_str().as_encoded_bytes()))).unwrap();
	server.listen(1).unwrap();

	let ep = open(&XioConfig::default(), &["UNIX-CONNECT", text(&path)], OptSet::new(), Direction::ReadWrite).unwrap();
	assert_eq!(ep.sock_type, Some(SockType::SeqPacket));
	assert_eq!(ep.transfer, TransferMode::SeqPacket);
	server.accept().unwrap();
}

#[test]
fn unlink_early_replaces_stale_entry_and_close_removes_it() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("srv");
	std::fs::write(&path, b"stale").unwrap();

	let client = connect_later(path.clone(), 1);
	let set = opts(&[("unlink-early", OptValue::Bool(true))]);
	let mut ep = open(&XioConfig::default(), &["UNIX-LISTEN", text(&path)], set, Direction::ReadWrite).unwrap();
	assert_eq!(client.join().unwrap().len(), 1);

	assert_eq!(ep.cleanup.unlink_path(), Some(path.as_path()));
	ep.close();
	assert!(!path.exists());
}

#[test]
fn bound_connect_replaces_stale_client_path() {
	let dir = tempfile::tempdir().unwrap();
	let srv = dir.path().join("srv");
	let me = dir.path().join("me");
	let listener = UnixListener::bind(&srv).unwrap();
	std::fs::write(&me, b"stale").unwrap();

	let set = opts(&[("bind", OptValue::Str(text(&me).to_owned())), ("unlink-early", OptValue::Bool(true))]);
	let mut ep = open(&XioConfig::default(), &["UNIX-CONNECT", text(&srv)], set, Direction::ReadWrite).unwrap();
	let (_conn, peer) = listener.accept().unwrap();

	assert_eq!(peer.as_pathname(), Some(me.as_path()));
	assert_eq!(ep.cleanup.unlink_path(), Some(me.as_path()));
	assert!(std::fs::symlink_metadata(&me).unwrap().file_type().is_socket());
	ep.close();
	assert!(!me.exists());
}

#[test]
fn client_falls_back_to_sendto_on_datagram_peer() {
	let dir = tempfile::tempdir().unwrap();
	let srv = dir.path().join("srv");
	let cli = dir.path().join("cli");
	let receiver = UnixDatagram::bind(&srv).unwrap();

	let set = opts(&[("bind", OptValue::Str(text(&cli).to_owned()))]);
	let mut ep = open(&XioConfig::default(), &["UNIX-CLIENT", text(&srv)], set, Direction::ReadWrite).unwrap();
	assert_eq!(ep.transfer, TransferMode::SendTo);
	assert_eq!(ep.sock_type, Some(SockType::Datagram));
	assert!(cli.exists());

	let sender = UnixDatagram::from(ep.fd().unwrap().try_clone_to_owned().unwrap());
	sender.send_to(b"hi", &srv).unwrap();
	let mut buf = [0u8; 8];
	let (n, from) = receiver.recv_from(&mut buf).unwrap();
	assert_eq!(&buf[..n], b"hi");
	assert_eq!(from.as_pathname(), Some(cli.as_path()));

	drop(sender);
	ep.close();
	assert!(!cli.exists());
}

#[test]
fn bound_client_rebinds_its_path_on_retry() {
	let dir = tempfile::tempdir().unwrap();
	let me = dir.path().join("me");

	let config = XioConfig::default();
	let mut dialer = CountingDialer::default();
	let mut spawner = ScriptedSpawner::default();
	let mut ctx = OpenContext { config: &config, resolver: &Answer(vec![]), dialer: &mut dialer, spawner: &mut spawner };
	let set = opts(&[("bind", OptValue::Str(text(&me).to_owned())), ("retry", OptValue::UInt(1))]);
	let missing = dir.path().join("nobody");
	let err = open_with(&mut ctx, &["UNIX-CONNECT", text(&missing)], set, Direction::ReadWrite).unwrap_err();

	// both attempts reach connect: the first one did not leave `me` behind
	assert!(matches!(err, OpenError::Exhausted { attempts: 2, .. }));
	assert_eq!(err.errno(), Some(libc::ENOENT));
	assert_eq!(dialer.connects, 2);
	assert!(!me.exists());
}

#[test]
fn existing_path_escalates_after_budget() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("taken");
	std::fs::write(&path, b"").unwrap();

	let config = XioConfig::default();
	let mut dialer = CountingDialer::default();
	let mut spawner = ScriptedSpawner::default();
	let mut ctx = OpenContext { config: &config, resolver: &Answer(vec![]), dialer: &mut dialer, spawner: &mut spawner };
	let set = opts(&[("retry", OptValue::UInt(1))]);
	let err = open_with(&mut ctx, &["UNIX-LISTEN", text(&path)], set, Direction::ReadWrite).unwrap_err();

	match &err {
		OpenError::Exhausted { attempts, last, .. } => {
			assert_eq!(*attempts, 2);
			assert!(matches!(**last, OpenError::Exists { .. }));
		}
		other => panic!("unexpected {other}"),
	}
	assert_eq!(err.class(), ErrorClass::Fatal);
	assert_eq!(dialer.sockets, 0);
	assert_eq!(dialer.pauses.len(), 1);
	assert!(path.exists());
}

#[test]
fn retry_budget_gives_n_plus_one_attempts() {
	let config = XioConfig::default();
	let mut dialer = CountingDialer::refusing(usize::MAX);
	let mut spawner = ScriptedSpawner::default();
	let target = SockAddr::V4(SocketAddrV4::new([127, 0, 0, 1], 9));
	let mut ctx = OpenContext { config: &config, resolver: &Answer(vec![target]), dialer: &mut dialer, spawner: &mut spawner };
	let set = opts(&[("retry", OptValue::UInt(3)), ("interval", OptValue::Timespec(Duration::from_millis(20)))]);
	let err = open_with(&mut ctx, &["TCP4", "localhost:9"], set, Direction::ReadWrite).unwrap_err();

	assert!(matches!(err, OpenError::Exhausted { attempts: 4, .. }));
	assert_eq!(err.errno(), Some(libc::ECONNREFUSED));
	assert_eq!(dialer.connects, 4);
	assert_eq!(dialer.pauses, vec![Duration::from_millis(20); 3]);
}

#[test]
fn forever_keeps_trying_until_the_peer_answers() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("late");
	let _listener = UnixListener::bind(&path).unwrap();

	let config = XioConfig::default();
	let mut dialer = CountingDialer::refusing(10);
	let mut spawner = ScriptedSpawner::default();
	let mut ctx = OpenContext { config: &config, resolver: &Answer(vec![]), dialer: &mut dialer, spawner: &mut spawner };
	let set = opts(&[("forever", OptValue::Bool(true))]);
	let ep = open_with(&mut ctx, &["UNIX-CONNECT", text(&path)], set, Direction::ReadWrite).unwrap();

	assert_eq!(dialer.connects, 11);
	assert_eq!(dialer.pauses.len(), 10);
	assert!(ep.fd().is_some());
}

#[test]
fn no_candidates_is_a_resolution_failure() {
	let config = XioConfig::default();
	let mut dialer = CountingDialer::default();
	let mut spawner = ScriptedSpawner::default();
	let mut ctx = OpenContext { config: &config, resolver: &Answer(vec![]), dialer: &mut dialer, spawner: &mut spawner };
	let set = opts(&[("retry", OptValue::UInt(5))]);
	let err = open_with(&mut ctx, &["TCP", "nowhere.invalid:80"], set, Direction::ReadWrite).unwrap_err();

	assert_eq!(err.class(), ErrorClass::Resolution);
	assert!(!err.is_retryable());
	assert_eq!(dialer.sockets, 0);
	assert!(dialer.pauses.is_empty());
}

#[test]
fn fork_per_connect_parent_drops_each_connection() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("fork");
	let listener = UnixListener::bind(&path).unwrap();

	let config = XioConfig::default();
	let mut dialer = CountingDialer::default();
	let mut spawner = ScriptedSpawner::parents(&[101, 102]);
	let mut ctx = OpenContext { config: &config, resolver: &Answer(vec![]), dialer: &mut dialer, spawner: &mut spawner };
	let set = opts(&[("fork", OptValue::Bool(true)), ("retry", OptValue::UInt(2))]);
	let ep = open_with(&mut ctx, &["UNIX-CONNECT", text(&path)], set, Direction::ReadWrite).unwrap();

	assert!(ep.is_child);
	assert!(!ep.params.retry.remaining());
	assert_eq!(dialer.connects, 3);
	assert_eq!(dialer.pauses.len(), 2);

	let mut buf = [0u8; 1];
	for _ in 0..2 {
		let (mut handed_off, _) = listener.accept().unwrap();
		assert_eq!(handed_off.read(&mut buf).unwrap(), 0);
	}
	let (kept, _) = listener.accept().unwrap();
	drop(kept);
}

#[test]
fn fork_per_accept_leaves_path_to_the_parent() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("accept");

	let client = connect_later(path.clone(), 2);
	let config = XioConfig::default();
	let mut dialer = CountingDialer::default();
	let mut spawner = ScriptedSpawner::parents(&[7]);
	let mut ctx = OpenContext { config: &config, resolver: &Answer(vec![]), dialer: &mut dialer, spawner: &mut spawner };
	let set = opts(&[("fork", OptValue::Bool(true))]);
	let mut ep = open_with(&mut ctx, &["UNIX-LISTEN", text(&path)], set, Direction::ReadWrite).unwrap();

	let mut clients = client.join().unwrap();
	assert_eq!(clients.len(), 2);
	// the first connection went to child 7, this process closed its copy
	let mut buf = [0u8; 1];
	assert_eq!(clients[0].read(&mut buf).unwrap(), 0);

	assert!(ep.is_child);
	assert!(ep.cleanup.unlink_path().is_none());
	ep.close();
	assert!(path.exists());
}

#[test]
fn inherited_descriptor_is_not_closed() {
	let (ours, _theirs) = UnixStream::pair().unwrap();
	let raw = ours.into_raw_fd();

	let mut ep = open(&XioConfig::default(), &["FD", raw.to_string().as_str()], OptSet::new(), Direction::ReadWrite).unwrap();
	assert_eq!(ep.fd().map(|fd| fd.as_raw_fd()), Some(raw));
	ep.close();
	assert!(is_open(raw));
	unsafe { libc::close(raw) };
}

#[test]
fn configuration_errors_come_before_any_work() {
	let config = XioConfig::default();

	let err = open(&config, &["TCP-LISTEN"], OptSet::new(), Direction::ReadWrite).unwrap_err();
	assert!(matches!(&err, OpenError::Arity { addr, given: 0, .. } if addr == "TCP-LISTEN"));
	assert_eq!(err.to_string(), "TCP-LISTEN: wrong number of parameters (0 instead of 1)");

	let set = opts(&[("fork", OptValue::Bool(true))]);
	let err = open(&config, &["FD", "0"], set, Direction::ReadWrite).unwrap_err();
	assert_eq!(err.class(), ErrorClass::Configuration);

	let set = opts(&[("backlog", OptValue::Int(3))]);
	let err = open(&config, &["UNIX-SENDTO", "/nonexistent/x"], set, Direction::ReadWrite).unwrap_err();
	assert_eq!(err.class(), ErrorClass::Configuration);
}
