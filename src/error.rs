use std::path::PathBuf;

use crate::opts::Phase;

/// Socket creation/configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("socket() failed: {}", errno_to_str(*.errno))]
    Create { errno: i32 },

    #[error("bind({addr}) failed: {}", errno_to_str(*.errno))]
    Bind { errno: i32, addr: String },

    #[error("listen(backlog={backlog}) failed: {}", errno_to_str(*.errno))]
    Listen { errno: i32, backlog: i32 },

    #[error("connect({addr}) failed: {}", errno_to_str(*.errno))]
    Connect { errno: i32, addr: String },

    #[error("accept() failed: {}", errno_to_str(*.errno))]
    Accept { errno: i32 },

    #[error("setsockopt({option}) failed: {}", errno_to_str(*.errno))]
    SetOption { errno: i32, option: &'static str },

    #[error("getsockopt({option}) failed: {}", errno_to_str(*.errno))]
    GetOption { errno: i32, option: &'static str },

    #[error("fcntl({op}) failed: {}", errno_to_str(*.errno))]
    Fcntl { errno: i32, op: &'static str },

    #[error("ioctl({request}, \"{name}\") failed: {}", errno_to_str(*.errno))]
    Ioctl { errno: i32, request: &'static str, name: String },

    #[error("unlink(\"{}\") failed: {}", .path.display(), errno_to_str(*.errno))]
    Unlink { errno: i32, path: PathBuf },

    #[error("lstat(\"{}\") failed: {}", .path.display(), errno_to_str(*.errno))]
    Stat { errno: i32, path: PathBuf },

    #[error("invalid address: {reason}")]
    InvalidAddress { reason: &'static str },
}

impl SocketError {
    /// Returns the system error code, if the failure came from a syscall.
    pub fn errno(&self) -> Option<i32> {
        match self {
            SocketError::Create { errno }
            | SocketError::Bind { errno, .. }
            | SocketError::Listen { errno, .. }
            | SocketError::Connect { errno, .. }
            | SocketError::Accept { errno }
            | SocketError::SetOption { errno, .. }
            | SocketError::GetOption { errno, .. }
            | SocketError::Fcntl { errno, .. }
            | SocketError::Ioctl { errno, .. }
            | SocketError::Unlink { errno, .. }
            | SocketError::Stat { errno, .. } => Some(*errno),
            SocketError::InvalidAddress { .. } => None,
        }
    }
}

/// Why an option item was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptionFault {
    #[error("unknown option")]
    Unknown,

    #[error("not applicable to this address type")]
    WrongGroup,

    #[error("declared for phase {declared:?}, applied in phase {current:?}")]
    WrongPhase { declared: Phase, current: Phase },

    #[error("expected a {expected} value")]
    WrongType { expected: &'static str },

    #[error("invalid value \"{0}\"")]
    BadValue(String),

    #[error("only with bind option")]
    NeedsBind,

    #[error("not applied")]
    NotApplied,
}

/// Errors from setting up the process-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown configuration switch '{0}'")]
    UnknownSwitch(char),

    #[error("switch '{what}' (\"{arg}\"): {reason}")]
    BadArgument { what: char, arg: String, reason: &'static str },

    #[error("configuration already installed")]
    AlreadyInstalled,
}

/// Failure class of an open attempt.
///
/// Only `Transient` failures are ever retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Configuration,
    Resolution,
    Transient,
    Fatal,
}

/// Errors produced while opening an address.
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("{addr}: wrong number of parameters ({given} instead of {expected})")]
    Arity { addr: String, given: usize, expected: String },

    #[error("unknown address type \"{0}\"")]
    UnknownAddress(String),

    #[error("{addr}: unknown interface \"{name}\"")]
    UnknownInterface { addr: String, name: String },

    #[error("{addr}: invalid argument \"{arg}\": {reason}")]
    BadArgument { addr: String, arg: String, reason: &'static str },

    #[error("{addr}: {requested} access not supported")]
    Direction { addr: String, requested: &'static str },

    #[error("{addr}: option \"{option}\": {fault}")]
    Option { addr: String, option: String, fault: OptionFault },

    #[error("getaddrinfo(\"{host}\", \"{port}\"): {reason}")]
    Resolve { host: String, port: String, reason: String },

    #[error(transparent)]
    Socket(#[from] SocketError),

    #[error("\"{}\" exists", .path.display())]
    Exists { path: PathBuf },

    #[error("fork() failed: {}", errno_to_str(*.errno))]
    Fork { errno: i32 },

    #[error("{addr}: giving up after {attempts} attempt(s): {last}")]
    Exhausted { addr: String, attempts: u64, #[source] last: Box<OpenError> },

    #[error("{addr}: {reason}")]
    Invariant { addr: String, reason: &'static str },
}

impl OpenError {
    pub(crate) fn option(addr: &str, option: &str, fault: OptionFault) -> Self {
        OpenError::Option { addr: addr.to_owned(), option: option.to_owned(), fault }
    }

    /// Maps the error onto the open-failure taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            OpenError::Arity { .. }
            | OpenError::UnknownAddress(_)
            | OpenError::UnknownInterface { .. }
            | OpenError::BadArgument { .. }
            | OpenError::Direction { .. }
            | OpenError::Option { .. } => ErrorClass::Configuration,
            OpenError::Resolve { .. } => ErrorClass::Resolution,
            OpenError::Socket(err) => match err {
                SocketError::Create { .. }
                | SocketError::Bind { .. }
                | SocketError::Listen { .. }
                | SocketError::Connect { .. }
                | SocketError::Accept { .. } => ErrorClass::Transient,
                _ => ErrorClass::Fatal,
            },
            OpenError::Exists { .. } | OpenError::Fork { .. } => ErrorClass::Transient,
            OpenError::Exhausted { .. } | OpenError::Invariant { .. } => ErrorClass::Fatal,
        }
    }

    /// True when another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Returns the system error code behind this error, looking through `Exhausted`.
    pub fn errno(&self) -> Option<i32> {
        match self {
            OpenError::Socket(err) => err.errno(),
            OpenError::Fork { errno } => Some(*errno),
            OpenError::Exists { .. } => Some(libc::EEXIST),
            OpenError::Exhausted { last, .. } => last.errno(),
            _ => None,
        }
    }
}

/// Returns current errno value.
#[inline]
pub fn errno() -> i32 {
    unsafe { *libc::__errno_location() }
}

/// Converts errno to human-readable string.
pub(crate) fn errno_to_str(errno: i32) -> String {
    match errno {
        libc::EACCES => "permission denied".into(),
        libc::EADDRINUSE => "address already in use".into(),
        libc::EADDRNOTAVAIL => "address not available".into(),
        libc::EAFNOSUPPORT => "address family not supported".into(),
        libc::EAGAIN => "resource temporarily unavailable".into(),
        libc::EBADF => "bad file descriptor".into(),
        libc::ECONNREFUSED => "connection refused".into(),
        libc::ECONNRESET => "connection reset by peer".into(),
        libc::EEXIST => "file exists".into(),
        libc::EINPROGRESS => "operation in progress".into(),
        libc::EINTR => "interrupted by signal".into(),
        libc::EINVAL => "invalid argument".into(),
        libc::EMFILE => "too many open files".into(),
        libc::ENETUNREACH => "network unreachable".into(),
        libc::ENOBUFS => "no buffer space available".into(),
        libc::ENODEV => "no such device".into(),
        libc::ENOENT => "no such file or directory".into(),
        libc::ENOTCONN => "not connected".into(),
        libc::ENOTSOCK => "not a socket".into(),
        libc::EPERM => "operation not permitted".into(),
        libc::EPIPE => "broken pipe".into(),
        libc::EPROTONOSUPPORT => "protocol not supported".into(),
        libc::EPROTOTYPE => "protocol wrong type for socket".into(),
        libc::ETIMEDOUT => "connection timed out".into(),
        _ => format!("errno {}", errno),
    }
}

/// Maps errno to std::io::ErrorKind.
fn errno_to_kind(errno: i32) -> std::io::ErrorKind {
    match errno {
        libc::EACCES | libc::EPERM => std::io::ErrorKind::PermissionDenied,
        libc::EADDRINUSE => std::io::ErrorKind::AddrInUse,
        libc::EADDRNOTAVAIL => std::io::ErrorKind::AddrNotAvailable,
        libc::EAGAIN => std::io::ErrorKind::WouldBlock,
        libc::ECONNREFUSED => std::io::ErrorKind::ConnectionRefused,
        libc::ECONNRESET => std::io::ErrorKind::ConnectionReset,
        libc::EEXIST => std::io::ErrorKind::AlreadyExists,
        libc::EINTR => std::io::ErrorKind::Interrupted,
        libc::EINVAL => std::io::ErrorKind::InvalidInput,
        libc::ENOENT => std::io::ErrorKind::NotFound,
        libc::ENOTCONN => std::io::ErrorKind::NotConnected,
        libc::EPIPE => std::io::ErrorKind::BrokenPipe,
        libc::ETIMEDOUT => std::io::ErrorKind::TimedOut,
        _ => std::io::ErrorKind::Other,
    }
}

impl From<SocketError> for std::io::Error {
    fn from(err: SocketError) -> Self {
        let errno = err.errno().unwrap_or(libc::EINVAL);
        std::io::Error::new(errno_to_kind(errno), err)
    }
}

impl From<OpenError> for std::io::Error {
    fn from(err: OpenError) -> Self {
        let kind = match err.errno() {
            Some(errno) => errno_to_kind(errno),
            None => match err.class() {
                ErrorClass::Configuration => std::io::ErrorKind::InvalidInput,
                ErrorClass::Resolution => std::io::ErrorKind::NotFound,
                _ => std::io::ErrorKind::Other,
            },
        };
        std::io::Error::new(kind, err)
    }
}
