use crate::endpoint::{HowToEnd, Params};
use crate::socket::IfFlags;
use super::{Group, OptCode, OptDesc, OptFunc, OptType, OptValue, Phase};

/// Looks an option up by name or alias, ignoring ASCII case.
pub fn lookup(name: &str) -> Option<&'static OptDesc> {
	OPTIONS.iter().find(|desc| desc.matches(name))
}

const fn desc(
	name: &'static str,
	alias: Option<&'static str>,
	code: OptCode,
	group: Group,
	phase: Phase,
	ty: OptType,
	func: OptFunc,
) -> OptDesc {
	OptDesc { name, alias, code, group, phase, ty, func }
}

const fn sockopt(level: libc::c_int, name: libc::c_int) -> OptFunc {
	OptFunc::Sockopt { level, name }
}

const fn iff(name: &'static str, alias: Option<&'static str>, code: OptCode, phase: Phase, flag: IfFlags) -> OptDesc {
	desc(name, alias, code, Group::INTERFACE, phase, OptType::Bool, OptFunc::Iff(flag))
}

fn set_retry(params: &mut Params, value: &OptValue) {
	if let OptValue::UInt(n) = value {
		params.retry.retry = *n;
	}
}

fn set_forever(params: &mut Params, value: &OptValue) {
	if let OptValue::Bool(b) = value {
		params.retry.forever = *b;
	}
}

fn set_interval(params: &mut Params, value: &OptValue) {
	if let OptValue::Timespec(d) = value {
		params.retry.interval = *d;
	}
}

fn set_shut(params: &mut Params, value: &OptValue, how: HowToEnd) {
	if let OptValue::Bool(true) = value {
		params.how_to_end = Some(how);
	}
}

fn set_shut_none(params: &mut Params, value: &OptValue) {
	set_shut(params, value, HowToEnd::None);
}

fn set_shut_down(params: &mut Params, value: &OptValue) {
	set_shut(params, value, HowToEnd::Shutdown);
}

fn set_shut_close(params: &mut Params, value: &OptValue) {
	set_shut(params, value, HowToEnd::Close);
}

fn set_tight(params: &mut Params, value: &OptValue) {
	if let OptValue::Bool(b) = value {
		params.unix.tight = *b;
	}
}

use Group as G;
use OptCode as C;
use OptType as T;
use Phase as P;

/// Every option the engine knows.
pub static OPTIONS: &[OptDesc] = &[
	// process and retry control
	desc("fork", None, C::Fork, G::CHILD, P::Init, T::Bool, OptFunc::Spec),
	desc("retry", None, C::Retry, G::RETRY, P::Init, T::UInt, OptFunc::Param(set_retry)),
	desc("forever", None, C::Forever, G::RETRY, P::Init, T::Bool, OptFunc::Param(set_forever)),
	desc("interval", Some("intervall"), C::Interval, G::RETRY, P::Init, T::Timespec, OptFunc::Param(set_interval)),
	desc("shut-none", None, C::ShutNone, G::FD, P::Init, T::Bool, OptFunc::Param(set_shut_none)),
	desc("shut-down", None, C::ShutDown, G::FD, P::Init, T::Bool, OptFunc::Param(set_shut_down)),
	desc("shut-close", None, C::ShutClose, G::FD, P::Init, T::Bool, OptFunc::Param(set_shut_close)),

	// socket shape
	desc("protocol-family", Some("pf"), C::ProtocolFamily, G::SOCKET, P::Init, T::Str, OptFunc::Spec),
	desc("so-type", Some("type"), C::SoType, G::SOCKET, P::Init, T::Int, OptFunc::Spec),
	desc("so-prototype", Some("prototype"), C::SoPrototype, G::SOCKET, P::Init, T::Int, OptFunc::Spec),
	desc("bind", None, C::Bind, G::SOCKET, P::Bind, T::Str, OptFunc::Spec),
	desc("backlog", None, C::Backlog, G::LISTEN, P::PastBind, T::Int, OptFunc::Spec),

	// named sockets
	desc("unix-tightsocklen", Some("tightsocklen"), C::UnixTightSockLen, G::SOCK_UNIX, P::PreBind, T::Bool, OptFunc::Param(set_tight)),
	desc("unlink-early", None, C::UnlinkEarly, G::NAMED, P::Early, T::Bool, OptFunc::Spec),
	desc("unlink-close", None, C::UnlinkClose, G::NAMED, P::Early, T::Bool, OptFunc::Spec),

	// ip application
	desc("sourceport", Some("sp"), C::SourcePort, G::IPAPP, P::Late, T::Bytes2, OptFunc::Spec),
	desc("lowport", None, C::LowPort, G::IPAPP, P::Late, T::Bool, OptFunc::Spec),

	// socket level
	desc("so-reuseaddr", Some("reuseaddr"), C::SoReuseAddr, G::SOCKET, P::Fd, T::Bool, sockopt(libc::SOL_SOCKET, libc::SO_REUSEADDR)),
	desc("so-reuseport", Some("reuseport"), C::SoReusePort, G::SOCKET, P::Fd, T::Bool, sockopt(libc::SOL_SOCKET, libc::SO_REUSEPORT)),
	desc("so-keepalive", Some("keepalive"), C::SoKeepAlive, G::SOCKET, P::Fd, T::Bool, sockopt(libc::SOL_SOCKET, libc::SO_KEEPALIVE)),
	desc("so-rcvbuf", Some("rcvbuf"), C::SoRcvBuf, G::SOCKET, P::Fd, T::Int, sockopt(libc::SOL_SOCKET, libc::SO_RCVBUF)),
	desc("so-sndbuf", Some("sndbuf"), C::SoSndBuf, G::SOCKET, P::Fd, T::Int, sockopt(libc::SOL_SOCKET, libc::SO_SNDBUF)),
	desc("so-linger", Some("linger"), C::SoLinger, G::SOCKET, P::Fd, T::Int, OptFunc::Linger),
	desc("so-bindtodevice", Some("if"), C::SoBindToDevice, G::SOCKET, P::PreBind, T::Str, OptFunc::BindToDevice),

	// tcp
	desc("tcp-nodelay", Some("nodelay"), C::TcpNoDelay, G::TCP, P::Fd, T::Bool, sockopt(libc::IPPROTO_TCP, libc::TCP_NODELAY)),
	desc("tcp-keepidle", Some("keepidle"), C::TcpKeepIdle, G::TCP, P::Fd, T::Int, sockopt(libc::IPPROTO_TCP, libc::TCP_KEEPIDLE)),
	desc("tcp-keepintvl", Some("keepintvl"), C::TcpKeepIntvl, G::TCP, P::Fd, T::Int, sockopt(libc::IPPROTO_TCP, libc::TCP_KEEPINTVL)),
	desc("tcp-keepcnt", Some("keepcnt"), C::TcpKeepCnt, G::TCP, P::Fd, T::Int, sockopt(libc::IPPROTO_TCP, libc::TCP_KEEPCNT)),

	// descriptor flags
	desc("nonblock", Some("o-nonblock"), C::NonBlock, G::FD, P::Late, T::Bool, OptFunc::StatusFlag(libc::O_NONBLOCK)),
	desc("cloexec", None, C::CloExec, G::FD, P::Late, T::Bool, OptFunc::DescriptorFlag(libc::FD_CLOEXEC)),

	// interface flags
	iff("iff-up", Some("up"), C::IffUp, P::Init, IfFlags::UP),
	iff("iff-broadcast", None, C::IffBroadcast, P::Fd, IfFlags::BROADCAST),
	iff("iff-debug", None, C::IffDebug, P::Fd, IfFlags::DEBUG),
	iff("iff-loopback", Some("loopback"), C::IffLoopback, P::Fd, IfFlags::LOOPBACK),
	iff("iff-pointopoint", Some("pointopoint"), C::IffPointopoint, P::Fd, IfFlags::POINTOPOINT),
	iff("iff-notrailers", Some("notrailers"), C::IffNoTrailers, P::Fd, IfFlags::NOTRAILERS),
	iff("iff-running", Some("running"), C::IffRunning, P::Fd, IfFlags::RUNNING),
	iff("iff-noarp", Some("noarp"), C::IffNoArp, P::Fd, IfFlags::NOARP),
	iff("iff-promisc", Some("promisc"), C::IffPromisc, P::Fd, IfFlags::PROMISC),
	iff("iff-allmulti", Some("allmulti"), C::IffAllMulti, P::Fd, IfFlags::ALLMULTI),
	iff("iff-master", Some("master"), C::IffMaster, P::Fd, IfFlags::MASTER),
	iff("iff-slave", Some("slave"), C::IffSlave, P::Fd, IfFlags::SLAVE),
	iff("iff-multicast", None, C::IffMulticast, P::Fd, IfFlags::MULTICAST),
	iff("iff-portsel", Some("portsel"), C::IffPortSel, P::Fd, IfFlags::PORTSEL),
	iff("iff-automedia", Some("automedia"), C::IffAutoMedia, P::Fd, IfFlags::AUTOMEDIA),
];

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn names_and_aliases_are_unique() {
		let mut seen = std::collections::HashSet::new();
		for desc in OPTIONS {
			assert!(seen.insert(desc.name), "duplicate {}", desc.name);
			if let Some(alias) = desc.alias {
				assert!(seen.insert(alias), "duplicate {}", alias);
			}
		}
	}

	#[test]
	fn lookup_by_alias_ignores_case() {
		assert_eq!(lookup("TightSockLen").map(|d| d.code), Some(OptCode::UnixTightSockLen));
		assert_eq!(lookup("intervall").map(|d| d.code), Some(OptCode::Interval));
		assert!(lookup("umask").is_none());
	}

	#[test]
	fn spec_options_carry_their_declared_phase() {
		let phase = |name| lookup(name).map(|d| d.phase);
		assert_eq!(phase("unix-tightsocklen"), Some(Phase::PreBind));
		assert_eq!(phase("unlink-early"), Some(Phase::Early));
		assert_eq!(phase("unlink-close"), Some(Phase::Early));
		assert_eq!(phase("sourceport"), Some(Phase::Late));
		assert_eq!(phase("lowport"), Some(Phase::Late));
		assert_eq!(phase("iff-up"), Some(Phase::Init));
		assert_eq!(phase("iff-promisc"), Some(Phase::Fd));
	}
}
