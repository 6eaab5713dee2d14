pub mod socket;
pub mod opts;
mod addr;
mod config;
mod endpoint;
mod engine;
mod error;
mod lifecycle;
mod openers;
mod process;
mod registry;
mod resolve;

pub use self::error::{ConfigError, ErrorClass, OpenError, OptionFault, SocketError, errno};
pub use self::addr::{Family, LinkAddr, RawSockAddr, SockAddr, SocketAddrV4, SocketAddrV6, UnixAddr,
					 build_unix_address, UNIX_PATH_MAX};
pub use self::config::{ConfigValue, XioConfig};
pub use self::endpoint::{Direction, Endpoint, HowToEnd, InterfaceParams, OpenState, Params, RetryPolicy,
						 TransferMode, UnixParams};
pub use self::engine::{Dialer, OpenContext, SysDialer};
pub use self::lifecycle::{Cleanup, ensure_absent, unlink_early};
pub use self::opts::{Group, Opt, OptCode, OptDesc, OptSet, OptType, OptValue, Phase};
pub use self::process::{ChildHandle, ForkSpawner, Spawned, Spawner};
pub use self::registry::{ADDRESSES, AddrDesc, Directions, OpenFn, lookup, open, open_with};
pub use self::resolve::{LocalSpec, Resolver, SystemResolver, resolve_local, resolve_remote, split_host_port,
						with_source_port};
pub use self::socket::{SockType, Socket};
