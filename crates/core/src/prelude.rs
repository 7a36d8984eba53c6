pub use std::fmt::{Debug, Display};
pub use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
pub use std::sync::Arc;
pub use std::time::{Duration, Instant};

pub use anyhow::Context as _;
pub use tracing::{Instrument, debug, error, info, trace, warn};
