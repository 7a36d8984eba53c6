use std::fmt;
use std::fmt::{Display, Formatter};

const BUILD_RUST_VERSION: &str = env!("LOCKGATE_BUILD_RUSTC_VERSION");
const BUILD_RUST_PROFILE: &str = env!("LOCKGATE_BUILD_PROFILE_NAME");
const BUILD_TARGET: &str = env!("LOCKGATE_BUILD_TARGET");

#[derive(serde::Serialize, Clone, Debug, Default)]
pub struct BuildInfo {
	pub version: &'static str,
	pub rust_version: &'static str,
	pub build_profile: &'static str,
	pub build_target: &'static str,
}

impl BuildInfo {
	pub fn new() -> Self {
		BuildInfo {
			version: option_env!("VERSION").unwrap_or(env!("CARGO_PKG_VERSION")),
			rust_version: BUILD_RUST_VERSION,
			build_profile: BUILD_RUST_PROFILE,
			build_target: BUILD_TARGET,
		}
	}
}

impl Display for BuildInfo {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"version.BuildInfo{{Version:\"{}\", RustVersion:\"{}\", BuildProfile:\"{}\", BuildTarget:\"{}\"}}",
			self.version, self.rust_version, self.build_profile, self.build_target
		)
	}
}
