use std::env;

fn main() {
	let out_dir = env::var("OUT_DIR").unwrap();
	// The profile directory name sits a few levels up from OUT_DIR
	// (target/<profile>/build/<pkg>/out).
	let profile_name = out_dir
		.split(std::path::MAIN_SEPARATOR)
		.nth_back(3)
		.unwrap();
	println!(
		"cargo:rustc-env=LOCKGATE_BUILD_RUSTC_VERSION={}",
		rustc_version::version().unwrap()
	);
	println!("cargo:rustc-env=LOCKGATE_BUILD_PROFILE_NAME={profile_name}");
	println!(
		"cargo:rustc-env=LOCKGATE_BUILD_TARGET={}",
		env::var("TARGET").unwrap()
	);
	println!("cargo:rerun-if-env-changed=VERSION");
}
