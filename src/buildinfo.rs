// https://doc.rust-lang.org/cargo/reference/environment-variables.html#environment-variables-cargo-sets-for-crates

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

/// Commit the binary was built from, when the build environment exported
/// `GIT_HASH`.
pub fn git_hash() -> &'static str {
    option_env!("GIT_HASH").unwrap_or("unknown")
}

pub fn version_full() -> String {
    format!("{} {} ({})", name(), version(), git_hash())
}
