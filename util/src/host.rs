//! Host platform utility functions

use std::env;
use std::path::PathBuf;

/// Environment variable holding the root directory of the software, under which the `params` and
/// `sessions` directories are found.
pub const SW_ROOT_ENV_VAR: &str = "RL_TRAJ_SW_ROOT";

/// Get the software root directory from the environment.
pub fn get_sw_root() -> Result<PathBuf, env::VarError> {
    env::var(SW_ROOT_ENV_VAR).map(PathBuf::from)
}

/// Get a short description of the host, in the form `<os>-<arch> (<hostname>)`.
pub fn get_host_desc() -> String {
    let hostname = env::var("HOSTNAME").unwrap_or_else(|_| String::from("unknown"));

    format!("{}-{} ({})", env::consts::OS, env::consts::ARCH, hostname)
}
