use std::net::SocketAddr;

use figment::{
    providers::Env,
    Figment,
};
use serde::{
    Deserialize,
    Serialize,
};

/// The single config for creating a bidhall service.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The socket address the HTTP/WebSocket gateway listens on.
    pub api_listen_addr: SocketAddr,
    /// Path to the grouped catalog JSON file. Empty selects the built-in
    /// demo catalog.
    pub catalog_path: String,
    /// Log level for the service.
    pub log: String,
    /// Forces human readable log formatting even when not attached to a tty.
    pub force_stdout: bool,
}

impl Config {
    const PREFIX: &'static str = "BIDHALL_";

    /// Reads the config from `BIDHALL_*` environment variables.
    ///
    /// # Errors
    /// Returns an error if a variable is missing, malformed, or unknown.
    pub fn get() -> Result<Self, figment::Error> {
        Self::get_with_prefix(Self::PREFIX)
    }

    fn get_with_prefix(prefix: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Env::prefixed("RUST_").split("_").only(&["log"]))
            .merge(Env::prefixed(prefix))
            .extract()
    }
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::Config;

    const EXAMPLE_ENV: &str = include_str!("../local.env.example");

    fn populate_environment_from_example(jail: &mut Jail, test_envar_prefix: &str) {
        for line in EXAMPLE_ENV.lines() {
            if let Some((key, val)) = line.trim().split_once('=') {
                jail.set_env(format!("{test_envar_prefix}_{key}"), val);
            }
        }
    }

    #[test]
    fn example_env_config_is_up_to_date() {
        Jail::expect_with(|jail| {
            populate_environment_from_example(jail, "TESTTEST");
            let prefix = format!("TESTTEST_{}", Config::PREFIX);
            Config::get_with_prefix(&prefix).unwrap();
            Ok(())
        });
    }

    #[test]
    #[should_panic]
    fn config_rejects_unknown_vars() {
        Jail::expect_with(|jail| {
            populate_environment_from_example(jail, "TESTTEST");
            let prefix = format!("TESTTEST_{}", Config::PREFIX);
            jail.set_env(format!("{prefix}FOOBAR"), "BAZ");
            Config::get_with_prefix(&prefix).unwrap();
            Ok(())
        });
    }
}
