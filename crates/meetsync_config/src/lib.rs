use config::{Config, ConfigError, Environment, File};
use once_cell::sync::OnceCell;
use std::env;
use std::path::Path;
use tracing::debug;

pub mod models;
pub mod secrets;
#[cfg(test)]
mod secrets_test;

pub use models::*;
pub use secrets::{
    decrypt_secret, encrypt_secret, is_encrypted, reveal_secret, SecretError, ENCRYPTED_MARKER,
};

/// Loads the engine configuration from `./config`.
pub fn load_config() -> Result<EngineConfig, ConfigError> {
    load_config_from(Path::new("config"))
}

/// Loads the engine configuration from the given directory.
///
/// Sources, in increasing precedence:
/// 1. `<dir>/default.{toml,yaml,json}`
/// 2. `<dir>/<RUN_ENV>.{toml,yaml,json}` (RUN_ENV defaults to `debug`)
/// 3. environment variables prefixed `MEETSYNC` with `__` as separator,
///    e.g. `MEETSYNC__GOOGLE__CLIENT_SECRET`
pub fn load_config_from(config_dir: &Path) -> Result<EngineConfig, ConfigError> {
    ensure_dotenv_loaded();

    let run_env = env::var("RUN_ENV").unwrap_or_else(|_| "debug".to_string());
    let prefix = env::var("PREFIX").unwrap_or_else(|_| "MEETSYNC".to_string());

    let default_path = config_dir.join("default");
    let env_path = config_dir.join(&run_env);
    debug!(
        "loading config from {} and {}",
        default_path.display(),
        env_path.display()
    );

    let builder = Config::builder()
        .add_source(File::with_name(&default_path.to_string_lossy()).required(false))
        .add_source(File::with_name(&env_path.to_string_lossy()).required(false))
        .add_source(Environment::with_prefix(&prefix).separator("__"));

    builder.build()?.try_deserialize()
}

static INIT_DOTENV: OnceCell<()> = OnceCell::new();

/// Loads the dotenv file once per process and returns the path that was used.
///
/// The path is taken from `DOTENV_OVERRIDE` and defaults to `.env`. A missing
/// file is not an error.
pub fn ensure_dotenv_loaded() -> String {
    let dotenv_path = env::var("DOTENV_OVERRIDE").unwrap_or_else(|_| ".env".to_string());

    INIT_DOTENV.get_or_init(|| {
        dotenv::from_filename(&dotenv_path).ok();
    });

    dotenv_path
}
