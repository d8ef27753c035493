//! Tunable limits. Each can be overridden with an environment variable of
//! the same name, read once on first use.

use std::{
    env,
    fmt::Debug,
    str::FromStr,
    sync::LazyLock,
};

pub fn env_config<T: Debug + FromStr>(name: &str, default: T) -> T
where
    <T as FromStr>::Err: Debug,
{
    let var_s = match env::var(name) {
        Ok(s) => s,
        Err(env::VarError::NotPresent) => return default,
        Err(env::VarError::NotUnicode(..)) => {
            tracing::warn!("Invalid value for {name}, falling back to {default:?}.");
            return default;
        },
    };
    match T::from_str(&var_s) {
        Ok(v) => {
            tracing::info!("Overriding {name} to {v:?} from environment");
            v
        },
        Err(e) => {
            tracing::warn!("Invalid value {var_s} for {name}, falling back to {default:?}: {e:?}");
            default
        },
    }
}

/// `collect()` logs a warning when a query returns more documents than this.
/// Large collects usually want `paginate` or an index range instead.
pub static QUERY_COLLECT_WARN_THRESHOLD: LazyLock<usize> =
    LazyLock::new(|| env_config("QUERY_COLLECT_WARN_THRESHOLD", 4096));

/// Include function arguments in the debug log line for each invocation.
pub static LOG_FUNCTION_ARGUMENTS: LazyLock<bool> =
    LazyLock::new(|| env_config("LOG_FUNCTION_ARGUMENTS", false));
