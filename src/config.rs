//! Process-wide tunables read from the environment.
//!
//! | Variable | Type | Default |
//! |----------|------|---------|
//! | `EVENTIDE_MAX_LISTENER_STACK_DEPTH` | `usize` | `8` |
//! | `EVENTIDE_MAX_PENDING_TASKS` | `usize` | unbounded |
//!
//! Each variable is read once, on first use. Values that fail to parse are
//! ignored with a warning.

use std::str::FromStr;
use std::sync::OnceLock;

/// Environment variable bounding nested listener notification.
pub const ENV_MAX_LISTENER_STACK_DEPTH: &str = "EVENTIDE_MAX_LISTENER_STACK_DEPTH";
/// Environment variable bounding each executor's task queue.
pub const ENV_MAX_PENDING_TASKS: &str = "EVENTIDE_MAX_PENDING_TASKS";

const DEFAULT_MAX_LISTENER_STACK_DEPTH: usize = 8;

/// How deep listener notification may recurse on one thread before it is
/// handed back to the executor.
pub fn max_listener_stack_depth() -> usize {
    static DEPTH: OnceLock<usize> = OnceLock::new();

    *DEPTH.get_or_init(|| {
        read_env(ENV_MAX_LISTENER_STACK_DEPTH).unwrap_or(DEFAULT_MAX_LISTENER_STACK_DEPTH)
    })
}

/// Default bound for executor task queues, `None` for unbounded.
pub fn default_max_pending_tasks() -> Option<usize> {
    static MAX: OnceLock<Option<usize>> = OnceLock::new();

    *MAX.get_or_init(|| read_env::<usize>(ENV_MAX_PENDING_TASKS).filter(|&n| n > 0))
}

fn read_env<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;

    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_variable_reads_as_none() {
        assert_eq!(read_env::<usize>("EVENTIDE_TEST_SURELY_UNSET_VARIABLE"), None);
    }
}
