//! Environment variable utilities
//!
//! Typed lookups with defaults, used by the reactor configuration to pick
//! up `IOQ_*` overrides.
//!
//! ```ignore
//! use ioq_core::env::env_get;
//!
//! let slab: usize = env_get("IOQ_SLAB_SIZE", 64);
//! ```

use std::str::FromStr;

/// Environment variable parsed as `T`, or `default` when unset or unparsable.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Environment variable parsed as `T`, if set and parsable.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_get_default() {
        let val: usize = env_get("__IOQ_TEST_UNSET__", 42);
        assert_eq!(val, 42);
        assert!(env_get_opt::<usize>("__IOQ_TEST_UNSET__").is_none());
    }

    #[test]
    fn test_env_get_with_set_var() {
        std::env::set_var("__IOQ_TEST_NUM__", " 123 ");
        let val: usize = env_get("__IOQ_TEST_NUM__", 0);
        assert_eq!(val, 123);
        std::env::remove_var("__IOQ_TEST_NUM__");
    }

    #[test]
    fn test_env_get_invalid_parse() {
        std::env::set_var("__IOQ_TEST_INVALID__", "lots");
        let val: usize = env_get("__IOQ_TEST_INVALID__", 99);
        assert_eq!(val, 99);
        std::env::remove_var("__IOQ_TEST_INVALID__");
    }
}
