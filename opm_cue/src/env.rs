//! Scoped process-environment mutation.

use std::env;

/// REGISTRY_VAR is the environment variable the compiler consults when it
/// cannot resolve an import locally.
pub const REGISTRY_VAR: &str = "CUE_REGISTRY";

/// ScopedEnv sets an environment variable for the lifetime of the guard and
/// restores the previous value on drop, on every exit path.
///
/// Process environment is global state: concurrent loads that need different
/// registries must serialize or run in separate processes.
pub struct ScopedEnv {
    key: &'static str,
    prev: Option<String>,
}

impl ScopedEnv {
    /// Set installs `value` under `key`.
    pub fn set(key: &'static str, value: &str) -> ScopedEnv {
        let prev = env::var(key).ok();
        // SAFETY: the evaluator is single-threaded by contract (its values
        // are not Send); mutation is not racing reads from other threads.
        unsafe { env::set_var(key, value) };
        ScopedEnv { key, prev }
    }

    /// Registry scopes the compiler registry variable.
    pub fn registry(value: &str) -> ScopedEnv {
        ScopedEnv::set(REGISTRY_VAR, value)
    }
}

impl Drop for ScopedEnv {
    fn drop(&mut self) {
        // SAFETY: see `set`.
        unsafe {
            match &self.prev {
                Some(v) => env::set_var(self.key, v),
                None => env::remove_var(self.key),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restores_previous_value() {
        let key = "OPM_CUE_SCOPED_ENV_TEST";
        unsafe { env::set_var(key, "before") };
        {
            let _g = ScopedEnv::set("OPM_CUE_SCOPED_ENV_TEST", "during");
            assert_eq!(env::var(key).unwrap(), "during");
        }
        assert_eq!(env::var(key).unwrap(), "before");
        unsafe { env::remove_var(key) };
    }

    #[test]
    fn removes_when_previously_unset() {
        let key = "OPM_CUE_SCOPED_ENV_TEST_UNSET";
        unsafe { env::remove_var(key) };
        {
            let _g = ScopedEnv::set("OPM_CUE_SCOPED_ENV_TEST_UNSET", "during");
            assert_eq!(env::var(key).unwrap(), "during");
        }
        assert!(env::var(key).is_err());
    }
}
