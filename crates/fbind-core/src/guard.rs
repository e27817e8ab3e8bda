#![forbid(unsafe_code)]

//! Containment for host-supplied logic.
//!
//! Filter predicates, identity predicates, and payload producers come from
//! the host application. A panic inside one of them must not leave a
//! collection half-updated, so call sites run them through [`guarded`],
//! which logs the fault and substitutes a safe fallback.

use std::panic::{AssertUnwindSafe, catch_unwind};

/// Run `f`, returning `fallback` (and logging at `warn`) if it panics.
///
/// `label` names the host hook in the log event, e.g. `"filter"` or
/// `"same_identity"`.
pub fn guarded<R>(label: &'static str, fallback: R, f: impl FnOnce() -> R) -> R {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_owned());
            tracing::warn!(hook = label, panic = %message, "host callback panicked; using fallback");
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_value_through() {
        assert!(guarded("test", false, || true));
    }

    #[test]
    fn panic_yields_fallback() {
        let value: bool = guarded("test", false, || panic!("host bug"));
        assert!(!value);
    }

    #[test]
    fn string_panic_yields_fallback() {
        let value = guarded("test", 7, || -> i32 { panic!("{}", String::from("dyn")) });
        assert_eq!(value, 7);
    }
}
