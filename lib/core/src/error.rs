//! Error handling foundation shared by the brightpath crates.
//!
//! Only the `Result` alias lives here. Each crate keeps its own error
//! enums in its own error module; cross-crate seams (for example the
//! gateway's construction path) return this alias so callers receive a
//! rootcause `Report` carrying the domain error.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
///
/// Each layer adds its own context via `.context()` as errors propagate.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_type_works() {
        let ok: Result<i32> = Ok(42);
        assert_eq!(ok.expect("should be ok"), 42);
    }
}
