mod autofill;
pub mod catalog;
mod consts;
pub mod ead;
pub mod error;
pub mod models;
mod template;
pub mod xml;

use std::borrow::Cow;

pub use crate::autofill::AutoFill;
pub use crate::catalog::{Builtins, Catalog, MemoryCatalog};
pub use crate::template::{MetadataTemplate, data};

/// Converts `\r\n` and lone `\r` to `\n`, so that documents edited on
/// different platforms compare equal.
pub fn normalize_line_endings(text: &str) -> Cow<'_, str> {
    if text.contains('\r') {
        Cow::Owned(text.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("a\nb", "a\nb")]
    #[case("a\r\nb\r\n", "a\nb\n")]
    #[case("a\rb", "a\nb")]
    fn test_normalize_line_endings(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_line_endings(input), expected);
    }
}
