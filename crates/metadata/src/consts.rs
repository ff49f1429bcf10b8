use regex::Regex;
use std::sync::LazyLock;

macro_rules! regex {
    ($name:ident, $regex:expr) => {
        pub(crate) static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($regex).unwrap());
    };
}

// Field markers are template comments, so they never produce output:
// {# field name="title" label="Title" xpath="/*:dc/*:title" #}
regex!(FIELD_MARKER_REGEX, r"(?s)\{#-?\s*field\s(.*?)-?#\}");
regex!(MARKER_ATTRIBUTE_REGEX, r#"([A-Za-z_][\w-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#);

/// Field type used when a marker does not specify one.
pub(crate) const DEFAULT_FIELD_TYPE: &str = "text";
/// Display name for the `language` generator when none is configured.
pub(crate) const DEFAULT_LANGUAGE: &str = "English";
