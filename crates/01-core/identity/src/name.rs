//! Display helpers over reflected type names.

use crate::TypeIdentity;

const DELIMITERS: &[char] = &['<', '>', ',', ' ', '(', ')', '[', ']', '&', ';', '*'];

/// Strips module paths from every path segment of a reflected type name.
///
/// `alloc::vec::Vec<app::Frame>` becomes `Vec<Frame>`; tuples, slices and
/// references keep their punctuation.
pub fn short_name(full: &str) -> String {
    let mut out = String::with_capacity(full.len());
    let mut token = String::new();
    for ch in full.chars() {
        if DELIMITERS.contains(&ch) {
            out.push_str(last_segment(&token));
            token.clear();
            out.push(ch);
        } else {
            token.push(ch);
        }
    }
    out.push_str(last_segment(&token));
    out
}

fn last_segment(path: &str) -> &str {
    path.rsplit("::").next().unwrap_or(path)
}

/// Formats the `"ClassName.FieldName"` key used to address a configurable field.
pub fn field_name(class: TypeIdentity, field: TypeIdentity) -> String {
    format!("{}.{}", class.short_name(), field.short_name())
}
