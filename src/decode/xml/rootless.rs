//! Synthetic root wrapping for the legacy dialect
//!
//! Legacy logs are delivered without a document root: the declaration is
//! followed directly by sibling `<Header>`, `<Samples>`, and `<Device>`
//! sections. The parser needs a single root, so one is synthesized around
//! the payload before parsing.

const BOM: &str = "\u{feff}";

/// Wrap a rootless document in a synthetic root element.
///
/// An XML declaration, if present, stays ahead of the inserted root.
pub(crate) fn wrap_rootless(text: &str) -> String {
    let text = text.strip_prefix(BOM).unwrap_or(text);

    let body_start = match text.find("?>") {
        Some(end) if text.trim_start().starts_with("<?") => end + 2,
        _ => 0,
    };
    let (declaration, body) = text.split_at(body_start);

    let mut wrapped = String::with_capacity(text.len() + 13);
    wrapped.push_str(declaration);
    wrapped.push_str("<root>");
    wrapped.push_str(body);
    wrapped.push_str("</root>");
    wrapped
}
