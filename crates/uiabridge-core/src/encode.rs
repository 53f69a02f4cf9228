//! URI-component encoding for payloads the controller decodes as text.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Characters escaped by ECMAScript `encodeURIComponent`: everything except
/// ASCII alphanumerics and `- _ . ! ~ * ' ( )`.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Percent-encodes `text` as a URI component.
pub fn uri_component(text: &str) -> String {
    utf8_percent_encode(text, URI_COMPONENT).to_string()
}

/// Serializes `value` to JSON and percent-encodes the result.
pub fn json_component<T: serde::Serialize + ?Sized>(value: &T) -> String {
    // Serializing plain data structures to a String cannot fail.
    let json = serde_json::to_string(value).unwrap_or_default();
    uri_component(&json)
}
