//! Output normalisation.
//!
//! Generation models disagree on their output shape: a bare URL, a list of URLs,
//! a list of objects, or a single object. `extract_output_url` reduces all of
//! them to one media URL, first match wins:
//!
//! 1. a usable string is returned as is;
//! 2. for a non-empty list, only element 0 is inspected, as a string or as an object;
//! 3. an object is searched under `url`, then `image`, then `src`.
//!
//! Anything else yields `None`.

use thumbsmith_core::models::OutputPayload;

const URL_KEYS: [&str; 3] = ["url", "image", "src"];

/// A usable URL starts with `http` or is an inline `data:image/` URI.
pub fn is_usable_url(s: &str) -> bool {
    s.starts_with("http") || s.starts_with("data:image/")
}

pub fn extract_output_url(output: Option<&OutputPayload>) -> Option<String> {
    match output? {
        OutputPayload::Text(s) if is_usable_url(s) => Some(s.clone()),
        OutputPayload::Sequence(items) => match items.first()? {
            OutputPayload::Text(s) if is_usable_url(s) => Some(s.clone()),
            OutputPayload::Keyed(_) => from_keyed(&items[0]),
            _ => None,
        },
        keyed @ OutputPayload::Keyed(_) => from_keyed(keyed),
        _ => None,
    }
}

fn from_keyed(payload: &OutputPayload) -> Option<String> {
    let OutputPayload::Keyed(map) = payload else {
        return None;
    };
    URL_KEYS.iter().find_map(|key| match map.get(*key) {
        Some(OutputPayload::Text(s)) if is_usable_url(s) => Some(s.clone()),
        _ => None,
    })
}
