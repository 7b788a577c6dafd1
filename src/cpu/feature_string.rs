//! Canonical feature string
//!
//! `[<uarch>,]rv64<letters>[_<ext>]*`, tokens in registry order. Pure: the
//! same set always renders the same string.

use super::extension::ExtensionSet;

/// Fixed base tag every feature string carries
pub const BASE_TAG: &str = "rv64";

pub fn render_feature_string(uarch: Option<&str>, enabled: ExtensionSet) -> String {
    let mut out = String::with_capacity(64);
    if let Some(uarch) = uarch.filter(|u| !u.is_empty()) {
        out.push_str(uarch);
        out.push(',');
    }
    out.push_str(BASE_TAG);
    for token in enabled.iter().filter_map(|id| id.info().display_token()) {
        out.push_str(&token);
    }
    out
}
