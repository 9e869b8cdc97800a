//! Extracting a creature's identity from the proxy's inbound header.

use fleet_core::Identity;

/// Extract `(creature_name, cost_identity)` from an `x-api-key`-style
/// header value of the form `<prefix>:<name>`. Anything without a colon
/// maps to `"unknown"`. The `creature` prefix collapses to the bare name
/// (matching [`fleet_core::Identity::creature`]); any other prefix keeps
/// it (matching `creator:<name>`).
pub fn extract_identity(header_value: &str) -> (String, Identity) {
    match header_value.split_once(':') {
        Some((prefix, name)) if !name.is_empty() => {
            let identity = if prefix == "creature" {
                Identity::from(name)
            } else {
                Identity::from(header_value)
            };
            (name.to_string(), identity)
        }
        _ => ("unknown".to_string(), Identity::from("unknown")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creature_prefix_collapses_to_bare_name() {
        let (name, identity) = extract_identity("creature:beta");
        assert_eq!(name, "beta");
        assert_eq!(identity.as_str(), "beta");
    }

    #[test]
    fn creator_prefix_keeps_full_identity() {
        let (name, identity) = extract_identity("creator:beta");
        assert_eq!(name, "beta");
        assert_eq!(identity.as_str(), "creator:beta");
    }

    #[test]
    fn missing_colon_is_unknown() {
        let (name, identity) = extract_identity("garbage");
        assert_eq!(name, "unknown");
        assert_eq!(identity.as_str(), "unknown");
    }
}
