//! Model-prefix-driven upstream provider inference.

/// Which upstream a request should route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// The chat-style source upstream (`claude-*` models).
    Source,
    /// The response-style target upstream (`gpt-*`, `o3*`, `o4*` models).
    Target,
}

/// Infer the upstream provider from a bare model name. Unrecognized
/// prefixes default to `Source`.
pub fn infer_provider(model: &str) -> Provider {
    if model.starts_with("claude-") {
        Provider::Source
    } else if model.starts_with("gpt-") || model.starts_with("o3") || model.starts_with("o4") {
        Provider::Target
    } else {
        Provider::Source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_routes_to_source() {
        assert_eq!(infer_provider("claude-3-5-sonnet"), Provider::Source);
    }

    #[test]
    fn gpt_and_o_series_route_to_target() {
        assert_eq!(infer_provider("gpt-4o"), Provider::Target);
        assert_eq!(infer_provider("o3-mini"), Provider::Target);
        assert_eq!(infer_provider("o4-mini"), Provider::Target);
    }

    #[test]
    fn unknown_model_defaults_to_source() {
        assert_eq!(infer_provider("some-other-model"), Provider::Source);
    }
}
