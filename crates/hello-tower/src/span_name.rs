//! Span naming policy.

use serde::{Deserialize, Serialize};

/// Name used by [`SpanNameMode::Constant`].
pub const CONSTANT_SPAN_NAME: &str = "http.request";

/// How server spans are named.
///
/// Selected once at startup and evaluated once per request. Modes that use
/// the route template fall back to the raw path when no route matched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanNameMode {
    /// Always [`CONSTANT_SPAN_NAME`]. Keeps span-name cardinality at one.
    #[default]
    Constant,
    /// The request method, e.g. `GET`.
    Method,
    /// The route template, e.g. `/users/{id}`.
    Route,
    /// The raw request path.
    Path,
    /// Method and route template, e.g. `GET /users/{id}`.
    MethodRoute,
    /// Method and raw path, e.g. `GET /users/42`.
    MethodPath,
}

impl SpanNameMode {
    /// Computes the span name for a request.
    pub fn span_name(self, method: &str, route: Option<&str>, path: &str) -> String {
        let route = route.filter(|r| !r.is_empty()).unwrap_or(path);
        match self {
            Self::Constant => CONSTANT_SPAN_NAME.to_string(),
            Self::Method => method.to_string(),
            Self::Route => route.to_string(),
            Self::Path => path.to_string(),
            Self::MethodRoute => format!("{method} {route}"),
            Self::MethodPath => format!("{method} {path}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_mode() {
        let route = Some("/users/{id}");
        let cases = [
            (SpanNameMode::Constant, "http.request"),
            (SpanNameMode::Method, "GET"),
            (SpanNameMode::Route, "/users/{id}"),
            (SpanNameMode::Path, "/users/42"),
            (SpanNameMode::MethodRoute, "GET /users/{id}"),
            (SpanNameMode::MethodPath, "GET /users/42"),
        ];

        for (mode, expected) in cases {
            assert_eq!(mode.span_name("GET", route, "/users/42"), expected, "{mode:?}");
        }
    }

    #[test]
    fn test_route_falls_back_to_path() {
        assert_eq!(SpanNameMode::Route.span_name("GET", None, "/nope"), "/nope");
        assert_eq!(
            SpanNameMode::MethodRoute.span_name("POST", Some(""), "/nope"),
            "POST /nope"
        );
    }

    #[test]
    fn test_serde_names() {
        let mode: SpanNameMode = serde_json::from_str(r#""method_route""#).unwrap();
        assert_eq!(mode, SpanNameMode::MethodRoute);

        assert!(serde_json::from_str::<SpanNameMode>(r#""verbose""#).is_err());
    }
}
