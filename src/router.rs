//! Ordered pattern router. The table is built once at startup and is
//! immutable afterwards; matching is a single forward scan, first
//! registered route wins, no backtracking and no precedence beyond
//! registration order. A miss is the caller's "not found", not an error.
//!
//! Generic over the handler payload so the matcher is testable on its own.

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Param(String),
}

struct Route<H> {
    method: String,
    segments: Vec<Segment>,
    handler: H,
}

pub struct PatternRouter<H> {
    routes: Vec<Route<H>>,
}

pub struct RouteMatch<'a, H> {
    pub handler: &'a H,
    pub params: HashMap<String, String>,
}

impl<H> PatternRouter<H> {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Appends a route; `:name` segments capture into params.
    pub fn register(&mut self, method: &str, pattern: &str, handler: H) {
        let segments = split_segments(pattern)
            .map(|s| match s.strip_prefix(':') {
                Some(name) => Segment::Param(name.to_string()),
                None => Segment::Literal(s.to_string()),
            })
            .collect();
        self.routes.push(Route {
            method: method.to_ascii_uppercase(),
            segments,
            handler,
        });
    }

    /// Method must match, segment counts must be equal, literals compare
    /// exactly against the decoded target segment, params capture the
    /// decoded value.
    pub fn find(&self, method: &str, path: &str) -> Option<RouteMatch<'_, H>> {
        let target: Vec<String> = split_segments(path).map(decode).collect();
        'routes: for route in &self.routes {
            if route.method != method || route.segments.len() != target.len() {
                continue;
            }
            let mut params = HashMap::new();
            for (segment, value) in route.segments.iter().zip(&target) {
                match segment {
                    Segment::Param(name) => {
                        params.insert(name.clone(), value.clone());
                    }
                    Segment::Literal(lit) => {
                        if lit != value {
                            continue 'routes;
                        }
                    }
                }
            }
            return Some(RouteMatch {
                handler: &route.handler,
                params,
            });
        }
        None
    }
}

fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.trim_start_matches('/').split('/')
}

fn decode(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// Query string -> decoded key/value map. Valueless keys map to "".
pub fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for pair in query.unwrap_or("").split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        out.insert(decode(key), decode(value));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PatternRouter<&'static str> {
        let mut router = PatternRouter::new();
        router.register("GET", "/api/agents", "list");
        router.register("GET", "/api/agents/:name", "detail");
        router.register("GET", "/api/agents/:name", "shadowed");
        router.register("POST", "/api/agents/:name/park", "park");
        router
    }

    #[test]
    fn literal_match() {
        let router = table();
        let hit = router.find("GET", "/api/agents").unwrap();
        assert_eq!(*hit.handler, "list");
        assert!(hit.params.is_empty());
    }

    #[test]
    fn first_registered_wins() {
        let router = table();
        let hit = router.find("GET", "/api/agents/watcher").unwrap();
        assert_eq!(*hit.handler, "detail");
    }

    #[test]
    fn params_are_decoded() {
        let router = table();
        let hit = router.find("GET", "/api/agents/deep%20thought").unwrap();
        assert_eq!(hit.params["name"], "deep thought");
    }

    #[test]
    fn method_must_match() {
        let router = table();
        assert!(router.find("DELETE", "/api/agents").is_none());
        assert!(router.find("POST", "/api/agents/x/park").is_some());
    }

    #[test]
    fn segment_count_must_match() {
        let router = table();
        assert!(router.find("GET", "/api").is_none());
        assert!(router.find("GET", "/api/agents/a/b").is_none());
    }

    #[test]
    fn literals_are_case_sensitive() {
        let router = table();
        assert!(router.find("GET", "/api/Agents").is_none());
    }

    #[test]
    fn no_route_is_none() {
        let router = table();
        assert!(router.find("GET", "/totally/else").is_none());
    }

    #[test]
    fn query_parsing() {
        let query = parse_query(Some("q=deep%20thought&limit=5&flag"));
        assert_eq!(query["q"], "deep thought");
        assert_eq!(query["limit"], "5");
        assert_eq!(query["flag"], "");
        assert!(parse_query(None).is_empty());
    }
}
