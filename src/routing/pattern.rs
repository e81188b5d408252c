use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A route path such as `/api/schools/:id/classrooms`.
///
/// Segments starting with `:` bind whatever single segment sits in that
/// position; everything else must match literally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

impl PathPattern {
    pub fn parse(raw: &str) -> Self {
        let segments = split(raw)
            .map(|part| match part.strip_prefix(':') {
                Some(name) if !name.is_empty() => Segment::Param(name.to_string()),
                _ => Segment::Literal(part.to_string()),
            })
            .collect();
        Self {
            raw: raw.to_string(),
            segments,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Parameter names, in path order.
    pub fn params(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Bound parameters when `path` matches.
    pub fn matches(&self, path: &str) -> Option<Map<String, Value>> {
        let parts: Vec<&str> = split(path).collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = Map::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), Value::String(part.to_string()));
                }
            }
        }
        Some(params)
    }

    /// True when both patterns match exactly the same paths, whatever
    /// their parameters are called.
    pub fn same_shape(&self, other: &PathPattern) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|pair| match pair {
                    (Segment::Literal(a), Segment::Literal(b)) => a == b,
                    (Segment::Param(_), Segment::Param(_)) => true,
                    _ => false,
                })
    }
}

impl std::fmt::Display for PathPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_binds_params() {
        let pattern = PathPattern::parse("/api/schools/:parentId/classrooms");
        let params = pattern.matches("/api/schools/abc123/classrooms").unwrap();
        assert_eq!(Value::Object(params), json!({ "parentId": "abc123" }));
        assert_eq!(pattern.params().collect::<Vec<_>>(), vec!["parentId"]);
    }

    #[test]
    fn test_literal_and_length_must_agree() {
        let pattern = PathPattern::parse("/api/students/:id");
        assert!(pattern.matches("/api/students/search").is_some());
        assert!(pattern.matches("/api/students").is_none());
        assert!(pattern.matches("/api/students/1/timeline").is_none());
        assert!(pattern.matches("/api/schools/1").is_none());
        assert!(pattern.matches("/api/students/1/").is_some());
    }

    #[test]
    fn test_same_shape_ignores_param_names() {
        let a = PathPattern::parse("/api/schools/:id/classrooms");
        let b = PathPattern::parse("/api/schools/:parentId/classrooms");
        let c = PathPattern::parse("/api/schools/stats/classrooms");
        assert!(a.same_shape(&b));
        assert!(!a.same_shape(&c));
    }
}
