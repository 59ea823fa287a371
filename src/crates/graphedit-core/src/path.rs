//! Dot-separated document paths
//!
//! A path addresses one location inside a JSON document. Whether a segment
//! is an object key or an array index is decided by the value it traverses,
//! so `"handles.left.points.2"` reads naturally for both shapes.

use crate::ProtocolError;

/// A parsed instruction path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    segments: Vec<String>,
}

impl Path {
    /// Parse a dot-separated path
    ///
    /// Fails with [`ProtocolError::InvalidPath`] on an empty path or an
    /// empty segment (`"a..b"`).
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        if raw.is_empty() {
            return Err(ProtocolError::InvalidPath("<empty>".to_string()));
        }
        let segments: Vec<String> = raw.split('.').map(str::to_string).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(ProtocolError::InvalidPath(raw.to_string()));
        }
        Ok(Self { segments })
    }

    /// Path segments in order
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The final segment (the key or index the operation lands on)
    pub fn leaf(&self) -> &str {
        self.segments
            .last()
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Segments up to (excluding) the leaf
    pub fn parent_segments(&self) -> &[String] {
        &self.segments[..self.segments.len() - 1]
    }

    /// Interpret a segment as an array index
    pub fn as_index(segment: &str) -> Option<usize> {
        segment.parse::<usize>().ok()
    }

    /// Render the dotted form of a segment prefix
    pub fn join(segments: &[String]) -> String {
        segments.join(".")
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let path = Path::parse("position.x").unwrap();
        assert_eq!(path.segments(), &["position", "x"]);
        assert_eq!(path.leaf(), "x");
        assert_eq!(path.parent_segments(), &["position"]);
    }

    #[test]
    fn test_parse_single_segment() {
        let path = Path::parse("label").unwrap();
        assert_eq!(path.leaf(), "label");
        assert!(path.parent_segments().is_empty());
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(Path::parse("").is_err());
        assert!(Path::parse("a..b").is_err());
        assert!(Path::parse(".a").is_err());
        assert!(Path::parse("a.").is_err());
    }

    #[test]
    fn test_numeric_segment_as_index() {
        let path = Path::parse("points.2.x").unwrap();
        assert_eq!(Path::as_index(&path.segments()[1]), Some(2));
        assert_eq!(Path::as_index("x"), None);
    }

    #[test]
    fn test_display_round_trip() {
        let raw = "handles.left.points.0";
        assert_eq!(Path::parse(raw).unwrap().to_string(), raw);
    }
}
