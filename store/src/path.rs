use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::borrow::Borrow;
use std::iter::FromIterator;

/// A single step into a JSON document: an object key or an array index.
#[derive(Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Segment {
    /// Array index.
    Index(usize),
    /// Object key.
    Field(String),
}

impl Segment {
    /// Returns the object key.
    pub fn field(&self) -> Option<&str> {
        if let Segment::Field(s) = self {
            Some(s.as_str())
        } else {
            None
        }
    }

    /// Returns the array index.
    pub fn index(&self) -> Option<usize> {
        if let Segment::Index(ix) = self {
            Some(*ix)
        } else {
            None
        }
    }
}

impl From<&str> for Segment {
    fn from(s: &str) -> Self {
        Segment::Field(s.to_string())
    }
}

impl From<String> for Segment {
    fn from(s: String) -> Self {
        Segment::Field(s)
    }
}

impl From<usize> for Segment {
    fn from(ix: usize) -> Self {
        Segment::Index(ix)
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Field(s) => write!(f, "{}", s),
            Self::Index(ix) => write!(f, "{}", ix),
        }
    }
}

/// An owned sequence of segments addressing a sub-value of a JSON document.
///
/// The wire form is a JSON array of strings and numbers.
#[derive(Clone, Default, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathBuf(SmallVec<[Segment; 4]>);

impl PathBuf {
    /// Creates an empty path addressing the document root.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a [`Segment`].
    pub fn push(&mut self, segment: Segment) {
        self.0.push(segment);
    }

    /// Appends an object key segment.
    pub fn field(&mut self, key: &str) {
        self.push(Segment::Field(key.to_string()));
    }

    /// Appends an array index segment.
    pub fn index(&mut self, ix: usize) {
        self.push(Segment::Index(ix));
    }

    /// Removes the last segment.
    pub fn pop(&mut self) {
        self.0.pop();
    }

    /// Returns a borrowed path.
    pub fn as_path(&self) -> Path<'_> {
        Path(&self.0)
    }

    /// Returns true if the path addresses the document root.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Extends the buffer with the segments of a path.
    pub fn extend(&mut self, path: Path) {
        self.0.extend(path.as_slice().iter().cloned());
    }

    /// Returns a new path with `path` appended.
    pub fn join(&self, path: Path) -> PathBuf {
        let mut joined = self.clone();
        joined.extend(path);
        joined
    }
}

impl Borrow<[Segment]> for PathBuf {
    fn borrow(&self) -> &[Segment] {
        &self.0
    }
}

impl AsRef<[Segment]> for PathBuf {
    fn as_ref(&self) -> &[Segment] {
        &self.0
    }
}

impl FromIterator<Segment> for PathBuf {
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = Segment>,
    {
        Self(iter.into_iter().collect())
    }
}

impl From<Vec<Segment>> for PathBuf {
    fn from(segments: Vec<Segment>) -> Self {
        Self(segments.into_iter().collect())
    }
}

impl std::fmt::Debug for PathBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.as_path().fmt(f)
    }
}

impl std::fmt::Display for PathBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.as_path().fmt(f)
    }
}

/// Builds a [`PathBuf`] from segment literals.
///
/// ```
/// use weft_store::path;
/// let p = path!["profile", "name"];
/// assert_eq!(p.len(), 2);
/// ```
#[macro_export]
macro_rules! path {
    () => { $crate::PathBuf::new() };
    ($($segment:expr),+ $(,)?) => {{
        let mut p = $crate::PathBuf::new();
        $(p.push($crate::Segment::from($segment));)+
        p
    }};
}

/// A borrowed sequence of segments.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Path<'a>(&'a [Segment]);

impl<'a> Path<'a> {
    /// Creates a new path from a segment slice.
    pub fn new(segments: &'a [Segment]) -> Self {
        Self(segments)
    }

    /// Returns true if the path contains no segments.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the path is a (non-strict) prefix of `other`.
    pub fn is_ancestor(&self, other: Path) -> bool {
        other.0.starts_with(self.0)
    }

    /// Returns an owned `PathBuf`.
    pub fn to_owned(&self) -> PathBuf {
        PathBuf(self.0.iter().cloned().collect())
    }

    /// Returns the first segment.
    pub fn first(&self) -> Option<&'a Segment> {
        self.0.first()
    }

    /// Returns the last segment.
    pub fn last(&self) -> Option<&'a Segment> {
        self.0.last()
    }

    /// Returns the path without the first segment.
    pub fn child(&self) -> Option<Path<'a>> {
        self.0.split_first().map(|(_, rest)| Path(rest))
    }

    /// Returns the path without the last segment.
    pub fn parent(&self) -> Option<Path<'a>> {
        self.0.split_last().map(|(_, rest)| Path(rest))
    }

    /// Returns the first segment and the path without the first segment.
    pub fn split_first(&self) -> Option<(&'a Segment, Path<'a>)> {
        self.0.split_first().map(|(seg, rest)| (seg, Path(rest)))
    }

    /// Returns the last segment and the path without the last segment.
    pub fn split_last(&self) -> Option<(Path<'a>, &'a Segment)> {
        self.0.split_last().map(|(seg, rest)| (Path(rest), seg))
    }

    /// Returns a path that, when joined onto `base`, yields `self`.
    pub fn strip_prefix(&self, base: Path) -> Option<Path<'a>> {
        if base.is_ancestor(*self) {
            Some(Path(&self.0[base.len()..]))
        } else {
            None
        }
    }

    /// Returns the underlying segment slice.
    pub fn as_slice(&self) -> &'a [Segment] {
        self.0
    }
}

impl<'a> IntoIterator for Path<'a> {
    type IntoIter = std::slice::Iter<'a, Segment>;
    type Item = &'a Segment;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<'a> std::fmt::Debug for Path<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for (ix, segment) in self.0.iter().enumerate() {
            if ix > 0 {
                write!(f, ".")?;
            }
            write!(f, "{:?}", segment)?;
        }
        Ok(())
    }
}

impl<'a> std::fmt::Display for Path<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iter() {
        let p = path!["a", 42, "b"];
        let mut iter = p.as_path().into_iter();
        for expected in [
            Segment::Field("a".to_string()),
            Segment::Index(42),
            Segment::Field("b".to_string()),
        ] {
            assert_eq!(iter.next().unwrap(), &expected);
        }
        assert!(iter.next().is_none());
    }

    #[test]
    fn ancestors() {
        let root = path![];
        let profile = path!["profile"];
        let name = path!["profile", "name"];
        let theme = path!["settings", "theme"];
        assert!(root.as_path().is_ancestor(name.as_path()));
        assert!(profile.as_path().is_ancestor(name.as_path()));
        assert!(profile.as_path().is_ancestor(profile.as_path()));
        assert!(!name.as_path().is_ancestor(profile.as_path()));
        assert!(!profile.as_path().is_ancestor(theme.as_path()));
    }

    #[test]
    fn strip_prefix() {
        let p = path!["a", 42, "b", 43, "c"];
        let base = path!["a", 42];
        let relative = p.as_path().strip_prefix(base.as_path()).unwrap();
        assert_eq!(relative.to_owned(), path!["b", 43, "c"]);
        assert!(p.as_path().strip_prefix(path!["x"].as_path()).is_none());
    }

    #[test]
    fn wire_form() {
        let p = path!["items", 0, "title"];
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json, serde_json::json!(["items", 0, "title"]));
        let back: PathBuf = serde_json::from_value(json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn display() {
        let p = path!["todos", 0, "title"];
        assert_eq!(p.to_string(), "todos.0.title");
    }
}
