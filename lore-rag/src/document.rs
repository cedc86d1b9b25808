//! Data types for retrieved documents and deduplicated document sets.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Title used when the title index has no entry for a retrieved id.
pub const TITLE_UNAVAILABLE: &str = "title unavailable";

/// A raw hit returned by a [`RetrievalService`](crate::RetrievalService) search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    /// Identifier of the matched document.
    pub id: String,
    /// Distance between the query and the document (lower is closer).
    pub score: f32,
    /// Full text of the document.
    pub content: String,
}

/// One retrieved passage of the lore corpus.
///
/// Identity is the `id` alone: two documents with the same id compare equal and
/// hash identically even when their ratings differ. Use
/// [`same_fields`](Document::same_fields) to compare every attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier (the content slug, e.g. `garen`).
    pub id: String,
    /// Distance to the query rounded to two decimals (lower is more relevant).
    pub rating: f32,
    /// Human-readable title resolved from the title index.
    pub title: String,
    /// The text body.
    pub content: String,
}

impl Document {
    /// Build a document from a search hit and its resolved title.
    pub fn from_hit(hit: SearchHit, title: impl Into<String>) -> Self {
        Self {
            id: hit.id,
            rating: round_rating(hit.score),
            title: title.into(),
            content: hit.content,
        }
    }

    /// Compare every attribute, not just the identity.
    pub fn same_fields(&self, other: &Self) -> bool {
        self.id == other.id
            && self.rating == other.rating
            && self.title == other.title
            && self.content == other.content
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Document {}

impl Hash for Document {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Round a raw distance to two decimal places.
pub fn round_rating(score: f32) -> f32 {
    (score * 100.0).round() / 100.0
}

/// An insertion-ordered set of [`Document`]s keyed by identity.
///
/// The first instance inserted for an id is kept; later duplicates are
/// discarded without merging their ratings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Document>", into = "Vec<Document>")]
pub struct DocumentSet {
    documents: Vec<Document>,
    seen: HashSet<String>,
}

impl DocumentSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a document. Returns `false` if its id was already present.
    pub fn insert(&mut self, document: Document) -> bool {
        if !self.seen.insert(document.id.clone()) {
            return false;
        }
        self.documents.push(document);
        true
    }

    /// Look up a document by id.
    pub fn get(&self, id: &str) -> Option<&Document> {
        self.documents.iter().find(|d| d.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Document> {
        self.documents.iter()
    }

    /// Documents ordered best match first (ascending rating), ties in insertion order.
    pub fn best_first(&self) -> Vec<&Document> {
        let mut ranked: Vec<&Document> = self.documents.iter().collect();
        ranked.sort_by(|a, b| a.rating.total_cmp(&b.rating));
        ranked
    }

    pub fn into_vec(self) -> Vec<Document> {
        self.documents
    }
}

impl Extend<Document> for DocumentSet {
    fn extend<I: IntoIterator<Item = Document>>(&mut self, iter: I) {
        for document in iter {
            self.insert(document);
        }
    }
}

impl FromIterator<Document> for DocumentSet {
    fn from_iter<I: IntoIterator<Item = Document>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl From<Vec<Document>> for DocumentSet {
    fn from(documents: Vec<Document>) -> Self {
        documents.into_iter().collect()
    }
}

impl From<DocumentSet> for Vec<Document> {
    fn from(set: DocumentSet) -> Self {
        set.documents
    }
}

impl<'a> IntoIterator for &'a DocumentSet {
    type Item = &'a Document;
    type IntoIter = std::slice::Iter<'a, Document>;

    fn into_iter(self) -> Self::IntoIter {
        self.documents.iter()
    }
}

impl PartialEq for DocumentSet {
    fn eq(&self, other: &Self) -> bool {
        self.documents == other.documents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, rating: f32) -> Document {
        Document {
            id: id.to_string(),
            rating,
            title: id.to_uppercase(),
            content: format!("{id} content"),
        }
    }

    #[test]
    fn identity_ignores_rating() {
        let a = doc("garen", 0.31);
        let b = doc("garen", 0.58);
        assert_eq!(a, b);
        assert!(!a.same_fields(&b));

        let mut set = HashSet::new();
        set.insert(a);
        assert!(!set.insert(b));
    }

    #[test]
    fn rating_is_rounded_to_two_decimals() {
        let hit = SearchHit { id: "jinx".into(), score: 0.456_78, content: "zap".into() };
        let document = Document::from_hit(hit, "Jinx");
        assert!((document.rating - 0.46).abs() < f32::EPSILON);
        assert_eq!(document.title, "Jinx");
    }

    #[test]
    fn first_insert_wins() {
        let mut set = DocumentSet::new();
        assert!(set.insert(doc("darius", 0.2)));
        assert!(!set.insert(doc("darius", 0.1)));
        assert_eq!(set.len(), 1);
        assert!((set.get("darius").unwrap().rating - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn best_first_sorts_ascending_and_keeps_insertion_order_on_ties() {
        let set: DocumentSet =
            vec![doc("a", 0.5), doc("b", 0.1), doc("c", 0.5), doc("d", 0.3)].into_iter().collect();
        let ids: Vec<&str> = set.best_first().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["b", "d", "a", "c"]);
        let inserted: Vec<&str> = set.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(inserted, ["a", "b", "c", "d"]);
    }
}
