use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type BookId = i64;
pub type ChapterId = i64;

/// Host-owned book record. Read-only for this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    pub id: BookId,
    pub title: String,
    pub revision: u32,
}

/// One book chapter: content plus its position in the book structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: ChapterId,
    pub book_id: BookId,
    pub title: String,
    /// Chapter body as an HTML fragment, authored by the host UI.
    pub content: String,
    /// Position within the book; dense 1..N after renumbering.
    pub pagenum: usize,
    pub subchapter: bool,
    pub hidden: bool,
    pub time_modified: DateTime<Utc>,
}

/// Cached verdict for one chapter. Derived state, never the source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterValidation {
    pub book_id: BookId,
    pub chapter_id: ChapterId,
    pub faults: u32,
    pub time_validated: DateTime<Utc>,
}

impl ChapterValidation {
    pub fn valid(&self) -> bool {
        self.faults == 0
    }

    /// A verdict recorded before the chapter's last edit must not be trusted.
    pub fn is_fresh_for(&self, chapter: &Chapter) -> bool {
        self.time_validated >= chapter.time_modified
    }
}

/// Cached aggregate verdict for a book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookValidation {
    pub book_id: BookId,
    pub is_valid: bool,
    pub time_validated: DateTime<Utc>,
}

/// Accessibility faults found in one chapter's HTML.
///
/// Fragments are reported in document order, after media URL rewriting, so
/// they can be rendered outside the authoring context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultReport {
    pub images_missing_alt: Vec<String>,
    pub tables_missing_summary: Vec<String>,
}

impl FaultReport {
    pub fn fault_count(&self) -> u32 {
        (self.images_missing_alt.len() + self.tables_missing_summary.len()) as u32
    }

    pub fn is_empty(&self) -> bool {
        self.images_missing_alt.is_empty() && self.tables_missing_summary.is_empty()
    }
}

/// Display numbering assigned by the chapter ordering helper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterNumbering {
    pub chapter_id: ChapterId,
    pub pagenum: usize,
    /// `"3"` for top-level chapters, `"3.2"` for subchapters, `None` when
    /// the chapter is hidden and therefore not numbered.
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<ChapterId>,
}
