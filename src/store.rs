use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::fs;

use crate::model::{Book, BookId, BookValidation, Chapter, ChapterId, ChapterValidation};

/// Referenced book or chapter is absent from the content store.
///
/// Raised through `anyhow`; hosts that need to map it to a precondition
/// failure can `downcast_ref::<NotFound>()` on the error chain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotFound {
    #[error("book {0} not found")]
    Book(BookId),
    #[error("chapter {chapter_id} not found in book {book_id}")]
    Chapter {
        book_id: BookId,
        chapter_id: ChapterId,
    },
}

/// Host-side content storage.
///
/// `Book` and `Chapter` rows are owned by the host content module; the
/// validation rows are owned by this crate and are purely derived state.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn get_book(&self, book_id: BookId) -> anyhow::Result<Option<Book>>;
    async fn get_chapter(
        &self,
        book_id: BookId,
        chapter_id: ChapterId,
    ) -> anyhow::Result<Option<Chapter>>;
    /// All chapters of a book, ordered by `pagenum`.
    async fn list_chapters(&self, book_id: BookId) -> anyhow::Result<Vec<Chapter>>;
    async fn put_chapter(&self, chapter: &Chapter) -> anyhow::Result<()>;

    async fn get_chapter_validation(
        &self,
        book_id: BookId,
        chapter_id: ChapterId,
    ) -> anyhow::Result<Option<ChapterValidation>>;
    async fn put_chapter_validation(&self, row: &ChapterValidation) -> anyhow::Result<()>;
    async fn get_book_validation(&self, book_id: BookId)
    -> anyhow::Result<Option<BookValidation>>;
    async fn put_book_validation(&self, row: &BookValidation) -> anyhow::Result<()>;
}

/// JSON-file store under a base directory.
///
/// Layout: `books/<id>/book.json`, `books/<id>/chapters/<id>.json`,
/// `books/<id>/validation/chapters/<id>.json`, `books/<id>/validation/book.json`.
/// Used by the CLI and integration tests; a production host implements
/// `ContentStore` over its own schema instead.
#[derive(Debug, Clone)]
pub struct LocalFsStore {
    base_dir: PathBuf,
}

impl LocalFsStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn book_dir(&self, book_id: BookId) -> PathBuf {
        self.base_dir.join("books").join(book_id.to_string())
    }

    fn book_json_path(&self, book_id: BookId) -> PathBuf {
        self.book_dir(book_id).join("book.json")
    }

    fn chapters_dir(&self, book_id: BookId) -> PathBuf {
        self.book_dir(book_id).join("chapters")
    }

    fn chapter_json_path(&self, book_id: BookId, chapter_id: ChapterId) -> PathBuf {
        self.chapters_dir(book_id)
            .join(format!("{chapter_id}.json"))
    }

    fn chapter_validation_json_path(&self, book_id: BookId, chapter_id: ChapterId) -> PathBuf {
        self.book_dir(book_id)
            .join("validation")
            .join("chapters")
            .join(format!("{chapter_id}.json"))
    }

    fn book_validation_json_path(&self, book_id: BookId) -> PathBuf {
        self.book_dir(book_id).join("validation").join("book.json")
    }

    /// Seed helper for the host side of the boundary: writes the book row.
    pub async fn put_book(&self, book: &Book) -> anyhow::Result<()> {
        write_json_atomic(&self.book_json_path(book.id), book)
            .await
            .context("write book.json")
    }
}

#[async_trait]
impl ContentStore for LocalFsStore {
    async fn get_book(&self, book_id: BookId) -> anyhow::Result<Option<Book>> {
        let path = self.book_json_path(book_id);
        read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))
    }

    async fn get_chapter(
        &self,
        book_id: BookId,
        chapter_id: ChapterId,
    ) -> anyhow::Result<Option<Chapter>> {
        let path = self.chapter_json_path(book_id, chapter_id);
        read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))
    }

    async fn list_chapters(&self, book_id: BookId) -> anyhow::Result<Vec<Chapter>> {
        let dir = self.chapters_dir(book_id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("read chapters dir: {}", dir.display()));
            }
        };

        let mut chapters = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("read chapters dir entry: {}", dir.display()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let chapter: Option<Chapter> = read_json(&path)
                .await
                .with_context(|| format!("read: {}", path.display()))?;
            if let Some(chapter) = chapter {
                chapters.push(chapter);
            }
        }

        chapters.sort_by_key(|c| (c.pagenum, c.id));
        Ok(chapters)
    }

    async fn put_chapter(&self, chapter: &Chapter) -> anyhow::Result<()> {
        let path = self.chapter_json_path(chapter.book_id, chapter.id);
        write_json_atomic(&path, chapter)
            .await
            .with_context(|| format!("write chapter: {}", path.display()))
    }

    async fn get_chapter_validation(
        &self,
        book_id: BookId,
        chapter_id: ChapterId,
    ) -> anyhow::Result<Option<ChapterValidation>> {
        let path = self.chapter_validation_json_path(book_id, chapter_id);
        read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))
    }

    async fn put_chapter_validation(&self, row: &ChapterValidation) -> anyhow::Result<()> {
        let path = self.chapter_validation_json_path(row.book_id, row.chapter_id);
        write_json_atomic(&path, row)
            .await
            .with_context(|| format!("write chapter validation: {}", path.display()))
    }

    async fn get_book_validation(
        &self,
        book_id: BookId,
    ) -> anyhow::Result<Option<BookValidation>> {
        let path = self.book_validation_json_path(book_id);
        read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))
    }

    async fn put_book_validation(&self, row: &BookValidation) -> anyhow::Result<()> {
        let path = self.book_validation_json_path(row.book_id);
        write_json_atomic(&path, row)
            .await
            .with_context(|| format!("write book validation: {}", path.display()))
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice(&bytes).context("parse json")?;
    Ok(Some(value))
}

async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    fs::write(&tmp_path, &data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}
