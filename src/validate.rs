use std::sync::Arc;

use anyhow::Context as _;

use crate::cli::{ReportArgs, ValidateBookArgs, ValidateChapterArgs};
use crate::clock::{Clock, SystemClock};
use crate::model::{
    BookId, BookValidation, Chapter, ChapterId, ChapterValidation, FaultReport,
};
use crate::rewrite::{self, MediaUrlRewriter};
use crate::scan;
use crate::store::{ContentStore, LocalFsStore, NotFound};

pub async fn run_book(args: ValidateBookArgs) -> anyhow::Result<()> {
    let validator = cli_validator(&args.store, args.base_url.as_deref())?;
    let row = validator.ensure_book_validated(args.book).await?;
    crate::cli::print_json(&row)
}

pub async fn run_chapter(args: ValidateChapterArgs) -> anyhow::Result<()> {
    let validator = cli_validator(&args.store, args.base_url.as_deref())?;
    let row = validator
        .ensure_chapter_validated(args.book, args.chapter)
        .await?;
    crate::cli::print_json(&row)
}

pub async fn run_report(args: ReportArgs) -> anyhow::Result<()> {
    let validator = cli_validator(&args.store, args.base_url.as_deref())?;
    let report = validator.get_fault_detail(args.book, args.chapter).await?;
    crate::cli::print_json(&report)
}

fn cli_validator(store_dir: &str, base_url: Option<&str>) -> anyhow::Result<Validator> {
    let store = Arc::new(LocalFsStore::new(store_dir));
    let rewriter = rewrite::for_base_url(base_url)?;
    Ok(Validator::new(store, Arc::new(SystemClock), rewriter))
}

/// Keeps cached chapter/book verdicts consistent with current content.
///
/// Verdicts are a memoized projection of the content, recomputed lazily
/// when the cached timestamp precedes the chapter's last edit. Concurrent
/// validations of the same chapter may race; last write wins, which is
/// safe because recomputation is deterministic for given content.
pub struct Validator {
    store: Arc<dyn ContentStore>,
    clock: Arc<dyn Clock>,
    rewriter: Arc<dyn MediaUrlRewriter>,
}

impl Validator {
    pub fn new(
        store: Arc<dyn ContentStore>,
        clock: Arc<dyn Clock>,
        rewriter: Arc<dyn MediaUrlRewriter>,
    ) -> Self {
        Self {
            store,
            clock,
            rewriter,
        }
    }

    /// Upsert with recompute-on-staleness: scan the chapter if it has no
    /// cached verdict or the verdict predates the last content edit,
    /// otherwise return the cached row unchanged.
    pub async fn ensure_chapter_validated(
        &self,
        book_id: BookId,
        chapter_id: ChapterId,
    ) -> anyhow::Result<ChapterValidation> {
        self.require_book(book_id).await?;
        let chapter = self.require_chapter(book_id, chapter_id).await?;

        let (row, recomputed) = self.ensure_chapter_row(&chapter).await?;
        if recomputed {
            self.refresh_book_row(book_id).await?;
        }
        Ok(row)
    }

    /// Validate every chapter of the book (in page order) and aggregate:
    /// the book is valid iff all chapters report zero faults. A book with
    /// no chapters is valid. Idempotent when nothing changed.
    pub async fn ensure_book_validated(&self, book_id: BookId) -> anyhow::Result<BookValidation> {
        self.require_book(book_id).await?;

        let chapters = self.store.list_chapters(book_id).await?;
        let mut any_recomputed = false;
        let mut all_valid = true;
        for chapter in &chapters {
            let (row, recomputed) = self.ensure_chapter_row(chapter).await?;
            any_recomputed |= recomputed;
            all_valid &= row.valid();
        }

        self.store_book_row(book_id, all_valid, any_recomputed).await
    }

    /// Live fault report for presentation: shows an editor the offending
    /// fragments. Reads content only; never touches the cached rows.
    pub async fn get_fault_detail(
        &self,
        book_id: BookId,
        chapter_id: ChapterId,
    ) -> anyhow::Result<FaultReport> {
        self.require_book(book_id).await?;
        let chapter = self.require_chapter(book_id, chapter_id).await?;
        Ok(scan::scan_chapter(
            &chapter.content,
            self.rewriter.as_ref(),
            book_id,
            chapter_id,
        ))
    }

    /// Read-only query: does the book currently hold a trustworthy valid
    /// verdict? Never triggers recomputation.
    pub async fn is_validated(&self, book_id: BookId) -> anyhow::Result<bool> {
        self.require_book(book_id).await?;

        if self.store.get_book_validation(book_id).await?.is_none() {
            return Ok(false);
        }
        let chapters = self.store.list_chapters(book_id).await?;
        for chapter in &chapters {
            match self
                .store
                .get_chapter_validation(book_id, chapter.id)
                .await?
            {
                Some(row) if row.is_fresh_for(chapter) && row.valid() => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    async fn ensure_chapter_row(
        &self,
        chapter: &Chapter,
    ) -> anyhow::Result<(ChapterValidation, bool)> {
        if let Some(row) = self
            .store
            .get_chapter_validation(chapter.book_id, chapter.id)
            .await?
            && row.is_fresh_for(chapter)
        {
            return Ok((row, false));
        }

        let report = scan::scan_chapter(
            &chapter.content,
            self.rewriter.as_ref(),
            chapter.book_id,
            chapter.id,
        );
        let row = ChapterValidation {
            book_id: chapter.book_id,
            chapter_id: chapter.id,
            faults: report.fault_count(),
            time_validated: self.clock.now(),
        };
        self.store
            .put_chapter_validation(&row)
            .await
            .context("store chapter verdict")?;
        tracing::info!(
            book_id = chapter.book_id,
            chapter_id = chapter.id,
            faults = row.faults,
            "validated chapter"
        );
        Ok((row, true))
    }

    /// Recompute the book aggregate from the current chapter rows. Called
    /// after a single-chapter validation so the book verdict tracks every
    /// chapter (re-)validation.
    async fn refresh_book_row(&self, book_id: BookId) -> anyhow::Result<BookValidation> {
        let chapters = self.store.list_chapters(book_id).await?;
        let mut all_valid = true;
        for chapter in &chapters {
            match self
                .store
                .get_chapter_validation(book_id, chapter.id)
                .await?
            {
                Some(row) if row.is_fresh_for(chapter) && row.valid() => {}
                _ => {
                    all_valid = false;
                    break;
                }
            }
        }
        self.store_book_row(book_id, all_valid, true).await
    }

    async fn store_book_row(
        &self,
        book_id: BookId,
        is_valid: bool,
        recomputed: bool,
    ) -> anyhow::Result<BookValidation> {
        if let Some(existing) = self.store.get_book_validation(book_id).await?
            && !recomputed
            && existing.is_valid == is_valid
        {
            return Ok(existing);
        }

        let row = BookValidation {
            book_id,
            is_valid,
            time_validated: self.clock.now(),
        };
        self.store
            .put_book_validation(&row)
            .await
            .context("store book verdict")?;
        tracing::info!(book_id, is_valid, "validated book");
        Ok(row)
    }

    async fn require_book(&self, book_id: BookId) -> anyhow::Result<()> {
        if self.store.get_book(book_id).await?.is_none() {
            return Err(NotFound::Book(book_id).into());
        }
        Ok(())
    }

    async fn require_chapter(
        &self,
        book_id: BookId,
        chapter_id: ChapterId,
    ) -> anyhow::Result<Chapter> {
        match self.store.get_chapter(book_id, chapter_id).await? {
            Some(chapter) => Ok(chapter),
            None => Err(NotFound::Chapter {
                book_id,
                chapter_id,
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone as _, Utc};

    use super::*;
    use crate::model::Book;
    use crate::rewrite::Passthrough;

    #[derive(Default)]
    struct MemStore {
        books: Mutex<HashMap<BookId, Book>>,
        chapters: Mutex<HashMap<(BookId, ChapterId), Chapter>>,
        chapter_rows: Mutex<HashMap<(BookId, ChapterId), ChapterValidation>>,
        book_rows: Mutex<HashMap<BookId, BookValidation>>,
        chapter_row_writes: AtomicUsize,
        book_row_writes: AtomicUsize,
    }

    #[async_trait]
    impl ContentStore for MemStore {
        async fn get_book(&self, book_id: BookId) -> anyhow::Result<Option<Book>> {
            Ok(self.books.lock().unwrap().get(&book_id).cloned())
        }

        async fn get_chapter(
            &self,
            book_id: BookId,
            chapter_id: ChapterId,
        ) -> anyhow::Result<Option<Chapter>> {
            Ok(self
                .chapters
                .lock()
                .unwrap()
                .get(&(book_id, chapter_id))
                .cloned())
        }

        async fn list_chapters(&self, book_id: BookId) -> anyhow::Result<Vec<Chapter>> {
            let mut chapters = self
                .chapters
                .lock()
                .unwrap()
                .values()
                .filter(|c| c.book_id == book_id)
                .cloned()
                .collect::<Vec<_>>();
            chapters.sort_by_key(|c| (c.pagenum, c.id));
            Ok(chapters)
        }

        async fn put_chapter(&self, chapter: &Chapter) -> anyhow::Result<()> {
            self.chapters
                .lock()
                .unwrap()
                .insert((chapter.book_id, chapter.id), chapter.clone());
            Ok(())
        }

        async fn get_chapter_validation(
            &self,
            book_id: BookId,
            chapter_id: ChapterId,
        ) -> anyhow::Result<Option<ChapterValidation>> {
            Ok(self
                .chapter_rows
                .lock()
                .unwrap()
                .get(&(book_id, chapter_id))
                .cloned())
        }

        async fn put_chapter_validation(&self, row: &ChapterValidation) -> anyhow::Result<()> {
            self.chapter_row_writes.fetch_add(1, Ordering::SeqCst);
            self.chapter_rows
                .lock()
                .unwrap()
                .insert((row.book_id, row.chapter_id), row.clone());
            Ok(())
        }

        async fn get_book_validation(
            &self,
            book_id: BookId,
        ) -> anyhow::Result<Option<BookValidation>> {
            Ok(self.book_rows.lock().unwrap().get(&book_id).cloned())
        }

        async fn put_book_validation(&self, row: &BookValidation) -> anyhow::Result<()> {
            self.book_row_writes.fetch_add(1, Ordering::SeqCst);
            self.book_rows
                .lock()
                .unwrap()
                .insert(row.book_id, row.clone());
            Ok(())
        }
    }

    struct SteppingClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl SteppingClock {
        fn starting_at(now: DateTime<Utc>) -> Self {
            Self { now: Mutex::new(now) }
        }

        fn advance_secs(&self, secs: i64) {
            let mut now = self.now.lock().unwrap();
            *now += Duration::seconds(secs);
        }
    }

    impl Clock for SteppingClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
    }

    fn chapter(book_id: BookId, id: ChapterId, pagenum: usize, content: &str) -> Chapter {
        Chapter {
            id,
            book_id,
            title: format!("Chapter {id}"),
            content: content.to_owned(),
            pagenum,
            subchapter: false,
            hidden: false,
            time_modified: t0(),
        }
    }

    async fn seed_book(store: &MemStore, book_id: BookId, chapters: Vec<Chapter>) {
        store.books.lock().unwrap().insert(
            book_id,
            Book {
                id: book_id,
                title: format!("Book {book_id}"),
                revision: 1,
            },
        );
        for chapter in chapters {
            store.put_chapter(&chapter).await.unwrap();
        }
    }

    fn validator(store: Arc<MemStore>, clock: Arc<SteppingClock>) -> Validator {
        Validator::new(store, clock, Arc::new(Passthrough))
    }

    const FAULTY: &str = r#"<p><img src="a.png"></p><table><tr><td>1</td></tr></table>"#;
    const CLEAN: &str = r#"<p><img src="a.png" alt="a"></p>"#;

    #[tokio::test]
    async fn chapter_validation_counts_and_caches_faults() {
        let store = Arc::new(MemStore::default());
        let clock = Arc::new(SteppingClock::starting_at(t0()));
        seed_book(&store, 1, vec![chapter(1, 10, 1, FAULTY)]).await;
        clock.advance_secs(60);

        let v = validator(store.clone(), clock.clone());
        let row = v.ensure_chapter_validated(1, 10).await.unwrap();

        assert_eq!(row.faults, 2);
        assert!(!row.valid());
        assert_eq!(row.time_validated, t0() + Duration::seconds(60));
        assert_eq!(store.chapter_row_writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_validation_with_unchanged_content_is_a_no_op() {
        let store = Arc::new(MemStore::default());
        let clock = Arc::new(SteppingClock::starting_at(t0()));
        seed_book(&store, 1, vec![chapter(1, 10, 1, CLEAN)]).await;
        clock.advance_secs(60);

        let v = validator(store.clone(), clock.clone());
        let first = v.ensure_chapter_validated(1, 10).await.unwrap();
        clock.advance_secs(600);
        let second = v.ensure_chapter_validated(1, 10).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.chapter_row_writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn content_edit_forces_recompute_even_from_zero_fault_cache() {
        let store = Arc::new(MemStore::default());
        let clock = Arc::new(SteppingClock::starting_at(t0()));
        seed_book(&store, 1, vec![chapter(1, 10, 1, CLEAN)]).await;
        clock.advance_secs(60);

        let v = validator(store.clone(), clock.clone());
        let row = v.ensure_chapter_validated(1, 10).await.unwrap();
        assert_eq!(row.faults, 0);

        // Editor breaks the chapter after the verdict was recorded.
        clock.advance_secs(60);
        let mut edited = chapter(1, 10, 1, FAULTY);
        edited.time_modified = clock.now();
        store.put_chapter(&edited).await.unwrap();

        clock.advance_secs(60);
        let row = v.ensure_chapter_validated(1, 10).await.unwrap();
        assert_eq!(row.faults, 2);
        assert_eq!(row.time_validated, clock.now());
    }

    #[tokio::test]
    async fn book_is_valid_iff_every_chapter_is_fault_free() {
        let store = Arc::new(MemStore::default());
        let clock = Arc::new(SteppingClock::starting_at(t0()));
        seed_book(
            &store,
            1,
            vec![chapter(1, 10, 1, CLEAN), chapter(1, 11, 2, FAULTY)],
        )
        .await;
        clock.advance_secs(60);

        let v = validator(store.clone(), clock.clone());
        let book_row = v.ensure_book_validated(1).await.unwrap();
        assert!(!book_row.is_valid);

        // Fix the faulty chapter and revalidate.
        clock.advance_secs(60);
        let mut fixed = chapter(1, 11, 2, CLEAN);
        fixed.time_modified = clock.now();
        store.put_chapter(&fixed).await.unwrap();

        clock.advance_secs(60);
        let book_row = v.ensure_book_validated(1).await.unwrap();
        assert!(book_row.is_valid);
    }

    #[tokio::test]
    async fn book_with_no_chapters_is_valid() {
        let store = Arc::new(MemStore::default());
        let clock = Arc::new(SteppingClock::starting_at(t0()));
        seed_book(&store, 1, vec![]).await;

        let v = validator(store.clone(), clock.clone());
        let row = v.ensure_book_validated(1).await.unwrap();
        assert!(row.is_valid);
    }

    #[tokio::test]
    async fn book_validation_is_idempotent_without_content_changes() {
        let store = Arc::new(MemStore::default());
        let clock = Arc::new(SteppingClock::starting_at(t0()));
        seed_book(&store, 1, vec![chapter(1, 10, 1, CLEAN)]).await;
        clock.advance_secs(60);

        let v = validator(store.clone(), clock.clone());
        let first = v.ensure_book_validated(1).await.unwrap();
        let chapter_writes = store.chapter_row_writes.load(Ordering::SeqCst);
        let book_writes = store.book_row_writes.load(Ordering::SeqCst);

        clock.advance_secs(600);
        let second = v.ensure_book_validated(1).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.chapter_row_writes.load(Ordering::SeqCst), chapter_writes);
        assert_eq!(store.book_row_writes.load(Ordering::SeqCst), book_writes);
    }

    #[tokio::test]
    async fn single_chapter_validation_refreshes_the_book_verdict() {
        let store = Arc::new(MemStore::default());
        let clock = Arc::new(SteppingClock::starting_at(t0()));
        seed_book(
            &store,
            1,
            vec![chapter(1, 10, 1, CLEAN), chapter(1, 11, 2, FAULTY)],
        )
        .await;
        clock.advance_secs(60);

        let v = validator(store.clone(), clock.clone());
        v.ensure_book_validated(1).await.unwrap();
        assert!(!v.is_validated(1).await.unwrap());

        clock.advance_secs(60);
        let mut fixed = chapter(1, 11, 2, CLEAN);
        fixed.time_modified = clock.now();
        store.put_chapter(&fixed).await.unwrap();

        clock.advance_secs(60);
        v.ensure_chapter_validated(1, 11).await.unwrap();
        assert!(v.is_validated(1).await.unwrap());
    }

    #[tokio::test]
    async fn is_validated_goes_stale_when_content_changes() {
        let store = Arc::new(MemStore::default());
        let clock = Arc::new(SteppingClock::starting_at(t0()));
        seed_book(&store, 1, vec![chapter(1, 10, 1, CLEAN)]).await;
        clock.advance_secs(60);

        let v = validator(store.clone(), clock.clone());
        assert!(!v.is_validated(1).await.unwrap());
        v.ensure_book_validated(1).await.unwrap();
        assert!(v.is_validated(1).await.unwrap());

        clock.advance_secs(60);
        let mut edited = chapter(1, 10, 1, CLEAN);
        edited.time_modified = clock.now();
        store.put_chapter(&edited).await.unwrap();

        assert!(!v.is_validated(1).await.unwrap());
    }

    #[tokio::test]
    async fn fault_detail_reports_fragments_without_touching_the_cache() {
        let store = Arc::new(MemStore::default());
        let clock = Arc::new(SteppingClock::starting_at(t0()));
        seed_book(&store, 1, vec![chapter(1, 10, 1, FAULTY)]).await;

        let v = validator(store.clone(), clock.clone());
        let report = v.get_fault_detail(1, 10).await.unwrap();

        assert_eq!(report.fault_count(), 2);
        assert_eq!(report.images_missing_alt, vec![r#"<img src="a.png">"#]);
        assert_eq!(store.chapter_row_writes.load(Ordering::SeqCst), 0);
        assert_eq!(store.book_row_writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_book_and_chapter_surface_not_found() {
        let store = Arc::new(MemStore::default());
        let clock = Arc::new(SteppingClock::starting_at(t0()));
        seed_book(&store, 1, vec![chapter(1, 10, 1, CLEAN)]).await;

        let v = validator(store.clone(), clock.clone());

        let err = v.ensure_book_validated(99).await.unwrap_err();
        assert_eq!(err.downcast_ref::<NotFound>(), Some(&NotFound::Book(99)));

        let err = v.ensure_chapter_validated(1, 99).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<NotFound>(),
            Some(&NotFound::Chapter {
                book_id: 1,
                chapter_id: 99
            })
        );
    }
}
