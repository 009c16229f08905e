use anyhow::Context as _;

use crate::cli::RenumberArgs;
use crate::model::{BookId, Chapter, ChapterId, ChapterNumbering};
use crate::store::{ContentStore, LocalFsStore, NotFound};

pub async fn run(args: RenumberArgs) -> anyhow::Result<()> {
    let store = LocalFsStore::new(&args.store);
    let numbering = renumber_chapters(&store, args.book).await?;
    crate::cli::print_json(&numbering)
}

/// Recompute dense page numbers and hierarchical numbering labels.
///
/// Expects chapters in stored page-number order (as `list_chapters`
/// returns them) and mutates them in place; callers persist the ones that
/// actually changed.
pub fn renumber(chapters: &mut [Chapter]) -> Vec<ChapterNumbering> {
    let mut numbering = Vec::with_capacity(chapters.len());
    let mut top_ordinal = 0u32;
    let mut sub_ordinal = 0u32;
    let mut parent: Option<(ChapterId, bool)> = None;

    for (idx, chapter) in chapters.iter_mut().enumerate() {
        chapter.pagenum = idx + 1;
        if idx == 0 {
            // The first chapter anchors the hierarchy and can never be a
            // subchapter, whatever its stored flag says.
            chapter.subchapter = false;
        }

        let (label, parent_id) = if !chapter.subchapter {
            sub_ordinal = 0;
            parent = Some((chapter.id, chapter.hidden));
            if chapter.hidden {
                (None, None)
            } else {
                top_ordinal += 1;
                (Some(top_ordinal.to_string()), None)
            }
        } else {
            let (parent_id, parent_hidden) =
                parent.expect("first chapter is coerced top-level");
            if parent_hidden {
                chapter.hidden = true;
            }
            if chapter.hidden {
                (None, Some(parent_id))
            } else {
                sub_ordinal += 1;
                (Some(format!("{top_ordinal}.{sub_ordinal}")), Some(parent_id))
            }
        };

        numbering.push(ChapterNumbering {
            chapter_id: chapter.id,
            pagenum: chapter.pagenum,
            label,
            parent: parent_id,
        });
    }

    numbering
}

/// Renumber a book's chapters in the store, persisting only the chapters
/// whose `subchapter`, `pagenum`, or `hidden` attribute changed.
pub async fn renumber_chapters(
    store: &dyn ContentStore,
    book_id: BookId,
) -> anyhow::Result<Vec<ChapterNumbering>> {
    if store.get_book(book_id).await?.is_none() {
        return Err(NotFound::Book(book_id).into());
    }

    let mut chapters = store.list_chapters(book_id).await?;
    let before = chapters.clone();
    let numbering = renumber(&mut chapters);

    let mut written = 0usize;
    for (chapter, old) in chapters.iter().zip(before.iter()) {
        if chapter.pagenum != old.pagenum
            || chapter.subchapter != old.subchapter
            || chapter.hidden != old.hidden
        {
            store
                .put_chapter(chapter)
                .await
                .with_context(|| format!("persist renumbered chapter {}", chapter.id))?;
            written += 1;
        }
    }

    tracing::debug!(book_id, chapters = chapters.len(), written, "renumbered book");
    Ok(numbering)
}
