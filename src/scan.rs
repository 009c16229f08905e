use std::path::PathBuf;

use anyhow::Context as _;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::cli::ScanArgs;
use crate::model::{BookId, ChapterId, FaultReport};
use crate::rewrite::{self, MediaUrlRewriter};

pub fn run(args: ScanArgs) -> anyhow::Result<()> {
    let html_path = PathBuf::from(&args.html);
    let html = std::fs::read_to_string(&html_path)
        .with_context(|| format!("read html fragment: {}", html_path.display()))?;

    let rewriter = rewrite::for_base_url(args.base_url.as_deref())?;
    let report = scan_chapter(&html, rewriter.as_ref(), args.book, args.chapter);

    tracing::info!(faults = report.fault_count(), "scanned fragment");
    crate::cli::print_json(&report)
}

/// Scan one chapter's HTML fragment for accessibility faults: images whose
/// `alt` attribute is absent or empty, and tables whose `summary` attribute
/// is absent or empty.
///
/// Media URLs are rewritten first so the reported fragments render outside
/// the authoring context. Pure: no I/O, and malformed markup never errors;
/// the unparsable remainder simply contributes zero faults.
pub fn scan_chapter(
    html: &str,
    rewriter: &dyn MediaUrlRewriter,
    book_id: BookId,
    chapter_id: ChapterId,
) -> FaultReport {
    let rewritten = rewriter.rewrite(html, book_id, chapter_id);
    scan_fragment(&rewritten)
}

fn scan_fragment(html: &str) -> FaultReport {
    let mut reader = Reader::from_str(html);
    // Chapter fragments are authored HTML, not XML: end tags may be
    // missing or mismatched.
    reader.config_mut().check_end_names = false;

    let mut report = FaultReport::default();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_ascii_lowercase();
                match tag.as_str() {
                    "img" if !has_nonempty_attr(&e, "alt") => {
                        report.images_missing_alt.push(element_fragment(&e));
                    }
                    "table" if !has_nonempty_attr(&e, "summary") => {
                        report.tables_missing_summary.push(element_fragment(&e));
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(?err, "stopping fault scan on unparsable markup");
                break;
            }
        }
    }
    report
}

fn has_nonempty_attr(e: &BytesStart<'_>, name: &str) -> bool {
    for attr in e.html_attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_ascii_lowercase();
        if key == name {
            return !attr.value.is_empty();
        }
    }
    false
}

/// Rebuild the opening tag for the report. For tables this is the opening
/// tag only, which is where the `summary` attribute lives.
fn element_fragment(e: &BytesStart<'_>) -> String {
    format!("<{}>", String::from_utf8_lossy(e).trim_end())
}
