use std::sync::Arc;

use anyhow::Context as _;
use url::Url;

use crate::model::{BookId, ChapterId};

/// Rewrites authoring-context-relative media references so scanned or
/// displayed fragments resolve outside the authoring context.
///
/// The host file-serving layer supplies the real implementation; the two
/// implementations here cover the CLI and tests.
pub trait MediaUrlRewriter: Send + Sync {
    fn rewrite(&self, html: &str, book_id: BookId, chapter_id: ChapterId) -> String;
}

/// Identity rewriter for hosts that already serve absolute URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl MediaUrlRewriter for Passthrough {
    fn rewrite(&self, html: &str, _book_id: BookId, _chapter_id: ChapterId) -> String {
        html.to_owned()
    }
}

/// Joins relative `src` values in `img`/`table` markup against a base URL
/// extended with `books/<book>/chapters/<chapter>/`.
#[derive(Debug, Clone)]
pub struct BaseUrlRewriter {
    base: Url,
}

impl BaseUrlRewriter {
    pub fn new(base: Url) -> Self {
        Self { base }
    }
}

impl MediaUrlRewriter for BaseUrlRewriter {
    fn rewrite(&self, html: &str, book_id: BookId, chapter_id: ChapterId) -> String {
        let prefix = format!("books/{book_id}/chapters/{chapter_id}/");
        let Ok(base) = self.base.join(&prefix) else {
            tracing::warn!(base = %self.base, prefix, "cannot extend base url; leaving content as-is");
            return html.to_owned();
        };
        rewrite_media_src(html, &base)
    }
}

/// Rewriter for CLI use: base-URL joining when a base is given, identity
/// otherwise.
pub fn for_base_url(base_url: Option<&str>) -> anyhow::Result<Arc<dyn MediaUrlRewriter>> {
    match base_url {
        Some(raw) => {
            let base = Url::parse(raw).with_context(|| format!("parse base url: {raw}"))?;
            Ok(Arc::new(BaseUrlRewriter::new(base)))
        }
        None => Ok(Arc::new(Passthrough)),
    }
}

fn rewrite_media_src(html: &str, base: &Url) -> String {
    let mut out = String::with_capacity(html.len());
    let mut cursor = 0usize;

    while let Some(rel) = html[cursor..].find('<') {
        let start = cursor + rel;
        out.push_str(&html[cursor..start]);

        let Some(end_rel) = html[start..].find('>') else {
            out.push_str(&html[start..]);
            return out;
        };
        let end = start + end_rel + 1;
        let tag = &html[start..end];

        if is_media_tag(tag) {
            out.push_str(&rewrite_src_attrs(tag, base));
        } else {
            out.push_str(tag);
        }
        cursor = end;
    }

    out.push_str(&html[cursor..]);
    out
}

fn is_media_tag(tag: &str) -> bool {
    let name = tag[1..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    matches!(name.as_str(), "img" | "table")
}

fn rewrite_src_attrs(tag: &str, base: &Url) -> String {
    // ASCII-only search patterns, so byte offsets in the lowercase copy
    // line up with the original.
    let lower = tag.to_ascii_lowercase();
    let bytes = tag.as_bytes();
    let mut out = String::with_capacity(tag.len());
    let mut cursor = 0usize;

    while let Some(rel) = lower[cursor..].find("src=") {
        let attr_start = cursor + rel;
        let value_start = attr_start + "src=".len();

        let at_boundary = attr_start > 0 && bytes[attr_start - 1].is_ascii_whitespace();
        let quote = bytes.get(value_start).copied();
        if !at_boundary || !matches!(quote, Some(b'"') | Some(b'\'')) {
            out.push_str(&tag[cursor..value_start]);
            cursor = value_start;
            continue;
        }

        let quote = quote.unwrap() as char;
        let Some(close_rel) = tag[value_start + 1..].find(quote) else {
            break;
        };
        let close = value_start + 1 + close_rel;
        let value = &tag[value_start + 1..close];

        out.push_str(&tag[cursor..value_start + 1]);
        match rewritten_value(value, base) {
            Some(resolved) => out.push_str(resolved.as_str()),
            None => out.push_str(value),
        }
        out.push(quote);
        cursor = close + 1;
    }

    out.push_str(&tag[cursor..]);
    out
}

fn rewritten_value(value: &str, base: &Url) -> Option<Url> {
    if value.is_empty() || value.starts_with('#') || value.starts_with("//") {
        return None;
    }
    // Absolute URLs (http:, data:, mailto:, ...) parse on their own.
    if Url::parse(value).is_ok() {
        return None;
    }
    base.join(value).ok()
}
