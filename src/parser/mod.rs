pub mod extract;
pub mod patterns;
pub mod structured;
pub mod units;

use rayon::prelude::*;
use scraper::{Html, Node};

use crate::config::SourceDescriptor;
use crate::crawler::FetchedPage;
use crate::record::Record;
use patterns::PatternLibrary;

/// Outcome of one strategy for one field. `value` is `None` when the text
/// matched but could not be converted; `evidence` still records the match.
#[derive(Debug, Clone, PartialEq)]
pub struct Finding<T> {
    pub value: Option<T>,
    pub evidence: String,
}

impl<T> Finding<T> {
    pub fn found(value: T, evidence: impl Into<String>) -> Self {
        Finding {
            value: Some(value),
            evidence: evidence.into(),
        }
    }
}

/// Extract every fetched page into a record. Pure per page; output keeps the
/// order of `pages`.
pub fn process_pages(
    lib: &PatternLibrary,
    sources: &[SourceDescriptor],
    pages: &[FetchedPage],
    seen_at: &str,
) -> Vec<Record> {
    pages
        .par_iter()
        .filter_map(|page| {
            let source = sources.get(page.source)?;
            let fields = extract::extract(lib, &page.html, source.type_hint(), &source.selectors);
            Some(Record::assemble(source, &page.url, fields, seen_at))
        })
        .collect()
}

/// Human-readable page text: script/style contents dropped, whitespace
/// collapsed to single spaces.
pub fn visible_text(doc: &Html) -> String {
    let mut out = String::new();
    for node in doc.tree.root().descendants() {
        let Node::Text(text) = node.value() else { continue };
        let hidden = node.ancestors().any(|a| {
            a.value().as_element().is_some_and(|e| {
                matches!(e.name(), "script" | "style" | "noscript" | "template")
            })
        });
        if !hidden {
            out.push_str(text);
            out.push(' ');
        }
    }
    collapse_ws(&out)
}

pub fn collapse_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
