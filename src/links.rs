use std::collections::HashSet;
use std::sync::LazyLock;

use scraper::{Html, Selector};
use url::Url;

static ANCHORS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("static selector"));

/// Same-host http(s) links on `base`'s page, in document order, without
/// fragments or duplicates, never `base` itself, at most `limit`.
pub fn discover(base: &Url, html: &str, limit: usize) -> Vec<Url> {
    let doc = Html::parse_document(html);
    let start = without_fragment(base.clone());
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for a in doc.select(&ANCHORS) {
        if out.len() >= limit {
            break;
        }
        let Some(href) = a.value().attr("href") else { continue };
        let Ok(link) = base.join(href.trim()) else { continue };
        if !matches!(link.scheme(), "http" | "https") || !same_domain(base, &link) {
            continue;
        }
        let link = without_fragment(link);
        if link == start || !seen.insert(link.clone()) {
            continue;
        }
        out.push(link);
    }
    out
}

/// Host comparison only; scheme and port are ignored.
pub fn same_domain(a: &Url, b: &Url) -> bool {
    match (a.host_str(), b.host_str()) {
        (Some(x), Some(y)) => x.eq_ignore_ascii_case(y),
        _ => false,
    }
}

fn without_fragment(mut url: Url) -> Url {
    url.set_fragment(None);
    url
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://oem.example/machines/hx220").unwrap()
    }

    #[test]
    fn fixture_links_stay_on_domain() {
        let html = std::fs::read_to_string("tests/fixtures/hydrogen_excavator.html").unwrap();
        let found = discover(&base(), &html, 30);
        assert!(!found.is_empty());
        assert!(found.iter().all(|u| u.host_str() == Some("oem.example")));
        assert!(found.iter().all(|u| u.fragment().is_none()));
    }

    #[test]
    fn filters_schemes_duplicates_and_self() {
        let html = r##"
            <a href="/machines/hx220">self</a>
            <a href="#specs">anchor</a>
            <a href="mailto:sales@oem.example">mail</a>
            <a href="javascript:void(0)">js</a>
            <a href="hx300">relative</a>
            <a href="https://oem.example/machines/hx300#top">dup</a>
            <a href="https://other.example/hx300">offsite</a>
            <a href="http://oem.example:8080/news">port</a>
        "##;
        let found: Vec<String> = discover(&base(), html, 30)
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(
            found,
            [
                "https://oem.example/machines/hx300",
                "http://oem.example:8080/news"
            ]
        );
    }

    #[test]
    fn respects_limit() {
        let html: String = (0..10)
            .map(|i| format!(r#"<a href="/m/{i}">m{i}</a>"#))
            .collect();
        let found = discover(&base(), &html, 3);
        assert_eq!(found.len(), 3);
        assert_eq!(found[2].as_str(), "https://oem.example/m/2");
    }
}
