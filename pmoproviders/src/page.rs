//! Small HTML scraping helpers
//!
//! `scraper::Html` is not `Send`, so every helper parses and extracts in one
//! synchronous call and returns owned data.

use scraper::{Html, Selector};

/// Content of `<meta property="..." content="...">` (or `name="..."`)
pub fn meta_content(html: &str, property: &str) -> Option<String> {
    let document = Html::parse_document(html);
    for attr in ["property", "name"] {
        let Ok(selector) = Selector::parse(&format!(r#"meta[{}="{}"]"#, attr, property)) else {
            continue;
        };
        if let Some(content) = document
            .select(&selector)
            .filter_map(|e| e.value().attr("content"))
            .map(str::trim)
            .find(|c| !c.is_empty())
        {
            return Some(content.to_string());
        }
    }
    None
}

/// Trimmed text of the first element matching `css`
pub fn first_text(html: &str, css: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(css).ok()?;
    document
        .select(&selector)
        .map(|e| e.text().collect::<String>().trim().to_string())
        .find(|t| !t.is_empty())
}

/// Attribute `attr` of the first element matching `css`
pub fn first_attr(html: &str, css: &str, attr: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(css).ok()?;
    document
        .select(&selector)
        .filter_map(|e| e.value().attr(attr))
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}
