//! HTML allow-list cleaning for item content and single-line fields.

use ammonia::Builder;
use std::collections::{HashMap, HashSet};

const CONTENT_TAGS: &[&str] = &[
    "div", "p", "ul", "li", "a", "img", "dl", "dt", "dd", "h1", "h2", "h3", "h4", "h5", "h6", "ol", "br", "table",
    "tr", "td", "blockquote", "pre", "ins", "del", "th", "thead", "tbody", "b", "i", "strong", "em", "tt", "sub",
    "sup", "s", "strike", "code",
];

const CONTENT_ATTRIBUTES: &[&str] = &["alt", "title", "src", "href", "target"];

const FIELD_TAGS: &[&str] = &["a", "br", "ins", "del", "b", "i", "strong", "em", "tt", "sub", "sup", "s", "code"];

const FIELD_ATTRIBUTES: &[&str] = &["href", "title", "target"];

fn rich_content_builder() -> Builder<'static> {
    let mut builder = Builder::default();
    builder
        .tags(CONTENT_TAGS.iter().copied().collect())
        .generic_attributes(CONTENT_ATTRIBUTES.iter().copied().collect())
        .tag_attributes(HashMap::from([("img", HashSet::from(["width", "height"]))]))
        .link_rel(None)
        .strip_comments(false);
    builder
}

fn plain_field_builder() -> Builder<'static> {
    let mut builder = Builder::default();
    builder
        .tags(FIELD_TAGS.iter().copied().collect())
        .generic_attributes(FIELD_ATTRIBUTES.iter().copied().collect())
        .tag_attributes(HashMap::new())
        .link_rel(None);
    builder
}

/// Cleans an item body: block and inline structure, links and images survive;
/// scripts, styles, event handlers and unknown attributes do not.
pub fn sanitize_content(html: &str) -> String {
    rich_content_builder().clean(html).to_string()
}

/// Cleans a title or author: only a handful of inline elements are kept.
pub fn sanitize_field(html: &str) -> String {
    plain_field_builder().clean(html).to_string()
}
