//! HTML fragments from Takeout activity cells.
//!
//! Markdown conversion is delegated to `htmd`; parsing and entity decoding to `scraper`.

use std::sync::LazyLock;

use htmd::HtmlToMarkdown;
use regex::Regex;
use scraper::Html;
use tracing::debug;

static BLANK_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").expect("blank line pattern is valid"));

/// Converts an HTML fragment to markdown. When conversion fails the fragment's visible
/// text is kept instead.
pub fn html_to_markdown(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }
    let converter = HtmlToMarkdown::builder().skip_tags(vec!["script", "style"]).build();
    let markdown = converter.convert(html).unwrap_or_else(|e| {
        debug!(error = %e, "markdown conversion failed, keeping plain text");
        fragment_text(html)
    });
    let markdown = markdown.replace(['\u{a0}', '\u{202f}'], " ");
    BLANK_RUN.replace_all(&markdown, "\n\n").trim().to_string()
}

/// Visible text of a fragment, entities decoded.
pub fn fragment_text(html: &str) -> String {
    Html::parse_fragment(html).root_element().text().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paragraphs_and_emphasis() {
        let md = html_to_markdown("<p>Hello <strong>world</strong></p><p>second <em>line</em></p>");
        assert!(md.starts_with("Hello **world**\n\nsecond "), "got {md:?}");
        assert!(md.contains("line"));
        assert!(!md.contains('<'));
    }

    #[test]
    fn test_lists_and_headings() {
        let md = html_to_markdown("<h2>Steps</h2><ul><li>one</li><li>two</li></ul>");
        assert!(md.starts_with("Steps") || md.starts_with("## Steps"), "got {md:?}");
        let one = md.find("one").unwrap();
        let two = md.find("two").unwrap();
        assert!(one < two);
        assert!(md[one..two].contains('\n'));
    }

    #[test]
    fn test_code_block_preserved() {
        let md = html_to_markdown("<p>Try:</p><pre><code>fn main() {\n    let  x = 1 &amp;&amp; 2;\n}</code></pre>");
        assert!(md.contains("```"));
        assert!(md.contains("    let  x = 1 && 2;"));
    }

    #[test]
    fn test_links_become_markdown() {
        let md = html_to_markdown(r#"See <a href="https://example.com/a" target="_blank">the <b>docs</b></a>."#);
        assert!(md.contains("[the **docs**](https://example.com/a)"), "got {md:?}");
    }

    #[test]
    fn test_entities_decoded() {
        let md = html_to_markdown("<p>caf&eacute; &hellip; &#x263A; &#8212; x&nbsp;y</p>");
        assert!(md.contains("café … ☺ — x y"), "got {md:?}");
    }

    #[test]
    fn test_script_dropped() {
        let md = html_to_markdown("<p>kept</p><script>var secret = 1;</script>");
        assert!(md.contains("kept"));
        assert!(!md.contains("secret"));
    }

    #[test]
    fn test_blank_input() {
        assert_eq!(html_to_markdown("  \n "), "");
    }

    #[test]
    fn test_fragment_text() {
        assert_eq!(fragment_text("<b>Tom &amp; Jerry</b><br><i>&lt;cartoon&gt;</i>"), "Tom & Jerry<cartoon>");
    }
}
