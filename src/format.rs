//! Display clean-up applied to answer text before it reaches the page.

use std::sync::LazyLock;

use regex::Regex;

// Stops at `<` and `"` so a URL directly followed by a citation marker does
// not swallow the marker's markup.
static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<"]+"#).expect("valid URL pattern"));

// A complete tag, or a stray `<` that could open one.
static MARKUP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^<>]*>|<").expect("valid markup pattern"));

// Citation markers, closing anchors and line breaks.
static ALLOWED_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r##"^(?:<a href="#ref-\d+" target="_self">|</a>|<br ?/?>)$"##)
        .expect("valid allowed tag pattern")
});

static BR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(<br ?/>|&lt;br ?/ ?&gt;)").expect("valid line break pattern"));

/// Escape every tag except citation markers, `</a>` and `<br>`, so model
/// or document text cannot inject markup into the page.
pub fn escape_foreign_markup(text: &str) -> String {
    MARKUP_RE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let tag = &caps[0];
            if ALLOWED_TAG_RE.is_match(tag) {
                tag.to_string()
            } else {
                tag.replace('<', "&lt;").replace('>', "&gt;")
            }
        })
        .into_owned()
}

/// Wrap bare `http(s)://` URLs in anchors that open a new tab.
pub fn replace_urls_with_hyperlinks(text: &str) -> String {
    URL_RE
        .replace_all(text, r#"<a href="$0" target="_blank">$0</a>"#)
        .into_owned()
}

/// `$` starts a math block in the page renderer, so escape it.
pub fn escape_dollars(text: &str) -> String {
    text.replace('$', r"\$")
}

/// Collapse self-closing and HTML-escaped `<br>` variants to `<br>`.
pub fn normalize_line_breaks(text: &str) -> String {
    BR_RE.replace_all(text, "<br>").into_owned()
}

/// Foreign markup escaping, then hyperlinks, dollar escaping and line breaks.
pub fn clean_html_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let safe = escape_foreign_markup(text);
    normalize_line_breaks(&escape_dollars(&replace_urls_with_hyperlinks(&safe)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::citation::marker;

    #[test]
    fn test_urls_become_links() {
        assert_eq!(
            replace_urls_with_hyperlinks("see https://example.com/a?b=1 now"),
            r#"see <a href="https://example.com/a?b=1" target="_blank">https://example.com/a?b=1</a> now"#
        );
    }

    #[test]
    fn test_url_before_marker_keeps_marker_intact() {
        let text = format!("Docs at http://x.io{}", marker(1));

        let out = replace_urls_with_hyperlinks(&text);

        assert!(out.starts_with(r#"Docs at <a href="http://x.io" target="_blank">http://x.io</a>"#));
        assert!(out.ends_with(&marker(1)));
    }

    #[test]
    fn test_escape_dollars() {
        assert_eq!(escape_dollars("costs $5 or $$"), r"costs \$5 or \$\$");
    }

    #[test]
    fn test_normalize_line_breaks() {
        assert_eq!(
            normalize_line_breaks("a<br/>b<br />c&lt;br/&gt;d&lt;br / &gt;e<br>f"),
            "a<br>b<br>c<br>d<br>e<br>f"
        );
    }

    #[test]
    fn test_clean_html_text_order() {
        assert_eq!(
            clean_html_text("Price $3<br/>https://a.b"),
            r#"Price \$3<br><a href="https://a.b" target="_blank">https://a.b</a>"#
        );
    }

    #[test]
    fn test_foreign_markup_is_escaped() {
        let text = format!(
            r#"Done{}<br/><img src=x onerror="alert(1)"><script>x</script>"#,
            marker(2)
        );

        let out = escape_foreign_markup(&text);

        assert!(out.starts_with(&format!("Done{}<br/>", marker(2))));
        assert!(out.contains(r#"&lt;img src=x onerror="alert(1)"&gt;"#));
        assert!(out.ends_with("&lt;script&gt;x&lt;/script&gt;"));
    }

    #[test]
    fn test_unclosed_tag_cannot_swallow_marker() {
        let text = format!("<img src=x onerror=alert(1) {}", marker(1));

        let out = escape_foreign_markup(&text);

        assert_eq!(out, format!("&lt;img src=x onerror=alert(1) {}", marker(1)));
    }

    #[test]
    fn test_clean_html_text_escapes_before_linking() {
        assert_eq!(
            clean_html_text(r#"<a href="javascript:x">go</a> https://a.b"#),
            r#"&lt;a href="javascript:x"&gt;go</a> <a href="https://a.b" target="_blank">https://a.b</a>"#
        );
    }

    #[test]
    fn test_clean_html_text_empty() {
        assert_eq!(clean_html_text(""), "");
    }
}
