use domtrim_core::Minify;
use regex::Regex;
use std::sync::LazyLock;

struct Rules {
    comment: Regex,
    doctype: Regex,
    intertag: Regex,
    spaces: Regex,
}

static RULES: LazyLock<Result<Rules, regex::Error>> = LazyLock::new(|| {
    Ok(Rules {
        comment: Regex::new(r"(?s)<!--.*?-->")?,
        doctype: Regex::new(r"(?i)<!DOCTYPE[^>]*>")?,
        intertag: Regex::new(r">\s+<")?,
        spaces: Regex::new(r"\s+")?,
    })
});

/// Whitespace/comment minifier. Output is semantically equivalent HTML for
/// whitespace-insensitive content (`<pre>` and `<textarea>` lose their layout).
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlMinifier;

impl Minify for HtmlMinifier {
    fn minify(&self, html: &str) -> String {
        if html.is_empty() {
            return String::new();
        }
        let rules = match RULES.as_ref() {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "minifier rules failed to compile");
                return html.to_string();
            }
        };
        let s = rules.comment.replace_all(html, "");
        let s = rules.doctype.replace_all(&s, "<!DOCTYPE html>");
        let s = rules.spaces.replace_all(&s, " ");
        let s = rules.intertag.replace_all(&s, "><");
        let out = s.trim().to_string();
        tracing::debug!(before = html.len(), after = out.len(), "minified");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_comments_and_collapses_whitespace() {
        let html = "<!DOCTYPE html PUBLIC \"x\">\n<html>\n  <body>\n <!-- a\n b -->\n<p>Hello   \n world</p>\n  </body>\n</html>\n";
        assert_eq!(
            HtmlMinifier.minify(html),
            "<!DOCTYPE html><html><body><p>Hello world</p></body></html>"
        );
    }

    #[test]
    fn keeps_single_spaces_inside_text() {
        assert_eq!(
            HtmlMinifier.minify("<p>a <b>b</b> c</p>"),
            "<p>a <b>b</b> c</p>"
        );
        assert_eq!(HtmlMinifier.minify(""), "");
    }
}
