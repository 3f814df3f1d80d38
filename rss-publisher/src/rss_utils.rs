/// Text and markup helpers shared by the filter and the pipeline

/// Title slugs used as the secondary duplicate key
pub mod slug {
    pub const MAX_SLUG_LEN: usize = 100;

    /// Lowercase, punctuation stripped, whitespace runs collapsed to `-`, at most 100 chars.
    pub fn slugify(title: &str) -> String {
        let mut slug = String::with_capacity(title.len());
        let mut pending_separator = false;

        for c in title.chars() {
            if c.is_whitespace() || c == '-' || c == '_' {
                pending_separator = !slug.is_empty();
            } else if c.is_alphanumeric() {
                if pending_separator {
                    slug.push('-');
                    pending_separator = false;
                }
                slug.extend(c.to_lowercase());
            }
            // anything else is punctuation and disappears without splitting words
        }

        truncate_slug(slug)
    }

    /// Slug of the first `words` words of a title.
    pub fn title_prefix(title: &str, words: usize) -> String {
        let leading: Vec<&str> = title
            .split_whitespace()
            .filter(|w| w.chars().any(|c| c.is_alphanumeric()))
            .take(words)
            .collect();
        slugify(&leading.join(" "))
    }

    fn truncate_slug(slug: String) -> String {
        if slug.chars().count() <= MAX_SLUG_LEN {
            return slug;
        }
        let truncated: String = slug.chars().take(MAX_SLUG_LEN).collect();
        truncated.trim_end_matches('-').to_string()
    }
}

/// HTML inspection and cleanup
pub mod html {
    use regex::Regex;
    use scraper::{Html, Selector};
    use std::sync::OnceLock;

    /// `src` of the first `<img>` in a fragment.
    pub fn first_image_src(html: &str) -> Option<String> {
        let fragment = Html::parse_fragment(html);
        let selector = Selector::parse("img[src]").ok()?;
        fragment
            .select(&selector)
            .filter_map(|img| img.value().attr("src"))
            .map(str::trim)
            .find(|src| !src.is_empty() && !src.starts_with("data:"))
            .map(str::to_string)
    }

    /// Open-Graph (or Twitter card) image advertised by a full page.
    pub fn og_image(html: &str) -> Option<String> {
        let document = Html::parse_document(html);
        for query in [
            r#"meta[property="og:image"]"#,
            r#"meta[property="og:image:url"]"#,
            r#"meta[name="twitter:image"]"#,
        ] {
            let Ok(selector) = Selector::parse(query) else {
                continue;
            };
            let found = document
                .select(&selector)
                .filter_map(|meta| meta.value().attr("content"))
                .map(str::trim)
                .find(|content| !content.is_empty());
            if let Some(content) = found {
                return Some(content.to_string());
            }
        }
        None
    }

    fn cleanup_patterns() -> &'static [(Regex, &'static str)] {
        static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
        PATTERNS.get_or_init(|| {
            [
                (r"(?is)<figure\b.*?</figure\s*>", ""),
                (r"(?is)<picture\b.*?</picture\s*>", ""),
                (r"(?is)<figcaption\b.*?</figcaption\s*>", ""),
                (r"(?is)<img\b[^>]*>", ""),
                (r"(?is)<source\b[^>]*>", ""),
                (r"(?is)</?a\b[^>]*>", ""),
            ]
            .into_iter()
            .filter_map(|(pattern, replacement)| {
                Regex::new(pattern).ok().map(|re| (re, replacement))
            })
            .collect()
        })
    }

    /// Removes hyperlinks (keeping their text), images and figures from rewriter output.
    pub fn sanitize_article_html(html: &str) -> String {
        let mut cleaned = strip_code_fence(html).to_string();
        for (re, replacement) in cleanup_patterns() {
            cleaned = re.replace_all(&cleaned, *replacement).into_owned();
        }
        cleaned.trim().to_string()
    }

    /// Drops a ```html fence some models wrap their answer in.
    pub fn strip_code_fence(text: &str) -> &str {
        let trimmed = text.trim();
        let Some(rest) = trimmed.strip_prefix("```") else {
            return trimmed;
        };
        let rest = rest
            .strip_prefix("html")
            .or_else(|| rest.strip_prefix("json"))
            .unwrap_or(rest);
        rest.trim_end().trim_end_matches("```").trim()
    }

    /// Extract clean text content from HTML
    pub fn extract_text_from_html(html: &str) -> String {
        let fragment = Html::parse_fragment(html);
        fragment
            .root_element()
            .text()
            .collect::<Vec<_>>()
            .join(" ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// First `max_chars` characters of the text rendering, cut at a word boundary.
    pub fn text_excerpt(html: &str, max_chars: usize) -> String {
        let text = extract_text_from_html(html);
        if text.chars().count() <= max_chars {
            return text;
        }
        let cut: String = text.chars().take(max_chars).collect();
        match cut.rfind(' ') {
            Some(idx) if idx > 0 => format!("{}…", &cut[..idx]),
            _ => format!("{}…", cut),
        }
    }

    pub fn escape_attribute(value: &str) -> String {
        value
            .replace('&', "&amp;")
            .replace('"', "&quot;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
    }
}

/// URL utilities
pub mod url {
    use url::Url;

    /// Resolves `candidate` against the article link; absolute URLs pass through.
    pub fn resolve(base: &str, candidate: &str) -> Option<String> {
        let candidate = candidate.trim();
        if let Ok(absolute) = Url::parse(candidate) {
            return is_http(&absolute).then(|| absolute.to_string());
        }
        let base = Url::parse(base).ok()?;
        let joined = base.join(candidate).ok()?;
        is_http(&joined).then(|| joined.to_string())
    }

    fn is_http(url: &Url) -> bool {
        url.scheme() == "http" || url.scheme() == "https"
    }

    /// Validate feed URL format
    pub fn is_valid_feed_url(url_str: &str) -> bool {
        Url::parse(url_str).map(|u| is_http(&u)).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::html::*;
    use super::slug::*;
    use super::url::*;

    #[test]
    fn slug_is_deterministic_and_clean() {
        let title = "Samsung Galaxy S24 Ultra: Review!";
        let first = slugify(title);
        assert_eq!(first, slugify(title));
        assert_eq!(first, "samsung-galaxy-s24-ultra-review");
        assert!(first.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
    }

    #[test]
    fn slug_collapses_whitespace_and_trims() {
        assert_eq!(slugify("  Phone   X\tLaunched  "), "phone-x-launched");
        assert_eq!(slugify("Don't stop -- believing"), "dont-stop-believing");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn slug_keeps_non_latin_letters() {
        assert_eq!(slugify("Ünïcode Título: Привет Мир!"), "ünïcode-título-привет-мир");
        assert_eq!(slugify("Phone X Launched!"), "phone-x-launched");
    }

    #[test]
    fn slug_is_capped_at_100_chars() {
        let title = "word ".repeat(60);
        let slug = slugify(&title);
        assert!(slug.chars().count() <= MAX_SLUG_LEN);
        assert!(!slug.ends_with('-'));
    }

    #[test]
    fn title_prefix_uses_leading_words() {
        assert_eq!(
            title_prefix("Apple unveils the new iPhone at event", 3),
            "apple-unveils-the"
        );
        assert_eq!(title_prefix("Short: one", 6), "short-one");
    }

    #[test]
    fn finds_first_image() {
        let body = r#"<p>x</p><img src="data:image/gif;base64,AAA"><img src="http://a/1.jpg"><img src="http://a/2.jpg">"#;
        assert_eq!(first_image_src(body).as_deref(), Some("http://a/1.jpg"));
        assert_eq!(first_image_src("<p>no image</p>"), None);
    }

    #[test]
    fn finds_open_graph_image() {
        let page = r#"<html><head><meta property="og:image" content="https://cdn/x.png"></head><body></body></html>"#;
        assert_eq!(og_image(page).as_deref(), Some("https://cdn/x.png"));
        assert_eq!(og_image("<html><head></head></html>"), None);
    }

    #[test]
    fn sanitizer_strips_links_images_and_figures() {
        let dirty = r#"```html
<p>Read <a href="http://x">this story</a> now.</p>
<figure><img src="http://a/1.jpg"><figcaption>cap</figcaption></figure>
<p>End<img src='y.png'/></p>
```"#;
        let clean = sanitize_article_html(dirty);
        assert!(clean.contains("Read this story now."));
        assert!(!clean.contains("<a"));
        assert!(!clean.contains("<img"));
        assert!(!clean.contains("figure"));
        assert!(!clean.contains("```"));
        assert!(clean.ends_with("<p>End</p>"));
    }

    #[test]
    fn excerpt_cuts_on_word_boundary() {
        let excerpt = text_excerpt("<p>alpha beta gamma delta</p>", 12);
        assert_eq!(excerpt, "alpha beta…");
    }

    #[test]
    fn resolves_relative_image_urls() {
        assert_eq!(
            resolve("https://news.example/a/b.html", "/img/1.jpg").as_deref(),
            Some("https://news.example/img/1.jpg")
        );
        assert_eq!(resolve("https://x", "ftp://y/z.jpg"), None);
        assert!(is_valid_feed_url("https://feeds.example/rss"));
        assert!(!is_valid_feed_url("not a url"));
    }
}
