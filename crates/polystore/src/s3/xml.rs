//! Just enough XML for S3 responses.
//!
//! S3 replies are flat and predictable, so elements are located by tag
//! name instead of building a tree.

/// Inner text of every `<tag>...</tag>` element, in document order.
pub fn elements<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut found = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find(&open) {
        let body = &rest[start + open.len()..];
        let Some(end) = body.find(&close) else {
            break;
        };
        found.push(&body[..end]);
        rest = &body[end + close.len()..];
    }
    found
}

/// Unescaped text of the first `<tag>` element
pub fn text(xml: &str, tag: &str) -> Option<String> {
    elements(xml, tag).first().map(|t| unescape(t))
}

/// Replace the five predefined XML entities and numeric references
pub fn unescape(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp..];
        let Some(semi) = after.find(';') else {
            out.push_str(after);
            return out;
        };
        let entity = &after[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => out.push(c),
            None => out.push_str(&after[..=semi]),
        }
        rest = &after[semi + 1..];
    }
    out.push_str(rest);
    out
}

/// Escape text for an element body
pub fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>bucket</Name>
  <IsTruncated>true</IsTruncated>
  <Contents><Key>a&amp;b.txt</Key><Size>3</Size></Contents>
  <Contents><Key>c.txt</Key><Size>10</Size></Contents>
  <NextContinuationToken>tok</NextContinuationToken>
</ListBucketResult>"#;

    #[test]
    fn test_elements() {
        let contents = elements(LISTING, "Contents");
        assert_eq!(contents.len(), 2);
        assert_eq!(text(contents[0], "Key").unwrap(), "a&b.txt");
        assert_eq!(text(contents[1], "Size").unwrap(), "10");
        assert_eq!(text(LISTING, "NextContinuationToken").unwrap(), "tok");
        assert!(text(LISTING, "Missing").is_none());
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape("a &lt;b&gt; &#65;&#x42;"), "a <b> AB");
        assert_eq!(unescape("broken &foo; &"), "broken &foo; &");
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("<a&b>"), "&lt;a&amp;b&gt;");
    }
}
