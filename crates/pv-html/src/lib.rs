//! Preview document rewriting: base-tag injection for relative URL resolution.

/// Produces the exact HTML to render for `html` under an optional base URL.
///
/// Without a base URL the input is returned untouched. Otherwise exactly one
/// `<base href>` is spliced in: after the first `<head>` opening tag, else in a
/// synthetic head after the first `<html>` opening tag, else around a minimal
/// document skeleton. Nothing else in the markup is parsed or altered.
pub fn build_preview_document(html: &str, base_url: Option<&str>) -> String {
    match base_url {
        Some(base_url) => inject_base_tag(html, base_url),
        None => html.to_owned(),
    }
}

/// Escapes `&`, `<`, `>` and `"` so a value cannot break out of a quoted attribute.
pub fn escape_attribute(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

fn inject_base_tag(html: &str, base_url: &str) -> String {
    let base_tag = format!("<base href=\"{}\">", escape_attribute(base_url));
    let anchors = locate_anchor_tags(html);

    if let Some(after_head) = anchors.head_end {
        return splice(html, after_head, &base_tag);
    }

    if let Some(after_html) = anchors.html_end {
        return splice(html, after_html, &format!("<head>{base_tag}</head>"));
    }

    format!("<!doctype html><html><head>{base_tag}</head><body>{html}</body></html>")
}

fn splice(html: &str, at: usize, insert: &str) -> String {
    let mut out = String::with_capacity(html.len() + insert.len());
    out.push_str(&html[..at]);
    out.push_str(insert);
    out.push_str(&html[at..]);
    out
}

/// Byte offsets just past the first `<head>` and `<html>` opening tags.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct AnchorTags {
    head_end: Option<usize>,
    html_end: Option<usize>,
}

fn locate_anchor_tags(input: &str) -> AnchorTags {
    let bytes = input.as_bytes();
    let mut anchors = AnchorTags::default();
    let mut idx = 0_usize;

    while idx < bytes.len() {
        let Some(next) = find_byte(bytes, idx, b'<') else {
            break;
        };
        idx = next;

        if starts_with(bytes, idx, b"<!--") {
            idx = skip_comment(bytes, idx);
            continue;
        }

        if starts_with(bytes, idx, b"<!") || starts_with(bytes, idx, b"<?") {
            idx = skip_to_gt(bytes, idx.saturating_add(2));
            continue;
        }

        let Some((tag, next_idx)) = parse_tag(bytes, idx) else {
            idx = idx.saturating_add(1);
            continue;
        };

        if !tag.is_end {
            if tag.name == "head" {
                anchors.head_end = Some(next_idx);
                break;
            }

            if tag.name == "html" && anchors.html_end.is_none() {
                anchors.html_end = Some(next_idx);
            }

            if !tag.self_closing && is_raw_text_element(&tag.name) {
                idx = skip_raw_text(bytes, next_idx, &tag.name);
                continue;
            }
        }

        idx = next_idx;
    }

    anchors
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedTag {
    name: String,
    is_end: bool,
    self_closing: bool,
}

fn parse_tag(bytes: &[u8], start: usize) -> Option<(ParsedTag, usize)> {
    if bytes.get(start).copied() != Some(b'<') {
        return None;
    }

    let mut idx = start.saturating_add(1);
    let mut is_end = false;
    if bytes.get(idx).copied() == Some(b'/') {
        is_end = true;
        idx = idx.saturating_add(1);
    }

    let name_start = idx;
    if !bytes.get(idx).is_some_and(u8::is_ascii_alphabetic) {
        return None;
    }
    while idx < bytes.len() && is_tag_name_char(bytes[idx]) {
        idx = idx.saturating_add(1);
    }
    if !tag_name_boundary(bytes, idx) {
        return None;
    }

    let name = String::from_utf8_lossy(&bytes[name_start..idx]).to_ascii_lowercase();
    // A quote opens a value only as the first non-space byte after `=`.
    let mut quote: Option<u8> = None;
    let mut after_equals = false;

    while idx < bytes.len() {
        let byte = bytes[idx];
        if let Some(open) = quote {
            if byte == open {
                quote = None;
            }
        } else {
            match byte {
                b'>' => {
                    let self_closing = idx > name_start && bytes[idx - 1] == b'/';
                    return Some((
                        ParsedTag {
                            name,
                            is_end,
                            self_closing,
                        },
                        idx.saturating_add(1),
                    ));
                }
                b'\'' | b'"' if after_equals => quote = Some(byte),
                _ => {}
            }

            if byte == b'=' {
                after_equals = true;
            } else if !byte.is_ascii_whitespace() {
                after_equals = false;
            }
        }

        idx = idx.saturating_add(1);
    }

    None
}

fn is_raw_text_element(name: &str) -> bool {
    matches!(
        name,
        "script" | "style" | "textarea" | "title" | "xmp" | "iframe" | "noscript"
    )
}

fn skip_raw_text(bytes: &[u8], start: usize, tag_name: &str) -> usize {
    let tag_bytes = tag_name.as_bytes();
    let mut idx = start;

    while let Some(lt) = find_byte(bytes, idx, b'<') {
        if bytes.get(lt.saturating_add(1)).copied() == Some(b'/')
            && starts_with_ignore_ascii_case(bytes, lt.saturating_add(2), tag_bytes)
            && tag_name_boundary(bytes, lt.saturating_add(2 + tag_bytes.len()))
        {
            return lt;
        }
        idx = lt.saturating_add(1);
    }

    bytes.len()
}

fn skip_comment(bytes: &[u8], start: usize) -> usize {
    find_subslice(bytes, start.saturating_add(4), b"-->")
        .map(|end| end.saturating_add(3))
        .unwrap_or(bytes.len())
}

fn skip_to_gt(bytes: &[u8], start: usize) -> usize {
    find_byte(bytes, start, b'>')
        .map(|end| end.saturating_add(1))
        .unwrap_or(bytes.len())
}

fn tag_name_boundary(bytes: &[u8], idx: usize) -> bool {
    match bytes.get(idx).copied() {
        None => true,
        Some(byte) => byte.is_ascii_whitespace() || byte == b'>' || byte == b'/',
    }
}

fn is_tag_name_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b':')
}

fn starts_with(bytes: &[u8], idx: usize, pattern: &[u8]) -> bool {
    let end = idx.saturating_add(pattern.len());
    end <= bytes.len() && bytes[idx..end] == *pattern
}

fn starts_with_ignore_ascii_case(bytes: &[u8], idx: usize, pattern: &[u8]) -> bool {
    let end = idx.saturating_add(pattern.len());
    if end > bytes.len() {
        return false;
    }

    bytes[idx..end]
        .iter()
        .zip(pattern.iter())
        .all(|(left, right)| left.eq_ignore_ascii_case(right))
}

fn find_subslice(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= bytes.len() {
        return None;
    }

    bytes[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|offset| from + offset)
}

fn find_byte(bytes: &[u8], from: usize, byte: u8) -> Option<usize> {
    if from >= bytes.len() {
        return None;
    }

    bytes[from..]
        .iter()
        .position(|candidate| *candidate == byte)
        .map(|offset| from + offset)
}
