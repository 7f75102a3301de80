use std::borrow::Cow;
use std::cmp::{Ordering, Reverse};

use url::Url;

/// Canonicalize a raw URL for deduplication: trim whitespace, strip
/// trailing `\` artifacts, decode HTML entities, and (when `keep_query`)
/// reorder query parameters by key. Without `keep_query` the query and
/// fragment are dropped entirely. Idempotent.
pub fn normalize_url(raw: &str, keep_query: bool) -> String {
    let stripped = raw.trim().trim_end_matches('\\');
    let decoded = decode_html_entities(stripped);
    let Ok(mut parsed) = Url::parse(&decoded) else {
        // Unparseable input stays an opaque token; callers treat it as-is.
        return decoded.into_owned();
    };
    if keep_query {
        reorder_query(&mut parsed, |left, right| left.0.cmp(&right.0));
    } else {
        parsed.set_query(None);
        parsed.set_fragment(None);
    }
    parsed.to_string()
}

/// Canonicalize a URL for mapping lookup: entities decoded, query pairs
/// sorted by `(key, value)` so repeated keys order deterministically.
pub fn canonicalize_url(raw: &str) -> String {
    let decoded = decode_html_entities(raw);
    let Ok(mut parsed) = Url::parse(&decoded) else {
        return decoded.into_owned();
    };
    reorder_query(&mut parsed, |left, right| {
        left.0.cmp(&right.0).then_with(|| left.1.cmp(&right.1))
    });
    parsed.to_string()
}

/// Base-path form of a URL: query and fragment removed.
pub fn strip_query(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => raw.to_string(),
    }
}

fn reorder_query<F>(parsed: &mut Url, compare: F)
where
    F: FnMut(&(String, String), &(String, String)) -> Ordering,
{
    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    // Stable sort: equal pairs keep their original relative order.
    pairs.sort_by(compare);
    if pairs.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(pairs);
    }
}

/// Preference order for competing URLs of the same asset. Higher is
/// better: no `scale-down-to=` directive, then no explicit dimension
/// directives, then the shorter query string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct QualityScore {
    no_scale_down: bool,
    no_dimensions: bool,
    query_brevity: Reverse<usize>,
}

pub fn url_quality_score(url: &str) -> QualityScore {
    let lowered = url.to_lowercase();
    let query_len = Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.query().map(str::len))
        .unwrap_or(0);
    QualityScore {
        no_scale_down: !lowered.contains("scale-down-to="),
        no_dimensions: !lowered.contains("width=") && !lowered.contains("height="),
        query_brevity: Reverse(query_len),
    }
}

const MAX_ENTITY_BYTES: usize = 10;

/// Decode the HTML entities that survive in exported URLs (`&amp;` and
/// friends, plus numeric references). Unknown or unterminated sequences
/// pass through untouched, and each entity decodes exactly once.
pub fn decode_html_entities(input: &str) -> Cow<'_, str> {
    if !input.contains('&') {
        return Cow::Borrowed(input);
    }
    let mut output = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find('&') {
        output.push_str(&rest[..start]);
        rest = &rest[start..];
        match parse_entity(rest) {
            Some((decoded, consumed)) => {
                output.push(decoded);
                rest = &rest[consumed..];
            }
            None => {
                output.push('&');
                rest = &rest[1..];
            }
        }
    }
    output.push_str(rest);
    Cow::Owned(output)
}

/// Decode one `&…;` sequence at the start of `input`. Returns the decoded
/// character and the byte length consumed.
fn parse_entity(input: &str) -> Option<(char, usize)> {
    let end = input
        .as_bytes()
        .iter()
        .take(MAX_ENTITY_BYTES)
        .position(|&byte| byte == b';')?;
    let body = &input[1..end];
    let decoded = match body {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        _ => {
            let reference = body.strip_prefix('#')?;
            let code = if let Some(hex) = reference
                .strip_prefix('x')
                .or_else(|| reference.strip_prefix('X'))
            {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                reference.parse::<u32>().ok()?
            };
            char::from_u32(code)?
        }
    };
    Some((decoded, end + 1))
}
