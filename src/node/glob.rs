//! Glob-style key matching with the same rules as Redis `SCAN MATCH`.
//!
//! Supports `*`, `?`, `[abc]`, `[^abc]`, `[a-z]` and `\` escapes.

/// Returns true if `key` matches the glob `pattern`.
pub fn glob_matches(pattern: &str, key: &str) -> bool {
    match_bytes(pattern.as_bytes(), key.as_bytes())
}

/// Star-backtracking matcher: on a mismatch, the last `*` absorbs one more
/// key byte and matching resumes right after it. Every other token consumes
/// exactly one byte, so this runs in O(pattern * key).
fn match_bytes(pattern: &[u8], key: &[u8]) -> bool {
    let (mut p, mut k) = (0, 0);
    // Pattern position after the last `*` and the key position it resumes at
    let mut star: Option<(usize, usize)> = None;

    while k < key.len() {
        if p < pattern.len() {
            if pattern[p] == b'*' {
                p += 1;
                star = Some((p, k));
                continue;
            }
            if let Some(width) = match_token(&pattern[p..], key[k]) {
                p += width;
                k += 1;
                continue;
            }
        }

        match star {
            Some((resume, absorbed)) => {
                p = resume;
                k = absorbed + 1;
                star = Some((resume, k));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&b| b == b'*')
}

/// Matches one non-`*` token at the head of `pattern` against `c`,
/// returning the token's width in the pattern.
fn match_token(pattern: &[u8], c: u8) -> Option<usize> {
    match pattern {
        [b'?', ..] => Some(1),
        [b'[', class @ ..] => {
            let (matched, rest) = match_class(class, c);
            matched.then_some(pattern.len() - rest.len())
        }
        [b'\\', escaped, ..] => (*escaped == c).then_some(2),
        [literal, ..] => (*literal == c).then_some(1),
        [] => None,
    }
}

/// Matches `c` against a character class body (after `[`), returning the
/// outcome and the pattern remaining after the closing `]`.
fn match_class(mut class: &[u8], c: u8) -> (bool, &[u8]) {
    let negated = class.first() == Some(&b'^');
    if negated {
        class = &class[1..];
    }

    let mut matched = false;
    loop {
        match class {
            [] => break,
            [b']', rest @ ..] => {
                class = rest;
                break;
            }
            [b'\\', escaped, rest @ ..] => {
                matched |= *escaped == c;
                class = rest;
            }
            [start, b'-', end, rest @ ..] if *end != b']' => {
                let (lo, hi) = if start <= end { (*start, *end) } else { (*end, *start) };
                matched |= (lo..=hi).contains(&c);
                class = rest;
            }
            [single, rest @ ..] => {
                matched |= *single == c;
                class = rest;
            }
        }
    }

    (matched != negated, class)
}
