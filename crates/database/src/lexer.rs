//! Splits SQL text into code and non-code spans.
//!
//! Only enough of PostgreSQL's lexical rules to know where placeholders and
//! keywords can appear: string literals (including `E''` escapes and
//! dollar quoting), quoted identifiers, and both comment styles.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SpanKind {
    Code,
    Literal,
    QuotedIdent,
    Comment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Span<'a> {
    pub kind: SpanKind,
    pub text: &'a str,
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Split `sql` into consecutive spans that together cover the whole input.
///
/// An unterminated literal, identifier, or block comment runs to the end.
pub(crate) fn spans(sql: &str) -> Vec<Span<'_>> {
    let bytes = sql.as_bytes();
    let mut out = Vec::new();
    let mut code_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let start = i;
        let (kind, end) = match bytes[i] {
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                let end = sql[i..].find('\n').map_or(bytes.len(), |p| i + p);
                (SpanKind::Comment, end)
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => (SpanKind::Comment, block_comment_end(bytes, i)),
            b'\'' => {
                let escapes = i > 0
                    && matches!(bytes[i - 1], b'E' | b'e')
                    && (i < 2 || !is_ident_byte(bytes[i - 2]));
                (SpanKind::Literal, quoted_end(bytes, i, b'\'', escapes))
            }
            b'"' => (SpanKind::QuotedIdent, quoted_end(bytes, i, b'"', false)),
            b'$' => match dollar_tag(bytes, i) {
                Some(tag_len) => {
                    let tag = &sql[i..i + tag_len];
                    let body = i + tag_len;
                    let end = sql[body..]
                        .find(tag)
                        .map_or(bytes.len(), |p| body + p + tag_len);
                    (SpanKind::Literal, end)
                }
                None => {
                    i += 1;
                    continue;
                }
            },
            _ => {
                i += 1;
                continue;
            }
        };

        push(&mut out, sql, SpanKind::Code, code_start, start);
        push(&mut out, sql, kind, start, end);
        i = end;
        code_start = end;
    }
    push(&mut out, sql, SpanKind::Code, code_start, bytes.len());
    out
}

fn push<'a>(out: &mut Vec<Span<'a>>, sql: &'a str, kind: SpanKind, start: usize, end: usize) {
    if end > start {
        out.push(Span {
            kind,
            text: &sql[start..end],
        });
    }
}

/// `/* ... */`, nesting allowed.
fn block_comment_end(bytes: &[u8], start: usize) -> usize {
    let mut depth = 0usize;
    let mut i = start;
    while i + 1 < bytes.len() {
        match (bytes[i], bytes[i + 1]) {
            (b'/', b'*') => {
                depth += 1;
                i += 2;
            }
            (b'*', b'/') => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    return i;
                }
            }
            _ => i += 1,
        }
    }
    bytes.len()
}

/// End of a quoted run starting at `start`; a doubled quote is an escape.
fn quoted_end(bytes: &[u8], start: usize, quote: u8, backslash_escapes: bool) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if backslash_escapes && b == b'\\' {
            i += 2;
            continue;
        }
        if b == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// Length of a `$tag$` opener at `start`, if there is one. `$1` is a
/// positional parameter, not a tag.
fn dollar_tag(bytes: &[u8], start: usize) -> Option<usize> {
    if start > 0 && is_ident_byte(bytes[start - 1]) {
        return None;
    }
    let mut i = start + 1;
    if let Some(b) = bytes.get(i) {
        if b.is_ascii_digit() {
            return None;
        }
    }
    while let Some(&b) = bytes.get(i) {
        if b == b'$' {
            return Some(i - start + 1);
        }
        if !is_ident_byte(b) {
            return None;
        }
        i += 1;
    }
    None
}
