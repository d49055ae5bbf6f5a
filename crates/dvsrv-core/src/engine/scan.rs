//! Import site scanner.
//!
//! Finds the specifiers a module imports without parsing it, and reports
//! the byte span of each specifier so the link engine can rewrite it in
//! place. Comments and string literals are skipped.

use crate::plugin::ResolveKind;
use std::ops::Range;

/// One import site in a module's source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSite {
    /// Specifier exactly as written.
    pub specifier: String,
    /// Byte offset of the first character inside the quotes.
    pub start: usize,
    /// Byte offset one past the last character inside the quotes.
    pub end: usize,
    pub kind: ResolveKind,
}

/// Scan JavaScript/TypeScript for static imports, `export ... from`
/// re-exports, side-effect imports and dynamic `import("...")` calls.
///
/// Sites are returned in source order. Dynamic imports with template
/// substitutions are not import sites.
#[must_use]
pub fn scan_script(source: &str) -> Vec<ImportSite> {
    let b = source.as_bytes();
    let len = b.len();
    let mut sites = Vec::new();
    let mut i = 0;

    while i < len {
        match b[i] {
            b'/' if i + 1 < len && b[i + 1] == b'/' => {
                i = skip_line_comment(b, i);
                continue;
            }
            b'/' if i + 1 < len && b[i + 1] == b'*' => {
                i = skip_block_comment(b, i);
                continue;
            }
            b'"' | b'\'' | b'`' => {
                i = skip_string(b, i);
                continue;
            }
            _ => {}
        }

        if matches_keyword(b, i, b"import") {
            if let Some((site, end)) = scan_import(source, i + 6) {
                sites.push(site);
                i = end;
                continue;
            }
        } else if matches_keyword(b, i, b"export") {
            if let Some((site, end)) = scan_export_from(source, i + 6) {
                sites.push(site);
                i = end;
                continue;
            }
        }

        i += 1;
    }

    sites
}

/// Scan CSS for `@import "..."` and `@import url(...)`.
#[must_use]
pub fn scan_css(source: &str) -> Vec<ImportSite> {
    let b = source.as_bytes();
    let len = b.len();
    let mut sites = Vec::new();
    let mut i = 0;

    while i < len {
        match b[i] {
            b'/' if i + 1 < len && b[i + 1] == b'*' => {
                i = skip_block_comment(b, i);
                continue;
            }
            b'"' | b'\'' => {
                i = skip_string(b, i);
                continue;
            }
            b'@' if b[i..].starts_with(b"@import") => {
                let mut j = skip_ws(b, i + 7);
                if b[j..].starts_with(b"url(") {
                    j = skip_ws(b, j + 4);
                    if let Some((start, end, next)) = read_string(b, j) {
                        sites.push(site(source, start, end, ResolveKind::CssImport));
                        i = next;
                        continue;
                    }
                    let start = j;
                    while j < len && b[j] != b')' && b[j] != b'\n' {
                        j += 1;
                    }
                    let mut end = j;
                    while end > start && b[end - 1].is_ascii_whitespace() {
                        end -= 1;
                    }
                    if end > start {
                        sites.push(site(source, start, end, ResolveKind::CssImport));
                    }
                    i = j;
                    continue;
                }
                if let Some((start, end, next)) = read_string(b, j) {
                    sites.push(site(source, start, end, ResolveKind::CssImport));
                    i = next;
                    continue;
                }
            }
            _ => {}
        }
        i += 1;
    }

    sites
}

/// Byte ranges of a script that are code rather than comments or literal
/// text. Template substitutions (`${...}`) count as code.
#[must_use]
pub fn code_ranges(source: &str) -> Vec<Range<usize>> {
    let b = source.as_bytes();
    let len = b.len();
    let mut ranges = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < len {
        let literal = match b[i] {
            b'/' => i + 1 < len && (b[i + 1] == b'/' || b[i + 1] == b'*'),
            b'"' | b'\'' | b'`' => true,
            _ => false,
        };
        if !literal {
            i += 1;
            continue;
        }

        if i > start {
            ranges.push(start..i);
        }
        i = match b[i] {
            b'`' => skip_template(b, i, &mut ranges),
            b'"' | b'\'' => skip_string(b, i),
            _ if b[i + 1] == b'/' => skip_line_comment(b, i),
            _ => skip_block_comment(b, i),
        };
        start = i;
    }

    if start < len {
        ranges.push(start..len);
    }
    ranges
}

/// 1-based line number of a byte offset.
#[must_use]
pub fn line_of(source: &str, offset: usize) -> usize {
    source.as_bytes()[..offset.min(source.len())]
        .iter()
        .filter(|&&c| c == b'\n')
        .count()
        + 1
}

fn site(source: &str, start: usize, end: usize, kind: ResolveKind) -> ImportSite {
    ImportSite {
        specifier: source[start..end].to_string(),
        start,
        end,
        kind,
    }
}

fn is_ident(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'$'
}

/// Keyword at `pos` with identifier boundaries on both sides. A preceding
/// `.` rules out member access such as `loader.import(...)`.
fn matches_keyword(b: &[u8], pos: usize, keyword: &[u8]) -> bool {
    if !b[pos..].starts_with(keyword) {
        return false;
    }
    if pos > 0 && (is_ident(b[pos - 1]) || b[pos - 1] == b'.') {
        return false;
    }
    let after = pos + keyword.len();
    !(after < b.len() && is_ident(b[after]))
}

fn skip_ws(b: &[u8], mut i: usize) -> usize {
    while i < b.len() && b[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

fn skip_line_comment(b: &[u8], mut i: usize) -> usize {
    while i < b.len() && b[i] != b'\n' {
        i += 1;
    }
    i
}

fn skip_block_comment(b: &[u8], mut i: usize) -> usize {
    i += 2;
    while i + 1 < b.len() && !(b[i] == b'*' && b[i + 1] == b'/') {
        i += 1;
    }
    (i + 2).min(b.len())
}

/// Skip a string literal starting at the quote at `i`.
fn skip_string(b: &[u8], mut i: usize) -> usize {
    let quote = b[i];
    i += 1;
    while i < b.len() && b[i] != quote {
        if b[i] == b'\\' {
            i += 1;
        } else if b[i] == b'\n' && quote != b'`' {
            break;
        }
        i += 1;
    }
    (i + 1).min(b.len())
}

/// Skip a template literal starting at the backtick at `i`, recording each
/// substitution body in `code`.
fn skip_template(b: &[u8], mut i: usize, code: &mut Vec<Range<usize>>) -> usize {
    i += 1;
    while i < b.len() && b[i] != b'`' {
        if b[i] == b'\\' {
            i += 2;
            continue;
        }
        if b[i] == b'$' && b.get(i + 1) == Some(&b'{') {
            let start = i + 2;
            let mut depth = 1;
            i = start;
            while i < b.len() {
                match b[i] {
                    b'{' => depth += 1,
                    b'}' => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    _ => {}
                }
                i += 1;
            }
            code.push(start..i.min(b.len()));
        }
        i += 1;
    }
    (i + 1).min(b.len())
}

/// Read a quoted specifier at `i`: `(content start, content end, next index)`.
fn read_string(b: &[u8], i: usize) -> Option<(usize, usize, usize)> {
    let quote = *b.get(i)?;
    if !matches!(quote, b'"' | b'\'' | b'`') {
        return None;
    }
    let start = i + 1;
    let mut j = start;
    while j < b.len() && b[j] != quote {
        match b[j] {
            b'\\' => j += 1,
            b'\n' => return None,
            b'$' if quote == b'`' && b.get(j + 1) == Some(&b'{') => return None,
            _ => {}
        }
        j += 1;
    }
    if j >= b.len() {
        return None;
    }
    Some((start, j, j + 1))
}

/// Scan past `from` (at most `limit` bytes ahead) and read the specifier.
fn scan_from_clause(b: &[u8], mut i: usize, limit: usize) -> Option<(usize, usize, usize)> {
    let limit = limit.min(b.len());
    while i < limit {
        match b[i] {
            b';' => return None,
            b'"' | b'\'' | b'`' => return None,
            b'/' if i + 1 < b.len() && b[i + 1] == b'*' => {
                i = skip_block_comment(b, i);
                continue;
            }
            b'/' if i + 1 < b.len() && b[i + 1] == b'/' => {
                i = skip_line_comment(b, i);
                continue;
            }
            _ => {}
        }
        if matches_keyword(b, i, b"from") {
            let j = skip_ws(b, i + 4);
            if let Some(found) = read_string(b, j) {
                return Some(found);
            }
        }
        i += 1;
    }
    None
}

fn scan_import(source: &str, start: usize) -> Option<(ImportSite, usize)> {
    let b = source.as_bytes();
    let i = skip_ws(b, start);

    match *b.get(i)? {
        b'(' => {
            let j = skip_ws(b, i + 1);
            let (s, e, next) = read_string(b, j)?;
            Some((site(source, s, e, ResolveKind::DynamicImport), next))
        }
        // import.meta
        b'.' => None,
        b'"' | b'\'' => {
            let (s, e, next) = read_string(b, i)?;
            Some((site(source, s, e, ResolveKind::Import), next))
        }
        _ => {
            let (s, e, next) = scan_from_clause(b, i, i + 2000)?;
            Some((site(source, s, e, ResolveKind::Import), next))
        }
    }
}

fn scan_export_from(source: &str, start: usize) -> Option<(ImportSite, usize)> {
    let b = source.as_bytes();
    let mut i = skip_ws(b, start);
    if matches_keyword(b, i, b"type") {
        i = skip_ws(b, i + 4);
    }

    match *b.get(i)? {
        b'*' => {
            let (s, e, next) = scan_from_clause(b, i + 1, i + 500)?;
            Some((site(source, s, e, ResolveKind::Import), next))
        }
        b'{' => {
            let close = i + b[i..].iter().position(|&c| c == b'}')?;
            let j = skip_ws(b, close + 1);
            if !matches_keyword(b, j, b"from") {
                return None;
            }
            let (s, e, next) = read_string(b, skip_ws(b, j + 4))?;
            Some((site(source, s, e, ResolveKind::Import), next))
        }
        _ => None,
    }
}
