//! URL canonicalization, byte-compatible with the Google Safe Browsing v5
//! rules.
//!
//! The procedure, in order:
//!
//! 1. Strip `\t`, `\r`, `\n`.
//! 2. Repeatedly percent-decode (at most 10 passes). Reserved characters
//!    (`:/?#[]@!$&'()*+,;=`) stay encoded with uppercase hex so the URL
//!    structure survives; unreserved characters (`A-Z a-z 0-9 - . _ ~`) are
//!    decoded to literals. Sequences with invalid hex are left alone and a
//!    stray `%` later becomes a literal `%25`.
//! 3. If the host contains percent-encoding, decode it fully before parsing.
//! 4. Parse; both a scheme and a host are required. Scheme and host are
//!    lowercased, IDN hosts go through strict IDNA, default ports drop.
//! 5. The path is normalized by splitting on literal `/` only (`%2F` is an
//!    opaque segment byte): empty and `.` segments drop, `..` pops without
//!    ever escaping the root, a trailing slash is preserved, an empty path
//!    becomes `/`.
//! 6. The fragment is dropped. Query structure (`=`, `&`) is preserved and
//!    values are re-encoded under the same unreserved rule, uppercase hex.
//!
//! The output is idempotent: canonicalizing a canonical URL returns it
//! unchanged.

use url::Url;

use crate::errors::{AppError, Result};

const MAX_DECODE_PASSES: usize = 10;

/// Canonicalize an absolute URL. Errors are `INVALID_URL` with a sub-reason
/// (empty input, incomplete percent-encoding in the original input, missing
/// scheme, missing host, unparseable host).
pub fn canonicalize(raw: &str) -> Result<String> {
    let cleaned = strip_control_chars(raw);
    if cleaned.trim().is_empty() {
        return Err(AppError::invalid_url("URL cannot be empty"));
    }

    // Incomplete sequences are only an error in the original input; after
    // decoding, stray percents are escaped instead.
    check_incomplete_percent(&cleaned)?;

    let decoded = fully_decode_percent(cleaned.as_bytes());
    let escaped = escape_stray_percent(&decoded);
    let with_host = decode_host_if_needed(&escaped)?;

    let prepared = String::from_utf8(with_host)
        .map_err(|_| AppError::invalid_url("host decodes to invalid UTF-8"))?;

    let parsed = Url::parse(&prepared).map_err(|e| match e {
        url::ParseError::RelativeUrlWithoutBase => {
            AppError::invalid_url("URL must have a scheme (http:// or https://)")
        }
        url::ParseError::EmptyHost => AppError::invalid_url("URL must have a host"),
        other => AppError::invalid_url(format!("invalid URL format: {}", other)),
    })?;

    let host = parsed
        .host_str()
        .ok_or_else(|| AppError::invalid_url("URL must have a host"))?;

    // Url::parse lowercases the scheme and host and drops default ports;
    // what remains is the GSB-specific path and query treatment.
    let mut out = String::with_capacity(prepared.len());
    out.push_str(parsed.scheme());
    out.push_str("://");
    if !parsed.username().is_empty() {
        out.push_str(parsed.username());
        if let Some(password) = parsed.password() {
            out.push(':');
            out.push_str(password);
        }
        out.push('@');
    }
    out.push_str(host);
    if let Some(port) = parsed.port() {
        out.push(':');
        out.push_str(&port.to_string());
    }
    out.push_str(&normalize_path(parsed.path()));
    if let Some(query) = parsed.query() {
        out.push('?');
        out.push_str(&reencode_query(query));
    }

    Ok(out)
}

/// The byte string SHA-256 runs over: canonical host + path + `?query`.
/// The scheme is not part of the hash input.
pub fn suffix_for_hashing(canonical: &str) -> String {
    // canonicalize() 的输出必然可解析
    let parsed = match Url::parse(canonical) {
        Ok(u) => u,
        Err(_) => return canonical.to_string(),
    };

    let mut suffix = String::new();
    if let Some(host) = parsed.host_str() {
        suffix.push_str(host);
    }
    suffix.push_str(parsed.path());
    if let Some(query) = parsed.query() {
        suffix.push('?');
        suffix.push_str(query);
    }
    suffix
}

fn strip_control_chars(s: &str) -> String {
    s.chars().filter(|&c| c != '\t' && c != '\r' && c != '\n').collect()
}

fn check_incomplete_percent(s: &str) -> Result<()> {
    let bytes = s.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'%' && i + 2 >= bytes.len() {
            return Err(AppError::invalid_url(format!(
                "incomplete percent-encoding at position {}",
                i
            )));
        }
    }
    Ok(())
}

/// Reserved per RFC 3986 (gen-delims + sub-delims); these stay encoded so
/// decoding cannot change the URL structure.
fn is_reserved(b: u8) -> bool {
    matches!(
        b,
        b':' | b'/'
            | b'?'
            | b'#'
            | b'['
            | b']'
            | b'@'
            | b'!'
            | b'$'
            | b'&'
            | b'\''
            | b'('
            | b')'
            | b'*'
            | b'+'
            | b','
            | b';'
            | b'='
    )
}

fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~')
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

fn push_encoded(out: &mut Vec<u8>, b: u8) {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    out.push(b'%');
    out.push(HEX[(b >> 4) as usize]);
    out.push(HEX[(b & 0x0F) as usize]);
}

/// One decode pass. Decodes printable non-reserved ASCII to literals; keeps
/// reserved and non-ASCII bytes encoded, normalized to uppercase hex.
/// Returns whether the output differs from the input.
fn decode_percent_once(input: &[u8]) -> (Vec<u8>, bool) {
    let mut out = Vec::with_capacity(input.len());
    let mut changed = false;

    let mut i = 0;
    while i < input.len() {
        if input[i] == b'%' && i + 2 < input.len() {
            if let (Some(hi), Some(lo)) = (hex_value(input[i + 1]), hex_value(input[i + 2])) {
                let byte = (hi << 4) | lo;
                if !is_reserved(byte) && (0x20..0x7F).contains(&byte) {
                    // 可见 ASCII 且非保留字符：解码为字面量
                    out.push(byte);
                    changed = true;
                } else {
                    // 保留字符 / 控制字符 / 高位字节：保持编码，十六进制统一大写
                    let before = out.len();
                    push_encoded(&mut out, byte);
                    if &out[before..] != &input[i..i + 3] {
                        changed = true;
                    }
                }
                i += 3;
                continue;
            }
        }
        out.push(input[i]);
        i += 1;
    }

    (out, changed)
}

fn fully_decode_percent(input: &[u8]) -> Vec<u8> {
    let mut current = input.to_vec();
    for _ in 0..MAX_DECODE_PASSES {
        let (next, changed) = decode_percent_once(&current);
        if !changed {
            return current;
        }
        current = next;
    }
    current
}

/// After decoding there may be literal `%` bytes that are not part of a
/// valid sequence; escape them so parsing cannot choke. Only applies from
/// the path onwards, the host is handled separately.
fn escape_stray_percent(input: &[u8]) -> Vec<u8> {
    let Some(path_start) = find_path_start(input) else {
        return input.to_vec();
    };

    let mut out = input[..path_start].to_vec();
    let suffix = &input[path_start..];

    let mut i = 0;
    while i < suffix.len() {
        if suffix[i] == b'%' {
            if i + 2 < suffix.len()
                && hex_value(suffix[i + 1]).is_some()
                && hex_value(suffix[i + 2]).is_some()
            {
                out.extend_from_slice(&suffix[i..i + 3]);
                i += 3;
                continue;
            }
            out.extend_from_slice(b"%25");
            i += 1;
        } else {
            out.push(suffix[i]);
            i += 1;
        }
    }

    out
}

fn find_path_start(input: &[u8]) -> Option<usize> {
    let scheme_end = input.windows(3).position(|w| w == b"://")?;
    let after = scheme_end + 3;
    input[after..].iter().position(|&b| b == b'/').map(|p| after + p)
}

/// Hosts arrive percent-encoded in the wild (`http://%31%36%38...`). Decode
/// every sequence in the host portion and run strict IDNA on non-ASCII
/// results before the URL parser ever sees it.
fn decode_host_if_needed(input: &[u8]) -> Result<Vec<u8>> {
    let Some(scheme_end) = input.windows(3).position(|w| w == b"://") else {
        return Ok(input.to_vec());
    };
    let host_start = scheme_end + 3;

    let mut host_end = host_start;
    while host_end < input.len() {
        match input[host_end] {
            b'/' | b':' | b'?' | b'#' => break,
            _ => host_end += 1,
        }
    }

    let host = &input[host_start..host_end];
    let decoded_host = if host.contains(&b'%') {
        let mut out = Vec::with_capacity(host.len());
        let mut i = 0;
        while i < host.len() {
            if host[i] == b'%' && i + 2 < host.len() {
                if let (Some(hi), Some(lo)) = (hex_value(host[i + 1]), hex_value(host[i + 2])) {
                    out.push((hi << 4) | lo);
                    i += 3;
                    continue;
                }
            }
            out.push(host[i]);
            i += 1;
        }
        out
    } else {
        host.to_vec()
    };

    let host_str = String::from_utf8(decoded_host)
        .map_err(|_| AppError::invalid_url("host is not valid UTF-8"))?;

    let ascii_host = if host_str.is_ascii() {
        host_str
    } else {
        idna::domain_to_ascii_strict(&host_str)
            .map_err(|e| AppError::invalid_url(format!("invalid host: {}", e)))?
    };

    let mut result = input[..host_start].to_vec();
    result.extend_from_slice(ascii_host.as_bytes());
    result.extend_from_slice(&input[host_end..]);
    Ok(result)
}

/// Normalize an encoded path. Splits on literal `/` only; `%2F` never
/// becomes a separator. Empty and `.` segments drop, `..` pops (never past
/// root), a trailing slash survives.
fn normalize_path(encoded_path: &str) -> String {
    if encoded_path.is_empty() || encoded_path == "/" {
        return "/".to_string();
    }

    let has_trailing_slash = encoded_path.ends_with('/');

    let mut stack: Vec<&str> = Vec::new();
    for segment in encoded_path.split('/') {
        let decoded = percent_decode_lossy(segment);
        if segment.is_empty() || decoded == "." {
            continue;
        }
        if decoded == ".." {
            stack.pop();
        } else {
            stack.push(segment);
        }
    }

    if stack.is_empty() {
        return "/".to_string();
    }

    let mut result = String::with_capacity(encoded_path.len());
    for segment in &stack {
        result.push('/');
        result.push_str(segment);
    }
    if has_trailing_slash {
        result.push('/');
    }
    result
}

/// Decode a path segment just far enough to recognize `.` / `..`.
fn percent_decode_lossy(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                out.push((hi << 4) | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Re-encode the query: unreserved bytes and the `=` / `&` structure stay
/// literal, everything else is percent-encoded uppercase.
fn reencode_query(query: &str) -> String {
    let bytes = query.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());

    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                let byte = (hi << 4) | lo;
                if is_unreserved(byte) {
                    out.push(byte);
                } else {
                    push_encoded(&mut out, byte);
                }
                i += 3;
                continue;
            }
        }

        if is_unreserved(b) || b == b'=' || b == b'&' {
            out.push(b);
        } else {
            push_encoded(&mut out, b);
        }
        i += 1;
    }

    String::from_utf8(out).expect("query re-encoding emits ASCII")
}
