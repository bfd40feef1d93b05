//! Blob key generation and upload metadata hygiene.
//!
//! Blob keys are `{uuidv7}_{sanitized original name}`: time-ordered,
//! collision-resistant, and safe to use as a single path component.

use uuid::Uuid;

use crate::defaults;

/// Reduce a client-supplied file name to a single safe path component.
///
/// Path components are dropped, whitespace runs become `_`, reserved and
/// control characters become `_`, and the result is capped at
/// `ORIGINAL_NAME_MAX_LEN` characters with the extension preserved.
pub fn sanitize_filename(filename: &str) -> String {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename).trim();

    let mut sanitized = String::with_capacity(name.len());
    let mut in_space = false;
    for c in name.chars() {
        if c.is_whitespace() {
            if !in_space {
                sanitized.push('_');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        sanitized.push(match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' | '%' => '_',
            c if c.is_control() => '_',
            c => c,
        });
    }

    let sanitized = sanitized.trim_start_matches('.');
    if sanitized.is_empty() {
        return "unnamed_file".to_string();
    }

    truncate_preserving_extension(sanitized, defaults::ORIGINAL_NAME_MAX_LEN)
}

fn truncate_preserving_extension(name: &str, max_chars: usize) -> String {
    let total = name.chars().count();
    if total <= max_chars {
        return name.to_string();
    }
    match name.rfind('.') {
        Some(dot) if name[dot..].chars().count() < max_chars => {
            let ext = &name[dot..];
            let keep = max_chars - ext.chars().count();
            let stem: String = name[..dot].chars().take(keep).collect();
            format!("{}{}", stem, ext)
        }
        _ => name.chars().take(max_chars).collect(),
    }
}

/// Cut `name` to at most `max_bytes` bytes on a character boundary,
/// keeping the extension when it fits.
fn truncate_to_bytes(name: &str, max_bytes: usize) -> String {
    if name.len() <= max_bytes {
        return name.to_string();
    }
    match name.rfind('.') {
        Some(dot) if dot > 0 && name.len() - dot < max_bytes => {
            let ext = &name[dot..];
            let stem = prefix_within(&name[..dot], max_bytes - ext.len());
            format!("{}{}", stem, ext)
        }
        _ => prefix_within(name, max_bytes).to_string(),
    }
}

fn prefix_within(s: &str, max_bytes: usize) -> &str {
    let mut end = max_bytes.min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Fresh blob key for an upload.
pub fn generate_blob_key(original_name: &str) -> String {
    let name = truncate_to_bytes(
        &sanitize_filename(original_name),
        defaults::BLOB_KEY_NAME_MAX_BYTES,
    );
    format!("{}_{}", Uuid::now_v7().simple(), name)
}

/// Whether a key is a plain file name that cannot escape the blob directory.
pub fn is_valid_blob_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= 512
        && key != "."
        && key != ".."
        && !key.starts_with('.')
        && !key.contains(['/', '\\', '\0'])
        && !key.chars().any(char::is_control)
}

/// Choose the MIME type to record for an upload.
///
/// A well-formed client claim wins, as the client knows what it sent.
/// Otherwise the bytes are sniffed, then the extension is consulted,
/// then `application/octet-stream`.
pub fn resolve_mime_type(filename: &str, data: &[u8], claimed: Option<&str>) -> String {
    if let Some(claimed) = claimed.map(str::trim) {
        if is_valid_mime_type(claimed) && claimed != defaults::FALLBACK_MIME_TYPE {
            return claimed.to_ascii_lowercase();
        }
    }

    if let Some(kind) = infer::get(data) {
        return kind.mime_type().to_string();
    }

    filename
        .rsplit_once('.')
        .and_then(|(_, ext)| mime_from_extension(ext))
        .unwrap_or(defaults::FALLBACK_MIME_TYPE)
        .to_string()
}

/// Text formats that carry no magic bytes, keyed by extension.
fn mime_from_extension(ext: &str) -> Option<&'static str> {
    match ext.to_ascii_lowercase().as_str() {
        "txt" | "log" => Some("text/plain"),
        "csv" => Some("text/csv"),
        "md" | "markdown" => Some("text/markdown"),
        "html" | "htm" => Some("text/html"),
        "json" => Some("application/json"),
        "xml" => Some("application/xml"),
        "yaml" | "yml" => Some("application/yaml"),
        "toml" => Some("application/toml"),
        "svg" => Some("image/svg+xml"),
        "rs" => Some("text/x-rust"),
        "py" => Some("text/x-python"),
        "js" | "mjs" => Some("text/javascript"),
        "ts" => Some("text/typescript"),
        "go" => Some("text/x-go"),
        "c" | "h" => Some("text/x-c"),
        "sql" => Some("application/sql"),
        _ => None,
    }
}

/// Validate a MIME type as `type/subtype` made of RFC 2045 token characters.
pub fn is_valid_mime_type(mime: &str) -> bool {
    let Some((media_type, subtype)) = mime.split_once('/') else {
        return false;
    };
    let is_token_char = |c: char| -> bool {
        c.is_ascii_alphanumeric() || matches!(c, '!' | '#' | '$' | '&' | '-' | '^' | '_' | '.' | '+')
    };
    !media_type.is_empty()
        && !subtype.is_empty()
        && media_type.chars().all(is_token_char)
        && subtype.chars().all(is_token_char)
}
