//! Note header conventions and filename derivation
//!
//! Every synced note starts with a front-matter block delimited by `---`
//! lines. The block carries the remote id tag the detector and vault
//! listing rely on; everything below it is the note body the user may
//! edit freely. Metadata-only rewrites of the header must not register as
//! content changes, so the fingerprinter strips it via [`strip_header`].

use chrono::{DateTime, NaiveDate, Utc};

use minutes_remote::RemoteDocument;

/// Front-matter delimiter line
pub const HEADER_MARKER: &str = "---";
/// Header key carrying the remote id
pub const ID_KEY: &str = "minutes-id";
/// Header key carrying the remote update timestamp
pub const UPDATED_KEY: &str = "minutes-updated";

/// Render a remote document into its full on-disk note text.
pub fn render_note(doc: &RemoteDocument) -> String {
    render_with_body(doc, &doc.render_body())
}

/// Render a document's header over an arbitrary body (used by merges,
/// which keep user content the remote render would discard).
pub fn render_with_body(doc: &RemoteDocument, body: &str) -> String {
    let mut text = String::new();
    text.push_str(HEADER_MARKER);
    text.push('\n');
    text.push_str(&format!("{ID_KEY}: {}\n", doc.id));
    text.push_str(&format!("{UPDATED_KEY}: {}\n", doc.updated_at.to_rfc3339()));
    if let Some(folder) = &doc.source_folder {
        text.push_str(&format!("minutes-folder: {folder}\n"));
    }
    if !doc.tags.is_empty() {
        text.push_str(&format!("tags: [{}]\n", doc.tags.join(", ")));
    }
    text.push_str(HEADER_MARKER);
    text.push_str("\n\n");
    text.push_str(body);
    text
}

/// Return the note text with any leading front-matter block removed.
pub fn strip_header(text: &str) -> &str {
    let Some(rest) = text.strip_prefix(HEADER_MARKER) else {
        return text;
    };
    let Some(rest) = rest.strip_prefix('\n') else {
        return text;
    };

    let mut offset = HEADER_MARKER.len() + 1;
    for line in rest.split_inclusive('\n') {
        offset += line.len();
        if line.trim_end_matches(['\r', '\n']) == HEADER_MARKER {
            return text[offset..].trim_start_matches('\n');
        }
    }
    // Unterminated header: treat the whole text as body.
    text
}

/// Parse the remote id tag out of a note's header, if present.
pub fn parse_remote_id(text: &str) -> Option<String> {
    parse_header_value(text, ID_KEY)
}

fn parse_header_value(text: &str, key: &str) -> Option<String> {
    let rest = text.strip_prefix(HEADER_MARKER)?.strip_prefix('\n')?;
    for line in rest.lines() {
        if line.trim_end() == HEADER_MARKER {
            return None;
        }
        if let Some((k, v)) = line.split_once(':') {
            if k.trim() == key {
                let v = v.trim();
                if !v.is_empty() {
                    return Some(v.to_string());
                }
            }
        }
    }
    None
}

/// Derive a note filename from a document title and date.
///
/// Characters the common filesystems reject are replaced. The result is
/// not checked for collisions; callers probe and uniquify themselves.
pub fn filename_for(title: &str, date: NaiveDate, include_date: bool) -> String {
    let sanitized = sanitize_title(title);
    if include_date {
        format!("{} {}.md", date.format("%Y-%m-%d"), sanitized)
    } else {
        format!("{sanitized}.md")
    }
}

/// Derive the vault-relative path for a document.
pub fn note_path(doc: &RemoteDocument, include_date: bool) -> String {
    let filename = filename_for(&doc.title, doc.created_at.date_naive(), include_date);
    match &doc.source_folder {
        Some(folder) if !folder.is_empty() => format!("{}/{}", sanitize_title(folder), filename),
        _ => filename,
    }
}

/// A sibling path for the Nth duplicate of a filename (`note 1.md`, ...).
pub fn numbered_variant(path: &str, n: usize) -> String {
    match path.rsplit_once(".md") {
        Some((stem, _)) => format!("{stem} {n}.md"),
        None => format!("{path} {n}"),
    }
}

/// A timestamp-suffixed backup path next to the original.
pub fn backup_path(path: &str, at: DateTime<Utc>) -> String {
    let stamp = at.format("%Y%m%dT%H%M%S");
    match path.rsplit_once(".md") {
        Some((stem, _)) => format!("{stem}.sync-backup.{stamp}.md"),
        None => format!("{path}.sync-backup.{stamp}"),
    }
}

fn sanitize_title(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '#' | '^' | '[' | ']' => ' ',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        "Untitled".to_string()
    } else {
        collapsed
    }
}
