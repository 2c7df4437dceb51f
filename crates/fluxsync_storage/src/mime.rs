//! Mime type to file extension mapping for blob files.

/// Known mime types and the extension their blobs are stored with.
const EXTENSIONS: &[(&str, &str)] = &[
    ("image/jpeg", ".jpg"),
    ("image/jpg", ".jpg"),
    ("image/png", ".png"),
    ("image/gif", ".gif"),
    ("image/bmp", ".bmp"),
    ("image/tiff", ".tiff"),
    ("image/svg+xml", ".svg"),
    ("application/pdf", ".pdf"),
    ("application/zip", ".zip"),
    ("application/msword", ".doc"),
    ("application/vnd.ms-excel", ".xls"),
    ("application/xml", ".xml"),
    ("application/json", ".json"),
    ("application/vnd.evernote.ink", ".ink"),
    ("audio/wav", ".wav"),
    ("audio/x-wav", ".wav"),
    ("audio/mpeg", ".mp3"),
    ("audio/amr", ".amr"),
    ("video/mp4", ".mp4"),
    ("video/quicktime", ".mov"),
    ("text/plain", ".txt"),
    ("text/html", ".html"),
    ("text/xml", ".xml"),
    ("text/csv", ".csv"),
];

/// Returns the file extension (with its leading dot) for a mime type.
///
/// Parameters such as `; charset=utf-8` are ignored and matching is
/// case-insensitive. Unknown or empty mime types map to an empty string so
/// the blob is stored without an extension.
///
/// ```rust
/// use fluxsync_storage::extension_for;
///
/// assert_eq!(extension_for(Some("image/PNG")), ".png");
/// assert_eq!(extension_for(Some("text/plain; charset=utf-8")), ".txt");
/// assert_eq!(extension_for(Some("application/x-unknown")), "");
/// assert_eq!(extension_for(None), "");
/// ```
#[must_use]
pub fn extension_for(mime: Option<&str>) -> &'static str {
    let Some(mime) = mime else {
        return "";
    };
    let essence = mime.split(';').next().unwrap_or("").trim();
    if essence.is_empty() {
        return "";
    }

    EXTENSIONS
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(essence))
        .map_or("", |(_, ext)| ext)
}
