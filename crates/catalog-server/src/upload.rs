use std::path::Path;

/// Extensions accepted for upload.
pub const ALLOWED_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm"];

/// Containers browsers play natively; everything else needs conversion or a
/// live transcode before it is watchable.
pub const STREAMABLE_EXTENSIONS: &[&str] = &["mp4", "webm"];

pub fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
}

pub fn is_allowed(extension: &str) -> bool {
    ALLOWED_EXTENSIONS.contains(&extension)
}

pub fn is_streamable(extension: &str) -> bool {
    STREAMABLE_EXTENSIONS.contains(&extension)
}

/// Keeps the user's name readable while stripping path components and any
/// character that could escape the upload directory or break a header.
pub fn sanitize_filename(name: &str) -> String {
    let base = match name.rsplit(['/', '\\']).next() {
        Some(base) => base,
        None => name,
    };

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').to_string();

    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

/// Display title: the sanitized name without its extension.
pub fn title_of(sanitized_name: &str) -> String {
    Path::new(sanitized_name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| sanitized_name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_are_lowercased() {
        assert_eq!(extension_of("Movie.MKV"), Some("mkv".to_string()));
        assert_eq!(extension_of("noext"), None);
    }

    #[test]
    fn allow_set_matches_the_upload_policy() {
        for ext in ["mp4", "avi", "mov", "mkv", "webm"] {
            assert!(is_allowed(ext), "{ext} should be allowed");
        }
        assert!(!is_allowed("exe"));
        assert!(!is_allowed("txt"));
    }

    #[test]
    fn only_browser_native_containers_are_streamable() {
        assert!(is_streamable("mp4"));
        assert!(is_streamable("webm"));
        assert!(!is_streamable("mkv"));
        assert!(!is_streamable("avi"));
    }

    #[test]
    fn sanitizer_strips_path_components() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\clip.mp4"), "clip.mp4");
        assert_eq!(sanitize_filename("dir/clip.mp4"), "clip.mp4");
    }

    #[test]
    fn sanitizer_replaces_odd_characters() {
        assert_eq!(sanitize_filename("my movie (1).mp4"), "my movie _1_.mp4");
        assert_eq!(sanitize_filename("ünïcode.mkv"), "_n_code.mkv");
    }

    #[test]
    fn sanitizer_never_returns_an_empty_or_hidden_name() {
        assert_eq!(sanitize_filename(""), "upload");
        assert_eq!(sanitize_filename("..."), "upload");
        assert_eq!(sanitize_filename(".hidden"), "hidden");
    }

    #[test]
    fn titles_drop_the_extension() {
        assert_eq!(title_of("clip.mp4"), "clip");
        assert_eq!(title_of("noext"), "noext");
    }
}
