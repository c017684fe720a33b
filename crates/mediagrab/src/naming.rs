//! Output naming: template rendering and cross-platform filename sanitizing.

use std::path::PathBuf;

use crate::metadata::ItemMetadata;

/// Characters that are invalid in Windows filenames
const WINDOWS_INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Windows reserved filenames (case-insensitive)
const WINDOWS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Make `input` usable as one path component on every platform.
///
/// Control and Windows-invalid characters become `_` (runs collapse to one),
/// leading/trailing spaces and dots are trimmed, reserved device names get a
/// `_` prefix and an empty result becomes `unnamed`.
pub fn sanitize_filename(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut last_was_replacement = false;

    for c in input.chars() {
        if c.is_control() || WINDOWS_INVALID_CHARS.contains(&c) {
            if !last_was_replacement {
                result.push('_');
                last_was_replacement = true;
            }
        } else {
            result.push(c);
            last_was_replacement = false;
        }
    }

    let trimmed = result.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        return "unnamed".to_owned();
    }

    let upper = trimmed.to_uppercase();
    let reserved = WINDOWS_RESERVED_NAMES
        .iter()
        .any(|name| upper == *name || upper.starts_with(&format!("{name}.")));
    if reserved {
        format!("_{trimmed}")
    } else {
        trimmed.to_owned()
    }
}

/// Render an output template into a relative path.
///
/// Placeholders: `{title}`, `{author}`, `{id}`, `{ext}`. Values are sanitized
/// before substitution, so only literal `/` in the template creates
/// directories. Unknown placeholders are kept verbatim. When the template has
/// no `{ext}` the extension is appended.
pub fn render_template(template: &str, meta: &ItemMetadata, ext: &str) -> PathBuf {
    let title = meta
        .title
        .as_deref()
        .or(meta.id.as_deref())
        .map(str::to_owned)
        .unwrap_or_else(|| title_from_url(&meta.source_url));
    let author = meta.author.as_deref().unwrap_or("unknown");
    let id = meta.id.as_deref().unwrap_or("unknown");

    let mut rendered = template
        .replace("{title}", &sanitize_filename(&title))
        .replace("{author}", &sanitize_filename(author))
        .replace("{id}", &sanitize_filename(id))
        .replace("{ext}", ext);
    if !template.contains("{ext}") && !ext.is_empty() {
        rendered.push('.');
        rendered.push_str(ext);
    }

    rendered
        .split('/')
        .filter(|part| !part.is_empty())
        .map(|part| if part == ".." { "_".to_owned() } else { sanitize_filename(part) })
        .collect()
}

/// Last path segment of `url` without its extension.
fn title_from_url(url: &str) -> String {
    let Ok(parsed) = url::Url::parse(url) else {
        return "unnamed".to_owned();
    };
    let segment = parsed
        .path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .unwrap_or("");
    let stem = segment.rsplit_once('.').map_or(segment, |(stem, _)| stem);
    if stem.is_empty() {
        parsed.host_str().unwrap_or("unnamed").to_owned()
    } else {
        stem.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(title: Option<&str>, author: Option<&str>) -> ItemMetadata {
        ItemMetadata {
            title: title.map(str::to_owned),
            author: author.map(str::to_owned),
            id: None,
            source_url: "https://cdn.example.com/media/clip-01.mp4?sig=x".to_owned(),
        }
    }

    #[test]
    fn sanitizes_invalid_and_reserved_names() {
        assert_eq!(sanitize_filename(""), "unnamed");
        assert_eq!(sanitize_filename("hello???world"), "hello_world");
        assert_eq!(sanitize_filename("...hello..."), "hello");
        assert_eq!(sanitize_filename("CON.txt"), "_CON.txt");
        assert_eq!(sanitize_filename("观看一只青蛙?"), "观看一只青蛙_");
        assert_eq!(sanitize_filename("test\x1Ffile"), "test_file");
    }

    #[test]
    fn sanitizing_is_idempotent() {
        for input in ["hello?world", "CON", "  test  ", "...dots..."] {
            let once = sanitize_filename(input);
            assert_eq!(once, sanitize_filename(&once), "{input}");
        }
    }

    #[test]
    fn renders_all_placeholders() {
        let mut item = meta(Some("A/B: live"), Some("Band"));
        item.id = Some("xyz".into());
        let path = render_template("{author} - {title} [{id}].{ext}", &item, "mp4");
        assert_eq!(path, PathBuf::from("Band - A_B_ live [xyz].mp4"));
    }

    #[test]
    fn template_slashes_create_directories() {
        let path = render_template("{author}/{title}.{ext}", &meta(Some("Song"), Some("Artist")), "mp3");
        assert_eq!(path, PathBuf::from("Artist").join("Song.mp3"));
    }

    #[test]
    fn title_falls_back_to_url_stem() {
        let path = render_template("{title}.{ext}", &meta(None, None), "mp4");
        assert_eq!(path, PathBuf::from("clip-01.mp4"));
    }

    #[test]
    fn extension_appended_when_template_omits_it() {
        let path = render_template("{title}", &meta(Some("x"), None), "webm");
        assert_eq!(path, PathBuf::from("x.webm"));
    }

    #[test]
    fn parent_components_are_neutralized() {
        let path = render_template("../{title}.{ext}", &meta(Some("x"), None), "mp4");
        assert_eq!(path, PathBuf::from("_").join("x.mp4"));
    }
}
