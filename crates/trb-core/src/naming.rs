//! Filename and caption rewriting from per-user rules.
//!
//! Deletions always run before replacements, in both the filename and the
//! caption path. Within each step words are applied longest first (ties broken
//! lexically), so the result never depends on how the rules were stored.

use std::path::{Path, PathBuf};

use crate::{messaging::types::MediaKind, prefs::UserPreferences, Result};

pub const VIDEO_EXTS: &[&str] = &[
    "mp4", "mov", "avi", "mkv", "flv", "wmv", "webm", "mpg", "mpeg", "3gp", "ts", "m4v", "f4v",
    "vob",
];
pub const IMAGE_EXTS: &[&str] = &["jpg", "jpeg", "png", "webp"];
pub const AUDIO_EXTS: &[&str] = &["mp3", "wav", "flac", "aac", "m4a", "ogg"];

const CANONICAL_VIDEO_EXT: &str = "mp4";
const FALLBACK_STEM: &str = "media";

fn extension_lower(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Upload kind for a local file, judged by extension.
pub fn media_kind_for_path(path: &Path) -> MediaKind {
    let Some(ext) = extension_lower(path) else {
        return MediaKind::Document;
    };
    let ext = ext.as_str();
    if VIDEO_EXTS.contains(&ext) {
        MediaKind::Video
    } else if IMAGE_EXTS.contains(&ext) {
        MediaKind::Photo
    } else if AUDIO_EXTS.contains(&ext) {
        MediaKind::Audio
    } else {
        MediaKind::Document
    }
}

fn canonical_order<'a, T>(items: impl IntoIterator<Item = (&'a str, T)>) -> Vec<(&'a str, T)> {
    let mut v: Vec<(&'a str, T)> = items.into_iter().filter(|(w, _)| !w.is_empty()).collect();
    v.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    v
}

/// Remove every delete word, then apply every replacement.
pub fn strip_and_replace<'a>(
    text: &str,
    delete_words: impl IntoIterator<Item = &'a str>,
    replacements: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> String {
    let mut out = text.to_string();
    for (word, ()) in canonical_order(delete_words.into_iter().map(|w| (w, ()))) {
        out = out.replace(word, "");
    }
    for (word, replacement) in canonical_order(replacements) {
        out = out.replace(word, replacement);
    }
    out
}

fn apply_rules(text: &str, prefs: &UserPreferences) -> String {
    strip_and_replace(
        text,
        prefs.delete_words.iter().map(String::as_str),
        prefs
            .replacements
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str())),
    )
}

/// New path for a downloaded file: rules applied to the stem, rename tag
/// appended, non-canonical video extensions normalized to `mp4`. Path
/// separators in the result become `_`.
pub fn rewrite_filename(path: &Path, prefs: &UserPreferences) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let name = apply_rules(&stem, prefs);
    let tag = prefs.rename_tag.as_deref().map(str::trim).unwrap_or("");
    let mut new_stem: String = [name.trim(), tag]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    // Must stay a single component inside the scratch directory.
    if new_stem.trim_matches('.').is_empty() {
        new_stem = FALLBACK_STEM.to_string();
    }

    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .map(|e| {
            let lower = e.to_ascii_lowercase();
            if VIDEO_EXTS.contains(&lower.as_str()) && lower != CANONICAL_VIDEO_EXT {
                CANONICAL_VIDEO_EXT.to_string()
            } else {
                e
            }
        });

    let file_name = match ext {
        Some(ext) => format!("{new_stem}.{ext}"),
        None => new_stem,
    };
    path.with_file_name(file_name)
}

/// Rename a downloaded file according to `prefs`, returning its new path.
pub async fn rename_downloaded(path: &Path, prefs: &UserPreferences) -> Result<PathBuf> {
    let new_path = rewrite_filename(path, prefs);
    if new_path != path {
        tokio::fs::rename(path, &new_path).await?;
    }
    Ok(new_path)
}

/// Caption for a delivery; `None` when nothing is left and no custom caption is set.
pub fn rewrite_caption(original: Option<&str>, prefs: &UserPreferences) -> Option<String> {
    let processed = apply_rules(original.unwrap_or(""), prefs);
    let custom = prefs.custom_caption.as_deref().unwrap_or("");
    let caption = if custom.is_empty() {
        processed.trim().to_string()
    } else {
        format!("{processed}\n\n{custom}").trim().to_string()
    };
    (!caption.is_empty()).then_some(caption)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefs(delete: &[&str], replace: &[(&str, &str)], tag: Option<&str>) -> UserPreferences {
        UserPreferences {
            delete_words: delete.iter().map(|s| s.to_string()).collect(),
            replacements: replace
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            rename_tag: tag.map(str::to_string),
            ..UserPreferences::default()
        }
    }

    #[test]
    fn filename_rules_tag_and_extension() {
        let p = prefs(&["[spam]"], &[("Ep", "Episode")], Some("@tag"));
        let out = rewrite_filename(Path::new("/tmp/x/Show [spam] Ep1.mkv"), &p);
        assert_eq!(out, PathBuf::from("/tmp/x/Show  Episode1 @tag.mp4"));

        let out = rewrite_filename(Path::new("/tmp/x/notes.pdf"), &p);
        assert_eq!(out, PathBuf::from("/tmp/x/notes @tag.pdf"));
    }

    #[test]
    fn filename_without_tag_or_stem_falls_back() {
        let p = prefs(&["gone"], &[], None);
        assert_eq!(
            rewrite_filename(Path::new("gone.mp4"), &p),
            PathBuf::from("media.mp4")
        );
        assert_eq!(
            rewrite_filename(Path::new("keep.MP4"), &p),
            PathBuf::from("keep.MP4")
        );
    }

    #[test]
    fn separators_in_tag_or_rules_stay_in_the_name() {
        let p = prefs(&[], &[("part", "a/b")], Some("@ch/news"));
        assert_eq!(
            rewrite_filename(Path::new("/tmp/x/part1.mp4"), &p),
            PathBuf::from("/tmp/x/a_b1 @ch_news.mp4")
        );

        let p = prefs(&["clip"], &[], Some(".."));
        assert_eq!(
            rewrite_filename(Path::new("/tmp/x/clip"), &p),
            PathBuf::from("/tmp/x/media")
        );
    }

    const NO_DELETE: [&str; 0] = [];
    const NO_REPLACE: [(&str, &str); 0] = [];

    #[test]
    fn delete_order_does_not_matter() {
        let words = ["ab", "b", "a", "abc"];
        let expected = strip_and_replace("xaabcbx", words, NO_REPLACE);
        let permutations = [
            ["b", "ab", "abc", "a"],
            ["abc", "a", "b", "ab"],
            ["a", "b", "ab", "abc"],
        ];
        for perm in permutations {
            assert_eq!(strip_and_replace("xaabcbx", perm, NO_REPLACE), expected);
        }
        assert_eq!(expected, "xx");
    }

    #[test]
    fn replacement_order_does_not_matter() {
        let a = strip_and_replace("one two", NO_DELETE, [("one", "two"), ("two", "three")]);
        let b = strip_and_replace("one two", NO_DELETE, [("two", "three"), ("one", "two")]);
        assert_eq!(a, b);
    }

    #[test]
    fn deletion_wins_over_overlapping_replacement() {
        let p = prefs(&["foo"], &[("foobar", "X"), ("bar", "Y")], None);
        assert_eq!(apply_rules("foobar", &p), "Y");
        assert_eq!(
            rewrite_caption(Some("foobar"), &p).as_deref(),
            Some("Y"),
            "caption and filename share the same order"
        );
    }

    #[test]
    fn caption_with_custom_suffix() {
        let mut p = prefs(&["ad"], &[], None);
        p.custom_caption = Some("join us".to_string());
        assert_eq!(
            rewrite_caption(Some("hello ad"), &p).as_deref(),
            Some("hello \n\njoin us")
        );
        assert_eq!(rewrite_caption(Some("ad"), &p).as_deref(), Some("join us"));
    }

    #[test]
    fn caption_empty_without_custom_is_none() {
        let p = prefs(&["ad"], &[], None);
        assert_eq!(rewrite_caption(Some(" ad "), &p), None);
        assert_eq!(rewrite_caption(None, &p), None);
    }

    #[test]
    fn kind_by_extension() {
        assert_eq!(media_kind_for_path(Path::new("a.MKV")), MediaKind::Video);
        assert_eq!(media_kind_for_path(Path::new("a.jpeg")), MediaKind::Photo);
        assert_eq!(media_kind_for_path(Path::new("a.flac")), MediaKind::Audio);
        assert_eq!(media_kind_for_path(Path::new("a.pdf")), MediaKind::Document);
        assert_eq!(media_kind_for_path(Path::new("noext")), MediaKind::Document);
    }

    #[tokio::test]
    async fn rename_moves_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("clip.mov");
        std::fs::write(&src, b"data").unwrap();
        let p = prefs(&[], &[], Some("tag"));
        let out = rename_downloaded(&src, &p).await.unwrap();
        assert_eq!(out, dir.path().join("clip tag.mp4"));
        assert!(!src.exists());
        assert_eq!(std::fs::read(&out).unwrap(), b"data");
    }

    #[tokio::test]
    async fn rename_with_slash_tag_stays_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("clip.mp4");
        std::fs::write(&src, b"data").unwrap();
        let p = prefs(&[], &[], Some("@ch/news"));
        let out = rename_downloaded(&src, &p).await.unwrap();
        assert_eq!(out, dir.path().join("clip @ch_news.mp4"));
        assert_eq!(out.parent(), Some(dir.path()));
        assert!(out.exists());
    }
}
