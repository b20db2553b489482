// src/naming.rs

/// Lowercases a tag and replaces its first space with a dash.
///
/// Only the first space is touched, so "Tropical Beach House" becomes
/// "tropical-beach house".
fn slug_tag(tag: &str) -> String {
    tag.to_lowercase().replacen(' ', "-", 1)
}

/// Builds the download name for a generated image:
/// `photo.jpg` + (`Living Room`, `Modern`) -> `photo-modern-living-room.jpg`.
///
/// The split happens on the last dot. A name without any dot keeps the whole
/// name as the stem and gets no extension.
pub fn compose_name(original_name: &str, type_tag: &str, theme_tag: &str) -> String {
    let infix = format!("-{}-{}", slug_tag(theme_tag), slug_tag(type_tag));

    match original_name.rsplit_once('.') {
        Some((stem, extension)) => format!("{stem}{infix}.{extension}"),
        None => format!("{original_name}{infix}"),
    }
}
