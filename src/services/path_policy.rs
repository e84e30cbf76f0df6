//! Canonical relative paths: `<id>/<sanitized filename>`.

use crate::error::{AppError, Result};
use crate::models::File;
use crate::services::repository::FileRepository;

/// Longest sanitized name, in bytes.
const MAX_NAME_BYTES: usize = 200;

/// Name used when sanitizing leaves nothing behind.
const FALLBACK_NAME: &str = "file";

/// Characters that are unsafe in local paths, object keys or URLs.
const UNSAFE_CHARS: &[char] = &[
    '/', '\\', ':', '*', '?', '"', '<', '>', '|', '#', '%', '{', '}', '^', '~', '[', ']', '`',
];

/// Anything with an identity and a display name can be placed at a canonical path.
pub trait PathAddressable {
    fn id(&self) -> Option<&str>;
    fn filename(&self) -> Option<&str>;
    fn path(&self) -> Option<&str>;
    fn set_path(&mut self, path: String);
}

/// Make a display name safe to use as the last segment of a storage key.
///
/// Deterministic. Unsafe characters become `-`, control characters are
/// dropped, whitespace runs collapse to a single `-`, leading and trailing
/// dots/dashes are trimmed and the result is capped while keeping the
/// extension.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.chars() {
        if c.is_control() {
            continue;
        }
        if c.is_whitespace() || UNSAFE_CHARS.contains(&c) {
            pending_dash = true;
            continue;
        }
        if pending_dash && !out.is_empty() {
            out.push('-');
        }
        pending_dash = false;
        out.push(c);
    }

    let trimmed = out.trim_matches(|c| c == '.' || c == '-');
    if trimmed.is_empty() {
        return FALLBACK_NAME.to_string();
    }

    truncate_keeping_extension(trimmed, MAX_NAME_BYTES)
}

fn truncate_keeping_extension(name: &str, max: usize) -> String {
    if name.len() <= max {
        return name.to_string();
    }

    let (stem, ext) = match name.rfind('.') {
        Some(idx) if idx > 0 && name.len() - idx <= 16 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    };

    let mut budget = max.saturating_sub(ext.len());
    while budget > 0 && !stem.is_char_boundary(budget) {
        budget -= 1;
    }
    format!("{}{}", &stem[..budget.min(stem.len())], ext)
}

/// `id + "/" + sanitize(filename)`.
pub fn correct_path<T: PathAddressable + ?Sized>(file: &T) -> Result<String> {
    let id = file
        .id()
        .filter(|id| !id.is_empty())
        .ok_or(AppError::IdentityNotAssigned)?;
    Ok(format!("{}/{}", id, sanitize_filename(file.filename().unwrap_or(""))))
}

/// Give the file an identity if it has none, then re-apply its canonical path.
///
/// Idempotent: a second call neither saves nor changes anything.
pub async fn ensure_correct_path(file: &mut File, repository: &dyn FileRepository) -> Result<String> {
    if file.id.as_deref().map_or(true, str::is_empty) {
        let id = repository.assign_identity(file).await?;
        tracing::debug!("Assigned id {} to file {:?}", id, file.filename);
    }

    let path = correct_path(file)?;
    if file.path.as_deref() != Some(path.as_str()) {
        file.set_path(path.clone());
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::repository::MemoryRepository;

    #[test]
    fn test_sanitize_keeps_safe_names() {
        assert_eq!(sanitize_filename("report.pdf"), "report.pdf");
        assert_eq!(sanitize_filename("Résumé_2024.docx"), "Résumé_2024.docx");
    }

    #[test]
    fn test_sanitize_strips_separators_and_collapses_whitespace() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "etc-passwd");
        assert_eq!(sanitize_filename("My   Report (final).pdf"), "My-Report-(final).pdf");
        assert_eq!(sanitize_filename("a:b?c\u{0007}.txt"), "a-b-c.txt");
        assert_eq!(sanitize_filename(" .hidden. "), "hidden");
    }

    #[test]
    fn test_sanitize_empty_falls_back() {
        assert_eq!(sanitize_filename(""), "file");
        assert_eq!(sanitize_filename("///"), "file");
        assert_eq!(sanitize_filename(".."), "file");
    }

    #[test]
    fn test_sanitize_caps_length_and_keeps_extension() {
        let long = format!("{}.pdf", "x".repeat(400));
        let out = sanitize_filename(&long);
        assert_eq!(out.len(), MAX_NAME_BYTES);
        assert!(out.ends_with(".pdf"));

        let multibyte = "é".repeat(150);
        let out = sanitize_filename(&multibyte);
        assert!(out.len() <= MAX_NAME_BYTES);
        assert!(out.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_correct_path_formula() {
        let mut file = File::named("report.pdf");
        assert!(matches!(correct_path(&file), Err(AppError::IdentityNotAssigned)));
        file.id = Some("42".into());
        assert_eq!(correct_path(&file).unwrap(), "42/report.pdf");
        file.filename = None;
        assert_eq!(correct_path(&file).unwrap(), "42/file");
    }

    #[tokio::test]
    async fn test_ensure_correct_path_is_idempotent() {
        let repo = MemoryRepository::new();
        let mut file = File::named("report.pdf");

        let first = ensure_correct_path(&mut file, &repo).await.unwrap();
        let id = file.id.clone().unwrap();
        assert_eq!(first, format!("{}/report.pdf", id));
        assert_eq!(repo.file_saves(), 1);

        let second = ensure_correct_path(&mut file, &repo).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(file.id.as_deref(), Some(id.as_str()));
        assert_eq!(repo.file_saves(), 1);
    }
}
