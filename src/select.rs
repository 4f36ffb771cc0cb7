use crate::drive::DriveEntry;
use crate::error::{GatewayError, GatewayResult};

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "heic"];

pub fn is_image_name(name: &str) -> bool {
    name.rsplit_once('.')
        .map(|(_, extension)| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| extension.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// The file with the latest modification time. On equal timestamps the
/// entry listed first wins.
pub fn most_recent_file(entries: &[DriveEntry]) -> GatewayResult<&DriveEntry> {
    entries
        .iter()
        .filter(|entry| entry.is_file)
        .fold(None, |best: Option<&DriveEntry>, entry| match best {
            Some(current) if current.last_modified_at >= entry.last_modified_at => Some(current),
            _ => Some(entry),
        })
        .ok_or_else(|| GatewayError::not_found("No files found in the folder."))
}

/// Image files, newest first. Equal timestamps keep their listing order.
pub fn all_images(entries: &[DriveEntry]) -> Vec<&DriveEntry> {
    let mut images: Vec<&DriveEntry> = entries
        .iter()
        .filter(|entry| entry.is_file && is_image_name(&entry.name))
        .collect();
    images.sort_by(|a, b| b.last_modified_at.cmp(&a.last_modified_at));
    images
}
