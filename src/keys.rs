use nanoid::nanoid;

use crate::data_model::{ImageFormat, StoredObjectKey};

pub const KEY_ID_LENGTH: usize = 10;

/// Issues a fresh key for an object of `format`.
///
/// The extension is taken from the original file name when it is one of the
/// format's known extensions, so `holiday.JPEG` keeps `jpeg`. Anything else
/// falls back to the canonical extension, which keeps key and stored type in
/// agreement.
pub fn generate(original_file_name: Option<&str>, format: ImageFormat) -> StoredObjectKey {
    let id = nanoid!(KEY_ID_LENGTH);
    StoredObjectKey::from_parts(&id, extension_for(original_file_name, format))
}

fn extension_for(original_file_name: Option<&str>, format: ImageFormat) -> &'static str {
    original_file_name
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .and_then(|ext| format.extensions().iter().copied().find(|known| *known == ext))
        .unwrap_or_else(|| format.extension())
}
