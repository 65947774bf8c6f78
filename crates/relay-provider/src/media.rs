use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use relay_ai::Message;

pub const DEFAULT_IMAGE_PROMPT: &str = "Describe this image.";

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";
const GIF87_MAGIC: &[u8] = b"GIF87a";
const GIF89_MAGIC: &[u8] = b"GIF89a";

/// Guesses the MIME type of an inbound image from its leading bytes. Anything
/// unrecognized is treated as JPEG, which is what chat platforms send.
pub fn sniff_image_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(PNG_MAGIC) {
        "image/png"
    } else if bytes.starts_with(GIF87_MAGIC) || bytes.starts_with(GIF89_MAGIC) {
        "image/gif"
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

pub(crate) fn image_message(text: &str, image: &[u8]) -> Message {
    Message::user_with_image(text, sniff_image_mime(image), BASE64_STANDARD.encode(image))
}
