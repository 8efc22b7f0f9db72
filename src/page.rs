use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::Client;

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Response header signalling that the body is base64 ciphertext.
const ENCRYPTION_HEADER: &str = "x-amz-server-side-encryption";
const ENCRYPTION_SCHEME: &str = "AES256";

/// The server embeds raster data with a `jpg` MIME subtype that PDF/SVG
/// consumers reject; it is rewritten to `jpeg` on every payload.
const MIME_NEEDLE: &[u8] = b"data:image/jpg;base64";
const MIME_REPLACEMENT: &[u8] = b"data:image/jpeg;base64";

/// Why a single page failed. Every variant is recovered at the page
/// boundary: the page is skipped and the pipeline continues.
#[derive(Debug, thiserror::Error)]
pub enum PageError {
    #[error("no image item matches page reference {0}")]
    Unresolved(String),
    #[error("request failed: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("page is encrypted but no encryption key was provided")]
    MissingKey,
    #[error("encryption key must be exactly 16 bytes, got {0}")]
    KeyLength(usize),
    #[error("ciphertext is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("decryption failed: {0}")]
    Decrypt(String),
    #[error("decrypted payload is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("page could not be added to the document: {0}")]
    Assemble(String),
}

/// Retrieves one page's bytes through the authenticated session.
///
/// When the encryption header is present the body is treated as base64
/// ciphertext and decrypted with the operator-supplied secret. The MIME
/// rewrite happens on both branches.
pub async fn fetch_page(
    client: &Client,
    url: &str,
    encryption_key: Option<&str>,
) -> Result<Vec<u8>, PageError> {
    let response = client.get(url).send().await?.error_for_status()?;
    let encrypted = response
        .headers()
        .get(ENCRYPTION_HEADER)
        .map(|value| value.as_bytes() == ENCRYPTION_SCHEME.as_bytes())
        .unwrap_or(false);
    let body = response.bytes().await?;

    let bytes = if encrypted {
        let key = encryption_key
            .filter(|key| !key.is_empty())
            .ok_or(PageError::MissingKey)?;
        let plaintext = decrypt_payload(&body, key)?;
        // Encrypted payloads are always textual (SVG markup).
        String::from_utf8(plaintext)?.into_bytes()
    } else {
        body.to_vec()
    };

    Ok(rewrite_inline_mime(bytes))
}

/// Decrypts a base64 AES-128-CBC payload where the key doubles as the IV.
///
/// The upstream server dictates this scheme, including the 16-byte secret
/// (the cipher's block size) and its padding convention; see
/// [`strip_server_padding`].
pub fn decrypt_payload(ciphertext_b64: &[u8], secret: &str) -> Result<Vec<u8>, PageError> {
    let key = secret.as_bytes();
    if key.len() != 16 {
        return Err(PageError::KeyLength(key.len()));
    }

    // Transport may wrap the base64 body in whitespace.
    let compact: Vec<u8> = ciphertext_b64
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    let ciphertext = BASE64.decode(&compact)?;

    let cipher = Aes128CbcDec::new_from_slices(key, key)
        .map_err(|e| PageError::Decrypt(e.to_string()))?;
    let plaintext = cipher
        .decrypt_padded_vec_mut::<NoPadding>(&ciphertext)
        .map_err(|e| PageError::Decrypt(e.to_string()))?;

    Ok(strip_server_padding(plaintext))
}

/// Removes the server's trailing padding bytes.
///
/// This matches the observed server convention exactly: trailing bytes drawn
/// from the set {0x01, 0x2E, 0x0F} are stripped. It is deliberately not a
/// standards-based unpadding routine.
fn strip_server_padding(mut bytes: Vec<u8>) -> Vec<u8> {
    while let Some(&last) = bytes.last() {
        if last == 0x01 || last == 0x0F || last == b'.' {
            bytes.pop();
        } else {
            break;
        }
    }
    bytes
}

/// Replaces every `data:image/jpg;base64` occurrence with the `jpeg` form.
fn rewrite_inline_mime(bytes: Vec<u8>) -> Vec<u8> {
    if !bytes
        .windows(MIME_NEEDLE.len())
        .any(|window| window == MIME_NEEDLE)
    {
        return bytes;
    }

    let mut out = Vec::with_capacity(bytes.len() + 64);
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i..].starts_with(MIME_NEEDLE) {
            out.extend_from_slice(MIME_REPLACEMENT);
            i += MIME_NEEDLE.len();
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    out
}
