//! Encrypted file sharing (XEP-0454) and downloads of received links.
//!
//! Files are encrypted with AES-256-GCM before upload; key and IV travel in
//! the URL fragment of an `aesgcm://` link, which is only ever sent inside an
//! OMEMO message.
//!
//! CHANGELOG:
//! - 10/19/2026 - Decrypt aesgcm:// links on download
//! - 10/19/2026 - Initial implementation

use std::path::{Path, PathBuf};

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, AesGcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::io::AsyncWriteExt;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 12;

/// Older clients send 16-byte IVs.
const LEGACY_IV_LEN: usize = 16;

const SCHEME: &str = "aesgcm://";

type Aes256Gcm16 = AesGcm<aes::Aes256, U16>;

/// A file encrypted for upload: `ciphertext || tag`.
pub struct EncryptedFile {
    pub data: Vec<u8>,
    pub key: Zeroizing<[u8; KEY_LEN]>,
    pub iv: [u8; IV_LEN],
}

pub fn encrypt_file(plaintext: &[u8]) -> Result<EncryptedFile> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut key[..]);
    OsRng.fill_bytes(&mut iv);

    let cipher = Aes256Gcm::new_from_slice(&key[..]).map_err(|_| Error::Omemo("bad file key".into()))?;
    let data = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| Error::Omemo("file encryption failed".into()))?;
    Ok(EncryptedFile { data, key, iv })
}

/// Decrypt `ciphertext || tag` with a 12- or 16-byte IV.
pub fn decrypt_file(data: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
    let failed = |_: aes_gcm::Error| Error::Omemo("file decryption failed".into());
    match iv.len() {
        IV_LEN => Aes256Gcm::new_from_slice(key)
            .map_err(|_| Error::Omemo("bad file key".into()))?
            .decrypt(Nonce::from_slice(iv), data)
            .map_err(failed),
        LEGACY_IV_LEN => Aes256Gcm16::new_from_slice(key)
            .map_err(|_| Error::Omemo("bad file key".into()))?
            .decrypt(aes_gcm::aead::generic_array::GenericArray::from_slice(iv), data)
            .map_err(failed),
        n => Err(Error::Omemo(format!("unsupported IV length {}", n))),
    }
}

/// `https://host/path` to `aesgcm://host/path#<iv><key>`.
pub fn aesgcm_url(https_url: &str, iv: &[u8], key: &[u8]) -> Result<String> {
    let rest = https_url
        .strip_prefix("https://")
        .ok_or_else(|| Error::Upload(format!("expected an https URL, got {}", https_url)))?;
    Ok(format!("{}{}#{}{}", SCHEME, rest, hex::encode(iv), hex::encode(key)))
}

/// Decoded `aesgcm://` link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AesGcmLink {
    pub https_url: String,
    pub iv: Vec<u8>,
    pub key: Vec<u8>,
}

/// Parse an `aesgcm://` link. Other schemes yield `None`.
pub fn parse_aesgcm_url(url: &str) -> Result<Option<AesGcmLink>> {
    let Some(rest) = url.strip_prefix(SCHEME) else {
        return Ok(None);
    };
    let (location, fragment) = rest
        .split_once('#')
        .ok_or_else(|| Error::Protocol("aesgcm link without key fragment".into()))?;

    let bytes = hex::decode(fragment)
        .map_err(|e| Error::Protocol(format!("bad aesgcm fragment: {}", e)))?;
    let iv_len = match bytes.len() {
        n if n == IV_LEN + KEY_LEN => IV_LEN,
        n if n == LEGACY_IV_LEN + KEY_LEN => LEGACY_IV_LEN,
        n => {
            return Err(Error::Protocol(format!(
                "aesgcm fragment is {} bytes, expected {} or {}",
                n,
                IV_LEN + KEY_LEN,
                LEGACY_IV_LEN + KEY_LEN
            )))
        }
    };
    let (iv, key) = bytes.split_at(iv_len);

    Ok(Some(AesGcmLink {
        https_url: format!("https://{}", location),
        iv: iv.to_vec(),
        key: key.to_vec(),
    }))
}

/// Name to upload `path` under: a random name keeping the extension.
pub fn upload_name(path: &Path) -> String {
    let stem = uuid::Uuid::new_v4().to_string();
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() => format!("{}.{}", stem, ext),
        _ => stem,
    }
}

/// Where a download of `url` goes: the last path segment inside `dir`.
pub fn download_target(dir: &Path, url: &str) -> Result<PathBuf> {
    let without_fragment = url.split('#').next().unwrap_or_default();
    let without_query = without_fragment.split('?').next().unwrap_or_default();
    let name = without_query.rsplit('/').next().unwrap_or_default();

    if name.is_empty() || name == "." || name == ".." {
        return Err(Error::Protocol(format!("cannot derive a file name from {}", url)));
    }
    Ok(dir.join(name))
}

/// Download `url` into `dir`, decrypting `aesgcm://` links.
pub async fn download_file(http: &reqwest::Client, url: &str, dir: &Path) -> Result<PathBuf> {
    let target = download_target(dir, url)?;
    let link = parse_aesgcm_url(url)?;
    let fetch_url = link.as_ref().map(|l| l.https_url.as_str()).unwrap_or(url);

    let mut response = http.get(fetch_url).send().await?.error_for_status()?;

    match link {
        Some(link) => {
            let data = response.bytes().await?;
            let plaintext = decrypt_file(&data, &link.key, &link.iv)?;
            tokio::fs::write(&target, plaintext).await?;
        }
        None => {
            let mut file = tokio::fs::File::create(&target).await?;
            while let Some(chunk) = response.chunk().await? {
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
        }
    }

    tracing::info!("Downloaded file to {}", target.display());
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_encryption() {
        let enc = encrypt_file(b"file contents").unwrap();
        assert_eq!(enc.data.len(), 13 + 16);
        assert_eq!(decrypt_file(&enc.data, &enc.key[..], &enc.iv).unwrap(), b"file contents");

        let mut tampered = enc.data.clone();
        tampered[0] ^= 1;
        assert!(decrypt_file(&tampered, &enc.key[..], &enc.iv).is_err());
    }

    #[test]
    fn test_aesgcm_url_format() {
        let iv = [0x01u8; 12];
        let key = [0xabu8; 32];
        let url = aesgcm_url("https://upload.example.org/x/photo.jpg", &iv, &key).unwrap();
        assert!(url.starts_with("aesgcm://upload.example.org/x/photo.jpg#010101"));
        assert_eq!(url.split('#').nth(1).unwrap().len(), 88);

        let link = parse_aesgcm_url(&url).unwrap().unwrap();
        assert_eq!(link.https_url, "https://upload.example.org/x/photo.jpg");
        assert_eq!(link.iv, iv);
        assert_eq!(link.key, key);
    }

    #[test]
    fn test_aesgcm_url_requires_https() {
        assert!(aesgcm_url("http://insecure/x", &[0; 12], &[0; 32]).is_err());
    }

    #[test]
    fn test_parse_non_aesgcm_and_bad_fragments() {
        assert_eq!(parse_aesgcm_url("https://example.org/a.png").unwrap(), None);
        assert!(parse_aesgcm_url("aesgcm://example.org/a.png").is_err());
        assert!(parse_aesgcm_url("aesgcm://example.org/a.png#abcd").is_err());
        assert!(parse_aesgcm_url("aesgcm://example.org/a.png#zz").is_err());
    }

    #[test]
    fn test_legacy_iv_link_decrypts() {
        let key = [7u8; 32];
        let iv = [9u8; 16];
        let data = Aes256Gcm16::new_from_slice(&key)
            .unwrap()
            .encrypt(aes_gcm::aead::generic_array::GenericArray::from_slice(&iv), &b"old"[..])
            .unwrap();

        let url = format!("aesgcm://h/f.txt#{}{}", hex::encode(iv), hex::encode(key));
        let link = parse_aesgcm_url(&url).unwrap().unwrap();
        assert_eq!(link.iv.len(), 16);
        assert_eq!(decrypt_file(&data, &link.key, &link.iv).unwrap(), b"old");
    }

    #[test]
    fn test_download_target_naming() {
        let dir = Path::new("/tmp");
        assert_eq!(
            download_target(dir, "https://h.example/a/b/pic.png").unwrap(),
            PathBuf::from("/tmp/pic.png")
        );
        assert_eq!(
            download_target(dir, "aesgcm://h.example/a/doc.pdf#0011").unwrap(),
            PathBuf::from("/tmp/doc.pdf")
        );
        assert_eq!(
            download_target(dir, "https://h.example/f.txt?sig=1").unwrap(),
            PathBuf::from("/tmp/f.txt")
        );
        assert!(download_target(dir, "https://h.example/dir/").is_err());
        assert!(download_target(dir, "https://h.example/..").is_err());
    }

    #[test]
    fn test_upload_name_keeps_extension() {
        let name = upload_name(Path::new("/home/me/holiday.JPG"));
        assert!(name.ends_with(".JPG"));
        assert_eq!(name.len(), 36 + 4);
        assert_eq!(upload_name(Path::new("README")).len(), 36);
    }
}
