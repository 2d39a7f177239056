use aes::Aes256;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use cbc::{Decryptor, Encryptor};
use chrono::Utc;
use cipher::block_padding::NoPadding;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use log::debug;
use rand::Rng;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::binary::jid::Jid;
use crate::client::Client;
use crate::error::MediaPrepError;
use crate::net::HttpRequest;
use crate::types::message::{
    ContextInfo, MediaContent, MessageContent, MessageKey, WebMessage,
};

const MAC_LENGTH: usize = 10;
const AES_BLOCK: usize = 16;

type MediaCbcEnc = Encryptor<Aes256>;
type MediaCbcDec = Decryptor<Aes256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
    Sticker,
}

impl MediaKind {
    /// HKDF info string for the media-specific key schedule.
    pub fn hkdf_info(&self) -> &'static str {
        match self {
            MediaKind::Image | MediaKind::Sticker => "WhatsApp Image Keys",
            MediaKind::Video => "WhatsApp Video Keys",
            MediaKind::Audio => "WhatsApp Audio Keys",
            MediaKind::Document => "WhatsApp Document Keys",
        }
    }

    pub fn upload_path(&self) -> &'static str {
        match self {
            MediaKind::Image | MediaKind::Sticker => "mms/image",
            MediaKind::Video => "mms/video",
            MediaKind::Audio => "mms/audio",
            MediaKind::Document => "mms/document",
        }
    }

    fn default_mimetype(&self) -> Option<&'static str> {
        match self {
            MediaKind::Image => Some("image/jpeg"),
            MediaKind::Video => Some("video/mp4"),
            MediaKind::Audio => Some("audio/ogg; codecs=opus"),
            MediaKind::Sticker => Some("image/webp"),
            // Documents must state their mimetype explicitly.
            MediaKind::Document => None,
        }
    }
}

/// Key material derived from one 32-byte media key.
pub struct MediaKeys {
    pub iv: [u8; 16],
    pub cipher_key: [u8; 32],
    pub mac_key: [u8; 32],
    /// Reference key used for URL signing parity with other clients.
    pub ref_key: [u8; 32],
}

pub fn derive_media_keys(media_key: &[u8], kind: MediaKind) -> MediaKeys {
    let hk = Hkdf::<Sha256>::new(None, media_key);
    let mut expanded = [0u8; 112];
    hk.expand(kind.hkdf_info().as_bytes(), &mut expanded)
        .expect("112 bytes is a valid HKDF-SHA256 output length");
    MediaKeys {
        iv: expanded[0..16].try_into().unwrap(),
        cipher_key: expanded[16..48].try_into().unwrap(),
        mac_key: expanded[48..80].try_into().unwrap(),
        ref_key: expanded[80..112].try_into().unwrap(),
    }
}

fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

fn hmac_sha256(key: &[u8], chunks: &[&[u8]]) -> [u8; 32] {
    let mut mac =
        <Hmac<Sha256> as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
    for chunk in chunks {
        mac.update(chunk);
    }
    mac.finalize().into_bytes().into()
}

/// Pads to the block size and encrypts in one buffer. The buffer keeps
/// headroom for the truncated MAC the caller appends afterwards.
fn cbc_seal(keys: &MediaKeys, plaintext: &[u8]) -> Vec<u8> {
    let pad = AES_BLOCK - plaintext.len() % AES_BLOCK;
    let mut sealed = Vec::with_capacity(plaintext.len() + pad + MAC_LENGTH);
    sealed.extend_from_slice(plaintext);
    sealed.resize(plaintext.len() + pad, pad as u8);
    let total = sealed.len();
    MediaCbcEnc::new(&keys.cipher_key.into(), &keys.iv.into())
        .encrypt_padded_mut::<NoPadding>(&mut sealed, total)
        .expect("sealed buffer is block-aligned");
    sealed
}

/// Decrypts and strips the padding, insisting that every padding byte
/// carries the pad length.
fn cbc_open(keys: &MediaKeys, ciphertext: &[u8]) -> Result<Vec<u8>, MediaPrepError> {
    if ciphertext.is_empty() || !ciphertext.len().is_multiple_of(AES_BLOCK) {
        return Err(MediaPrepError::Encryption(format!(
            "ciphertext of {} bytes is not block-aligned",
            ciphertext.len()
        )));
    }
    let mut opened = ciphertext.to_vec();
    MediaCbcDec::new(&keys.cipher_key.into(), &keys.iv.into())
        .decrypt_padded_mut::<NoPadding>(&mut opened)
        .map_err(|_| MediaPrepError::Encryption("block decryption failed".into()))?;

    let pad = opened[opened.len() - 1] as usize;
    let body = opened
        .len()
        .checked_sub(pad)
        .filter(|_| (1..=AES_BLOCK).contains(&pad))
        .ok_or_else(|| MediaPrepError::Encryption("corrupt envelope padding".into()))?;
    if opened[body..].iter().any(|&b| b as usize != pad) {
        return Err(MediaPrepError::Encryption("corrupt envelope padding".into()));
    }
    opened.truncate(body);
    Ok(opened)
}

pub struct EncryptedMedia {
    /// `ciphertext || mac[..10]`, the exact bytes that go to the host.
    pub data_to_upload: Vec<u8>,
    pub media_key: [u8; 32],
    pub file_sha256: [u8; 32],
    pub file_enc_sha256: [u8; 32],
}

pub fn encrypt_media(plaintext: &[u8], kind: MediaKind) -> EncryptedMedia {
    let file_sha256 = sha256(plaintext);

    let mut media_key = [0u8; 32];
    rand::rng().fill(&mut media_key);
    let keys = derive_media_keys(&media_key, kind);

    let mut upload = cbc_seal(&keys, plaintext);
    let mac = hmac_sha256(&keys.mac_key, &[&keys.iv, &upload]);
    upload.extend_from_slice(&mac[..MAC_LENGTH]);

    let file_enc_sha256 = sha256(&upload);

    EncryptedMedia {
        data_to_upload: upload,
        media_key,
        file_sha256,
        file_enc_sha256,
    }
}

/// Checks the truncated MAC and decrypts a downloaded media payload. Used by
/// media-retry handling and as the round-trip counterpart of
/// [`encrypt_media`].
pub fn verify_and_decrypt(
    payload: &[u8],
    media_key: &[u8],
    kind: MediaKind,
) -> Result<Vec<u8>, MediaPrepError> {
    if payload.len() <= MAC_LENGTH {
        return Err(MediaPrepError::Encryption(
            "payload too short to contain a MAC".into(),
        ));
    }
    let (ciphertext, received_mac) = payload.split_at(payload.len() - MAC_LENGTH);
    let keys = derive_media_keys(media_key, kind);

    let expected = hmac_sha256(&keys.mac_key, &[&keys.iv, ciphertext]);
    if received_mac != &expected[..MAC_LENGTH] {
        return Err(MediaPrepError::Encryption("media MAC mismatch".into()));
    }

    cbc_open(&keys, ciphertext)
}

/// URL-safe unpadded base64, the encoding hashes travel in on the wire.
pub fn wire_b64(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

#[derive(Debug, Clone, Default)]
pub struct MediaOptions {
    pub mimetype: Option<String>,
    pub caption: Option<String>,
    pub jpeg_thumbnail: Option<Vec<u8>>,
    pub timestamp: Option<i64>,
    pub quoted: Option<WebMessage>,
}

#[derive(Deserialize)]
struct RawUploadResponse {
    url: Option<String>,
    direct_path: Option<String>,
}

impl Client {
    /// Encrypts a media buffer, uploads it to a signed slot and assembles a
    /// relay-ready message envelope.
    pub async fn prepare_media_message(
        &self,
        to: &Jid,
        data: Vec<u8>,
        kind: MediaKind,
        options: MediaOptions,
    ) -> Result<WebMessage, MediaPrepError> {
        let mut kind = kind;
        let mut gif_playback = false;
        let mut mimetype = match options.mimetype {
            Some(m) => m,
            None => kind
                .default_mimetype()
                .ok_or(MediaPrepError::MissingMimetype)?
                .to_string(),
        };
        if kind == MediaKind::Sticker && options.caption.is_some() {
            return Err(MediaPrepError::CaptionNotAllowed);
        }
        // Animated gifs travel as looping mp4 video.
        if mimetype == "image/gif" {
            kind = MediaKind::Video;
            mimetype = "video/mp4".to_string();
            gif_playback = true;
        }

        let enc = tokio::task::spawn_blocking({
            let data = data.clone();
            move || encrypt_media(&data, kind)
        })
        .await
        .map_err(|e| MediaPrepError::Encryption(e.to_string()))?;

        let media_conn = self.media_conn.media_conn().await?;
        let host = media_conn
            .hosts
            .first()
            .ok_or_else(|| MediaPrepError::UploadFailed("no media hosts available".into()))?;

        let token = wire_b64(&enc.file_enc_sha256);
        let url = format!(
            "https://{}/{}/{}?auth={}&token={}",
            host.hostname,
            kind.upload_path(),
            token,
            media_conn.auth,
            token
        );
        debug!(target: "Socket/Media", "Uploading {} bytes to {}", enc.data_to_upload.len(), host.hostname);

        let request = HttpRequest::post(url)
            .with_header("Content-Type", "application/octet-stream")
            .with_header("Origin", "https://web.whatsapp.com")
            .with_body(enc.data_to_upload);
        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|e| MediaPrepError::UploadFailed(e.to_string()))?;

        if response.status_code >= 400 {
            return Err(MediaPrepError::UploadFailed(format!(
                "host answered {}",
                response.status_code
            )));
        }
        let raw: RawUploadResponse = serde_json::from_slice(&response.body)
            .map_err(|e| MediaPrepError::UploadFailed(format!("bad upload response: {e}")))?;
        let Some(url) = raw.url.filter(|u| !u.is_empty()) else {
            return Err(MediaPrepError::UploadFailed(
                "upload response carried no url".into(),
            ));
        };

        let context_info = options.quoted.as_ref().and_then(|quoted| {
            let quoted_message = quoted.message.clone()?;
            Some(ContextInfo {
                stanza_id: quoted.key.id.clone(),
                participant: quoted
                    .key
                    .participant
                    .clone()
                    .unwrap_or_else(|| quoted.key.remote_jid.clone()),
                quoted_message: Box::new(quoted_message),
                remote_jid: quoted
                    .key
                    .remote_jid
                    .is_group()
                    .then(|| quoted.key.remote_jid.clone()),
            })
        });

        let content = MediaContent {
            url,
            direct_path: raw.direct_path,
            media_key: enc.media_key.to_vec(),
            mimetype,
            file_enc_sha256: enc.file_enc_sha256.to_vec(),
            file_sha256: enc.file_sha256.to_vec(),
            file_length: data.len() as u64,
            caption: options.caption,
            gif_playback,
            jpeg_thumbnail: options.jpeg_thumbnail,
            context_info,
        };
        let message = match kind {
            MediaKind::Image => MessageContent::Image(content),
            MediaKind::Video => MessageContent::Video(content),
            MediaKind::Audio => MessageContent::Audio(content),
            MediaKind::Document => MessageContent::Document(content),
            MediaKind::Sticker => MessageContent::Sticker(content),
        };

        let mut msg = WebMessage::new(
            MessageKey {
                remote_jid: to.clone(),
                id: self.generate_message_id(),
                from_me: true,
                participant: None,
            },
            options.timestamp.unwrap_or_else(|| Utc::now().timestamp()),
        );
        msg.message = Some(message);
        Ok(msg)
    }
}
