//! Authenticated encryption
//!
//! Uses AES-256-GCM.  Key size: 32 bytes.  Nonce: 12 bytes (random).
//! Tag: 16 bytes.
//!
//! Single-blob wire format (note bodies, PIN blob, backup manifests):
//!   [ nonce (12 bytes) | ciphertext + tag ]
//!
//! Streaming wire format (archived files):
//!   [ stream nonce (12 bytes) | frame... ]
//! where each frame is `u32-LE length | ciphertext + tag` over a 64 KiB
//! plaintext chunk. The frame counter and a final-frame flag are bound as
//! AAD, so truncating, reordering or splicing frames fails authentication.
//! The per-frame nonce is the stream nonce with the counter XOR-ed into its
//! last four bytes — unique per frame for a given stream nonce.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use std::io::{Read, Write};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::kdf::SecretKey;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Plaintext bytes per streaming frame.
pub const STREAM_CHUNK_LEN: usize = 64 * 1024;

/// High bit of the frame length marks the final frame.
const LAST_FRAME_FLAG: u32 = 1 << 31;

/// Encrypt `plaintext`, prepending a fresh random 12-byte nonce.
pub fn seal(key: &SecretKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(&key.0).map_err(|_| CryptoError::Encrypt)?;
    let nonce = generate_nonce();

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Encrypt)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt wire-format bytes (nonce || ciphertext+tag).
///
/// Truncated input, a wrong key and a failed tag check all surface as the
/// same `Authentication` error — callers get no oracle for which it was.
pub fn open(key: &SecretKey, blob: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if blob.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::Authentication);
    }
    let (nonce, ciphertext) = blob.split_at(NONCE_LEN);

    let cipher = Aes256Gcm::new_from_slice(&key.0).map_err(|_| CryptoError::Authentication)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Authentication)?;

    Ok(Zeroizing::new(plaintext))
}

/// Encrypt everything from `reader` into `writer` in 64 KiB frames.
///
/// On failure the output is garbage up to the failure point; the caller
/// owns deleting the partial artifact.
pub fn seal_stream<R: Read, W: Write>(
    key: &SecretKey,
    reader: &mut R,
    writer: &mut W,
) -> Result<(), CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(&key.0).map_err(|_| CryptoError::Encrypt)?;
    let stream_nonce = generate_nonce();
    writer.write_all(&stream_nonce)?;

    let mut chunk = vec![0u8; STREAM_CHUNK_LEN];
    let mut next = vec![0u8; STREAM_CHUNK_LEN];
    let mut chunk_len = read_full(reader, &mut chunk)?;
    let mut counter: u32 = 0;

    loop {
        // Read ahead so the final frame can be flagged before it is sealed.
        let next_len = read_full(reader, &mut next)?;
        let last = next_len == 0;

        let nonce = frame_nonce(&stream_nonce, counter);
        let aad = frame_aad(counter, last);
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &chunk[..chunk_len],
                    aad: &aad,
                },
            )
            .map_err(|_| CryptoError::Encrypt)?;

        let mut header = ciphertext.len() as u32;
        if last {
            header |= LAST_FRAME_FLAG;
        }
        writer.write_all(&header.to_le_bytes())?;
        writer.write_all(&ciphertext)?;

        if last {
            break;
        }
        std::mem::swap(&mut chunk, &mut next);
        chunk_len = next_len;
        counter = counter.checked_add(1).ok_or(CryptoError::StreamTooLong)?;
    }

    writer.flush()?;
    Ok(())
}

/// Decrypt a stream produced by [`seal_stream`], writing plaintext into
/// `writer`.
///
/// Any malformed framing — missing nonce, truncated frame, stream ending
/// before the flagged final frame — is reported as `Authentication`, the
/// same as a failed tag check.
pub fn open_stream<R: Read, W: Write>(
    key: &SecretKey,
    reader: &mut R,
    writer: &mut W,
) -> Result<(), CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(&key.0).map_err(|_| CryptoError::Authentication)?;

    let mut stream_nonce = [0u8; NONCE_LEN];
    read_exact(reader, &mut stream_nonce)?;

    let mut counter: u32 = 0;
    loop {
        let mut header_buf = [0u8; 4];
        read_exact(reader, &mut header_buf)?;
        let header = u32::from_le_bytes(header_buf);
        let last = header & LAST_FRAME_FLAG != 0;
        let frame_len = (header & !LAST_FRAME_FLAG) as usize;
        if frame_len < TAG_LEN || frame_len > STREAM_CHUNK_LEN + TAG_LEN {
            return Err(CryptoError::Authentication);
        }

        let mut ciphertext = vec![0u8; frame_len];
        read_exact(reader, &mut ciphertext)?;

        let nonce = frame_nonce(&stream_nonce, counter);
        let aad = frame_aad(counter, last);
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| CryptoError::Authentication)?;
        writer.write_all(&plaintext)?;

        if last {
            break;
        }
        counter = counter.checked_add(1).ok_or(CryptoError::Authentication)?;
    }

    writer.flush()?;
    Ok(())
}

pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

fn frame_nonce(stream_nonce: &[u8; NONCE_LEN], counter: u32) -> [u8; NONCE_LEN] {
    let mut nonce = *stream_nonce;
    let c = counter.to_le_bytes();
    for i in 0..4 {
        nonce[NONCE_LEN - 4 + i] ^= c[i];
    }
    nonce
}

fn frame_aad(counter: u32, last: bool) -> [u8; 5] {
    let mut aad = [0u8; 5];
    aad[..4].copy_from_slice(&counter.to_le_bytes());
    aad[4] = last as u8;
    aad
}

/// Fill `buf` as far as the reader allows; returns bytes read (0 at EOF).
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, CryptoError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CryptoError::Io(e)),
        }
    }
    Ok(filled)
}

/// `read_exact` with EOF folded into `Authentication` — a short ciphertext
/// stream is indistinguishable from a tampered one.
fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), CryptoError> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(CryptoError::Authentication)
        }
        Err(e) => Err(CryptoError::Io(e)),
    }
}
