//! Incremental, chunked content stream codec.
//!
//! `VaultFileWriter` buffers up to one chunk's worth of plaintext and only
//! emits a non-final chunk once the buffer is full *and* more data is still
//! pending; `close` always emits exactly one final chunk (possibly empty)
//! and poisons the writer against further use. `VaultFileReader` consumes
//! full encrypted chunk frames, treats a short read mid-frame as the final
//! chunk, and insists the underlying source is exhausted immediately after
//! the final chunk is served.

use std::io::{self, Read, Write};

use rand::RngCore;
use ring::hmac;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{instrument, trace, warn};
use zeroize::Zeroizing;

use crate::crypto::keys::MasterKey;

use super::context::FileContext;
use super::file_ctrmac::{self, CtrMacError, HEADER_SIZE, MAC_SIZE, NONCE_SIZE, PAYLOAD_SIZE};

/// Size of one fully-encrypted chunk frame (nonce + full payload + MAC).
pub const CHUNK_ENCRYPTED_SIZE: usize = NONCE_SIZE + PAYLOAD_SIZE + MAC_SIZE;
/// Per-chunk framing overhead (nonce + MAC).
pub const CHUNK_OVERHEAD: usize = NONCE_SIZE + MAC_SIZE;
/// Plaintext bytes carried by a full (non-final) chunk.
pub const CHUNK_PLAINTEXT_SIZE: usize = PAYLOAD_SIZE;

/// Errors from the content stream codec.
#[derive(Error, Debug)]
pub enum StreamError {
    /// A write or close was attempted after the writer was already closed.
    #[error("stream writer was already closed")]
    AlreadyClosed,
    /// Bytes remained on the underlying source after the final chunk.
    #[error("trailing data found after the final chunk")]
    TrailingData,
    /// A chunk's HMAC did not verify.
    #[error("chunk authentication failed for {context}: possible tampering or wrong key")]
    AuthFailed { context: FileContext },
    /// A chunk frame was shorter than the minimum nonce+MAC overhead.
    #[error("malformed chunk for {context}: {reason}")]
    InvalidChunk { reason: String, context: FileContext },
    /// Header encryption/decryption failed.
    #[error("file header error: {0}")]
    Header(#[from] CtrMacError),
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<StreamError> for io::Error {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::Io(e) => e,
            other => io::Error::other(other),
        }
    }
}

/// Writes an encrypted, chunked content stream.
pub struct VaultFileWriter<W: Write> {
    inner: W,
    content_key: Zeroizing<[u8; 32]>,
    header_nonce: [u8; NONCE_SIZE],
    mac_key: Zeroizing<[u8; 32]>,
    buffer: Vec<u8>,
    chunk_number: u64,
    closed: bool,
}

impl<W: Write> VaultFileWriter<W> {
    fn new(inner: W, content_key: [u8; 32], header_nonce: [u8; NONCE_SIZE], mac_key: [u8; 32]) -> Self {
        Self {
            inner,
            content_key: Zeroizing::new(content_key),
            header_nonce,
            mac_key: Zeroizing::new(mac_key),
            buffer: Vec::with_capacity(PAYLOAD_SIZE),
            chunk_number: 0,
            closed: false,
        }
    }

    fn write_chunk_frame(&mut self, chunk_nonce: &[u8; NONCE_SIZE]) -> Result<(), StreamError> {
        use aes::cipher::{KeyIvInit, StreamCipher};
        type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

        let mut ciphertext = self.buffer.clone();
        {
            let mut cipher = Aes256Ctr::new((&*self.content_key).into(), chunk_nonce.into());
            cipher.apply_keystream(&mut ciphertext);
        }

        let hmac_key = hmac::Key::new(hmac::HMAC_SHA256, self.mac_key.as_ref());
        let mut mac_ctx = hmac::Context::with_key(&hmac_key);
        mac_ctx.update(&self.header_nonce);
        mac_ctx.update(&self.chunk_number.to_be_bytes());
        mac_ctx.update(chunk_nonce);
        mac_ctx.update(&ciphertext);
        let mac = mac_ctx.sign();

        self.inner.write_all(chunk_nonce)?;
        self.inner.write_all(&ciphertext)?;
        self.inner.write_all(mac.as_ref())?;
        trace!(chunk = self.chunk_number, plaintext_len = self.buffer.len(), "chunk frame written");
        Ok(())
    }

    /// Close the stream, flushing exactly one final chunk (possibly empty).
    /// Idempotent poisoning: any call after the first returns
    /// [`StreamError::AlreadyClosed`].
    #[instrument(level = "debug", skip(self))]
    pub fn close(&mut self) -> Result<(), StreamError> {
        if self.closed {
            return Err(StreamError::AlreadyClosed);
        }
        let mut chunk_nonce = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut chunk_nonce);
        self.write_chunk_frame(&chunk_nonce)?;
        self.buffer.clear();
        self.closed = true;
        Ok(())
    }
}

impl<W: Write> Write for VaultFileWriter<W> {
    fn write(&mut self, mut data: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(StreamError::AlreadyClosed.into());
        }
        let total = data.len();
        loop {
            if self.buffer.len() == PAYLOAD_SIZE {
                if data.is_empty() {
                    break;
                }
                let mut chunk_nonce = [0u8; NONCE_SIZE];
                rand::rng().fill_bytes(&mut chunk_nonce);
                self.write_chunk_frame(&chunk_nonce)?;
                self.buffer.clear();
                self.chunk_number += 1;
            }
            if data.is_empty() {
                break;
            }
            let space = PAYLOAD_SIZE - self.buffer.len();
            let take = space.min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            data = &data[take..];
        }
        Ok(total)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Reads an encrypted, chunked content stream.
pub struct VaultFileReader<R: Read> {
    inner: R,
    content_key: Zeroizing<[u8; 32]>,
    header_nonce: [u8; NONCE_SIZE],
    mac_key: Zeroizing<[u8; 32]>,
    chunk_number: u64,
    current: Vec<u8>,
    current_pos: usize,
    finished: bool,
}

impl<R: Read> VaultFileReader<R> {
    fn new(inner: R, content_key: [u8; 32], header_nonce: [u8; NONCE_SIZE], mac_key: [u8; 32]) -> Self {
        Self {
            inner,
            content_key: Zeroizing::new(content_key),
            header_nonce,
            mac_key: Zeroizing::new(mac_key),
            chunk_number: 0,
            current: Vec::new(),
            current_pos: 0,
            finished: false,
        }
    }

    /// Read one full chunk frame, returning `(plaintext, is_final)`.
    fn read_chunk(&mut self) -> Result<(Vec<u8>, bool), StreamError> {
        let mut frame = vec![0u8; CHUNK_ENCRYPTED_SIZE];
        let mut read_total = 0;
        loop {
            match self.inner.read(&mut frame[read_total..])? {
                0 => break,
                n => read_total += n,
            }
        }

        let context = FileContext::new().with_chunk(self.chunk_number as usize);

        if read_total == 0 {
            if self.chunk_number == 0 {
                return Err(StreamError::InvalidChunk {
                    reason: "no chunk data available; every file must have at least one chunk".into(),
                    context,
                });
            }
            // A full-size read on the previous chunk left it ambiguous
            // whether that chunk was final; this zero-byte read resolves it:
            // the stream ended cleanly right after it.
            return Ok((Vec::new(), true));
        }

        let is_final = read_total < CHUNK_ENCRYPTED_SIZE;
        let frame = &frame[..read_total];

        if frame.len() < CHUNK_OVERHEAD {
            return Err(StreamError::InvalidChunk {
                reason: format!("chunk frame too small: {} bytes", frame.len()),
                context,
            });
        }

        let chunk_nonce: [u8; NONCE_SIZE] = frame[..NONCE_SIZE].try_into().unwrap();
        let ciphertext = &frame[NONCE_SIZE..frame.len() - MAC_SIZE];
        let expected_mac = &frame[frame.len() - MAC_SIZE..];

        let hmac_key = hmac::Key::new(hmac::HMAC_SHA256, self.mac_key.as_ref());
        let mut mac_ctx = hmac::Context::with_key(&hmac_key);
        mac_ctx.update(&self.header_nonce);
        mac_ctx.update(&self.chunk_number.to_be_bytes());
        mac_ctx.update(&chunk_nonce);
        mac_ctx.update(ciphertext);
        let computed = mac_ctx.sign();

        if !bool::from(computed.as_ref().ct_eq(expected_mac)) {
            warn!(chunk = self.chunk_number, "chunk HMAC verification failed");
            return Err(StreamError::AuthFailed { context });
        }

        use aes::cipher::{KeyIvInit, StreamCipher};
        type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;
        let mut plaintext = ciphertext.to_vec();
        let mut cipher = Aes256Ctr::new((&*self.content_key).into(), (&chunk_nonce).into());
        cipher.apply_keystream(&mut plaintext);

        Ok((plaintext, is_final))
    }

    /// After the final chunk has been fully delivered, probe the underlying
    /// source for any trailing byte, which would indicate tampering.
    fn check_no_trailing_data(&mut self) -> Result<(), StreamError> {
        let mut probe = [0u8; 1];
        if self.inner.read(&mut probe)? != 0 {
            return Err(StreamError::TrailingData);
        }
        Ok(())
    }
}

impl<R: Read> Read for VaultFileReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.current_pos < self.current.len() {
                let n = (self.current.len() - self.current_pos).min(buf.len());
                buf[..n].copy_from_slice(&self.current[self.current_pos..self.current_pos + n]);
                self.current_pos += n;
                return Ok(n);
            }

            if self.finished {
                return Ok(0);
            }

            let (plaintext, is_final) = self.read_chunk()?;
            self.chunk_number += 1;
            self.current = plaintext;
            self.current_pos = 0;

            if is_final {
                self.finished = true;
                self.check_no_trailing_data()?;
            }

            if self.current.is_empty() && !self.finished {
                continue; // shouldn't happen (non-final chunks are never empty) but stay safe
            }
            if self.current.is_empty() && self.finished {
                return Ok(0);
            }
        }
    }
}

/// Wrap a freshly generated header and a fresh content key around `writer`,
/// writing the header immediately and returning a chunk writer for the body.
#[instrument(level = "debug", skip(writer, master_key))]
pub fn create_encrypted_writer<W: Write>(
    mut writer: W,
    master_key: &MasterKey,
) -> Result<VaultFileWriter<W>, StreamError> {
    let mut content_key = [0u8; 32];
    rand::rng().fill_bytes(&mut content_key);

    let header_bytes = file_ctrmac::encrypt_header(&content_key, master_key)?;
    writer.write_all(&header_bytes)?;

    let header_nonce: [u8; NONCE_SIZE] = header_bytes[..NONCE_SIZE].try_into().unwrap();
    let mac_key = master_key.with_mac_key(|k| *k).map_err(CtrMacError::from)?;

    Ok(VaultFileWriter::new(writer, content_key, header_nonce, mac_key))
}

/// Read and decrypt the header from `reader`, returning a chunk reader for
/// the body.
#[instrument(level = "debug", skip(reader, master_key))]
pub fn open_encrypted_reader<R: Read>(
    mut reader: R,
    master_key: &MasterKey,
) -> Result<VaultFileReader<R>, StreamError> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_bytes)?;
    let header = file_ctrmac::decrypt_header(&header_bytes, master_key, &FileContext::new())?;
    let mac_key = master_key.with_mac_key(|k| *k).map_err(CtrMacError::from)?;

    Ok(VaultFileReader::new(reader, *header.content_key, header.nonce, mac_key))
}

/// Size of the plaintext-to-ciphertext expansion for a raw content size `S`.
#[must_use]
pub fn enc_content_size(raw_size: u64) -> u64 {
    let cp = CHUNK_PLAINTEXT_SIZE as u64;
    let full_chunks = raw_size / cp;
    let remainder = raw_size % cp;
    let mut total = full_chunks * CHUNK_ENCRYPTED_SIZE as u64;
    if remainder > 0 || raw_size == 0 {
        total += remainder + CHUNK_OVERHEAD as u64;
    }
    total
}

/// Size including the 88-byte file header.
#[must_use]
pub fn enc(raw_size: u64) -> u64 {
    HEADER_SIZE as u64 + enc_content_size(raw_size)
}

/// Exact inverse of [`enc`]: recover the raw plaintext size from the total
/// encrypted file size.
#[must_use]
pub fn raw(enc_size: u64) -> u64 {
    let content_size = enc_size.saturating_sub(HEADER_SIZE as u64);
    if content_size <= CHUNK_OVERHEAD as u64 {
        return content_size.saturating_sub(CHUNK_OVERHEAD as u64);
    }
    let cp = CHUNK_PLAINTEXT_SIZE as u64;
    let ce = CHUNK_ENCRYPTED_SIZE as u64;
    let full_chunks = content_size / ce;
    let remainder = content_size % ce;
    if remainder == 0 {
        full_chunks * cp
    } else {
        full_chunks * cp + (remainder - CHUNK_OVERHEAD as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn round_trip(data: &[u8]) -> Vec<u8> {
        let master_key = MasterKey::random().unwrap();
        let mut encrypted = Vec::new();
        {
            let mut writer = create_encrypted_writer(&mut encrypted, &master_key).unwrap();
            writer.write_all(data).unwrap();
            writer.close().unwrap();
        }
        let mut reader = open_encrypted_reader(Cursor::new(encrypted), &master_key).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn empty_file_round_trip() {
        assert_eq!(round_trip(b""), b"");
    }

    #[test]
    fn small_file_round_trip() {
        assert_eq!(round_trip(b"hello"), b"hello");
    }

    #[test]
    fn exact_chunk_boundary_size() {
        let data = vec![0xAA; CHUNK_PLAINTEXT_SIZE];
        let master_key = MasterKey::random().unwrap();
        let mut encrypted = Vec::new();
        {
            let mut writer = create_encrypted_writer(&mut encrypted, &master_key).unwrap();
            writer.write_all(&data).unwrap();
            writer.close().unwrap();
        }
        assert_eq!(encrypted.len() as u64, enc(CHUNK_PLAINTEXT_SIZE as u64));
        assert_eq!(encrypted.len(), 32904);

        let mut reader = open_encrypted_reader(Cursor::new(encrypted), &master_key).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn chunk_boundary_plus_one() {
        let data = vec![0xAA; CHUNK_PLAINTEXT_SIZE + 1];
        let master_key = MasterKey::random().unwrap();
        let mut encrypted = Vec::new();
        {
            let mut writer = create_encrypted_writer(&mut encrypted, &master_key).unwrap();
            writer.write_all(&data).unwrap();
            writer.close().unwrap();
        }
        assert_eq!(encrypted.len(), 32953);
        assert_eq!(encrypted.len() as u64, enc(CHUNK_PLAINTEXT_SIZE as u64 + 1));
    }

    #[test]
    fn round_trip_with_varied_write_step_sizes() {
        for step in [1usize, 512, 600, 1000, 32768] {
            let len = 2 * CHUNK_PLAINTEXT_SIZE + 7;
            let data: Vec<u8> = (0..len).map(|i| (i % 256) as u8).collect();
            let master_key = MasterKey::random().unwrap();
            let mut encrypted = Vec::new();
            {
                let mut writer = create_encrypted_writer(&mut encrypted, &master_key).unwrap();
                for chunk in data.chunks(step) {
                    writer.write_all(chunk).unwrap();
                }
                writer.close().unwrap();
            }
            let mut reader = open_encrypted_reader(Cursor::new(encrypted), &master_key).unwrap();
            let mut out = Vec::new();
            reader.read_to_end(&mut out).unwrap();
            assert_eq!(out, data, "mismatch with step size {step}");
        }
    }

    #[test]
    fn write_after_close_is_rejected() {
        let master_key = MasterKey::random().unwrap();
        let mut encrypted = Vec::new();
        let mut writer = create_encrypted_writer(&mut encrypted, &master_key).unwrap();
        writer.write_all(b"data").unwrap();
        writer.close().unwrap();

        let err = writer.write(b"more").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);

        let err2 = writer.close().unwrap_err();
        assert!(matches!(err2, StreamError::AlreadyClosed));
    }

    #[test]
    fn trailing_data_is_rejected() {
        let master_key = MasterKey::random().unwrap();
        let mut encrypted = Vec::new();
        {
            let mut writer = create_encrypted_writer(&mut encrypted, &master_key).unwrap();
            writer.write_all(b"hello world").unwrap();
            writer.close().unwrap();
        }
        encrypted.push(0x00); // append one byte after the valid file

        let mut reader = open_encrypted_reader(Cursor::new(encrypted), &master_key).unwrap();
        let mut out = Vec::new();
        let result = reader.read_to_end(&mut out);
        assert!(result.is_err());
    }

    #[test]
    fn tampered_chunk_mac_fails_authentication() {
        let master_key = MasterKey::random().unwrap();
        let mut encrypted = Vec::new();
        {
            let mut writer = create_encrypted_writer(&mut encrypted, &master_key).unwrap();
            writer.write_all(&vec![0x41; 100_000]).unwrap();
            writer.close().unwrap();
        }
        // Flip the last byte of the second chunk's MAC.
        let second_chunk_start = HEADER_SIZE + CHUNK_ENCRYPTED_SIZE;
        let mac_end = second_chunk_start + CHUNK_ENCRYPTED_SIZE;
        encrypted[mac_end - 1] ^= 0xFF;

        let mut reader = open_encrypted_reader(Cursor::new(encrypted), &master_key).unwrap();
        let mut out = Vec::new();
        let result = reader.read_to_end(&mut out);
        assert!(result.is_err());
    }

    #[test]
    fn size_arithmetic_is_exact_for_reference_sizes() {
        for s in [0u64, 1, 32767, 32768, 32769, 65536, 65537, 1_000_000] {
            assert_eq!(raw(enc(s)), s, "round trip failed for size {s}");
        }
        assert_eq!(enc(32768), 32904);
        assert_eq!(enc(32769), 32953);
    }
}
