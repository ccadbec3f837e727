//! Per-message deflate transform (RFC 7692).
//!
//! Both directions run without sliding-window carryover between messages
//! (`server_no_context_takeover; client_no_context_takeover`), so every
//! call starts from fresh codec state. Compressed payloads travel without
//! the `00 00 FF FF` sync-flush trailer: the encoder strips it, the decoder
//! appends it back before reading to EOF.
//!
//! The transform applies to data frames of a compressed connection only;
//! close frames are exempt and control frames are never compressed on the
//! write path.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::{Error, Result};
use crate::pool::Pool;

const DEFLATE_TRAILER: [u8; 4] = [0x00, 0x00, 0xff, 0xff];
const SCRATCH_SIZE: usize = 1024;

/// Process-wide scratch buffers for the transform loops.
static SCRATCH: Pool<Vec<u8>> = Pool::new();

/// Inflate a compressed message payload.
///
/// Feeds `payload` followed by the `00 00 FF FF` trailer to a fresh
/// raw-deflate decoder and reads to end of stream.
///
/// # Errors
///
/// Returns [`Error::Deflate`] when the payload is not a valid deflate
/// stream.
pub fn inflate(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    let mut scratch = SCRATCH.acquire_or_else(|| vec![0u8; SCRATCH_SIZE]);
    let result = inflate_into(payload, &mut scratch);
    SCRATCH.release(scratch);
    result
}

fn inflate_into(payload: &[u8], scratch: &mut [u8]) -> Result<Vec<u8>> {
    let mut input = Vec::with_capacity(payload.len() + DEFLATE_TRAILER.len());
    input.extend_from_slice(payload);
    input.extend_from_slice(&DEFLATE_TRAILER);

    let mut decoder = Decompress::new(false);
    let mut out = Vec::with_capacity(payload.len().saturating_mul(2));
    let mut pos = 0usize;

    loop {
        let before_in = decoder.total_in();
        let before_out = decoder.total_out();

        let status = decoder
            .decompress(&input[pos..], scratch, FlushDecompress::Sync)
            .map_err(|err| Error::Deflate(err.to_string()))?;

        let consumed = (decoder.total_in() - before_in) as usize;
        let produced = (decoder.total_out() - before_out) as usize;
        pos += consumed;
        out.extend_from_slice(&scratch[..produced]);

        match status {
            Status::StreamEnd => return Ok(out),
            Status::Ok | Status::BufError => {
                if consumed == 0 && produced == 0 {
                    return Ok(out);
                }
            }
        }
    }
}

/// Deflate a message payload.
///
/// Compresses with best compression through a fresh raw-deflate encoder,
/// sync-flushes, and drops the trailing `00 00 FF FF`.
///
/// # Errors
///
/// Returns [`Error::Deflate`] when the encoder reports a failure.
pub fn deflate(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    let mut scratch = SCRATCH.acquire_or_else(|| vec![0u8; SCRATCH_SIZE]);
    let result = deflate_into(payload, &mut scratch);
    SCRATCH.release(scratch);
    result
}

fn deflate_into(payload: &[u8], scratch: &mut [u8]) -> Result<Vec<u8>> {
    let mut encoder = Compress::new(Compression::best(), false);
    let mut out = Vec::with_capacity(payload.len() / 2 + DEFLATE_TRAILER.len());
    let mut pos = 0usize;

    loop {
        let before_in = encoder.total_in();
        let before_out = encoder.total_out();

        encoder
            .compress(&payload[pos..], scratch, FlushCompress::Sync)
            .map_err(|err| Error::Deflate(err.to_string()))?;

        let consumed = (encoder.total_in() - before_in) as usize;
        let produced = (encoder.total_out() - before_out) as usize;
        pos += consumed;
        out.extend_from_slice(&scratch[..produced]);

        // The sync flush is complete once all input is consumed and the
        // output buffer was not filled to the brim.
        if pos >= payload.len() && produced < scratch.len() {
            break;
        }
        if consumed == 0 && produced == 0 {
            break;
        }
    }

    if out.ends_with(&DEFLATE_TRAILER) {
        out.truncate(out.len() - DEFLATE_TRAILER.len());
    }
    Ok(out)
}
