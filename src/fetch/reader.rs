//! Streaming body reader with bounded encoding detection.
//!
//! The body is consumed in chunks of at most `buffer_size` bytes. While no
//! encoding is locked in, chunks are retained raw and fed to the detector
//! and the `<meta>` scanner; once detection ends the retained chunks are
//! replayed through the chosen decoder and the rest of the body is decoded
//! as it streams in.

use std::pin::{Pin, pin};
use std::time::{Duration, Instant};

use bytes::Bytes;
use encoding_rs::{CoderResult, Decoder, Encoding, WINDOWS_1252};
use futures_util::{Stream, StreamExt};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderName, LOCATION};
use reqwest::{Response, StatusCode};
use tracing::{debug, trace};

use super::FetchError;
use super::constants::{MAX_CAPACITY_HINT, MAX_DETECTION_CHUNKS, META_GRACE_CHUNKS};
use super::redirect::{absolute_location, is_redirect_status, same_url};
use crate::encoding::resolver::{charset_from_content_type, preselect_encoding};
use crate::encoding::{
    CharsetDetector, DetectionMode, EncodingDecision, EncodingHints, EncodingSource,
    find_meta_charset, resolve_encoding,
};

/// The parts of a response needed before its body is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: StatusCode,
    /// URL after transport-level redirects.
    pub final_url: String,
    pub location: Option<String>,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
}

impl ResponseHead {
    #[must_use]
    pub fn from_response(response: &Response) -> Self {
        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        Self {
            status: response.status(),
            final_url: response.url().to_string(),
            location: header(LOCATION),
            content_type: header(CONTENT_TYPE),
            content_length: header(CONTENT_LENGTH).and_then(|value| value.trim().parse().ok()),
        }
    }

    /// Valid charset named by the `Content-Type` header.
    #[must_use]
    pub fn header_charset(&self) -> Option<&'static Encoding> {
        self.content_type.as_deref().and_then(charset_from_content_type)
    }

    /// Absolute redirect target relative to the URL that was requested.
    ///
    /// A redirect status with a `Location` header yields that location; a
    /// response that arrived from a different URL (the transport followed
    /// redirects) yields its final URL.
    #[must_use]
    pub fn redirect_location(&self, requested: &str) -> Option<String> {
        if is_redirect_status(self.status)
            && let Some(location) = &self.location
        {
            return Some(absolute_location(requested, location));
        }
        if same_url(requested, &self.final_url) {
            None
        } else {
            Some(self.final_url.clone())
        }
    }
}

/// Per-call read settings taken from the session.
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions<'a> {
    /// URL reported in errors.
    pub url: &'a str,
    pub mode: DetectionMode,
    /// Configured encoding: the fallback, or the only one in `Fixed` mode.
    pub fallback: &'static Encoding,
    pub buffer_size: usize,
    pub max_response_size: Option<u64>,
    pub operation_timeout: Option<Duration>,
}

/// A fully decoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBody {
    pub text: String,
    pub encoding: EncodingDecision,
    pub bytes_read: u64,
    /// Reading stopped at the byte cap.
    pub truncated: bool,
}

/// Initial text-buffer capacity for a body of `content_length` bytes.
///
/// Ten percent headroom over the declared length, clamped to
/// `[buffer_size, 2 MiB]`. Unknown lengths get `buffer_size`.
#[must_use]
pub fn capacity_hint(content_length: Option<u64>, buffer_size: usize) -> usize {
    let ceiling = MAX_CAPACITY_HINT.max(buffer_size);
    let Some(length) = content_length else {
        return buffer_size;
    };
    let scaled = length.saturating_add(length / 10);
    usize::try_from(scaled)
        .unwrap_or(usize::MAX)
        .clamp(buffer_size, ceiling)
}

/// Reads and decodes a body, choosing its encoding along the way.
///
/// # Errors
///
/// - [`FetchError::Timeout`] when the operation timeout expires
/// - [`FetchError::Network`] when the body stream fails
/// - [`FetchError::EmptyBody`] when the body has no bytes and no cap stopped it
pub async fn read_text<S>(
    body: S,
    head: &ResponseHead,
    options: &ReadOptions<'_>,
    detector: &mut dyn CharsetDetector,
) -> Result<DecodedBody, FetchError>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>>,
{
    let body = pin!(body);
    let mut reader = ChunkReader::new(body, options);
    let header = head.header_charset();
    let mut hints = EncodingHints {
        header,
        ..EncodingHints::default()
    };

    let mut retained: Vec<Bytes> = Vec::new();
    let mut locked = preselect_encoding(options.mode, header, options.fallback);
    if locked.is_none() {
        locked = detect(&mut reader, options, detector, &mut hints, &mut retained).await?;
    }
    let decision =
        locked.unwrap_or_else(|| resolve_encoding(options.mode, hints, options.fallback));
    debug!(
        encoding = decision.name(),
        source = ?decision.source,
        retained = retained.len(),
        "encoding chosen"
    );

    let mut text = String::with_capacity(capacity_hint(head.content_length, options.buffer_size));
    let mut decoder = decision.encoding.new_decoder_with_bom_removal();
    for chunk in retained.drain(..) {
        decode_into(&mut decoder, &chunk, &mut text, false);
    }
    while let Some(chunk) = reader.next_chunk().await? {
        decode_into(&mut decoder, &chunk, &mut text, false);
    }
    decode_into(&mut decoder, &[], &mut text, true);

    if reader.bytes_read == 0 && !reader.capped {
        return Err(FetchError::empty_body(options.url, head.status.as_u16()));
    }

    Ok(DecodedBody {
        text,
        encoding: decision,
        bytes_read: reader.bytes_read,
        truncated: reader.capped,
    })
}

/// Reads a body as raw bytes under the same cap and timeout rules.
///
/// # Errors
///
/// [`FetchError::Timeout`] or [`FetchError::Network`] while reading.
pub async fn read_bytes<S>(body: S, options: &ReadOptions<'_>) -> Result<Vec<u8>, FetchError>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>>,
{
    let body = pin!(body);
    let mut reader = ChunkReader::new(body, options);
    let mut out = Vec::new();
    while let Some(chunk) = reader.next_chunk().await? {
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

/// Runs the bounded detection window, retaining every chunk it consumes.
async fn detect<S>(
    reader: &mut ChunkReader<'_, S>,
    options: &ReadOptions<'_>,
    detector: &mut dyn CharsetDetector,
    hints: &mut EncodingHints,
    retained: &mut Vec<Bytes>,
) -> Result<Option<EncodingDecision>, FetchError>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>>,
{
    // `<meta>` tags are ASCII, so any ASCII-compatible decoder can find them.
    let scan_encoding = if options.fallback.is_ascii_compatible() {
        options.fallback
    } else {
        WINDOWS_1252
    };
    let mut scan_decoder = scan_encoding.new_decoder_without_bom_handling();
    let mut window = String::new();
    let mut limit = MAX_DETECTION_CHUNKS;

    while retained.len() < limit {
        let Some(chunk) = reader.next_chunk().await? else {
            break;
        };
        retained.push(chunk.clone());

        if options.mode.uses_detector() {
            detector.feed(&chunk);
            if let Some(verdict) = detector.verdict() {
                hints.detector = Some(verdict.encoding);
                if verdict.is_conclusive() {
                    trace!(
                        encoding = verdict.encoding.name(),
                        confidence = verdict.confidence,
                        "detector locked encoding"
                    );
                    return Ok(Some(EncodingDecision::new(
                        verdict.encoding,
                        EncodingSource::Detector,
                    )));
                }
            }
        }

        if options.mode.uses_meta_tags() && hints.meta.is_none() {
            decode_into(&mut scan_decoder, &chunk, &mut window, false);
            if let Some(found) = find_meta_charset(&window) {
                trace!(encoding = found.name(), "meta charset found");
                hints.meta = Some(found);
                if options.mode.meta_tag_is_final() {
                    return Ok(Some(EncodingDecision::new(found, EncodingSource::MetaTag)));
                }
                limit = limit.min(META_GRACE_CHUNKS);
            }
        }
    }

    Ok(None)
}

/// Hands out body chunks of at most `chunk_size` bytes, enforcing the byte
/// cap and the operation timeout.
struct ChunkReader<'a, S> {
    stream: Pin<&'a mut S>,
    pending: Bytes,
    chunk_size: usize,
    url: &'a str,
    started: Instant,
    budget: Option<Duration>,
    cap: Option<u64>,
    bytes_read: u64,
    capped: bool,
    exhausted: bool,
}

impl<'a, S> ChunkReader<'a, S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>>,
{
    fn new(stream: Pin<&'a mut S>, options: &ReadOptions<'a>) -> Self {
        Self {
            stream,
            pending: Bytes::new(),
            chunk_size: options.buffer_size.max(1),
            url: options.url,
            started: Instant::now(),
            budget: options.operation_timeout,
            cap: options.max_response_size,
            bytes_read: 0,
            capped: false,
            exhausted: false,
        }
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>, FetchError> {
        loop {
            if self.capped {
                return Ok(None);
            }
            if let Some(cap) = self.cap
                && self.bytes_read >= cap
            {
                self.capped = true;
                return Ok(None);
            }

            if self.pending.is_empty() {
                if self.exhausted {
                    return Ok(None);
                }
                match self.poll_stream().await? {
                    Some(bytes) => self.pending = bytes,
                    None => {
                        self.exhausted = true;
                        return Ok(None);
                    }
                }
                continue;
            }

            let mut take = self.pending.len().min(self.chunk_size);
            if let Some(cap) = self.cap {
                let left = usize::try_from(cap - self.bytes_read).unwrap_or(usize::MAX);
                take = take.min(left);
            }
            let chunk = self.pending.split_to(take);
            self.bytes_read += chunk.len() as u64;
            if self.cap.is_some_and(|cap| self.bytes_read >= cap) {
                self.capped = true;
            }
            return Ok(Some(chunk));
        }
    }

    async fn poll_stream(&mut self) -> Result<Option<Bytes>, FetchError> {
        let next = match self.budget {
            Some(budget) => {
                let elapsed = self.started.elapsed();
                let Some(remaining) = budget.checked_sub(elapsed).filter(|left| !left.is_zero())
                else {
                    return Err(FetchError::timeout(self.url, elapsed.as_millis()));
                };
                tokio::time::timeout(remaining, self.stream.as_mut().next())
                    .await
                    .map_err(|_| FetchError::timeout(self.url, self.started.elapsed().as_millis()))?
            }
            None => self.stream.as_mut().next().await,
        };
        next.transpose()
            .map_err(|e| FetchError::transport(self.url, e, self.started.elapsed()))
    }
}

fn decode_into(decoder: &mut Decoder, input: &[u8], out: &mut String, last: bool) {
    let mut remaining = input;
    loop {
        let needed = decoder
            .max_utf8_buffer_length(remaining.len())
            .unwrap_or_else(|| remaining.len().saturating_mul(3));
        out.reserve(needed.max(4));
        let (result, read, _) = decoder.decode_to_string(remaining, out, last);
        remaining = &remaining[read..];
        if result == CoderResult::InputEmpty {
            break;
        }
    }
}
