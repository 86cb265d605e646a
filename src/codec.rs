//! Encoding-aware stream adapters
//!
//! The pty always speaks UTF-8. A [`Codec`] sits between it and the caller:
//! the writer decodes caller bytes from the chosen encoding into UTF-8, and
//! the reader encodes pty output from UTF-8 into the chosen encoding.
//!
//! Unknown or empty labels resolve to [`Codec::Identity`], which hands the
//! raw stream back untouched.

use std::io::{self, Read, Write};

use encoding_rs::{CoderResult, Decoder, Encoder, Encoding, UTF_8};

/// Size of the raw read buffer used by [`EncodingReader`]
const READ_CHUNK: usize = 4096;

/// Transcoding between the pty's UTF-8 and a caller-chosen encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// Byte-for-byte passthrough
    Identity,
    /// Transcode to and from the given encoding
    Transcode(&'static Encoding),
}

impl Codec {
    /// Resolve an encoding label such as `gbk`, `big5` or `shift_jis`
    pub fn from_label(label: &str) -> Self {
        match Encoding::for_label(label.as_bytes()) {
            Some(encoding) => {
                // UTF-16 and "replacement" have no encoder; they write UTF-8
                let encoding = encoding.output_encoding();
                if encoding == UTF_8 {
                    Codec::Identity
                } else {
                    Codec::Transcode(encoding)
                }
            },
            None => Codec::Identity,
        }
    }

    /// Canonical name of the caller-side encoding
    pub fn name(&self) -> &'static str {
        match self {
            Codec::Identity => UTF_8.name(),
            Codec::Transcode(encoding) => encoding.name(),
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Codec::Identity)
    }

    /// Wrap the pty output stream so reads yield bytes in this encoding
    pub fn wrap_reader<R>(self, inner: R) -> Box<dyn Read + Send>
    where
        R: Read + Send + 'static,
    {
        match self {
            Codec::Identity => Box::new(inner),
            Codec::Transcode(encoding) => Box::new(EncodingReader::new(inner, encoding)),
        }
    }

    /// Wrap the pty input stream so writes accept bytes in this encoding
    pub fn wrap_writer<W>(self, inner: W) -> Box<dyn Write + Send>
    where
        W: Write + Send + 'static,
    {
        match self {
            Codec::Identity => Box::new(inner),
            Codec::Transcode(encoding) => Box::new(EncodingWriter::new(inner, encoding)),
        }
    }
}

/// Reader that turns UTF-8 from `inner` into bytes of a target encoding
///
/// Malformed UTF-8 becomes U+FFFD; characters the target encoding cannot
/// represent become HTML numeric character references.
pub struct EncodingReader<R> {
    inner: R,
    decoder: Decoder,
    encoder: Encoder,
    raw: Box<[u8]>,
    utf8: String,
    /// Encoded bytes not yet handed to the caller
    pending: Vec<u8>,
    pos: usize,
    eof: bool,
}

impl<R: Read> EncodingReader<R> {
    pub fn new(inner: R, encoding: &'static Encoding) -> Self {
        Self {
            inner,
            decoder: UTF_8.new_decoder_without_bom_handling(),
            encoder: encoding.new_encoder(),
            raw: vec![0u8; READ_CHUNK].into_boxed_slice(),
            utf8: String::new(),
            pending: Vec::new(),
            pos: 0,
            eof: false,
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn transcode(&mut self, n: usize, last: bool) {
        self.utf8.clear();
        decode_into(&mut self.decoder, &self.raw[..n], &mut self.utf8, last);
        encode_into(&mut self.encoder, &self.utf8, &mut self.pending, last);
    }
}

impl<R: Read> Read for EncodingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            if self.pos < self.pending.len() {
                let n = (self.pending.len() - self.pos).min(buf.len());
                buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
                self.pos += n;
                if self.pos == self.pending.len() {
                    self.pending.clear();
                    self.pos = 0;
                }
                return Ok(n);
            }

            if self.eof {
                return Ok(0);
            }

            // A read that ends mid-sequence produces nothing yet; keep reading
            let n = match self.inner.read(&mut self.raw) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            let last = n == 0;
            self.transcode(n, last);
            self.eof = last;
        }
    }
}

/// Writer that turns bytes of a source encoding into UTF-8 on `inner`
///
/// Every write consumes the whole buffer. A trailing partial multi-byte
/// sequence stays in the decoder until the next write completes it.
pub struct EncodingWriter<W> {
    inner: W,
    decoder: Decoder,
    utf8: String,
}

impl<W: Write> EncodingWriter<W> {
    pub fn new(inner: W, encoding: &'static Encoding) -> Self {
        Self {
            inner,
            decoder: encoding.new_decoder_without_bom_handling(),
            utf8: String::new(),
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for EncodingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.utf8.clear();
        decode_into(&mut self.decoder, buf, &mut self.utf8, false);
        self.inner.write_all(self.utf8.as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn decode_into(decoder: &mut Decoder, mut src: &[u8], dst: &mut String, last: bool) {
    loop {
        let needed = decoder
            .max_utf8_buffer_length(src.len())
            .unwrap_or(src.len());
        dst.reserve(needed.max(4));
        let (result, read, _) = decoder.decode_to_string(src, dst, last);
        src = &src[read..];
        if result == CoderResult::InputEmpty {
            return;
        }
    }
}

fn encode_into(encoder: &mut Encoder, mut src: &str, dst: &mut Vec<u8>, last: bool) {
    loop {
        let needed = encoder
            .max_buffer_length_from_utf8_if_no_unmappables(src.len())
            .unwrap_or(src.len());
        // Room for at least one numeric character reference
        dst.reserve(needed.max(16));
        let (result, read, _) = encoder.encode_from_utf8_to_vec(src, dst, last);
        src = &src[read..];
        if result == CoderResult::InputEmpty {
            return;
        }
    }
}
