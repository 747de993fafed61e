//! Gzip framing for HTTP bodies

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};

/// Value of the `Content-Encoding`/`Accept-Encoding` headers
pub const GZIP: &str = "gzip";

/// Compress `data` with the best compression level
pub fn compress(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::best());
    encoder.write_all(data)?;
    encoder.finish()
}

pub fn decompress(data: &[u8]) -> io::Result<Vec<u8>> {
    decompress_limited(data, usize::MAX)
}

/// Inflate `data`, failing with `InvalidData` once the output passes `limit`
pub fn decompress_limited(data: &[u8], limit: usize) -> io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data).take((limit as u64).saturating_add(1));
    let mut out = Vec::with_capacity(data.len().saturating_mul(2).min(limit));
    decoder.read_to_end(&mut out)?;
    if out.len() > limit {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("inflated body exceeds {limit} bytes"),
        ));
    }
    Ok(out)
}

/// True when a comma separated encoding header lists gzip
pub fn accepts_gzip(header: &str) -> bool {
    header
        .split(',')
        .any(|part| part.split(';').next().map(str::trim) == Some(GZIP))
}
