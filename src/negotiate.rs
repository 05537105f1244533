//! Content-encoding negotiation and gzip stream adapters

use axum::http::{header, HeaderMap};
use bytes::Bytes;
use flate2::write::{GzDecoder, GzEncoder};
use flate2::Compression;
use futures::stream::{self, Stream, StreamExt};
use std::io::Write;

/// Header carrying the client's requested wire protocol (`version=2`)
pub const GIT_PROTOCOL_HEADER: &str = "git-protocol";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Gzip,
    Identity,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Gzip => "gzip",
            Encoding::Identity => "identity",
        }
    }
}

/// Pick a response encoding from `Accept-Encoding`, offering gzip first and
/// identity second.
///
/// The highest q-value wins and ties go to the earlier offer; `*` matches
/// any offer. Without a matching entry, or when the best match has `q=0`,
/// the body is sent unencoded.
pub fn negotiate_encoding(accept_encoding: Option<&str>) -> Encoding {
    let offers = [Encoding::Gzip, Encoding::Identity];
    let specs = accept_encoding.map(parse_accept).unwrap_or_default();

    let mut best = Encoding::Identity;
    let mut best_q = -1.0f32;
    for offer in offers {
        for (value, q) in &specs {
            if *q > best_q && (value == "*" || value == offer.as_str()) {
                best_q = *q;
                best = offer;
            }
        }
    }
    if best_q == 0.0 {
        Encoding::Identity
    } else {
        best
    }
}

fn parse_accept(header: &str) -> Vec<(String, f32)> {
    header
        .split(',')
        .filter_map(|item| {
            let mut parts = item.split(';');
            let value = parts.next()?.trim().to_ascii_lowercase();
            if value.is_empty() {
                return None;
            }
            let mut q = 1.0f32;
            for param in parts {
                if let Some((name, raw)) = param.split_once('=') {
                    if name.trim().eq_ignore_ascii_case("q") {
                        q = raw.trim().parse().ok().filter(|q: &f32| (0.0..=1.0).contains(q))?;
                    }
                }
            }
            Some((value, q))
        })
        .collect()
}

pub fn response_encoding(headers: &HeaderMap) -> Encoding {
    negotiate_encoding(
        headers
            .get(header::ACCEPT_ENCODING)
            .and_then(|v| v.to_str().ok()),
    )
}

/// Raw `Git-Protocol` header value, passed through to git untouched
pub fn git_protocol(headers: &HeaderMap) -> Option<String> {
    headers
        .get(GIT_PROTOCOL_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

pub fn is_gzip_body(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            let v = v.trim();
            v.eq_ignore_ascii_case("gzip") || v.eq_ignore_ascii_case("x-gzip")
        })
        .unwrap_or(false)
}

/// Gzip a byte stream chunk by chunk. The gzip trailer is written once the
/// source ends; a source error ends the output without one. Nothing is
/// flushed mid-stream, so a reader may see no bytes until the source ends.
pub fn gzip_encode<S>(source: S) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static
where
    S: Stream<Item = std::io::Result<Bytes>> + Send + Unpin + 'static,
{
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    stream::unfold(Some((source, encoder)), |state| async move {
        let (mut source, mut encoder) = state?;
        loop {
            match source.next().await {
                Some(Ok(chunk)) => {
                    if let Err(e) = encoder.write_all(&chunk) {
                        return Some((Err(e), None));
                    }
                    let out = std::mem::take(encoder.get_mut());
                    if !out.is_empty() {
                        return Some((Ok(Bytes::from(out)), Some((source, encoder))));
                    }
                }
                Some(Err(e)) => return Some((Err(e), None)),
                None => return Some((encoder.finish().map(Bytes::from), None)),
            }
        }
    })
}

/// Inflate a gzip request body as it arrives.
pub fn gzip_decode<S>(source: S) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static
where
    S: Stream<Item = std::io::Result<Bytes>> + Send + Unpin + 'static,
{
    let decoder = GzDecoder::new(Vec::new());
    stream::unfold(Some((source, decoder)), |state| async move {
        let (mut source, mut decoder) = state?;
        loop {
            match source.next().await {
                Some(Ok(chunk)) => {
                    if let Err(e) = decoder.write_all(&chunk) {
                        return Some((Err(e), None));
                    }
                    let out = std::mem::take(decoder.get_mut());
                    if !out.is_empty() {
                        return Some((Ok(Bytes::from(out)), Some((source, decoder))));
                    }
                }
                Some(Err(e)) => return Some((Err(e), None)),
                None => return Some((decoder.finish().map(Bytes::from), None)),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder as ReadGzDecoder;
    use std::io::Read;

    #[test]
    fn test_negotiation() {
        assert_eq!(negotiate_encoding(None), Encoding::Identity);
        assert_eq!(negotiate_encoding(Some("gzip")), Encoding::Gzip);
        assert_eq!(negotiate_encoding(Some("deflate, gzip, br")), Encoding::Gzip);
        assert_eq!(negotiate_encoding(Some("*")), Encoding::Gzip);
        assert_eq!(negotiate_encoding(Some("br")), Encoding::Identity);
        assert_eq!(negotiate_encoding(Some("gzip;q=0")), Encoding::Identity);
        assert_eq!(negotiate_encoding(Some("gzip;q=0.5, identity")), Encoding::Identity);
        assert_eq!(negotiate_encoding(Some("identity;q=0.2, GZIP;q=0.8")), Encoding::Gzip);
        assert_eq!(negotiate_encoding(Some("gzip, identity")), Encoding::Gzip);
        assert_eq!(negotiate_encoding(Some("gzip;q=abc")), Encoding::Identity);
    }

    #[test]
    fn test_gzip_body_detection() {
        let mut headers = HeaderMap::new();
        assert!(!is_gzip_body(&headers));
        headers.insert(header::CONTENT_ENCODING, "gzip".parse().unwrap());
        assert!(is_gzip_body(&headers));
        headers.insert(header::CONTENT_ENCODING, "br".parse().unwrap());
        assert!(!is_gzip_body(&headers));
    }

    #[tokio::test]
    async fn test_gzip_encode_stream() {
        let chunks: Vec<std::io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"001e# service=git-upload-pack\n")),
            Ok(Bytes::from_static(b"0000")),
        ];
        let encoded: Vec<u8> = gzip_encode(stream::iter(chunks))
            .map(|c| c.unwrap())
            .collect::<Vec<Bytes>>()
            .await
            .concat();

        let mut plain = String::new();
        ReadGzDecoder::new(&encoded[..]).read_to_string(&mut plain).unwrap();
        assert_eq!(plain, "001e# service=git-upload-pack\n0000");
    }

    #[tokio::test]
    async fn test_gzip_decode_stream_across_chunks() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"0032want 0123456789012345678901234567890123456789\n").unwrap();
        let compressed = encoder.finish().unwrap();

        let (a, b) = compressed.split_at(compressed.len() / 2);
        let chunks: Vec<std::io::Result<Bytes>> =
            vec![Ok(Bytes::copy_from_slice(a)), Ok(Bytes::copy_from_slice(b))];
        let decoded: Vec<u8> = gzip_decode(stream::iter(chunks))
            .map(|c| c.unwrap())
            .collect::<Vec<Bytes>>()
            .await
            .concat();
        assert_eq!(decoded, b"0032want 0123456789012345678901234567890123456789\n");
    }
}
