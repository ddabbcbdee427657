use std::cell::Cell;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::io::{self, Read, Seek, SeekFrom};
use std::rc::Rc;

use reqwest::blocking::Client;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::StatusCode;

use crate::error::{MapError, Result};

#[cfg(test)]
mod tests {
    use std::io::{Read, Seek, SeekFrom};

    use rstest::rstest;

    use super::{parse_content_range_total, strip_vsi_prefix, HttpRangeReader, BLOCK_SIZE};
    use crate::test::serve_bytes;

    #[rstest]
    #[case("/vsicurl/https://example.org/dem.tif", "https://example.org/dem.tif")]
    #[case("https://example.org/dem.tif", "https://example.org/dem.tif")]
    #[case("/vsicurl/http://localhost/a.tif", "http://localhost/a.tif")]
    fn vsicurl_prefix_is_stripped(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(strip_vsi_prefix(input), expected);
    }

    #[rstest]
    #[case("bytes 0-0/12345", Some(12345))]
    #[case("bytes 100-199/4096", Some(4096))]
    #[case("bytes 0-0/*", None)]
    #[case("garbage", None)]
    fn content_range_total_is_parsed(#[case] header: &str, #[case] expected: Option<u64>) {
        assert_eq!(parse_content_range_total(header), expected);
    }

    #[rstest]
    #[case("/data/dem.tif", false)]
    #[case("https://example.org/dem.tif", true)]
    #[case("/vsicurl/https://example.org/dem.tif", true)]
    fn remote_locations_are_detected(#[case] location: &str, #[case] remote: bool) {
        assert_eq!(HttpRangeReader::is_remote(location), remote);
    }

    #[test]
    fn reads_ranges_and_counts_the_download() {
        let data: Vec<u8> = (0..BLOCK_SIZE as usize + 1000).map(|i| (i % 251) as u8).collect();
        let url = serve_bytes(data.clone());

        let mut reader = HttpRangeReader::open(&format!("/vsicurl/{}", url)).unwrap();
        let downloaded = reader.downloaded();
        assert_eq!(reader.len(), data.len() as u64);
        assert_eq!(downloaded.get(), 0);

        // only the last, short block is fetched
        let offset = BLOCK_SIZE + 10;
        reader.seek(SeekFrom::Start(offset)).unwrap();
        let mut buf = [0u8; 16];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..], &data[offset as usize..offset as usize + 16]);
        assert_eq!(downloaded.get(), 1000);

        // cached, no second request
        reader.seek(SeekFrom::Start(offset + 100)).unwrap();
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(downloaded.get(), 1000);
    }

    #[test]
    fn unreachable_host_is_a_transport_error() {
        let res = HttpRangeReader::open("http://127.0.0.1:9/missing.tif");
        assert!(matches!(res, Err(crate::error::MapError::Transport { .. })));
    }
}

const BLOCK_SIZE: u64 = 256 * 1024;
const MAX_CACHED_BLOCKS: usize = 128;

/// Cause attached to the `io::Error`s handed to the TIFF decoder, so a failed
/// request can be told apart from a malformed file afterwards.
#[derive(Debug)]
pub struct TransportFailure {
    pub url: String,
    pub reason: String,
}

impl Display for TransportFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.url, self.reason)
    }
}

impl std::error::Error for TransportFailure {}

/// `Read + Seek` over a remote file, served by HTTP range requests.
///
/// Only the byte ranges the decoder actually touches are downloaded. Failed
/// requests are not retried.
pub struct HttpRangeReader {
    client: Client,
    url: String,
    len: u64,
    pos: u64,
    blocks: HashMap<u64, Vec<u8>>,
    downloaded: Rc<Cell<u64>>,
}

impl HttpRangeReader {
    pub fn is_remote(location: &str) -> bool {
        let url = strip_vsi_prefix(location);
        url.starts_with("http://") || url.starts_with("https://")
    }

    pub fn open(location: &str) -> Result<Self> {
        let url = strip_vsi_prefix(location).to_string();
        let client = Client::builder()
            .user_agent(concat!("summit-map/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let len = remote_length(&client, &url)?;
        tracing::debug!(%url, len, "opened remote raster");

        Ok(HttpRangeReader {
            client,
            url,
            len,
            pos: 0,
            blocks: HashMap::new(),
            downloaded: Rc::new(Cell::new(0)),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    /// Running count of the bytes fetched over the network, still readable
    /// once the reader has been handed to a decoder.
    pub fn downloaded(&self) -> Rc<Cell<u64>> {
        Rc::clone(&self.downloaded)
    }

    fn transport_error(&self, reason: String) -> io::Error {
        io::Error::new(
            io::ErrorKind::Other,
            TransportFailure {
                url: self.url.clone(),
                reason,
            },
        )
    }

    /// Makes sure blocks `first..=last` are cached, fetching the missing ones
    /// with a single request.
    fn ensure_blocks(&mut self, first: u64, last: u64) -> io::Result<()> {
        let missing: Vec<u64> = (first..=last).filter(|b| !self.blocks.contains_key(b)).collect();
        let (lo, hi) = match (missing.first(), missing.last()) {
            (Some(lo), Some(hi)) => (*lo, *hi),
            _ => return Ok(()),
        };

        if self.blocks.len() + (hi - lo + 1) as usize > MAX_CACHED_BLOCKS {
            self.blocks.clear();
        }

        let start = lo * BLOCK_SIZE;
        let end = ((hi + 1) * BLOCK_SIZE).min(self.len) - 1;
        tracing::debug!(url = %self.url, start, end, "range request");

        let response = self
            .client
            .get(&self.url)
            .header(RANGE, format!("bytes={}-{}", start, end))
            .send()
            .map_err(|e| self.transport_error(e.to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .map_err(|e| self.transport_error(e.to_string()))?;

        // a server ignoring the range header answers 200 with the whole file
        let body: &[u8] = match status {
            StatusCode::PARTIAL_CONTENT => &bytes[..],
            StatusCode::OK if bytes.len() as u64 == self.len => {
                &bytes[start as usize..=end as usize]
            }
            _ => return Err(self.transport_error(format!("HTTP {}", status))),
        };

        if body.len() as u64 != end - start + 1 {
            return Err(self.transport_error(format!(
                "expected {} bytes for range {}-{}, got {}",
                end - start + 1,
                start,
                end,
                body.len()
            )));
        }

        self.downloaded.set(self.downloaded.get() + body.len() as u64);
        for (i, block) in body.chunks(BLOCK_SIZE as usize).enumerate() {
            self.blocks.insert(lo + i as u64, block.to_vec());
        }

        Ok(())
    }
}

impl Read for HttpRangeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.pos >= self.len {
            return Ok(0);
        }

        let end = (self.pos + buf.len() as u64).min(self.len);
        let first = self.pos / BLOCK_SIZE;
        let last = (end - 1) / BLOCK_SIZE;
        self.ensure_blocks(first, last)?;

        let mut written = 0usize;
        while self.pos < end {
            let block_index = self.pos / BLOCK_SIZE;
            let block = match self.blocks.get(&block_index) {
                Some(block) => block,
                None => break,
            };
            let offset = (self.pos % BLOCK_SIZE) as usize;
            let available = (block.len() - offset).min((end - self.pos) as usize);
            buf[written..written + available].copy_from_slice(&block[offset..offset + available]);
            written += available;
            self.pos += available as u64;
        }

        Ok(written)
    }
}

impl Seek for HttpRangeReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => p as i128,
            SeekFrom::End(d) => self.len as i128 + d as i128,
            SeekFrom::Current(d) => self.pos as i128 + d as i128,
        };

        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of remote file",
            ));
        }

        self.pos = target as u64;
        Ok(self.pos)
    }
}

/// GDAL style `/vsicurl/` locations are accepted as plain URLs.
pub fn strip_vsi_prefix(location: &str) -> &str {
    location.strip_prefix("/vsicurl/").unwrap_or(location)
}

fn remote_length(client: &Client, url: &str) -> Result<u64> {
    let transport = |reason: String| MapError::Transport {
        url: url.to_string(),
        reason,
    };

    let head = client.head(url).send()?;
    if head.status().is_success() {
        let len = head
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if let Some(len) = len {
            return Ok(len);
        }
    }

    // some object stores refuse HEAD, ask for the first byte instead
    let probe = client.get(url).header(RANGE, "bytes=0-0").send()?;
    if probe.status() != StatusCode::PARTIAL_CONTENT {
        return Err(transport(format!("HTTP {} on range probe", probe.status())));
    }

    probe
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_range_total)
        .ok_or_else(|| transport("server did not report the file size".to_string()))
}

fn parse_content_range_total(header: &str) -> Option<u64> {
    header.rsplit('/').next()?.trim().parse().ok()
}
