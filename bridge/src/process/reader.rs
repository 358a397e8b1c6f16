//! Record reader for the media process's stderr stream.
//!
//! Ported from `rust-srec/src/downloader/engine/utils/output_record_reader.rs`:
//! progress lines are carriage-return delimited rather than newline-delimited
//! when the process rewrites a single terminal line, so records are split on
//! either `\n` or `\r`.

use std::io;

use tokio::io::{AsyncRead, BufReader};

pub struct OutputRecordReader<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
    scratch: [u8; 4096],
}

impl<R> OutputRecordReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            pending: Vec::new(),
            scratch: [0u8; 4096],
        }
    }

    pub async fn next_record(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(idx) = find_record_delimiter(&self.pending) {
                let record_bytes: Vec<u8> = self.pending.drain(..idx).collect();
                consume_delimiters(&mut self.pending);

                let record = String::from_utf8_lossy(&record_bytes).trim().to_string();
                if record.is_empty() {
                    continue;
                }
                return Ok(Some(record));
            }

            let n = tokio::io::AsyncReadExt::read(&mut self.reader, &mut self.scratch).await?;
            if n == 0 {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                let record = String::from_utf8_lossy(&self.pending).trim().to_string();
                self.pending.clear();
                if record.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(record));
            }

            self.pending.extend_from_slice(&self.scratch[..n]);
        }
    }
}

fn find_record_delimiter(buf: &[u8]) -> Option<usize> {
    buf.iter()
        .position(|&b| matches!(b, b'\n' | b'\r'))
}

fn consume_delimiters(buf: &mut Vec<u8>) {
    let n = buf.iter().take_while(|&&b| matches!(b, b'\n' | b'\r')).count();
    if n > 0 {
        buf.drain(..n);
    }
}
