//! Reverse line reader
//!
//! Yields the lines of a seekable source newest-first, reading fixed-size
//! chunks backwards from a starting offset. Only the current partial line
//! and one chunk are held in memory, and every byte is searched once.

use std::collections::VecDeque;
use std::io::{self, Read, Seek, SeekFrom};

/// Default chunk size. WAF log lines routinely exceed a few hundred bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

pub struct BackScanner<R> {
    reader: R,
    /// Offset of the first byte already pulled into `pending`
    pos: u64,
    chunk_size: usize,
    /// Bytes read but not yet returned, always the tail end of a line
    pending: VecDeque<u8>,
    /// Leading bytes of `pending` not yet searched for a newline
    unsearched: usize,
    /// Nothing has been returned yet
    fresh: bool,
    done: bool,
}

impl<R: Read + Seek> BackScanner<R> {
    /// Scan backwards starting at byte offset `end`
    pub fn new(reader: R, end: u64) -> Self {
        Self::with_chunk_size(reader, end, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(reader: R, end: u64, chunk_size: usize) -> Self {
        Self {
            reader,
            pos: end,
            chunk_size: chunk_size.max(1),
            pending: VecDeque::new(),
            unsearched: 0,
            fresh: true,
            done: false,
        }
    }

    /// Scan backwards from the current end of the source
    pub fn from_end(mut reader: R) -> io::Result<Self> {
        let end = reader.seek(SeekFrom::End(0))?;
        Ok(Self::new(reader, end))
    }

    /// Next line towards the start of the source, without its line ending
    ///
    /// A trailing newline at the very end does not produce an empty line.
    pub fn next_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        Ok(self.next_line_at()?.map(|(_, line)| line))
    }

    /// Like [`BackScanner::next_line`], with the byte offset where the line starts
    pub fn next_line_at(&mut self) -> io::Result<Option<(u64, Vec<u8>)>> {
        loop {
            if self.done {
                return Ok(None);
            }

            let found = self
                .pending
                .range(..self.unsearched)
                .rposition(|&b| b == b'\n');
            if let Some(nl) = found {
                let offset = self.pos + nl as u64 + 1;
                let line = trim_cr(self.pending.split_off(nl + 1).into());
                self.pending.truncate(nl);
                self.unsearched = nl;
                if std::mem::take(&mut self.fresh) && line.is_empty() {
                    continue;
                }
                return Ok(Some((offset, line)));
            }
            self.unsearched = 0;

            if self.pos == 0 {
                self.done = true;
                if self.fresh && self.pending.is_empty() {
                    return Ok(None);
                }
                self.fresh = false;
                let line = trim_cr(std::mem::take(&mut self.pending).into());
                return Ok(Some((0, line)));
            }

            self.read_chunk()?;
        }
    }

    fn read_chunk(&mut self) -> io::Result<()> {
        let len = self.pos.min(self.chunk_size as u64) as usize;
        self.pos -= len as u64;
        self.reader.seek(SeekFrom::Start(self.pos))?;

        let mut chunk = vec![0u8; len];
        self.reader.read_exact(&mut chunk)?;
        self.pending.reserve(len);
        for &b in chunk.iter().rev() {
            self.pending.push_front(b);
        }
        self.unsearched = len;
        Ok(())
    }
}

impl<R: Read + Seek> Iterator for BackScanner<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_line().transpose()
    }
}

fn trim_cr(mut line: Vec<u8>) -> Vec<u8> {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn lines(data: &[u8], chunk: usize) -> Vec<String> {
        let reader = Cursor::new(data.to_vec());
        BackScanner::with_chunk_size(reader, data.len() as u64, chunk)
            .map(|l| String::from_utf8(l.unwrap()).unwrap())
            .collect()
    }

    #[test]
    fn test_lines_come_newest_first() {
        for chunk in [1, 3, 7, 4096] {
            assert_eq!(lines(b"one\ntwo\nthree\n", chunk), vec!["three", "two", "one"]);
        }
    }

    #[test]
    fn test_no_trailing_newline() {
        assert_eq!(lines(b"one\ntwo", 2), vec!["two", "one"]);
    }

    #[test]
    fn test_empty_lines_are_kept() {
        assert_eq!(lines(b"\na\n\nb\n", 2), vec!["b", "", "a", ""]);
    }

    #[test]
    fn test_crlf_is_trimmed() {
        assert_eq!(lines(b"a\r\nb\r\n", 4096), vec!["b", "a"]);
    }

    #[test]
    fn test_empty_source() {
        assert!(lines(b"", 16).is_empty());
        assert_eq!(lines(b"\n", 16), vec![""]);
    }

    #[test]
    fn test_lines_longer_than_chunk() {
        let long = "x".repeat(10_000);
        let data = format!("first\n{}\nlast\n", long);
        let got = lines(data.as_bytes(), 64);
        assert_eq!(got, vec!["last".to_string(), long, "first".to_string()]);
    }

    #[test]
    fn test_scan_from_offset_ignores_later_bytes() {
        let data = b"a\nb\nc\n".to_vec();
        let scanner = BackScanner::new(Cursor::new(data), 4);
        let got: Vec<_> = scanner.map(|l| l.unwrap()).collect();
        assert_eq!(got, vec![b"b".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn test_line_offsets() {
        let data = b"ab\r\ncd\n\nlast";
        for chunk in [1, 2, 5, 4096] {
            let mut scanner =
                BackScanner::with_chunk_size(Cursor::new(data.to_vec()), data.len() as u64, chunk);
            let mut got = Vec::new();
            while let Some((offset, line)) = scanner.next_line_at().unwrap() {
                got.push((offset, String::from_utf8(line).unwrap()));
            }
            assert_eq!(
                got,
                vec![
                    (8, "last".to_string()),
                    (7, String::new()),
                    (4, "cd".to_string()),
                    (0, "ab".to_string()),
                ]
            );
        }
    }

    #[test]
    fn test_long_line_in_small_chunks() {
        let long = "y".repeat(200_000);
        let data = format!("{}\nend\n", long);
        let mut scanner =
            BackScanner::with_chunk_size(Cursor::new(data.into_bytes()), 200_005, 16);
        assert_eq!(scanner.next_line_at().unwrap(), Some((200_001, b"end".to_vec())));
        assert_eq!(scanner.next_line_at().unwrap(), Some((0, long.into_bytes())));
        assert_eq!(scanner.next_line_at().unwrap(), None);
    }

    #[test]
    fn test_from_end_is_restartable() {
        let mut cursor = Cursor::new(b"1\n2\n".to_vec());
        let first: Vec<_> = BackScanner::from_end(&mut cursor)
            .unwrap()
            .map(|l| l.unwrap())
            .collect();
        let second: Vec<_> = BackScanner::from_end(&mut cursor)
            .unwrap()
            .map(|l| l.unwrap())
            .collect();
        assert_eq!(first, second);
    }
}
