//! Streaming bracket-delimited tokenizer and per-worker file positioning.
//!
//! Grounded on `original_source/src/dictionary.cc`'s `readWord`/
//! `readWordTime` (the byte-level bracket-depth scan) and
//! `original_source/src/utils.cc`'s `seekToBOS`.
//!
//! A record is a comma-joined list of groups wrapped in one outer pair of
//! brackets, `[group, group, ...]`. Each group is `[time,[tok, tok, ...]]`:
//! the timestamp is a bare value sitting directly inside the group's own
//! bracket (depth 2), and the token list is bracketed one level deeper
//! (depth 3) - e.g. a single-group record reads `[[100,[x,y]]]`. The
//! timestamp sitting one level shallower than its tokens is what lets
//! `read_word_time` tell the two apart by nesting depth alone.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

pub const EOS: &str = "</s>";

/// Which kind of value the bracket tokenizer is currently accumulating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagTime {
    Time,
    Word,
}

/// Byte-at-a-time reader with one-byte pushback.
///
/// The tokenizer needs to "unread" a `\n` once it has decided the word
/// accumulated so far is the final token of a record, so that the next
/// call sees the same `\n` again and emits the end-of-sentence sentinel.
pub struct ByteCursor<R> {
    inner: R,
    pending: Option<u8>,
}

impl<R: Read> ByteCursor<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pending: None,
        }
    }

    fn next_byte(&mut self) -> io::Result<Option<u8>> {
        if let Some(b) = self.pending.take() {
            return Ok(Some(b));
        }
        let mut buf = [0u8; 1];
        match self.inner.read(&mut buf)? {
            0 => Ok(None),
            _ => Ok(Some(buf[0])),
        }
    }

    fn unread(&mut self, b: u8) {
        debug_assert!(self.pending.is_none());
        self.pending = Some(b);
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn inner_mut(&mut self) -> &mut R {
        &mut self.inner
    }
}

fn is_skipped_byte(b: u8) -> bool {
    matches!(b, b' ' | b'\r' | b'\t' | 0x0b | 0x0c | 0)
}

/// Reads the next token ignoring bracket nesting depth other than using it
/// to find word content (depth 3). Used by the classical (non-temporal)
/// `getLine`. `brackets` is owned by the caller so it persists across
/// successive calls within one record and is reset to 0 before the next.
pub fn read_word<R: Read>(
    cursor: &mut ByteCursor<R>,
    brackets: &mut i32,
) -> io::Result<Option<String>> {
    let mut word: Vec<u8> = Vec::new();
    while let Some(b) = cursor.next_byte()? {
        if b == b'\n' || b == b',' {
            if word.is_empty() {
                if b == b'\n' {
                    return Ok(Some(EOS.to_string()));
                }
                continue;
            }
            if b == b'\n' {
                cursor.unread(b);
            }
            return Ok(Some(String::from_utf8_lossy(&word).into_owned()));
        }
        if !is_skipped_byte(b) {
            if b == b'[' {
                *brackets += 1;
            } else if b == b']' {
                if *brackets > 0 {
                    *brackets -= 1;
                }
            } else if *brackets == 3 {
                word.push(b);
            }
        }
    }
    if word.is_empty() {
        Ok(None)
    } else {
        Ok(Some(String::from_utf8_lossy(&word).into_owned()))
    }
}

/// Reads the next token, distinguishing time tokens (bracket depth 2) from
/// word tokens (bracket depth 3). Used by the time-aware `getLineContext`.
pub fn read_word_time<R: Read>(
    cursor: &mut ByteCursor<R>,
    brackets: &mut i32,
) -> io::Result<Option<(String, FlagTime)>> {
    let mut word: Vec<u8> = Vec::new();
    let mut flag = FlagTime::Word;
    while let Some(b) = cursor.next_byte()? {
        if b == b'\n' || b == b',' {
            if word.is_empty() {
                if b == b'\n' {
                    return Ok(Some((EOS.to_string(), FlagTime::Word)));
                }
                continue;
            }
            if b == b'\n' {
                cursor.unread(b);
            }
            return Ok(Some((String::from_utf8_lossy(&word).into_owned(), flag)));
        }
        if !is_skipped_byte(b) {
            if b == b'[' {
                *brackets += 1;
            } else if b == b']' {
                if *brackets > 0 {
                    *brackets -= 1;
                }
            } else if *brackets == 2 {
                word.push(b);
                flag = FlagTime::Time;
            } else if *brackets == 3 {
                word.push(b);
                flag = FlagTime::Word;
            }
        }
    }
    if word.is_empty() {
        Ok(None)
    } else {
        Ok(Some((String::from_utf8_lossy(&word).into_owned(), flag)))
    }
}

/// Byte size of a file, via seek-to-end (mirrors `utils.cc::size`).
pub fn file_size(file: &mut File) -> io::Result<u64> {
    file.seek(SeekFrom::End(0))
}

/// Seeks to `pos`, then walks backward one byte at a time until a `\n` is
/// found (or byte 0 is reached), and positions one byte past it. Guarantees
/// the stream is positioned at a record boundary. Returns the final
/// position.
pub fn seek_to_bos(file: &mut File, pos: u64) -> io::Result<u64> {
    let mut off: i64 = 0;
    let pos_i = pos as i64;
    loop {
        let target = pos_i - off;
        if target < 0 {
            file.seek(SeekFrom::Start(0))?;
            return Ok(0);
        }
        file.seek(SeekFrom::Start(target as u64))?;
        let mut buf = [0u8; 1];
        let n = file.read(&mut buf)?;
        if n == 0 {
            off += 1;
            continue;
        }
        if buf[0] == b'\n' {
            break;
        }
        off += 1;
    }
    let new_pos = (pos_i - off + 1).max(0) as u64;
    file.seek(SeekFrom::Start(new_pos))?;
    Ok(new_pos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn read_word_emits_eos_on_blank_newline() {
        let mut cursor = ByteCursor::new(Cursor::new(b"\n".to_vec()));
        let mut brackets = 0;
        let tok = read_word(&mut cursor, &mut brackets).unwrap();
        assert_eq!(tok.as_deref(), Some(EOS));
    }

    #[test]
    fn read_word_time_splits_time_and_word_by_depth() {
        // "[[100,[x,y]]]\n": the group opens once, the bare time value sits
        // at depth 2, and the bracketed token list sits at depth 3.
        let mut cursor = ByteCursor::new(Cursor::new(b"[[100,[x,y]]]\n".to_vec()));
        let mut brackets = 0;
        let (tok, flag) = read_word_time(&mut cursor, &mut brackets).unwrap().unwrap();
        assert_eq!(tok, "100");
        assert_eq!(flag, FlagTime::Time);

        let (tok, flag) = read_word_time(&mut cursor, &mut brackets).unwrap().unwrap();
        assert_eq!(tok, "x");
        assert_eq!(flag, FlagTime::Word);

        let (tok, flag) = read_word_time(&mut cursor, &mut brackets).unwrap().unwrap();
        assert_eq!(tok, "y");
        assert_eq!(flag, FlagTime::Word);

        let (tok, _flag) = read_word_time(&mut cursor, &mut brackets).unwrap().unwrap();
        assert_eq!(tok, EOS);
    }

    #[test]
    fn seek_to_bos_lands_on_byte_zero_near_start() {
        let mut file = tempfile::tempfile().unwrap();
        use std::io::Write;
        file.write_all(b"abc\ndef\nghi\n").unwrap();
        let pos = seek_to_bos(&mut file, 1).unwrap();
        assert_eq!(pos, 0);
    }

    #[test]
    fn seek_to_bos_lands_one_past_newline() {
        let mut file = tempfile::tempfile().unwrap();
        use std::io::Write;
        file.write_all(b"abc\ndef\nghi\n").unwrap();
        // byte 5 is inside "def"; the preceding '\n' is at index 3.
        let pos = seek_to_bos(&mut file, 5).unwrap();
        assert_eq!(pos, 4);
    }
}
