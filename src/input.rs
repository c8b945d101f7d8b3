use std::{
    cell::RefCell,
    io::{self, Bytes, Read},
    rc::Rc,
};

/// Shared slot for the error that ended a `Utf8Chars` stream.
pub type ReadError = Rc<RefCell<Option<io::Error>>>;

/// Decodes a byte stream into chars lazily, one char per read, so an
/// interactive session only blocks on the input it actually needs. Invalid
/// sequences decode to U+FFFD. A read error ends the stream and is kept in the
/// error slot for the caller to report.
pub struct Utf8Chars<R: Read> {
    bytes: Bytes<R>,
    error: ReadError,
}

impl<R: Read> Utf8Chars<R> {
    pub fn new(reader: R) -> Self {
        Self {
            bytes: reader.bytes(),
            error: Rc::new(RefCell::new(None)),
        }
    }

    pub fn error(&self) -> ReadError {
        Rc::clone(&self.error)
    }

    fn next_byte(&mut self) -> Option<u8> {
        match self.bytes.next()? {
            Ok(byte) => Some(byte),
            Err(err) => {
                *self.error.borrow_mut() = Some(err);
                None
            }
        }
    }
}

impl<R: Read> Iterator for Utf8Chars<R> {
    type Item = char;

    fn next(&mut self) -> Option<char> {
        if self.error.borrow().is_some() {
            return None;
        }

        let first = self.next_byte()?;
        let width = match first {
            0x00..=0x7f => return Some(char::from(first)),
            0xc0..=0xdf => 2,
            0xe0..=0xef => 3,
            0xf0..=0xf7 => 4,
            _ => return Some(char::REPLACEMENT_CHARACTER),
        };

        let mut buf = [first, 0, 0, 0];
        for slot in buf.iter_mut().take(width).skip(1) {
            match self.next_byte() {
                Some(byte) => *slot = byte,
                None => return Some(char::REPLACEMENT_CHARACTER),
            }
        }

        Some(
            std::str::from_utf8(&buf[..width])
                .ok()
                .and_then(|s| s.chars().next())
                .unwrap_or(char::REPLACEMENT_CHARACTER),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;

    use super::*;

    struct Failing;

    impl Read for Failing {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "device gone"))
        }
    }

    #[test]
    fn decodes_utf8() {
        let chars: Vec<char> = Utf8Chars::new(Cursor::new("é+1 ∑".as_bytes())).collect();
        assert_eq!(chars, vec!['é', '+', '1', ' ', '∑']);
    }

    #[test]
    fn invalid_bytes_become_replacement() {
        let chars: Vec<char> = Utf8Chars::new(Cursor::new(vec![b'a', 0xff, 0xc3])).collect();
        assert_eq!(
            chars,
            vec!['a', char::REPLACEMENT_CHARACTER, char::REPLACEMENT_CHARACTER]
        );
    }

    #[test]
    fn read_error_ends_stream_and_is_kept() {
        let mut chars = Utf8Chars::new(Cursor::new(b"1".to_vec()).chain(Failing));
        let error = chars.error();

        assert_eq!(chars.next(), Some('1'));
        assert!(error.borrow().is_none());
        assert_eq!(chars.next(), None);
        assert_eq!(chars.next(), None);
        assert_eq!(
            error.borrow().as_ref().map(|err| err.to_string()),
            Some("device gone".to_string())
        );
    }

    #[test]
    fn clean_end_leaves_no_error() {
        let mut chars = Utf8Chars::new(Cursor::new(Vec::new()));
        assert_eq!(chars.next(), None);
        assert!(chars.error().borrow().is_none());
    }
}
