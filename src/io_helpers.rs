//! Small `Read` wrappers used by the reader contract (C3).

use std::io::{self, Read};

use crate::error::Error;

/// Defers opening the underlying stream until the first read.
///
/// Random-access adapters hand these out from `iter_members_with_io` so that
/// a caller who skips a member (never reads its stream) never pays for
/// opening it.
pub struct LazyOpenReader<R, F>
where
    F: FnOnce() -> io::Result<R>,
{
    state: LazyState<R, F>,
    /// Whether the eventual inner reader is expected to be seekable. Purely
    /// descriptive: this type only implements `Read`.
    pub declared_seekable: bool,
}

enum LazyState<R, F> {
    Pending(Option<F>),
    Open(R),
    Failed,
}

impl<R, F> LazyOpenReader<R, F>
where
    R: Read,
    F: FnOnce() -> io::Result<R>,
{
    /// Wrap `open` so it only runs on first read.
    pub fn new(open: F, declared_seekable: bool) -> Self {
        Self {
            state: LazyState::Pending(Some(open)),
            declared_seekable,
        }
    }
}

impl<R, F> Read for LazyOpenReader<R, F>
where
    R: Read,
    F: FnOnce() -> io::Result<R>,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match &mut self.state {
                LazyState::Open(r) => return r.read(buf),
                LazyState::Pending(open) => {
                    let open = open.take().expect("LazyOpenReader polled after failure");
                    match open() {
                        Ok(r) => self.state = LazyState::Open(r),
                        Err(e) => {
                            self.state = LazyState::Failed;
                            return Err(e);
                        }
                    }
                }
                LazyState::Failed => {
                    return Err(io::Error::other("stream failed to open"));
                }
            }
        }
    }
}

/// Wraps a member stream, translating underlying read errors into the
/// common [`Error`] taxonomy via `translate`. Errors the translator doesn't
/// recognize (returns `None`) pass through unchanged.
pub struct ExceptionTranslatingReader<R, T>
where
    T: Fn(&io::Error) -> Option<Error>,
{
    inner: R,
    translate: T,
}

impl<R, T> ExceptionTranslatingReader<R, T>
where
    R: Read,
    T: Fn(&io::Error) -> Option<Error>,
{
    /// Wrap `inner`, running `translate` on any read error.
    pub fn new(inner: R, translate: T) -> Self {
        Self { inner, translate }
    }
}

impl<R, T> Read for ExceptionTranslatingReader<R, T>
where
    R: Read,
    T: Fn(&io::Error) -> Option<Error>,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.read(buf) {
            Ok(n) => Ok(n),
            Err(e) => match (self.translate)(&e) {
                Some(translated) => Err(translated.into()),
                None => Err(e),
            },
        }
    }
}

/// A stream whose first read immediately fails with a pre-seeded error.
///
/// Used when iteration must yield *something* per member but the adapter
/// already knows the member can't be read (e.g. a RAR5 entry with the wrong
/// password, where the underlying `unrar` process would otherwise silently
/// skip it and misalign the output stream with the member list).
pub struct ErrorStreamReader {
    error: Option<Error>,
}

impl ErrorStreamReader {
    /// Create a sentinel stream that will fail with `error` on first read.
    pub fn new(error: Error) -> Self {
        Self { error: Some(error) }
    }
}

impl Read for ErrorStreamReader {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        match self.error.take() {
            Some(e) => Err(e.into()),
            None => Err(io::Error::other("ErrorStreamReader read after error")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lazy_open_defers_until_read() {
        use std::cell::Cell;
        use std::rc::Rc;

        let opened = Rc::new(Cell::new(false));
        let opened_inner = Rc::clone(&opened);
        let mut r = LazyOpenReader::new(
            move || -> io::Result<&[u8]> {
                opened_inner.set(true);
                Ok(b"hello" as &[u8])
            },
            false,
        );
        assert!(!opened.get());
        let mut buf = [0u8; 5];
        let n = r.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert!(opened.get());
    }

    #[test]
    fn error_stream_fails_once_seeded() {
        let mut s = ErrorStreamReader::new(Error::MemberCannotBeOpened("x".into()));
        let mut buf = [0u8; 1];
        assert!(s.read(&mut buf).is_err());
    }

    #[test]
    fn exception_translator_passes_through_unrecognized() {
        let data: &[u8] = b"abc";
        let mut r = ExceptionTranslatingReader::new(data, |_e| None);
        let mut buf = [0u8; 3];
        assert_eq!(r.read(&mut buf).unwrap(), 3);
    }
}
