use std::io;

use sha1::{Digest, Sha1};

/// A writable stream that keeps a running SHA-1 checksum of all bytes
#[derive(Clone)]
pub(crate) struct Sha1HashingStream<T: io::Write> {
    pub stream: T,
    pub context: Sha1,
}

impl<T: io::Write> Sha1HashingStream<T> {
    pub fn new(file: T) -> Sha1HashingStream<T> {
        Self {
            stream: file,
            context: Sha1::new(),
        }
    }

    /// Hex digest of everything written so far.
    pub fn compute(&self) -> String {
        let digest = self.context.clone().finalize();
        base16ct::lower::encode_string(&digest)
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.stream
    }

    pub fn into_inner(self) -> T {
        self.stream
    }
}

impl<T: io::Write> io::Write for Sha1HashingStream<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.context.update(buf);
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl<T: io::Seek + io::Write> io::Seek for Sha1HashingStream<T> {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.stream.seek(pos)
    }
}
