//! Test-only helpers.

use std::io::{self, BufRead, Read};
use std::path::{Path, PathBuf};

use uuid::Uuid;

/// A uniquely named directory under the system temp dir, removed on drop.
#[derive(Debug)]
pub struct TmpDir {
    path: PathBuf,
}

impl TmpDir {
    pub fn new(name: &str) -> Self {
        let path = std::env::temp_dir().join(format!("stackpile-{name}-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&path).expect("mkdir");
        tracing::debug!("tmp dir: {}", path.display());
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TmpDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

/// Serves `data` up to `fail_at`, then fails every read with
/// `ErrorKind::Other`, like a connection reset mid-body.
#[derive(Debug)]
pub struct FailingReader {
    data: Vec<u8>,
    pos: usize,
    fail_at: usize,
}

impl FailingReader {
    pub fn new(data: &[u8], fail_at: usize) -> Self {
        Self {
            data: data.to_vec(),
            pos: 0,
            fail_at: fail_at.min(data.len()),
        }
    }
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let avail = self.fill_buf()?;
        let n = avail.len().min(buf.len());
        buf[..n].copy_from_slice(&avail[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl BufRead for FailingReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.pos >= self.fail_at {
            return Err(io::Error::other("connection reset by peer"));
        }
        Ok(&self.data[self.pos..self.fail_at])
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt).min(self.fail_at);
    }
}
