//! Cursors over open fids.

use {
    crate::{
        conn::Connection,
        error::Error,
        fcall::*,
        io_err, serialize,
        utils::Result,
    },
    log::{debug, warn},
    std::sync::Arc,
};

/// An open, non-directory file.
///
/// Reads and writes advance a private position, like a file descriptor.
pub struct File {
    conn: Arc<Connection>,
    fid: u32,
    pos: u64,
    iounit: u32,
    open: bool,
}

impl File {
    pub(crate) fn new(conn: Arc<Connection>, fid: u32, iounit: u32) -> File {
        File {
            conn,
            fid,
            pos: 0,
            iounit: iounit.max(1),
            open: true,
        }
    }

    /// Get the raw fid.
    pub fn fid(&self) -> u32 {
        self.fid
    }

    /// Offset of the next read or write.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Largest payload of a single read or write.
    pub fn iounit(&self) -> u32 {
        self.iounit
    }

    /// Read the next chunk, `None` at end of file.
    ///
    /// The server may return fewer bytes than asked for.
    pub async fn read(&mut self) -> Result<Option<Vec<u8>>> {
        let reply = self
            .conn
            .send(FCall::TRead {
                fid: self.fid,
                offset: self.pos,
                count: self.iounit,
            })
            .await?;

        let Data(data) = match reply {
            FCall::RRead { data } => data,
            other => return Err(Error::UnexpectedReply(MsgType::from(&other))),
        };

        if data.is_empty() {
            return Ok(None);
        }
        self.pos += data.len() as u64;
        Ok(Some(data))
    }

    /// Read until end of file.
    pub async fn read_all(&mut self) -> Result<Vec<u8>> {
        let mut all = Vec::new();
        while let Some(chunk) = self.read().await? {
            all.extend_from_slice(&chunk);
        }
        Ok(all)
    }

    /// Write `buf` at the current position in chunks of at most `iounit` bytes.
    ///
    /// A chunk the server only partly accepts is resent from where it stopped.
    /// An empty `buf` still goes out as one empty write, which wmii files treat
    /// as clearing their contents. Returns the number of bytes written, which
    /// is `buf.len()` on success.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let mut written = 0;

        loop {
            let end = buf.len().min(written + self.iounit as usize);
            let chunk = &buf[written..end];

            let reply = self
                .conn
                .send(FCall::TWrite {
                    fid: self.fid,
                    offset: self.pos,
                    data: Data(chunk.to_vec()),
                })
                .await?;

            let count = match reply {
                FCall::RWrite { count } => count as usize,
                other => return Err(Error::UnexpectedReply(MsgType::from(&other))),
            };

            if count == 0 && !chunk.is_empty() {
                return Err(io_err!(WriteZero, "server accepted no bytes").into());
            }
            if count > chunk.len() {
                return Err(Error::Protocol(format!(
                    "server acknowledged {} bytes of a {} byte write",
                    count,
                    chunk.len()
                )));
            }
            if count < chunk.len() {
                debug!("short write on fid {}: {} of {}", self.fid, count, chunk.len());
            }

            self.pos += count as u64;
            written += count;
            if written == buf.len() {
                return Ok(written);
            }
        }
    }

    /// Clunk the fid.
    ///
    /// The server rejecting the clunk (the fid is already gone) is not an error.
    pub async fn close(mut self) -> Result<()> {
        self.open = false;
        clunk(&self.conn, self.fid).await
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if !self.open {
            return;
        }

        // Best effort: nobody is left to see the result
        let (conn, fid) = (self.conn.clone(), self.fid);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = clunk(&conn, fid).await;
                });
            }
            Err(_) => warn!("fid {} dropped outside a runtime, not clunked", fid),
        }
    }
}

pub(crate) async fn clunk(conn: &Connection, fid: u32) -> Result<()> {
    match conn.send(FCall::TClunk { fid }).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_protocol() => {
            debug!("clunk of fid {} rejected: {}", fid, e);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// An open directory, yielding one [`Stat`] per entry.
pub struct Dir {
    file: File,
    buf: Option<Vec<u8>>,
    cursor: usize,
}

impl Dir {
    pub(crate) fn new(file: File) -> Dir {
        Dir {
            file,
            buf: None,
            cursor: 0,
        }
    }

    /// Next directory entry, `None` once all are consumed.
    ///
    /// The first call reads the whole directory.
    pub async fn next(&mut self) -> Result<Option<Stat>> {
        if self.buf.is_none() {
            self.buf = Some(self.file.read_all().await?);
        }

        let buf = self.buf.as_deref().unwrap_or_default();
        let mut rest = &buf[self.cursor..];
        let stat = serialize::next_stat(&mut rest)?;
        self.cursor = buf.len() - rest.len();
        Ok(stat)
    }

    /// Collect the remaining entries.
    pub async fn entries(&mut self) -> Result<Vec<Stat>> {
        let mut entries = Vec::new();
        while let Some(stat) = self.next().await? {
            entries.push(stat);
        }
        Ok(entries)
    }

    /// Clunk the fid.
    pub async fn close(self) -> Result<()> {
        self.file.close().await
    }
}

/// An open fid, told apart by the qid type the server returned.
pub enum Node {
    File(File),
    Dir(Dir),
}

impl Node {
    pub fn is_dir(&self) -> bool {
        matches!(*self, Node::Dir(_))
    }

    /// Get the raw fid.
    pub fn fid(&self) -> u32 {
        match *self {
            Node::File(ref f) => f.fid(),
            Node::Dir(ref d) => d.file.fid(),
        }
    }

    /// Clunk the fid.
    pub async fn close(self) -> Result<()> {
        match self {
            Node::File(f) => f.close().await,
            Node::Dir(d) => d.close().await,
        }
    }
}
