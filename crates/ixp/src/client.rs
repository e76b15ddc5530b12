//! Path-oriented 9P session on top of a [`Connection`].
//!
//! # Protocol
//! 9P2000

use {
    crate::{
        config::Config,
        conn::Connection,
        error::Error,
        fcall::*,
        file::{self, Dir, File, Node},
        io_err, res,
        utils::Result,
    },
    log::debug,
    std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};

/// What [`Client::read`] found at a path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Contents {
    /// Everything a plain file held
    Data(Vec<u8>),
    /// The entries of a directory, in server order
    Entries(Vec<Stat>),
}

impl Contents {
    /// File contents as text, or entry names one per line.
    pub fn to_text(&self) -> String {
        match *self {
            Contents::Data(ref data) => String::from_utf8_lossy(data).into_owned(),
            Contents::Entries(ref entries) => entries.iter().fold(String::new(), |mut s, e| {
                s.push_str(&e.name);
                s.push('\n');
                s
            }),
        }
    }
}

/// An attached 9P session.
///
/// All paths are resolved from the root fid established at attach time.
pub struct Client {
    conn: Arc<Connection>,
    root: u32,
    next_fid: AtomicU32,
    msize: u32,
}

impl Client {
    /// Dial `config.address` and attach.
    pub async fn connect(config: &Config) -> Result<Client> {
        let addr = config
            .address
            .as_deref()
            .ok_or_else(|| io_err!(NotFound, "Nowhere to connect: WMII_ADDRESS is not set"))?;

        let conn = Connection::connect(addr).await?;
        Client::attach(conn, config).await
    }

    /// Connect using [`Config::from_env`].
    pub async fn from_env() -> Result<Client> {
        Client::connect(&Config::from_env()).await
    }

    /// Negotiate the protocol version and attach to the server's root.
    ///
    /// `config.timeout`, when set, replaces any timeout already on `conn`.
    pub async fn attach(conn: Connection, config: &Config) -> Result<Client> {
        let conn = match config.timeout {
            Some(_) => conn.with_timeout(config.timeout),
            None => conn,
        };
        let conn = Arc::new(conn);

        let reply = conn
            .send_tagged(
                VERSION_TAG,
                FCall::TVersion {
                    msize: config.msize,
                    version: P92000.to_owned(),
                },
            )
            .await?;
        let msize = match reply {
            FCall::RVersion { msize, version } if version == P92000 => msize.min(config.msize),
            FCall::RVersion { version, .. } => return Err(Error::UnsupportedVersion(version)),
            other => return Err(Error::UnexpectedReply(MsgType::from(&other))),
        };

        let client = Client {
            conn,
            root: 0,
            next_fid: AtomicU32::new(1),
            msize,
        };

        let reply = client
            .conn
            .send(FCall::TAttach {
                fid: client.root,
                afid: config.afid,
                uname: config.uname.clone(),
                aname: config.aname.clone(),
            })
            .await?;
        match reply {
            FCall::RAttach { qid } => {
                debug!("attached as {:?} (msize {}): {:?}", config.uname, msize, qid)
            }
            other => return Err(Error::UnexpectedReply(MsgType::from(&other))),
        }

        Ok(client)
    }

    /// The connection this session runs on.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Negotiated maximum message size.
    pub fn msize(&self) -> u32 {
        self.msize
    }

    fn gen_fid(&self) -> u32 {
        self.next_fid.fetch_add(1, Ordering::Relaxed)
    }

    /// Walk from the root to `path` and return the new fid.
    pub async fn walk(&self, path: &str) -> Result<u32> {
        let wnames: Vec<String> = path
            .split('/')
            .filter(|c| !c.is_empty())
            .map(str::to_owned)
            .collect();
        let newfid = self.gen_fid();

        let reply = self
            .conn
            .send(FCall::TWalk {
                fid: self.root,
                newfid,
                wnames: wnames.clone(),
            })
            .await?;

        let wqids = match reply {
            FCall::RWalk { wqids } => wqids,
            other => return Err(Error::UnexpectedReply(MsgType::from(&other))),
        };
        // A short walk leaves newfid unassigned
        match wnames.get(wqids.len()) {
            _ if wqids.len() == wnames.len() => Ok(newfid),
            Some(missing) => Err(Error::Protocol(format!("{}: file not found", missing))),
            None => Err(Error::Protocol(format!(
                "walk of {} names returned {} qids",
                wnames.len(),
                wqids.len()
            ))),
        }
    }

    /// Open `path` with an `om` mode.
    ///
    /// The caller owns the returned handle and should `close` it.
    pub async fn open(&self, path: &str, mode: u8) -> Result<Node> {
        let fid = self.walk(path).await?;

        let (qid, iounit) = match self.conn.send(FCall::TOpen { fid, mode }).await {
            Ok(FCall::ROpen { qid, iounit }) => (qid, iounit),
            Ok(other) => {
                return Err(self
                    .abandon(fid, Error::UnexpectedReply(MsgType::from(&other)))
                    .await);
            }
            Err(e) => return Err(self.abandon(fid, e).await),
        };

        let file = File::new(self.conn.clone(), fid, self.iounit_or_default(iounit));
        if qid.is_dir() {
            Ok(Node::Dir(Dir::new(file)))
        } else {
            Ok(Node::File(file))
        }
    }

    /// Open `path`, run `f` on it, and close it however `f` ends.
    pub async fn with_open<T, F>(&self, path: &str, mode: u8, f: F) -> Result<T>
    where
        F: AsyncFnOnce(&mut Node) -> Result<T>,
    {
        let mut node = self.open(path, mode).await?;
        let res = f(&mut node).await;
        let closed = node.close().await;

        let value = res?;
        closed?;
        Ok(value)
    }

    /// Create `path` with permission bits `perm`.
    ///
    /// The new file is not kept open; reopen it by path to use it.
    pub async fn create(&self, path: &str, perm: u32, mode: u8) -> Result<()> {
        let trimmed = path.trim_end_matches('/');
        let (parent, name) = trimmed.rsplit_once('/').unwrap_or(("", trimmed));
        if name.is_empty() {
            return res!(io_err!(InvalidInput, format!("{}: no file name to create", path)));
        }

        let fid = self.walk(parent).await?;
        let reply = self
            .conn
            .send(FCall::TCreate {
                fid,
                name: name.to_owned(),
                perm,
                mode,
            })
            .await;
        let clunked = file::clunk(&self.conn, fid).await;

        match reply? {
            FCall::RCreate { .. } => clunked,
            other => Err(Error::UnexpectedReply(MsgType::from(&other))),
        }
    }

    /// Remove `path`.
    pub async fn remove(&self, path: &str) -> Result<()> {
        let fid = self.walk(path).await?;
        // The server clunks the fid whether or not the remove succeeds
        match self.conn.send(FCall::TRemove { fid }).await? {
            FCall::RRemove => Ok(()),
            other => Err(Error::UnexpectedReply(MsgType::from(&other))),
        }
    }

    /// Read a whole file, or list a directory.
    pub async fn read(&self, path: &str) -> Result<Contents> {
        self.with_open(path, om::READ, async |node: &mut Node| match *node {
            Node::File(ref mut f) => Ok(Contents::Data(f.read_all().await?)),
            Node::Dir(ref mut d) => Ok(Contents::Entries(d.entries().await?)),
        })
        .await
    }

    /// Write `data` to the start of an existing file.
    pub async fn write(&self, path: &str, data: impl AsRef<[u8]>) -> Result<usize> {
        let data = data.as_ref();
        self.with_open(path, om::WRITE, async |node: &mut Node| match *node {
            Node::File(ref mut f) => f.write(data).await,
            Node::Dir(_) => res!(io_err!(IsADirectory, format!("{}: is a directory", path))),
        })
        .await
    }

    fn iounit_or_default(&self, iounit: u32) -> u32 {
        match iounit {
            0 => self.msize.saturating_sub(IOHDRSZ).max(1),
            n => n,
        }
    }

    async fn abandon(&self, fid: u32, e: Error) -> Error {
        if let Err(ce) = file::clunk(&self.conn, fid).await {
            debug!("clunk of abandoned fid {} failed: {}", fid, ce);
        }
        e
    }
}
