//! In-process 9P server for exercising the client over `tokio::io::duplex`.
#![allow(dead_code)]

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use ixp::{serialize, *};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Read one frame the way a server would, checking its length prefix.
pub async fn recv(io: &mut DuplexStream) -> Option<Msg> {
    let mut size = [0u8; 4];
    io.read_exact(&mut size).await.ok()?;

    let mut frame = size.to_vec();
    frame.resize(u32::from_le_bytes(size) as usize, 0);
    io.read_exact(&mut frame[4..]).await.ok()?;
    Some(serialize::decode_frame(&frame).expect("client sent a malformed frame"))
}

pub async fn reply(io: &mut DuplexStream, tag: u16, body: FCall) {
    let frame = serialize::encode_frame(&Msg { tag, body }).unwrap();
    io.write_all(&frame).await.unwrap();
}

/// A connection whose server end is left to the test.
pub fn pipe() -> (Connection, DuplexStream) {
    let (client, server) = tokio::io::duplex(1 << 16);
    (Connection::from_stream(client), server)
}

/// A connection answered request by request by `handler`.
pub fn serve<H>(mut handler: H) -> Connection
where
    H: 'static + FnMut(&FCall) -> FCall + Send,
{
    let (conn, mut server) = pipe();
    tokio::spawn(async move {
        while let Some(msg) = recv(&mut server).await {
            let body = handler(&msg.body);
            reply(&mut server, msg.tag, body).await;
        }
    });
    conn
}

pub type SharedFs = Arc<Mutex<MemFs>>;

/// Serve `fs` and attach a client to it.
pub async fn attach(fs: MemFs) -> (Client, SharedFs) {
    attach_with(fs, |_| None).await
}

/// Like `attach`, with `intercept` answering any request it wants to before `fs` sees it.
pub async fn attach_with<I>(fs: MemFs, mut intercept: I) -> (Client, SharedFs)
where
    I: 'static + FnMut(&FCall) -> Option<FCall> + Send,
{
    let fs = Arc::new(Mutex::new(fs));
    let shared = fs.clone();
    let conn = serve(move |req| {
        let mut fs = shared.lock().unwrap();
        fs.log.push(req.clone());
        intercept(req).unwrap_or_else(|| fs.handle(req))
    });

    let config = Config {
        uname: "tester".to_owned(),
        ..Default::default()
    };
    let client = Client::attach(conn, &config).await.expect("attach failed");
    (client, fs)
}

pub fn err(ename: &str) -> FCall {
    FCall::RError {
        ename: ename.to_owned(),
    }
}

#[derive(Clone, Debug)]
pub enum Entry {
    Dir,
    File(Vec<u8>),
}

/// A tiny wmii-like tree held in memory.
pub struct MemFs {
    pub entries: BTreeMap<String, Entry>,
    pub fids: HashMap<u32, String>,
    pub iounit: u32,
    /// Accept at most this many bytes per write
    pub max_write: Option<u32>,
    /// Every request, in arrival order
    pub log: Vec<FCall>,
}

impl MemFs {
    pub fn new() -> MemFs {
        let mut entries = BTreeMap::new();
        entries.insert("/".to_owned(), Entry::Dir);
        MemFs {
            entries,
            fids: HashMap::new(),
            iounit: 0,
            max_write: None,
            log: Vec::new(),
        }
    }

    pub fn dir(mut self, path: &str) -> MemFs {
        self.entries.insert(path.to_owned(), Entry::Dir);
        self
    }

    pub fn file(mut self, path: &str, content: &str) -> MemFs {
        self.entries
            .insert(path.to_owned(), Entry::File(content.as_bytes().to_vec()));
        self
    }

    pub fn iounit(mut self, iounit: u32) -> MemFs {
        self.iounit = iounit;
        self
    }

    pub fn content(&self, path: &str) -> Option<String> {
        match self.entries.get(path) {
            Some(Entry::File(data)) => Some(String::from_utf8_lossy(data).into_owned()),
            _ => None,
        }
    }

    /// Requests of the kind `typ`, in order
    pub fn requests(&self, typ: MsgType) -> Vec<FCall> {
        self.log
            .iter()
            .filter(|req| MsgType::from(*req) == typ)
            .cloned()
            .collect()
    }

    fn join(dir: &str, name: &str) -> String {
        match dir {
            "/" => format!("/{}", name),
            _ => format!("{}/{}", dir, name),
        }
    }

    fn qid(&self, path: &str) -> QId {
        let typ = match self.entries.get(path) {
            Some(Entry::Dir) => QIdType::DIR,
            _ => QIdType::FILE,
        };
        let index = self.entries.keys().position(|p| p == path).unwrap_or(0);
        QId {
            typ,
            version: 0,
            path: index as u64,
        }
    }

    fn stat(&self, path: &str) -> Stat {
        let (mode, length) = match self.entries.get(path) {
            Some(Entry::Dir) => (dm::DIR | 0o755, 0),
            Some(Entry::File(data)) => (0o644, data.len() as u64),
            None => (0, 0),
        };
        Stat {
            qid: self.qid(path),
            mode,
            length,
            name: path.rsplit('/').next().unwrap_or_default().to_owned(),
            uid: "wmii".to_owned(),
            gid: "wmii".to_owned(),
            ..Default::default()
        }
    }

    fn children(&self, dir: &str) -> Vec<String> {
        self.entries
            .keys()
            .filter(|p| p.as_str() != "/")
            .filter(|p| match p.rsplit_once('/') {
                Some(("", _)) => dir == "/",
                Some((parent, _)) => parent == dir,
                None => false,
            })
            .cloned()
            .collect()
    }

    fn read_dir(&self, dir: &str, offset: u64, count: u32) -> Vec<u8> {
        // Only whole records, starting at a record boundary
        let mut out = Vec::new();
        let mut pos = 0u64;
        for child in self.children(dir) {
            let mut rec = Vec::new();
            serialize::Encodable::encode(&self.stat(&child), &mut rec).unwrap();
            if pos >= offset {
                if out.len() + rec.len() > count as usize {
                    break;
                }
                out.extend_from_slice(&rec);
            }
            pos += rec.len() as u64;
        }
        out
    }

    pub fn handle(&mut self, req: &FCall) -> FCall {
        match *req {
            FCall::TVersion { msize, ref version } => FCall::RVersion {
                msize: msize.min(DEFAULT_MSIZE),
                version: match version.as_str() {
                    P92000 => P92000.to_owned(),
                    _ => "unknown".to_owned(),
                },
            },
            FCall::TAttach { fid, .. } => {
                self.fids.insert(fid, "/".to_owned());
                FCall::RAttach { qid: self.qid("/") }
            }
            FCall::TWalk {
                fid,
                newfid,
                ref wnames,
            } => {
                let Some(mut path) = self.fids.get(&fid).cloned() else {
                    return err("unknown fid");
                };
                let mut wqids = Vec::new();
                for name in wnames {
                    let next = MemFs::join(&path, name);
                    if !self.entries.contains_key(&next) {
                        break;
                    }
                    wqids.push(self.qid(&next));
                    path = next;
                }
                if !wnames.is_empty() && wqids.is_empty() {
                    return err("file not found");
                }
                if wqids.len() == wnames.len() {
                    self.fids.insert(newfid, path);
                }
                FCall::RWalk { wqids }
            }
            FCall::TOpen { fid, mode } => {
                let Some(path) = self.fids.get(&fid).cloned() else {
                    return err("unknown fid");
                };
                if mode & om::TRUNC != 0 {
                    if let Some(Entry::File(data)) = self.entries.get_mut(&path) {
                        data.clear();
                    }
                }
                FCall::ROpen {
                    qid: self.qid(&path),
                    iounit: self.iounit,
                }
            }
            FCall::TCreate {
                fid,
                ref name,
                perm,
                ..
            } => {
                let Some(dir) = self.fids.get(&fid).cloned() else {
                    return err("unknown fid");
                };
                let path = MemFs::join(&dir, name);
                if self.entries.contains_key(&path) {
                    return err("file exists");
                }
                let entry = match perm & dm::DIR {
                    0 => Entry::File(Vec::new()),
                    _ => Entry::Dir,
                };
                self.entries.insert(path.clone(), entry);
                self.fids.insert(fid, path.clone());
                FCall::RCreate {
                    qid: self.qid(&path),
                    iounit: self.iounit,
                }
            }
            FCall::TRead { fid, offset, count } => {
                let Some(path) = self.fids.get(&fid) else {
                    return err("unknown fid");
                };
                let data = match self.entries.get(path) {
                    Some(Entry::Dir) => self.read_dir(path, offset, count),
                    Some(Entry::File(data)) => {
                        let start = (offset as usize).min(data.len());
                        let end = (start + count as usize).min(data.len());
                        data[start..end].to_vec()
                    }
                    None => return err("file was removed"),
                };
                FCall::RRead { data: Data(data) }
            }
            FCall::TWrite {
                fid,
                offset,
                ref data,
            } => {
                let Some(path) = self.fids.get(&fid).cloned() else {
                    return err("unknown fid");
                };
                let accept = match self.max_write {
                    Some(max) => data.0.len().min(max as usize),
                    None => data.0.len(),
                };
                match self.entries.get_mut(&path) {
                    Some(Entry::File(content)) => {
                        let offset = offset as usize;
                        if content.len() < offset + accept {
                            content.resize(offset + accept, 0);
                        }
                        content[offset..offset + accept].copy_from_slice(&data.0[..accept]);
                        FCall::RWrite {
                            count: accept as u32,
                        }
                    }
                    _ => err("is a directory"),
                }
            }
            FCall::TClunk { fid } => match self.fids.remove(&fid) {
                Some(_) => FCall::RClunk,
                None => err("unknown fid"),
            },
            FCall::TRemove { fid } => {
                let Some(path) = self.fids.remove(&fid) else {
                    return err("unknown fid");
                };
                self.entries.remove(&path);
                FCall::RRemove
            }
            _ => err("not a request"),
        }
    }
}
