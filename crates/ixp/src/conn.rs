//! Tag-multiplexed 9P connection.
//!
//! One [`Connection`] owns one byte stream. Any number of tasks may call
//! [`Connection::send`] at the same time; each request carries a tag, and a
//! background task spawned at construction reads replies off the stream and
//! completes the waiter registered under the reply's tag.
//!
//! # Protocol
//! 9P2000

use {
    crate::{
        error::Error,
        fcall::*,
        io_err, serialize,
        utils::{self, Address, Result},
    },
    bytes::Bytes,
    futures::sink::SinkExt,
    log::{debug, error, warn},
    std::{
        collections::HashMap,
        sync::{Arc, Mutex, MutexGuard},
        time::Duration,
    },
    tokio::{
        io::{AsyncRead, AsyncWrite},
        net::{TcpStream, UnixStream},
        sync::{self, oneshot},
        task::JoinHandle,
    },
    tokio_stream::StreamExt,
    tokio_util::codec::{FramedRead, FramedWrite, length_delimited::LengthDelimitedCodec},
};

/// Largest frame the receive loop accepts
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

type Reply = Result<Msg>;
type Writer = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, LengthDelimitedCodec>;

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_offset(0)
        .length_field_length(4)
        .length_adjustment(-4)
        .max_frame_length(MAX_FRAME_LEN)
        .little_endian()
        .new_codec()
}

/// Callers waiting for a reply, keyed by tag.
#[derive(Default)]
struct Pending {
    waiters: HashMap<u16, (u64, oneshot::Sender<Reply>)>,
    next_tag: u16,
    next_seq: u64,
    closed: bool,
}

impl Pending {
    /// Pick a tag not currently in flight, skipping the reserved ones.
    fn alloc_tag(&mut self) -> Result<u16> {
        // 0 and NOTAG never come out of the pool
        const POOL: usize = NOTAG as usize - 1;

        for _ in 0..POOL {
            self.next_tag = match self.next_tag.wrapping_add(1) {
                VERSION_TAG | NOTAG => 1,
                t => t,
            };
            if !self.waiters.contains_key(&self.next_tag) {
                return Ok(self.next_tag);
            }
        }
        Err(Error::TagExhausted)
    }

    fn register(&mut self, tag: Option<u16>, tx: oneshot::Sender<Reply>) -> Result<(u16, u64)> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }

        let tag = match tag {
            Some(tag) if self.waiters.contains_key(&tag) => return Err(Error::DuplicateTag(tag)),
            Some(tag) => tag,
            None => self.alloc_tag()?,
        };

        self.next_seq += 1;
        self.waiters.insert(tag, (self.next_seq, tx));
        Ok((tag, self.next_seq))
    }
}

/// Shared half of the tag table.
///
/// The mutex is only held to insert, look up or remove a waiter, never across an await.
#[derive(Clone, Default)]
struct Tags(Arc<Mutex<Pending>>);

impl Tags {
    fn lock(&self) -> MutexGuard<'_, Pending> {
        // A panic while holding the lock leaves the map itself consistent
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take(&self, tag: u16) -> Option<oneshot::Sender<Reply>> {
        self.lock().waiters.remove(&tag).map(|(_, tx)| tx)
    }

    /// Mark the connection dead and fail everybody still waiting.
    fn close(&self) {
        let waiters: Vec<_> = {
            let mut pending = self.lock();
            pending.closed = true;
            pending.waiters.drain().collect()
        };

        for (tag, (_, tx)) in waiters {
            debug!("failing tag {} on closed connection", tag);
            let _ = tx.send(Err(Error::ConnectionClosed));
        }
    }

    fn in_flight(&self) -> usize {
        self.lock().waiters.len()
    }
}

/// Releases a tag whose caller stopped waiting before its reply was delivered.
struct Registration<'a> {
    tags: &'a Tags,
    tag: u16,
    seq: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let mut pending = self.tags.lock();
        // The tag may already be delivered and handed to somebody else
        if matches!(pending.waiters.get(&self.tag), Some((seq, _)) if *seq == self.seq) {
            pending.waiters.remove(&self.tag);
        }
    }
}

/// A single 9P connection shared by any number of concurrent callers.
pub struct Connection {
    writer: sync::Mutex<Writer>,
    tags: Tags,
    receiver: JoinHandle<()>,
    timeout: Option<Duration>,
}

impl Connection {
    /// Start a connection over split read/write halves of a byte stream.
    ///
    /// Must be called inside a tokio runtime; the receive loop is spawned onto it.
    pub fn new<R, W>(reader: R, writer: W) -> Connection
    where
        R: 'static + AsyncRead + Send + Unpin,
        W: 'static + AsyncWrite + Send + Unpin,
    {
        let tags = Tags::default();
        let framedread = FramedRead::new(reader, codec());
        let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);
        let framedwrite = FramedWrite::new(writer, codec());

        let receiver = tokio::spawn(recv_loop(framedread, tags.clone()));

        Connection {
            writer: sync::Mutex::new(framedwrite),
            tags,
            receiver,
            timeout: None,
        }
    }

    /// Start a connection over a single duplex stream.
    pub fn from_stream<S>(stream: S) -> Connection
    where
        S: 'static + AsyncRead + AsyncWrite + Send,
    {
        let (readhalf, writehalf) = tokio::io::split(stream);
        Connection::new(readhalf, writehalf)
    }

    /// Dial `unix!/path`, `tcp!host!port`, or a bare socket path.
    pub async fn connect(addr: &str) -> Result<Connection> {
        let target = utils::parse_proto(addr)
            .ok_or_else(|| io_err!(InvalidInput, "Invalid protocol or address"))?;

        let conn = match target {
            Address::Unix(path) => {
                let (readhalf, writehalf) = UnixStream::connect(path).await?.into_split();
                Connection::new(readhalf, writehalf)
            }
            Address::Tcp(host, port) => {
                let stream = TcpStream::connect(format!("{}:{}", host, port)).await?;
                stream.set_nodelay(true)?;
                let (readhalf, writehalf) = stream.into_split();
                Connection::new(readhalf, writehalf)
            }
        };
        debug!("connected: {}", addr);
        Ok(conn)
    }

    /// Fail requests that get no reply within `timeout`.
    ///
    /// Requests wait forever by default. A timed-out request gives up its tag
    /// without sending `TFlush`, so a reply the server sends later is matched
    /// to whatever request holds that tag by then. The allocator only reuses a
    /// tag after cycling through the rest of the pool, which keeps this rare.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Connection {
        self.timeout = timeout;
        self
    }

    /// Send a request under a fresh tag and wait for its reply.
    ///
    /// An `RError` reply becomes `Error::Protocol` carrying the server's message.
    pub async fn send(&self, body: FCall) -> Result<FCall> {
        self.rpc(None, body).await
    }

    /// Send a request under a caller-chosen tag, such as `VERSION_TAG`.
    pub async fn send_tagged(&self, tag: u16, body: FCall) -> Result<FCall> {
        self.rpc(Some(tag), body).await
    }

    /// Number of requests currently waiting for a reply.
    pub fn in_flight(&self) -> usize {
        self.tags.in_flight()
    }

    /// Whether the receive loop has stopped.
    pub fn is_closed(&self) -> bool {
        self.tags.lock().closed
    }

    async fn rpc(&self, tag: Option<u16>, body: FCall) -> Result<FCall> {
        let (tx, rx) = oneshot::channel();
        let (tag, seq) = self.tags.lock().register(tag, tx)?;
        let _registration = Registration {
            tags: &self.tags,
            tag,
            seq,
        };

        let msg = Msg { tag, body };
        let mut buf = Vec::new();
        serialize::write_msg(&mut buf, &msg)?;
        debug!("\t→ {:?}", msg);

        {
            let mut framedwrite = self.writer.lock().await;
            if let Err(e) = framedwrite.send(Bytes::from(buf)).await {
                error!("Failed to send request for tag {}: {:?}", tag, e);
                return Err(Error::ConnectionClosed);
            }
        }

        let reply = match self.timeout {
            Some(duration) => tokio::time::timeout(duration, rx)
                .await
                .map_err(|_| Error::TimedOut)?,
            None => rx.await,
        };

        // A dropped sender means the receive loop is gone
        let reply = reply.map_err(|_| Error::ConnectionClosed)??;
        match reply.body {
            FCall::RError { ename } => Err(Error::Protocol(ename)),
            body => Ok(body),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}

async fn recv_loop<R>(mut framedread: FramedRead<R, LengthDelimitedCodec>, tags: Tags)
where
    R: AsyncRead + Unpin,
{
    // Whatever ends the loop, nobody may be left waiting
    struct CloseOnExit(Tags);
    impl Drop for CloseOnExit {
        fn drop(&mut self) {
            self.0.close();
        }
    }
    let _close = CloseOnExit(tags.clone());

    while let Some(bytes) = framedread.next().await {
        let bytes = match bytes {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to read frame: {:?}", e);
                break;
            }
        };

        let (tag, reply) = match serialize::decode_msg(&bytes) {
            Ok((msg, rest)) => {
                if !rest.is_empty() {
                    warn!("{} trailing bytes after {:?}", rest.len(), msg);
                }
                debug!("\t← {:?}", msg);
                let typ = MsgType::from(&msg.body);
                if typ.is_t() {
                    error!("Request {:?} received as reply for tag {}", typ, msg.tag);
                    (msg.tag, Err(Error::UnexpectedReply(typ)))
                } else {
                    (msg.tag, Ok(msg))
                }
            }
            Err(e) => match serialize::peek_tag(&bytes) {
                Some(tag) => {
                    error!("Failed to decode reply for tag {}: {}", tag, e);
                    (tag, Err(e))
                }
                None => {
                    error!("Dropping undecodable frame: {}", e);
                    continue;
                }
            },
        };

        match tags.take(tag) {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => warn!("Unexpected reply with tag {}", tag),
        }
    }

    debug!("receive loop finished");
}
