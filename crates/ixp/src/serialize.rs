//! Serialize/deserialize 9P messages into/from binary.

use crate::{
    error::{Error, FramingError, truncated},
    fcall::*,
    io_err,
    utils::Result,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use num_traits::FromPrimitive;
use std::io::{self, Cursor, Read};
use std::mem;
use std::ops::Shl;

/// Size of the length prefix in front of every message
pub const FRAME_HEADER_LEN: usize = mem::size_of::<u32>();

fn read_exact<R: Read>(r: &mut R, size: usize) -> Result<Vec<u8>> {
    // The length comes off the wire; only keep what is really there.
    let mut buf = Vec::new();
    r.by_ref().take(size as u64).read_to_end(&mut buf)?;
    if buf.len() < size {
        return Err(FramingError::Truncated.into());
    }
    Ok(buf)
}

/// A serializing specific result to overload operators on `Result`
///
/// # Overloaded operators
/// <<, ?
pub struct SResult<T>(::std::io::Result<T>);

/// A wrapper class of WriteBytesExt to provide operator overloads
/// for serializing
///
/// Operator '<<' serializes the right hand side argument into
/// the left hand side encoder
#[derive(Clone, Debug)]
pub struct Encoder<W> {
    writer: W,
    bytes: usize,
}

impl<W: WriteBytesExt> Encoder<W> {
    pub fn new(writer: W) -> Encoder<W> {
        Encoder { writer, bytes: 0 }
    }

    /// Return total bytes written
    pub fn bytes_written(&self) -> usize {
        self.bytes
    }

    /// Encode data, equivalent to: encoder << data
    pub fn encode<T: Encodable>(&mut self, data: &T) -> io::Result<usize> {
        let bytes = data.encode(&mut self.writer)?;
        self.bytes += bytes;
        Ok(bytes)
    }
}

impl<'a, T: Encodable, W: WriteBytesExt> Shl<&'a T> for Encoder<W> {
    type Output = SResult<Encoder<W>>;
    fn shl(mut self, rhs: &'a T) -> Self::Output {
        match self.encode(rhs) {
            Ok(_) => SResult(Ok(self)),
            Err(e) => SResult(Err(e)),
        }
    }
}

impl<'a, T: Encodable, W: WriteBytesExt> Shl<&'a T> for SResult<Encoder<W>> {
    type Output = Self;
    fn shl(self, rhs: &'a T) -> Self::Output {
        match self.0 {
            Ok(mut encoder) => match encoder.encode(rhs) {
                Ok(_) => SResult(Ok(encoder)),
                Err(e) => SResult(Err(e)),
            },
            Err(e) => SResult(Err(e)),
        }
    }
}

/// Trait representing a type which can be serialized into binary
pub trait Encodable {
    /// Encode self to w and returns the number of bytes encoded
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> io::Result<usize>;
}

impl Encodable for u8 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> io::Result<usize> {
        w.write_u8(*self).and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for u16 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> io::Result<usize> {
        w.write_u16::<LittleEndian>(*self)
            .and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for u32 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> io::Result<usize> {
        w.write_u32::<LittleEndian>(*self)
            .and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for u64 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> io::Result<usize> {
        w.write_u64::<LittleEndian>(*self)
            .and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for String {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> io::Result<usize> {
        if self.len() > u16::MAX as usize {
            return Err(io_err!(InvalidInput, "String does not fit in 9P string"));
        }
        let mut bytes = (self.len() as u16).encode(w)?;
        bytes += w.write_all(self.as_bytes()).and(Ok(self.len()))?;
        Ok(bytes)
    }
}

impl Encodable for QId {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> io::Result<usize> {
        match Encoder::new(w) << &self.typ.bits() << &self.version << &self.path {
            SResult(Ok(enc)) => Ok(enc.bytes_written()),
            SResult(Err(e)) => Err(e),
        }
    }
}

impl Encodable for Stat {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> io::Result<usize> {
        let size = u16::try_from(self.size())
            .map_err(|_| io_err!(InvalidInput, "Stat does not fit in 9P record"))?;
        match Encoder::new(w)
            << &size
            << &self.typ
            << &self.dev
            << &self.qid
            << &self.mode
            << &self.atime
            << &self.mtime
            << &self.length
            << &self.name
            << &self.uid
            << &self.gid
            << &self.muid
        {
            SResult(Ok(enc)) => Ok(enc.bytes_written()),
            SResult(Err(e)) => Err(e),
        }
    }
}

impl Encodable for Data {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> io::Result<usize> {
        let size = self.0.len();
        if size > u32::MAX as usize {
            return Err(io_err!(InvalidInput, "Data does not fit in 9P message"));
        }
        let bytes = (size as u32).encode(w)? + size;
        w.write_all(&self.0)?;
        Ok(bytes)
    }
}

impl<T: Encodable> Encodable for Vec<T> {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> io::Result<usize> {
        if self.len() > u16::MAX as usize {
            return Err(io_err!(InvalidInput, "Too many elements for 9P array"));
        }
        match self
            .iter()
            .fold(Encoder::new(w) << &(self.len() as u16), |acc, s| acc << s)
        {
            SResult(Ok(enc)) => Ok(enc.bytes_written()),
            SResult(Err(e)) => Err(e),
        }
    }
}

impl Encodable for Msg {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> io::Result<usize> {
        use crate::FCall::*;

        let typ = MsgType::from(&self.body);
        let buf = Encoder::new(w) << &(typ as u8) << &self.tag;

        let buf = match self.body {
            TVersion {
                ref msize,
                ref version,
            } => buf << msize << version,
            RVersion {
                ref msize,
                ref version,
            } => buf << msize << version,
            TAttach {
                ref fid,
                ref afid,
                ref uname,
                ref aname,
            } => buf << fid << afid << uname << aname,
            RAttach { ref qid } => buf << qid,
            RError { ref ename } => buf << ename,
            TWalk {
                ref fid,
                ref newfid,
                ref wnames,
            } => buf << fid << newfid << wnames,
            RWalk { ref wqids } => buf << wqids,
            TOpen { ref fid, ref mode } => buf << fid << mode,
            ROpen {
                ref qid,
                ref iounit,
            } => buf << qid << iounit,
            TCreate {
                ref fid,
                ref name,
                ref perm,
                ref mode,
            } => buf << fid << name << perm << mode,
            RCreate {
                ref qid,
                ref iounit,
            } => buf << qid << iounit,
            TRead {
                ref fid,
                ref offset,
                ref count,
            } => buf << fid << offset << count,
            RRead { ref data } => buf << data,
            TWrite {
                ref fid,
                ref offset,
                ref data,
            } => buf << fid << offset << data,
            RWrite { ref count } => buf << count,
            TClunk { ref fid } => buf << fid,
            RClunk => buf,
            TRemove { ref fid } => buf << fid,
            RRemove => buf,
        };

        match buf {
            SResult(Ok(b)) => Ok(b.bytes_written()),
            SResult(Err(e)) => Err(e),
        }
    }
}

/// Trait representing a type which can be deserialized from binary
///
/// Running out of input is reported as `FramingError::Truncated`.
pub trait Decodable: Sized {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self>;
}

impl Decodable for u8 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u8().map_err(truncated)
    }
}

impl Decodable for u16 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u16::<LittleEndian>().map_err(truncated)
    }
}

impl Decodable for u32 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u32::<LittleEndian>().map_err(truncated)
    }
}

impl Decodable for u64 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u64::<LittleEndian>().map_err(truncated)
    }
}

impl Decodable for String {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let len: u16 = Decodable::decode(r)?;
        String::from_utf8(read_exact(r, len as usize)?)
            .map_err(|_| FramingError::InvalidUtf8.into())
    }
}

impl Decodable for QId {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        Ok(QId {
            typ: QIdType::from_bits_truncate(Decodable::decode(r)?),
            version: Decodable::decode(r)?,
            path: Decodable::decode(r)?,
        })
    }
}

impl Decodable for Stat {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let size: u16 = Decodable::decode(r)?;
        // Servers may append fields we do not know; the size bounds the record.
        let mut rec = Cursor::new(read_exact(r, size as usize)?);
        Ok(Stat {
            typ: Decodable::decode(&mut rec)?,
            dev: Decodable::decode(&mut rec)?,
            qid: Decodable::decode(&mut rec)?,
            mode: Decodable::decode(&mut rec)?,
            atime: Decodable::decode(&mut rec)?,
            mtime: Decodable::decode(&mut rec)?,
            length: Decodable::decode(&mut rec)?,
            name: Decodable::decode(&mut rec)?,
            uid: Decodable::decode(&mut rec)?,
            gid: Decodable::decode(&mut rec)?,
            muid: Decodable::decode(&mut rec)?,
        })
    }
}

impl Decodable for Data {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let len: u32 = Decodable::decode(r)?;
        Ok(Data(read_exact(r, len as usize)?))
    }
}

impl<T: Decodable> Decodable for Vec<T> {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let len: u16 = Decodable::decode(r)?;
        let mut buf = Vec::new();
        for _ in 0..len {
            buf.push(Decodable::decode(r)?);
        }
        Ok(buf)
    }
}

impl Decodable for Msg {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        use crate::MsgType::*;

        macro_rules! decode {
            () => {
                Decodable::decode(&mut *r)?
            };
        }

        let id: u8 = decode!();
        let msg_type = MsgType::from_u8(id).ok_or(Error::UnknownMessageKind(id))?;
        let tag = decode!();
        let body = match msg_type {
            TVersion => FCall::TVersion {
                msize: decode!(),
                version: decode!(),
            },
            RVersion => FCall::RVersion {
                msize: decode!(),
                version: decode!(),
            },
            TAttach => FCall::TAttach {
                fid: decode!(),
                afid: decode!(),
                uname: decode!(),
                aname: decode!(),
            },
            RAttach => FCall::RAttach { qid: decode!() },
            RError => FCall::RError { ename: decode!() },
            TWalk => FCall::TWalk {
                fid: decode!(),
                newfid: decode!(),
                wnames: decode!(),
            },
            RWalk => FCall::RWalk { wqids: decode!() },
            TOpen => FCall::TOpen {
                fid: decode!(),
                mode: decode!(),
            },
            ROpen => FCall::ROpen {
                qid: decode!(),
                iounit: decode!(),
            },
            TCreate => FCall::TCreate {
                fid: decode!(),
                name: decode!(),
                perm: decode!(),
                mode: decode!(),
            },
            RCreate => FCall::RCreate {
                qid: decode!(),
                iounit: decode!(),
            },
            TRead => FCall::TRead {
                fid: decode!(),
                offset: decode!(),
                count: decode!(),
            },
            RRead => FCall::RRead { data: decode!() },
            TWrite => FCall::TWrite {
                fid: decode!(),
                offset: decode!(),
                data: decode!(),
            },
            RWrite => FCall::RWrite { count: decode!() },
            TClunk => FCall::TClunk { fid: decode!() },
            RClunk => FCall::RClunk,
            TRemove => FCall::TRemove { fid: decode!() },
            RRemove => FCall::RRemove,
        };

        Ok(Msg { tag, body })
    }
}

/// Helper function to read a 9P message from a byte-oriented stream
pub fn read_msg<R: ReadBytesExt>(r: &mut R) -> Result<Msg> {
    Decodable::decode(r)
}

/// Helper function to write a 9P message into a byte-oriented stream
pub fn write_msg<W: WriteBytesExt>(w: &mut W, msg: &Msg) -> Result<usize> {
    Ok(msg.encode(w)?)
}

/// Decode one message from the front of `buf`, returning it with the bytes it did not consume
pub fn decode_msg(buf: &[u8]) -> Result<(Msg, &[u8])> {
    let mut cursor = Cursor::new(buf);
    let msg = read_msg(&mut cursor)?;
    let used = cursor.position() as usize;
    Ok((msg, &buf[used..]))
}

/// Serialize a message with its length prefix, ready for the wire
pub fn encode_frame(msg: &Msg) -> Result<Vec<u8>> {
    let mut buf = vec![0; FRAME_HEADER_LEN];
    write_msg(&mut buf, msg)?;

    let len = u32::try_from(buf.len())
        .map_err(|_| io_err!(InvalidInput, "Message does not fit in a 9P frame"))?;
    buf[..FRAME_HEADER_LEN].copy_from_slice(&len.to_le_bytes());
    Ok(buf)
}

/// Decode a complete frame: length prefix plus exactly one message
pub fn decode_frame(buf: &[u8]) -> Result<Msg> {
    let mut header = buf.get(..FRAME_HEADER_LEN).ok_or(FramingError::Truncated)?;
    let declared = header.read_u32::<LittleEndian>().map_err(truncated)?;
    if declared as usize != buf.len() {
        return Err(FramingError::LengthMismatch {
            declared,
            actual: buf.len(),
        }
        .into());
    }

    let (msg, rest) = decode_msg(&buf[FRAME_HEADER_LEN..])?;
    if !rest.is_empty() {
        return Err(FramingError::TrailingBytes(rest.len()).into());
    }
    Ok(msg)
}

/// Tag of a message body, readable even when the rest does not decode
pub fn peek_tag(buf: &[u8]) -> Option<u16> {
    buf.get(1..3).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

/// Decode the directory entry at the front of `buf` and advance past it
///
/// Returns `None` once fewer than two bytes remain.
pub fn next_stat(buf: &mut &[u8]) -> Result<Option<Stat>> {
    if buf.len() < mem::size_of::<u16>() {
        return Ok(None);
    }

    let size = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    let end = mem::size_of::<u16>() + size;
    if buf.len() < end {
        return Err(FramingError::Truncated.into());
    }

    let (record, rest) = buf.split_at(end);
    let stat = Decodable::decode(&mut Cursor::new(record))?;
    *buf = rest;
    Ok(Some(stat))
}

#[cfg(test)]
fn sample_stat(name: &str) -> Stat {
    Stat {
        typ: 0,
        dev: 0,
        qid: QId {
            typ: QIdType::FILE,
            version: 1,
            path: 0x1122334455667788,
        },
        mode: 0o644,
        atime: 1_160_000_000,
        mtime: 1_160_000_001,
        length: 42,
        name: name.to_owned(),
        uid: "wmii".to_owned(),
        gid: "wmii".to_owned(),
        muid: String::new(),
    }
}

#[test]
fn encoder_test1() {
    let expected: Vec<u8> = (0..10).collect();
    let mut encoder = Vec::new();
    for i in 0..10 {
        (&(i as u8)).encode(&mut encoder).unwrap();
    }
    assert_eq!(expected, encoder);
}

#[test]
fn decoder_test1() {
    let expected: Vec<u8> = (0..10).collect();
    let mut decoder = Cursor::new(expected.clone());
    let mut actual: Vec<u8> = Vec::new();
    while let Ok(i) = Decodable::decode(&mut decoder) {
        actual.push(i);
    }
    assert_eq!(expected, actual);
}

#[test]
fn twalk_wire_layout() {
    let msg = Msg {
        tag: 0x0102,
        body: FCall::TWalk {
            fid: 1,
            newfid: 2,
            wnames: vec!["tag".to_owned(), "sel".to_owned()],
        },
    };

    let frame = encode_frame(&msg).unwrap();
    let expected: Vec<u8> = vec![
        27, 0, 0, 0, // size, prefix included
        110, // Twalk
        0x02, 0x01, // tag
        1, 0, 0, 0, // fid
        2, 0, 0, 0, // newfid
        2, 0, // nwname
        3, 0, b't', b'a', b'g', //
        3, 0, b's', b'e', b'l',
    ];
    assert_eq!(frame, expected);
    assert_eq!(decode_frame(&frame).unwrap(), msg);
}

#[test]
fn msg_round_trip_every_kind() {
    let qid = QId {
        typ: QIdType::DIR,
        version: 7,
        path: u64::MAX,
    };
    let bodies = vec![
        FCall::TVersion {
            msize: DEFAULT_MSIZE,
            version: P92000.to_owned(),
        },
        FCall::RVersion {
            msize: 4096,
            version: String::new(),
        },
        FCall::TAttach {
            fid: 0,
            afid: NOFID,
            uname: "user".to_owned(),
            aname: String::new(),
        },
        FCall::RAttach { qid },
        FCall::RError {
            ename: "file not found".to_owned(),
        },
        FCall::TWalk {
            fid: 0,
            newfid: 3,
            wnames: Vec::new(),
        },
        FCall::RWalk {
            wqids: vec![qid, QId::default()],
        },
        FCall::TOpen {
            fid: 3,
            mode: om::RDWR | om::TRUNC,
        },
        FCall::ROpen { qid, iounit: 8168 },
        FCall::TCreate {
            fid: 3,
            name: "status".to_owned(),
            perm: dm::WRITE,
            mode: om::WRITE,
        },
        FCall::RCreate {
            qid,
            iounit: 0,
        },
        FCall::TRead {
            fid: 3,
            offset: 1 << 40,
            count: 8168,
        },
        FCall::RRead {
            data: Data(b"view 1\n".to_vec()),
        },
        FCall::TWrite {
            fid: 3,
            offset: 0,
            data: Data(Vec::new()),
        },
        FCall::RWrite { count: 7 },
        FCall::TClunk { fid: 3 },
        FCall::RClunk,
        FCall::TRemove { fid: 3 },
        FCall::RRemove,
    ];

    for (i, body) in bodies.into_iter().enumerate() {
        let expected = Msg {
            tag: i as u16,
            body,
        };
        let mut buf = Vec::new();
        let written = write_msg(&mut buf, &expected).unwrap();
        assert_eq!(written, buf.len());

        let (actual, rest) = decode_msg(&buf).unwrap();
        assert_eq!(expected, actual);
        assert!(rest.is_empty());
    }
}

#[test]
fn decode_reports_truncation() {
    let msg = Msg {
        tag: 9,
        body: FCall::ROpen {
            qid: QId::default(),
            iounit: 512,
        },
    };
    let mut buf = Vec::new();
    write_msg(&mut buf, &msg).unwrap();

    for len in 0..buf.len() {
        match decode_msg(&buf[..len]) {
            Err(Error::Framing(FramingError::Truncated)) => {}
            other => panic!("prefix of {} bytes decoded as {:?}", len, other),
        }
    }
}

#[test]
fn decode_does_not_trust_data_length() {
    // Rread claiming 4GiB of data with only three bytes behind it
    let buf = [117, 1, 0, 0xff, 0xff, 0xff, 0xff, b'a', b'b', b'c'];
    assert!(matches!(
        decode_msg(&buf),
        Err(Error::Framing(FramingError::Truncated))
    ));
}

#[test]
fn decode_rejects_unknown_kind() {
    let buf = [106, 0, 0];
    assert!(matches!(
        decode_msg(&buf),
        Err(Error::UnknownMessageKind(106))
    ));
}

#[test]
fn decode_frame_checks_length_prefix() {
    let msg = Msg {
        tag: 1,
        body: FCall::TClunk { fid: 5 },
    };
    let mut frame = encode_frame(&msg).unwrap();

    frame.push(0);
    assert!(matches!(
        decode_frame(&frame),
        Err(Error::Framing(FramingError::LengthMismatch { declared: 11, actual: 12 }))
    ));

    frame.truncate(frame.len() - 2);
    assert!(matches!(
        decode_frame(&frame),
        Err(Error::Framing(FramingError::LengthMismatch { .. }))
    ));

    assert!(matches!(
        decode_frame(&[3, 0]),
        Err(Error::Framing(FramingError::Truncated))
    ));
}

#[test]
fn decode_frame_rejects_trailing_bytes() {
    let msg = Msg {
        tag: 1,
        body: FCall::RClunk,
    };
    let mut frame = encode_frame(&msg).unwrap();
    frame.extend_from_slice(&[0xaa, 0xbb]);
    let len = frame.len() as u32;
    frame[..4].copy_from_slice(&len.to_le_bytes());

    assert!(matches!(
        decode_frame(&frame),
        Err(Error::Framing(FramingError::TrailingBytes(2)))
    ));
}

#[test]
fn peek_tag_reads_header() {
    assert_eq!(peek_tag(&[250, 0x34, 0x12, 0xff]), Some(0x1234));
    assert_eq!(peek_tag(&[250, 0x34]), None);
}

#[test]
fn next_stat_walks_packed_entries() {
    let mut packed = Vec::new();
    sample_stat("ctl").encode(&mut packed).unwrap();
    sample_stat("colrules").encode(&mut packed).unwrap();

    let mut buf = &packed[..];
    let first = next_stat(&mut buf).unwrap().unwrap();
    let second = next_stat(&mut buf).unwrap().unwrap();
    assert_eq!(first.name, "ctl");
    assert_eq!(second.name, "colrules");
    assert_eq!(second, sample_stat("colrules"));
    assert_eq!(next_stat(&mut buf).unwrap(), None);
    assert!(buf.is_empty());
}

#[test]
fn next_stat_rejects_overrunning_record() {
    let mut packed = Vec::new();
    sample_stat("ctl").encode(&mut packed).unwrap();
    packed.truncate(packed.len() - 1);

    let mut buf = &packed[..];
    assert!(matches!(
        next_stat(&mut buf),
        Err(Error::Framing(FramingError::Truncated))
    ));

    let mut lone = &[7u8][..];
    assert_eq!(next_stat(&mut lone).unwrap(), None);
}

#[test]
fn encode_rejects_oversized_stat() {
    let mut stat = sample_stat(&"n".repeat(40_000));
    stat.uid = "u".repeat(30_000);
    assert!(stat.size() > u16::MAX as usize);

    let mut buf = Vec::new();
    let err = stat.encode(&mut buf).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    assert!(buf.is_empty());
}
