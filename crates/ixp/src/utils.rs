use crate::error;

pub type Result<T> = ::std::result::Result<T, error::Error>;

#[macro_export]
macro_rules! io_err {
    ($kind:ident, $msg:expr) => {
        ::std::io::Error::new(::std::io::ErrorKind::$kind, $msg)
    };
}

#[macro_export]
macro_rules! res {
    ($err:expr) => {
        Err(From::from($err))
    };
}

/// Dial target parsed from a wmii-style address string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Address<'a> {
    /// Path of a unix domain socket
    Unix(&'a str),
    /// `host:port` of a TCP endpoint
    Tcp(&'a str, &'a str),
}

/// Parse `unix!/path`, `tcp!host!port` or a bare socket path.
pub fn parse_proto(arg: &str) -> Option<Address<'_>> {
    let mut split = arg.split('!');
    let first = split.next()?;

    match (first, split.next(), split.next()) {
        (path, None, None) if !path.is_empty() => Some(Address::Unix(path)),
        ("unix", Some(path), None) if !path.is_empty() => Some(Address::Unix(path)),
        ("tcp", Some(host), Some(port)) if !host.is_empty() => Some(Address::Tcp(host, port)),
        _ => None,
    }
}

#[test]
fn parse_proto_strips_scheme() {
    assert_eq!(
        parse_proto("unix!/tmp/ns.user.:0/wmii"),
        Some(Address::Unix("/tmp/ns.user.:0/wmii"))
    );
    assert_eq!(parse_proto("/tmp/wmii"), Some(Address::Unix("/tmp/wmii")));
    assert_eq!(
        parse_proto("tcp!127.0.0.1!564"),
        Some(Address::Tcp("127.0.0.1", "564"))
    );
    assert_eq!(parse_proto("tcp!127.0.0.1"), None);
    assert_eq!(parse_proto("unix!"), None);
    assert_eq!(parse_proto(""), None);
}
