//! Connection and attach parameters.

use std::{env, time::Duration};

use crate::fcall::{DEFAULT_MSIZE, NOFID};

/// Environment variable naming the wmii server address
pub const ADDRESS_ENV: &str = "WMII_ADDRESS";

/// Parameters for dialing a server and attaching to its tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// `unix!/path`, `tcp!host!port` or a bare socket path
    pub address: Option<String>,
    /// User name sent in `TAttach`
    pub uname: String,
    /// Tree to attach to; empty selects the default tree
    pub aname: String,
    /// Authentication fid, passed through untouched
    pub afid: u32,
    /// Message size proposed in `TVersion`
    pub msize: u32,
    /// Give up on a request after this long; `None` waits forever
    pub timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            address: None,
            uname: String::new(),
            aname: String::new(),
            afid: NOFID,
            msize: DEFAULT_MSIZE,
            timeout: None,
        }
    }
}

impl Config {
    /// Read the address from `WMII_ADDRESS` and the user name from `USER`.
    ///
    /// Without `USER`, the login name of the current uid is used.
    pub fn from_env() -> Config {
        Config {
            address: env::var(ADDRESS_ENV).ok().filter(|a| !a.is_empty()),
            uname: env::var("USER")
                .ok()
                .filter(|u| !u.is_empty())
                .or_else(login_name)
                .unwrap_or_default(),
            ..Default::default()
        }
    }
}

fn login_name() -> Option<String> {
    nix::unistd::User::from_uid(nix::unistd::getuid())
        .ok()
        .flatten()
        .map(|user| user.name)
}

#[test]
fn default_config_skips_auth() {
    let config = Config::default();
    assert_eq!(config.afid, NOFID);
    assert_eq!(config.msize, DEFAULT_MSIZE);
    assert!(config.aname.is_empty());
    assert_eq!(config.timeout, None);
}
