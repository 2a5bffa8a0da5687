// SPDX-License-Identifier: Apache-2.0

//! Runtime configuration.
//!
//! The configuration describes which filesystems are mounted where, which names the static
//! resolver knows and how calls reach the host. It is usually read from a TOML file, see
//! [`CONFIG_TEMPLATE`].

use crate::backend::KEY_SIZE;
use crate::fd::DEFAULT_MAX_FDS;

use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use hex::FromHex;
use serde::{de::Error as _, Deserialize, Deserializer};

/// Configuration file template
pub const CONFIG_TEMPLATE: &str = r#"## Configuration of a portcullis runtime

## Resolve names through the host
# host_resolver = true

## Number of switchless workers, 0 crosses the boundary on every call
# switchless_workers = 0

## Size of the file descriptor table
# max_fds = 1024

## The host filesystem
[[mounts]]
prefix = "/"
device = "host"
path = "/"

## Protected storage, sealed with a fresh key unless one is given
# [[mounts]]
# prefix = "/secure"
# device = "secure"
# path = "/var/lib/portcullis"
# key = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f"

## Scratch space in enclave memory
# [[mounts]]
# prefix = "/tmp"
# device = "virtual"

## Static name resolution
# [[hosts]]
# name = "localhost"
# addr = "127.0.0.1"
"#;

const fn default_true() -> bool {
    true
}

const fn default_max_fds() -> usize {
    DEFAULT_MAX_FDS
}

/// A sealing key, written as 64 hexadecimal digits.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Key(pub [u8; KEY_SIZE]);

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Key(..)")
    }
}

impl FromStr for Key {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != KEY_SIZE * 2 {
            return Err("a key must be 64 hexadecimal digits");
        }
        <[u8; KEY_SIZE]>::from_hex(s)
            .map(Self)
            .map_err(|_| "invalid hexadecimal digit")
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let key = String::deserialize(deserializer)?;
        key.parse().map_err(D::Error::custom)
    }
}

/// A filesystem mounted into the runtime.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "device", rename_all = "lowercase", deny_unknown_fields)]
pub enum Mount {
    /// The host directory `path`.
    Host { prefix: String, path: String },

    /// Protected storage kept in the host directory `path`.
    Secure {
        prefix: String,
        path: String,
        #[serde(default)]
        key: Option<Key>,
    },

    /// A filesystem in enclave memory.
    Virtual { prefix: String },
}

impl Mount {
    pub fn prefix(&self) -> &str {
        match self {
            Mount::Host { prefix, .. } => prefix,
            Mount::Secure { prefix, .. } => prefix,
            Mount::Virtual { prefix } => prefix,
        }
    }
}

/// An entry of the static resolver.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Host {
    pub name: String,
    pub addr: IpAddr,
}

/// The configuration of a [`Runtime`](crate::Runtime).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Mounted filesystems
    #[serde(default)]
    pub mounts: Vec<Mount>,

    /// Names resolved inside the enclave, consulted before the host
    #[serde(default)]
    pub hosts: Vec<Host>,

    /// Whether names the static resolver does not know are resolved by the host
    #[serde(default = "default_true")]
    pub host_resolver: bool,

    /// Number of switchless workers
    #[serde(default)]
    pub switchless_workers: usize,

    /// Size of the file descriptor table
    #[serde(default = "default_max_fds")]
    pub max_fds: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mounts: Vec::new(),
            hosts: Vec::new(),
            host_resolver: default_true(),
            switchless_workers: 0,
            max_fds: default_max_fds(),
        }
    }
}

impl FromStr for Config {
    type Err = toml::de::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s)
    }
}

impl Config {
    /// Reads the configuration file at `path`.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let config = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file `{}`", path.display()))?;
        config
            .parse()
            .with_context(|| format!("failed to parse config file `{}`", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CONFIG: &str = r#"
        switchless_workers = 2

        [[mounts]]
        prefix = "/"
        device = "host"
        path = "/srv"

        [[mounts]]
        prefix = "/data"
        device = "secure"
        path = "/srv/sealed"
        key = "000102030405060708090A0B0C0D0E0F101112131415161718191a1b1c1d1e1f"

        [[mounts]]
        prefix = "/tmp"
        device = "virtual"

        [[hosts]]
        name = "db"
        addr = "10.0.0.7"
    "#;

    #[test]
    fn values() {
        let cfg: Config = CONFIG.parse().unwrap();

        let mut key = [0u8; KEY_SIZE];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = i as u8;
        }
        assert_eq!(
            cfg.mounts,
            vec![
                Mount::Host {
                    prefix: "/".into(),
                    path: "/srv".into()
                },
                Mount::Secure {
                    prefix: "/data".into(),
                    path: "/srv/sealed".into(),
                    key: Some(Key(key)),
                },
                Mount::Virtual {
                    prefix: "/tmp".into()
                },
            ]
        );
        assert_eq!(
            cfg.mounts.iter().map(Mount::prefix).collect::<Vec<_>>(),
            ["/", "/data", "/tmp"]
        );
        assert_eq!(
            cfg.hosts,
            vec![Host {
                name: "db".into(),
                addr: "10.0.0.7".parse().unwrap()
            }]
        );
        assert!(cfg.host_resolver);
        assert_eq!(cfg.switchless_workers, 2);
        assert_eq!(cfg.max_fds, DEFAULT_MAX_FDS);
    }

    #[test]
    fn invalid() {
        let unknown_device = r#"
        [[mounts]]
        prefix = "/"
        device = "tape"
        "#;
        assert!(unknown_device.parse::<Config>().is_err());

        let unknown_field = r#"
        [[mounts]]
        prefix = "/tmp"
        device = "virtual"
        path = "/tmp"
        "#;
        assert!(unknown_field.parse::<Config>().is_err());

        let short_key = r#"
        [[mounts]]
        prefix = "/data"
        device = "secure"
        path = "/srv"
        key = "0001"
        "#;
        let err = short_key.parse::<Config>().unwrap_err();
        assert!(err.to_string().contains("64 hexadecimal digits"));

        assert!("[[hosts]]\nname = \"db\"\naddr = \"db.local\"\n"
            .parse::<Config>()
            .is_err());
        assert!("max_fds = -1".parse::<Config>().is_err());
        assert_eq!("zz".repeat(32).parse::<Key>(), Err("invalid hexadecimal digit"));
        assert_eq!("+1".repeat(32).parse::<Key>(), Err("invalid hexadecimal digit"));
        assert_eq!("aB".repeat(32).parse::<Key>(), Ok(Key([0xab; KEY_SIZE])));
    }

    #[test]
    fn defaults() {
        assert_eq!("".parse::<Config>().unwrap(), Config::default());
    }

    #[test]
    fn load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();
        assert_eq!(
            Config::load(file.path()).unwrap(),
            CONFIG.parse::<Config>().unwrap()
        );

        let err = Config::load("/nonexistent/portcullis.toml").unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }

    #[test]
    fn check_template() {
        let cfg_str = CONFIG_TEMPLATE
            .lines()
            .map(|l| l.trim_start_matches("# "))
            .collect::<Vec<_>>()
            .join("\n");

        let cfg: Config = cfg_str.parse().unwrap();
        assert_eq!(cfg.mounts.len(), 3);
        assert_eq!(cfg.hosts[0].name, "localhost");
        assert!(matches!(cfg.mounts[1], Mount::Secure { key: Some(_), .. }));
    }
}
