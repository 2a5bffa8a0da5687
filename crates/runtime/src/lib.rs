// SPDX-License-Identifier: Apache-2.0

//! Device routing on top of the [`portcullis`] call boundary
//!
//! A [`Runtime`] gives code in the enclave a POSIX-shaped view of files, sockets, readiness
//! notification and name resolution. Each call is routed to a [device](device::Device):
//!
//! * by descriptor, through the [descriptor table](fd::FdTable),
//! * by path, through the [filesystem multiplexer](mux::MuxFs) and its mounted prefixes,
//! * by the calling thread's [default device](thread), if one is set.
//!
//! The [backends](backend) either proxy the call to the host through the boundary or service
//! it inside the enclave. Name resolution walks a [chain of resolvers](resolver).
//!
//! ```no_run
//! use portcullis_runtime::Runtime;
//!
//! let runtime = Runtime::from_config(&"
//!     [[mounts]]
//!     prefix = \"/tmp\"
//!     device = \"virtual\"
//! ".parse()?)?;
//!
//! let fd = runtime.open("/tmp/greeting", libc::O_CREAT | libc::O_RDWR, 0o600).unwrap();
//! runtime.write(fd, b"hello").unwrap();
//! runtime.close(fd).unwrap();
//! # Ok::<(), anyhow::Error>(())
//! ```

#![deny(clippy::all)]
#![warn(rust_2018_idioms)]

pub mod backend;
pub mod config;
pub mod device;
pub mod fd;
pub mod fingerprint;
pub mod mux;
pub mod net;
pub mod resolver;
pub mod thread;

mod runtime;

pub use config::Config;
pub use device::{Device, DeviceId, DeviceType, EpollEvent, Events};
pub use fingerprint::Fingerprint;
pub use portcullis::{Error, Result};
pub use runtime::Runtime;
