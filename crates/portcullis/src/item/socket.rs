// SPDX-License-Identifier: Apache-2.0

//! Socket call definitions
//!
//! Argument layout per operation, `data[x]` denoting an offset into the data section:
//!
//! * `SOCKET`: `[domain, type, protocol]`, returns the host fd
//! * `CLOSE`: `[fd]`
//! * `READ`: `[fd, data[buf], count]`, returns the number of bytes read into `buf`
//! * `WRITE`: `[fd, data[buf], count]`, returns the number of bytes written from `buf`
//! * `RECV`: `[fd, data[buf], count, flags]`
//! * `SEND`: `[fd, data[buf], count, flags]`
//! * `CONNECT`: `[fd, data[addr], addrlen]`
//! * `BIND`: `[fd, data[addr], addrlen]`
//! * `LISTEN`: `[fd, backlog]`
//! * `ACCEPT`: `[fd, data[addr] | NULL, data[addrlen]]`, where `addrlen` is a `u32` holding
//!   the capacity of `addr` on entry and the peer address length on return; returns the host fd
//! * `SHUTDOWN`: `[fd, how]`

super::numbers! {
    /// Socket operation number.
    pub enum Number {
        None = 0x00,
        Socket = 0x01,
        Close = 0x02,
        Read = 0x03,
        Write = 0x04,
        Recv = 0x05,
        Send = 0x06,
        Connect = 0x07,
        Bind = 0x08,
        Listen = 0x09,
        Accept = 0x0a,
        Shutdown = 0x0b,
    }
}
