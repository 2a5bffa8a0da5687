// SPDX-License-Identifier: Apache-2.0

//! Host file call definitions
//!
//! * `OPEN`: `[data[path], flags, mode]`, `path` is NUL terminated; returns the host fd
//! * `CLOSE`: `[fd]`
//! * `READ`: `[fd, data[buf], count]`
//! * `WRITE`: `[fd, data[buf], count]`
//! * `LSEEK`: `[fd, offset, whence]`, `offset` is an `off_t` cast to `usize`
//! * `UNLINK`: `[data[path]]`
//! * `SIZE`: `[fd]`, returns the `st_size` of the file

super::numbers! {
    /// Host file operation number.
    pub enum Number {
        Open = 0x01,
        Close = 0x02,
        Read = 0x03,
        Write = 0x04,
        Lseek = 0x05,
        Unlink = 0x06,
        Size = 0x07,
    }
}
