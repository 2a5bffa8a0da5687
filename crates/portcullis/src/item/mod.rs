// SPDX-License-Identifier: Apache-2.0

//! Shared envelope definitions.

/// Implements `TryFrom<usize>` for an operation number enum, mapping unknown values to
/// [`ENOSYS`](libc::ENOSYS).
macro_rules! numbers {
    ($(#[$attr:meta])* pub enum $name:ident { $($(#[$vattr:meta])* $variant:ident = $value:expr,)* }) => {
        $(#[$attr])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(usize)]
        pub enum $name {
            $($(#[$vattr])* $variant = $value,)*
        }

        impl core::convert::TryFrom<usize> for $name {
            type Error = $crate::Error;

            #[inline]
            fn try_from(num: usize) -> Result<Self, Self::Error> {
                match num {
                    $(num if num == $name::$variant as usize => Ok($name::$variant),)*
                    _ => Err(libc::ENOSYS),
                }
            }
        }
    };
}
pub(crate) use numbers;

mod envelope;
pub mod file;
pub mod futex;
pub mod resolve;
pub mod socket;

pub use envelope::*;

numbers! {
    /// Envelope call kind.
    pub enum Kind {
        None = 0x00,

        Socket = 0x01,
        File = 0x02,
        Futex = 0x03,
        Resolve = 0x04,
        Ecall = 0x05,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use libc::ENOSYS;

    #[test]
    fn kind_try_from() {
        for (v, expected) in [
            (0x00, Ok(Kind::None)),
            (0x01, Ok(Kind::Socket)),
            (0x02, Ok(Kind::File)),
            (0x03, Ok(Kind::Futex)),
            (0x04, Ok(Kind::Resolve)),
            (0x05, Ok(Kind::Ecall)),
            (0x06, Err(ENOSYS)),
            (usize::MAX, Err(ENOSYS)),
        ] {
            assert_eq!(Kind::try_from(v), expected, "Invalid mapping for {v}");
        }
    }
}
