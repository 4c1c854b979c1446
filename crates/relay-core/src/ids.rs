//! Fixed-width identifier types.
//!
//! Mirrors the teacher's `define_array_type*` macros (`rostra-core::lib`):
//! a thin newtype over a byte array with hex `Display`/`FromStr`, bincode
//! and serde derives.

use std::fmt;
use std::str::FromStr;

use data_encoding::HEXLOWER;
use snafu::Snafu;

macro_rules! define_hex_array {
    ($(#[$outer:meta])* struct $t:ident, $n:literal) => {
        $(#[$outer])*
        #[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[derive(::bincode::Encode, ::bincode::Decode)]
        #[derive(::serde::Serialize, ::serde::Deserialize)]
        pub struct $t(#[serde(with = "hex_serde")] pub [u8; $n]);

        impl $t {
            pub const ZERO: Self = Self([0u8; $n]);
            pub const MAX: Self = Self([0xffu8; $n]);
            pub const LEN: usize = $n;

            pub fn as_slice(&self) -> &[u8] {
                &self.0
            }

            pub fn from_bytes(bytes: [u8; $n]) -> Self {
                Self(bytes)
            }

            pub fn to_bytes(self) -> [u8; $n] {
                self.0
            }
        }

        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&HEXLOWER.encode(&self.0))
            }
        }

        impl fmt::Debug for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($t), self)
            }
        }

        impl FromStr for $t {
            type Err = HexArrayParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let decoded = HEXLOWER
                    .decode(s.to_ascii_lowercase().as_bytes())
                    .map_err(|_| HexArrayParseError::InvalidHex)?;
                let array: [u8; $n] = decoded
                    .try_into()
                    .map_err(|_| HexArrayParseError::WrongLength { expected: $n })?;
                Ok(Self(array))
            }
        }

        impl From<[u8; $n]> for $t {
            fn from(bytes: [u8; $n]) -> Self {
                Self(bytes)
            }
        }
    };
}

mod hex_serde {
    use data_encoding::HEXLOWER;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        s: S,
    ) -> Result<S::Ok, S::Error> {
        s.serialize_str(&HEXLOWER.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        d: D,
    ) -> Result<[u8; N], D::Error> {
        let s = String::deserialize(d)?;
        let v = HEXLOWER
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)?;
        v.try_into()
            .map_err(|_| serde::de::Error::custom("wrong length"))
    }
}

#[derive(Debug, Snafu, Clone, Copy)]
pub enum HexArrayParseError {
    #[snafu(display("invalid hex string"))]
    InvalidHex,
    #[snafu(display("expected {expected} bytes"))]
    WrongLength { expected: usize },
}

define_hex_array!(
    /// Full 32-byte content-addressed event identifier.
    struct Id, 32
);

define_hex_array!(
    /// 32-byte public key of an event's author.
    struct PubKey, 32
);

define_hex_array!(
    /// 64-byte signature over the event's canonical serialization.
    struct Sig, 64
);
