//! Fixed-width, big-endian key fields.
//!
//! Every index key is a concatenation of these fields, in a fixed order per
//! family (see [`crate::index_schema`]). Big-endian encoding is mandatory:
//! it is what makes byte-lexicographic order on the underlying table equal
//! numeric order on the encoded value, so a reverse range scan walks time
//! (or any other ordered field) backwards without decoding anything.

use sha2::{Digest, Sha256};
use snafu::Snafu;

use relay_core::{Id, PubKey};

pub const PREFIX_WIDTH: usize = 3;
pub const ID_HASH_WIDTH: usize = 8;
pub const ID_WIDTH: usize = 32;
pub const PUB_HASH_WIDTH: usize = 8;
pub const LETTER_WIDTH: usize = 1;
pub const IDENT_WIDTH: usize = 8;
pub const UINT16_WIDTH: usize = 2;
pub const UINT64_WIDTH: usize = 8;
pub const UINT40_WIDTH: usize = 5;

/// Maximum value a 40-bit serial can hold.
pub const SERIAL_MAX: u64 = (1u64 << 40) - 1;

#[derive(Debug, Snafu, Clone, Copy, PartialEq, Eq)]
#[snafu(display("serial {serial} exceeds the 40-bit maximum of {SERIAL_MAX}"))]
pub struct InvalidSerial {
    pub serial: u64,
}

/// A single fixed-width key field. One variant per row of the KeyCodec
/// field-width table; a single `write` function serves every index family
/// instead of one encoder per family.
#[derive(Debug, Clone, Copy)]
pub enum Field<'a> {
    Prefix(&'a [u8; PREFIX_WIDTH]),
    IdHash([u8; ID_HASH_WIDTH]),
    Id(Id),
    PubHash([u8; PUB_HASH_WIDTH]),
    /// Full, undigested public key. Used only by the `FullIdPubkey` family,
    /// which exists precisely so a dereference can recover the real pubkey
    /// without decoding the event body.
    PubKey(PubKey),
    Letter(u8),
    Ident([u8; IDENT_WIDTH]),
    Uint16(u16),
    Uint64(u64),
    Uint40(u64),
}

impl Field<'_> {
    pub fn width(&self) -> usize {
        match self {
            Field::Prefix(_) => PREFIX_WIDTH,
            Field::IdHash(_) => ID_HASH_WIDTH,
            Field::Id(_) => ID_WIDTH,
            Field::PubHash(_) => PUB_HASH_WIDTH,
            Field::PubKey(_) => ID_WIDTH,
            Field::Letter(_) => LETTER_WIDTH,
            Field::Ident(_) => IDENT_WIDTH,
            Field::Uint16(_) => UINT16_WIDTH,
            Field::Uint64(_) => UINT64_WIDTH,
            Field::Uint40(_) => UINT40_WIDTH,
        }
    }

    pub fn write(&self, out: &mut Vec<u8>) -> Result<(), InvalidSerial> {
        match self {
            Field::Prefix(p) => out.extend_from_slice(p.as_slice()),
            Field::IdHash(h) => out.extend_from_slice(h),
            Field::Id(id) => out.extend_from_slice(id.as_slice()),
            Field::PubHash(h) => out.extend_from_slice(h),
            Field::PubKey(p) => out.extend_from_slice(p.as_slice()),
            Field::Letter(b) => out.push(*b),
            Field::Ident(h) => out.extend_from_slice(h),
            Field::Uint16(v) => out.extend_from_slice(&v.to_be_bytes()),
            Field::Uint64(v) => out.extend_from_slice(&v.to_be_bytes()),
            Field::Uint40(v) => {
                if *v > SERIAL_MAX {
                    return Err(InvalidSerial { serial: *v });
                }
                // top 3 bytes of the 8-byte big-endian form are always zero.
                out.extend_from_slice(&v.to_be_bytes()[3..]);
            }
        }
        Ok(())
    }
}

/// Concatenate a list of fields into one key, in order. The single
/// generic write loop the design calls for instead of per-family encoders.
pub fn encode_fields(fields: &[Field<'_>]) -> Result<Vec<u8>, InvalidSerial> {
    let total: usize = fields.iter().map(Field::width).sum();
    let mut out = Vec::with_capacity(total);
    for field in fields {
        field.write(&mut out)?;
    }
    Ok(out)
}

pub fn read_uint40(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf[3..].copy_from_slice(bytes);
    u64::from_be_bytes(buf)
}

pub fn read_uint64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_be_bytes(buf)
}

pub fn read_uint16(bytes: &[u8]) -> u16 {
    let mut buf = [0u8; 2];
    buf.copy_from_slice(bytes);
    u16::from_be_bytes(buf)
}

/// First 8 bytes of `sha256(id)`.
pub fn id_hash(id: Id) -> [u8; ID_HASH_WIDTH] {
    truncated_sha256(id.as_slice())
}

/// First 8 bytes of `sha256(pubkey)`.
pub fn pub_hash(pubkey: PubKey) -> [u8; PUB_HASH_WIDTH] {
    truncated_sha256(pubkey.as_slice())
}

/// First 8 bytes of `sha256(tag_value_bytes)`.
pub fn ident_hash(value: &[u8]) -> [u8; IDENT_WIDTH] {
    truncated_sha256(value)
}

fn truncated_sha256<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let digest = Sha256::digest(bytes);
    let mut out = [0u8; N];
    out.copy_from_slice(&digest[..N]);
    out
}
