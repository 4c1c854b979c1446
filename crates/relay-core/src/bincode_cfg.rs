//! Shared `bincode` configuration for encoding stored values.
//!
//! Big-endian, variable-length integers, same shape the teacher crate uses
//! for its own wire/storage encoding.

use bincode::config;

pub const STANDARD_LIMIT_16M: usize = 0x1_0000_0000;

pub const STD_BINCODE_CONFIG: config::Configuration<
    config::BigEndian,
    config::Varint,
    config::Limit<STANDARD_LIMIT_16M>,
> = config::standard()
    .with_limit::<STANDARD_LIMIT_16M>()
    .with_big_endian()
    .with_variable_int_encoding();
