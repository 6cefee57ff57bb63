//! Wire codecs: packed timestamps and raw record arrays.

pub mod record;
pub mod time;

pub use record::{parse, parse_lines, parse_value, serialize};
