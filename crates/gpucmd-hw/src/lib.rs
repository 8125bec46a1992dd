//! Batch buffer packets and per-generation command encoders.
//!
//! The packet format is self-describing (`opcode` + `size_bytes` header) so a
//! finished stream can be decoded back with [`cmd::parse_cmd_stream`], which is
//! what the simulated queue and the tests rely on.

pub mod blit;
pub mod cmd;
pub mod error;
pub mod family;
pub mod stream;

pub use blit::{BlitProperties, Vec3};
pub use cmd::{parse_cmd_stream, CmdDecodeError, HwCmd};
pub use error::HwError;
pub use family::{HwCommandEncoder, HwFamily, HwInfo, PipeControlArgs};
pub use stream::CommandStream;
