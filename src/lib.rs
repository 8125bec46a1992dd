//! GPU command list encoding.
//!
//! [`hw`] holds the per-generation command encoders and the batch buffer
//! wire format; [`cmdlist`] builds command lists on top of them.

pub use gpucmd_cmdlist as cmdlist;
pub use gpucmd_hw as hw;
