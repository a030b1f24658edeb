//! Error taxonomy.
//!
//! Three kinds, all fatal to the session: bad invocation or save data
//! (`Config`), a ROM image that fails validation (`Rom`), and anything the
//! running firmware does that a sane dump never would (`Runtime`). Runtime
//! faults indicate a corrupted ROM, a mis-dumped image, or an emulator bug;
//! none are recoverable mid-session.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmuError {
    /// Bad command line or save file.
    #[error("{0}")]
    Config(String),

    /// ROM image failed validation.
    #[error("{0}")]
    Rom(String),

    /// Fatal condition raised by the executing firmware.
    #[error("{0}")]
    Runtime(String),
}
