use thiserror::Error;

use crate::value::Value;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Remote code raised or reported failure. Carries the first unpacked
    /// output, which is whatever the interpreter produced as the error value.
    /// Never fatal to the channel.
    #[error("remote execution failed: {0}")]
    Eval(Value),

    /// The channel closed before or while the operation was in flight.
    /// Requests still pending when the channel closes settle with this.
    #[error("channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, BridgeError>;
