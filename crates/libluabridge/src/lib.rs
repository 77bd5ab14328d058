//! Host-side bridge to a remote Lua interpreter.
//!
//! A [`Session`] wraps one connected byte stream carrying newline-delimited
//! JSON frames. The host evaluates code remotely, passes functions in both
//! directions as first-class values, and listens for remote events. Requests
//! are correlated by nonce, so many round trips can be in flight at once.
//!
//! ```no_run
//! use libluabridge::{Session, Value};
//!
//! # async fn demo() -> libluabridge::Result<()> {
//! # let (stream, _remote) = tokio::io::duplex(1024);
//! let (read, write) = tokio::io::split(stream);
//! let session = Session::connect(read, write);
//! let sum = session.evaluate("1 + 2", Vec::new()).await?;
//! assert_eq!(sum, vec![Value::from(3i64)]);
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod broker;
mod callbacks;
mod channel;
mod codec;
pub mod error;
mod nonce;
mod pending;
pub mod session;
pub mod value;

pub use channel::{ChannelState, RemoteFunction};
pub use error::{BridgeError, Result};
pub use session::{CallbackHandle, Session, SessionConfig};
pub use value::{Callback, FunctionRef, Value};
