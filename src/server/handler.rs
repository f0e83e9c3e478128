//! Stream handler trait
//!
//! Implemented by every protocol the dispatcher can route to. A handler
//! receives a logical stream whose identifier has already been consumed and
//! owns it until it returns.

use std::future::Future;
use std::pin::Pin;

use crate::channel::ChannelContext;
use crate::error::Result;
use crate::transport::BoxedStream;

/// A boxed, sendable future
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Protocol handler for one kind of logical stream
///
/// Errors are local to the stream: the dispatcher logs them and the
/// connection keeps accepting.
pub trait StreamHandler: Send + Sync + 'static {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Serve one logical stream until it closes or `ctx.cancel` fires
    fn handle(&self, stream: BoxedStream, ctx: ChannelContext) -> BoxFuture<'_, Result<()>>;
}
