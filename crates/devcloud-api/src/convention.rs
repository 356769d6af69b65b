// Calling conventions
//
// The reactive-stream and callback styles are thin wrappers over
// `Dispatcher::execute_with`. They add no decoding, classification or
// retries of their own.

use futures_core::Stream;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::dispatch::{CallOptions, Dispatcher};
use crate::error::Error;
use crate::resource::Resource;

impl Dispatcher {
    /// Reactive style: a stream that yields exactly one result, then ends.
    ///
    /// Nothing is sent until the stream is first polled; dropping the
    /// stream cancels the request.
    pub fn stream<T>(
        &self,
        resource: Resource,
        options: CallOptions,
    ) -> impl Stream<Item = Result<T, Error>> + Send + 'static
    where
        T: DeserializeOwned + Send + 'static,
    {
        let dispatcher = self.clone();
        async_stream::stream! {
            yield dispatcher.execute_with::<T>(&resource, options).await;
        }
    }

    /// Callback style: runs the call on the Tokio runtime and invokes
    /// `callback` exactly once with the result, including when the call is
    /// cancelled through the returned handle.
    pub fn call<T, F>(&self, resource: Resource, options: CallOptions, callback: F) -> CallHandle
    where
        T: DeserializeOwned + Send + 'static,
        F: FnOnce(Result<T, Error>) + Send + 'static,
    {
        let cancel = options.cancel.clone().unwrap_or_else(CancellationToken::new);
        let options = CallOptions {
            cancel: Some(cancel.clone()),
            ..options
        };
        let dispatcher = self.clone();
        let task = tokio::spawn(async move {
            let result = dispatcher.execute_with::<T>(&resource, options).await;
            callback(result);
        });
        CallHandle { cancel, task }
    }
}

/// Handle to a call started with [`Dispatcher::call`].
#[derive(Debug)]
pub struct CallHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl CallHandle {
    /// Cancel the call. The callback still runs, with a `Cancelled` error,
    /// unless the call had already completed.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait until the callback has run.
    pub async fn finished(self) {
        if let Err(e) = self.task.await {
            warn!(error = %e, "callback task ended abnormally");
        }
    }
}
