//! Runtime-agnostic timer functions
//!
//! These wrap the timer of whichever runtime feature is enabled so callers
//! never need their own cfg-flag blocks.

use crate::Elapsed;
use futures::future::{Either, select};
use std::future::Future;
use std::pin::pin;
use std::time::Duration;

/// Sleep for the specified duration using the selected runtime
pub async fn sleep(duration: Duration) {
    #[cfg(feature = "smol")]
    {
        smol::Timer::after(duration).await;
    }

    #[cfg(all(feature = "tokio", not(feature = "smol")))]
    {
        tokio::time::sleep(duration).await;
    }

    #[cfg(not(any(feature = "smol", feature = "tokio")))]
    {
        compile_error!("One of the runtime features must be enabled: smol or tokio");
    }
}

/// Run `future` to completion unless `duration` passes first
///
/// On expiry the future is dropped, cancelling it at its current suspension
/// point.
pub async fn timeout<F>(duration: Duration, future: F) -> Result<F::Output, Elapsed>
where
    F: Future,
{
    let future = pin!(future);
    let deadline = pin!(sleep(duration));

    match select(future, deadline).await {
        Either::Left((output, _)) => Ok(output),
        Either::Right(((), _)) => Err(Elapsed::new(duration)),
    }
}
