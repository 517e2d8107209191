//! Channel-backed streams of node changes.

use crate::bus::SubscriptionGuard;
use futures::channel::mpsc::UnboundedReceiver;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};

/// A stream yielding every committed value of a node after it changes.
///
/// Values are buffered until polled. Dropping the stream unsubscribes.
pub struct ValueStream<T> {
    receiver: UnboundedReceiver<T>,
    _subscription: SubscriptionGuard,
}

impl<T> ValueStream<T> {
    pub(crate) fn new(receiver: UnboundedReceiver<T>, subscription: SubscriptionGuard) -> Self {
        Self {
            receiver,
            _subscription: subscription,
        }
    }
}

impl<T> Stream for ValueStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.receiver.poll_next_unpin(cx)
    }
}
