use futures::stream::{self, Stream};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use uuid::Uuid;

use crate::database::models::Message;

#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Message(Message),
    /// The subscriber fell behind the channel; the stream ends here and the client
    /// resumes with `history(since = resume_from)`
    Lagged { resume_from: i64 },
}

/// Live feed of one group's messages committed after the subscription started
pub struct Subscription {
    group_id: Uuid,
    subscriber: Uuid,
    cursor: i64,
    receiver: broadcast::Receiver<Message>,
    /// Resolves once the subscriber's membership ends
    revoked: watch::Receiver<()>,
    finished: bool,
}

impl Subscription {
    pub(crate) fn new(
        group_id: Uuid,
        subscriber: Uuid,
        cursor: i64,
        receiver: broadcast::Receiver<Message>,
        revoked: watch::Receiver<()>,
    ) -> Self {
        Self {
            group_id,
            subscriber,
            cursor,
            receiver,
            revoked,
            finished: false,
        }
    }

    pub fn group_id(&self) -> Uuid {
        self.group_id
    }

    pub fn subscriber(&self) -> Uuid {
        self.subscriber
    }

    /// `seq` of the last message this subscription has accounted for
    pub fn cursor(&self) -> i64 {
        self.cursor
    }

    /// Next delivery in commit order; `None` once the subscriber's membership ends or the
    /// group's channel is gone
    pub async fn next(&mut self) -> Option<Delivery> {
        if self.finished {
            return None;
        }
        loop {
            let received = tokio::select! {
                biased;
                _ = self.revoked.changed() => {
                    tracing::debug!(group_id = %self.group_id, subscriber = %self.subscriber, "membership ended, stream closed");
                    self.finished = true;
                    return None;
                }
                received = self.receiver.recv() => received,
            };
            match received {
                Ok(message) if message.seq <= self.cursor => continue,
                Ok(message) => {
                    self.cursor = message.seq;
                    return Some(Delivery::Message(message));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        group_id = %self.group_id,
                        subscriber = %self.subscriber,
                        skipped,
                        "subscriber lagged, ending stream"
                    );
                    self.finished = true;
                    return Some(Delivery::Lagged {
                        resume_from: self.cursor,
                    });
                }
                Err(RecvError::Closed) => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }

    /// Stops delivery to this subscriber only
    pub fn cancel(self) {}

    pub fn into_stream(self) -> impl Stream<Item = Delivery> + Send {
        stream::unfold(self, |mut sub| async move { sub.next().await.map(|delivery| (delivery, sub)) })
    }
}
