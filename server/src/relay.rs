//! Peer relay: moves opaque payloads between the two live connections of a room.
//!
//! Every slot owns an inbound queue ([`Mailbox`]). A live connection for slot k
//! runs two duties: the inbound duty reads frames from the socket and pushes
//! them onto the queue of slot 1-k; the outbound duty drains slot k's own queue
//! into the socket. Queues outlive connections, so a payload sent while the
//! peer is away is delivered when it (re)attaches.

use futures::{Sink, SinkExt, Stream, StreamExt};
use mukatte_protocol::PayloadError;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{
    sync::{mpsc, Mutex as AsyncMutex, Notify},
    task::{AbortHandle, JoinHandle},
};

pub type Payload = Vec<u8>;

/// Why a live connection's duties stopped. Never leaves the connection it belongs to.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Decode(#[from] PayloadError),

    #[error("transport failed: {0}")]
    Transport(String),

    #[error("peer queue is gone")]
    PeerGone,

    #[error("no frame received for {0:?}")]
    Idle(Duration),

    #[error("relay duty aborted")]
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Unattached,
    Attached,
    Closed,
}

/// Consumer side of a [`Mailbox`].
#[derive(Debug)]
struct Inbox {
    rx: mpsc::UnboundedReceiver<Payload>,
    /// Dequeued but not yet confirmed sent; delivered first on the next attach.
    in_flight: Option<Payload>,
}

/// FIFO of payloads waiting for one slot. Single consumer at a time.
#[derive(Debug, Clone)]
pub struct Mailbox {
    tx: mpsc::UnboundedSender<Payload>,
    inbox: Arc<AsyncMutex<Inbox>>,
}

impl Mailbox {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Mailbox {
            tx,
            inbox: Arc::new(AsyncMutex::new(Inbox {
                rx,
                in_flight: None,
            })),
        }
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<Payload> {
        self.tx.clone()
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads payloads off the connection and queues them for the peer.
///
/// The connection counts as idle when nothing has moved in either direction
/// for `idle`; `activity` is signalled by the outbound duty on every send.
pub async fn inbound_duty<St>(
    stream: St,
    peer: mpsc::UnboundedSender<Payload>,
    idle: Duration,
    activity: Arc<Notify>,
) -> Result<(), RelayError>
where
    St: Stream<Item = Result<Payload, RelayError>> + Send,
{
    futures::pin_mut!(stream);
    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(payload) => peer.send(payload?).map_err(|_| RelayError::PeerGone)?,
                None => return Ok(()),
            },
            _ = activity.notified() => {}
            _ = tokio::time::sleep(idle) => return Err(RelayError::Idle(idle)),
        }
    }
}

/// Forwards this slot's queued payloads to the connection, in order.
///
/// A payload whose send fails stays at the head of the queue, so a later
/// connection may see it twice but never loses it.
pub async fn outbound_duty<Si>(
    sink: Si,
    mailbox: Mailbox,
    activity: Arc<Notify>,
) -> Result<(), RelayError>
where
    Si: Sink<Payload, Error = RelayError> + Send,
{
    futures::pin_mut!(sink);
    // a superseded connection's duty holds the lock until it is aborted
    let mut inbox = mailbox.inbox.lock_owned().await;
    loop {
        let payload = match inbox.in_flight.take() {
            Some(payload) => payload,
            None => match inbox.rx.recv().await {
                Some(payload) => payload,
                None => return Ok(()),
            },
        };
        inbox.in_flight = Some(payload.clone());
        sink.send(payload).await?;
        inbox.in_flight = None;
        activity.notify_one();
    }
}

/// Handle to one slot's half of the relay. Dropping it stops both duties.
#[derive(Debug)]
pub struct RelayDuties {
    inbound: AbortHandle,
    outbound: AbortHandle,
}

impl RelayDuties {
    pub fn abort(&self) {
        self.inbound.abort();
        self.outbound.abort();
    }
}

impl Drop for RelayDuties {
    fn drop(&mut self) {
        self.abort();
    }
}

/// The two running duties of one connection.
pub struct SpawnedRelay {
    pub duties: RelayDuties,
    inbound: JoinHandle<Result<(), RelayError>>,
    outbound: JoinHandle<Result<(), RelayError>>,
}

pub fn spawn_duties<St, Si>(
    stream: St,
    sink: Si,
    inbox: Mailbox,
    peer: mpsc::UnboundedSender<Payload>,
    idle: Duration,
) -> SpawnedRelay
where
    St: Stream<Item = Result<Payload, RelayError>> + Send + 'static,
    Si: Sink<Payload, Error = RelayError> + Send + 'static,
{
    let activity = Arc::new(Notify::new());
    let inbound = tokio::spawn(inbound_duty(stream, peer, idle, activity.clone()));
    let outbound = tokio::spawn(outbound_duty(sink, inbox, activity));
    SpawnedRelay {
        duties: RelayDuties {
            inbound: inbound.abort_handle(),
            outbound: outbound.abort_handle(),
        },
        inbound,
        outbound,
    }
}

impl SpawnedRelay {
    /// Waits for either duty to end, then stops the other one.
    pub async fn finished(
        mut inbound: JoinHandle<Result<(), RelayError>>,
        mut outbound: JoinHandle<Result<(), RelayError>>,
    ) -> Result<(), RelayError> {
        let (joined, inbound_done) = tokio::select! {
            r = &mut inbound => (r, true),
            r = &mut outbound => (r, false),
        };
        if inbound_done {
            outbound.abort();
        } else {
            inbound.abort();
        }
        match joined {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(RelayError::Aborted),
            Err(e) => Err(RelayError::Transport(format!("relay duty panicked: {e}"))),
        }
    }

    pub fn into_parts(
        self,
    ) -> (
        RelayDuties,
        JoinHandle<Result<(), RelayError>>,
        JoinHandle<Result<(), RelayError>>,
    ) {
        (self.duties, self.inbound, self.outbound)
    }
}
