//! # Event Queue
//!
//! Unbounded FIFO between producers and the dispatch loop. Producers never
//! wait on handler speed: [`EventSender::enqueue`] only appends to the buffer.
//!
//! Closing is driven from the consumer side. After [`EventReceiver::close`]
//! every further `enqueue` fails with [`BrainError::Closed`], while events
//! already buffered keep flowing out of [`EventReceiver::next`] in order.
//! `next` yields `None` only once that drain is complete.
//!
//! The buffer has no upper bound. A producer that persistently outpaces the
//! handlers grows memory without limit; the brain accepts that in exchange for
//! producers that never stall.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use tokio::sync::mpsc;

use super::{
    error::{BrainError, BrainResult},
    event::Event,
};

pub fn event_queue() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));
    (
        EventSender {
            tx,
            pending: pending.clone(),
        },
        EventReceiver { rx, pending },
    )
}

#[derive(Clone, Debug)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Event>,
    pending: Arc<AtomicUsize>,
}

impl EventSender {
    pub fn enqueue(&self, event: Event) -> BrainResult<()> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.tx.send(event).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            BrainError::Closed
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Events accepted but not yet handed to the consumer.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<Event>,
    pending: Arc<AtomicUsize>,
}

impl EventReceiver {
    /// Waits for the next event. `None` means the queue was closed and drained.
    pub async fn next(&mut self) -> Option<Event> {
        let event = self.rx.recv().await?;
        self.pending.fetch_sub(1, Ordering::SeqCst);
        Some(event)
    }

    /// Stops intake. Buffered events are still returned by [`Self::next`].
    pub fn close(&mut self) {
        self.rx.close();
    }
}
