// Bounded single-producer, multi-consumer handoff of record handles.
use std::sync::Mutex;

use flume::{Receiver, Sender};

use crate::core::error::{Error, ErrorKind};
use crate::core::handle::RecordHandle;

pub const DEFAULT_CAPACITY: usize = 1000;

/// One item taken from the queue: a record, or the end-of-stream marker
/// addressed to exactly one consumer.
#[derive(Debug)]
pub enum Entry {
    Record(RecordHandle),
    Sentinel,
}

impl Entry {
    pub fn is_sentinel(&self) -> bool {
        matches!(self, Entry::Sentinel)
    }

    pub fn as_record(&self) -> Option<&RecordHandle> {
        match self {
            Entry::Record(handle) => Some(handle),
            Entry::Sentinel => None,
        }
    }

    pub fn into_record(self) -> Option<RecordHandle> {
        match self {
            Entry::Record(handle) => Some(handle),
            Entry::Sentinel => None,
        }
    }
}

/// Fixed-capacity FIFO between the scanner and its consumers.
///
/// `put` blocks while the queue is full and `take` blocks while it is empty.
/// The producer side is handed out once; when every receiver is gone a
/// blocked `put` returns `ErrorKind::Interrupted`, and when the producer is
/// gone an empty queue's `take` does the same.
#[derive(Debug)]
pub struct HandoffQueue {
    capacity: usize,
    sender: Mutex<Option<Sender<Entry>>>,
    receiver: Receiver<Entry>,
}

impl HandoffQueue {
    pub fn bounded(capacity: usize) -> Result<Self, Error> {
        if capacity == 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("queue capacity must be at least 1"));
        }
        let (sender, receiver) = flume::bounded(capacity);
        Ok(Self {
            capacity,
            sender: Mutex::new(Some(sender)),
            receiver,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Hands out the single producer side. A second call is a usage error.
    pub fn producer(&self) -> Result<Producer, Error> {
        let mut slot = self.sender.lock().map_err(|_| {
            Error::new(ErrorKind::Internal).with_message("handoff queue lock poisoned")
        })?;
        let sender = slot.take().ok_or_else(|| {
            Error::new(ErrorKind::Usage).with_message("queue producer was already handed out")
        })?;
        Ok(Producer { sender })
    }

    pub fn consumer(&self) -> Consumer {
        Consumer {
            receiver: self.receiver.clone(),
        }
    }

    pub fn take(&self) -> Result<Entry, Error> {
        recv(&self.receiver)
    }
}

/// Sending half, owned by exactly one scanner.
#[derive(Debug)]
pub struct Producer {
    sender: Sender<Entry>,
}

impl Producer {
    pub fn put(&self, entry: Entry) -> Result<(), Error> {
        self.sender.send(entry).map_err(|_| {
            Error::new(ErrorKind::Interrupted).with_message("all queue consumers are gone")
        })
    }
}

/// Receiving half for one consumer worker; cheap to clone.
#[derive(Clone, Debug)]
pub struct Consumer {
    receiver: Receiver<Entry>,
}

impl Consumer {
    pub fn take(&self) -> Result<Entry, Error> {
        recv(&self.receiver)
    }
}

fn recv(receiver: &Receiver<Entry>) -> Result<Entry, Error> {
    receiver.recv().map_err(|_| {
        Error::new(ErrorKind::Interrupted).with_message("queue producer is gone")
    })
}
