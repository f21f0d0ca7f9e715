use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use crate::drivers::Record;

/// Outcome of a bounded wait on the queue.
#[derive(Debug, PartialEq, Eq)]
pub enum Pop {
    Record(Record),
    /// Nothing arrived within the poll interval.
    Empty,
    /// Every producer is gone and the queue has been drained.
    Closed,
}

/// Unbounded FIFO between the read loop and the drain loop.
///
/// Records come out in exactly the order they were pushed; nothing is dropped or duplicated.
pub fn record_queue() -> (RecordProducer, RecordConsumer) {
    let (tx, rx) = channel();
    (RecordProducer { tx }, RecordConsumer { rx })
}

#[derive(Clone, Debug)]
pub struct RecordProducer {
    tx: Sender<Record>,
}

impl RecordProducer {
    /// Returns `false` once the consumer has been dropped.
    pub fn push(&self, record: Record) -> bool {
        self.tx.send(record).is_ok()
    }
}

#[derive(Debug)]
pub struct RecordConsumer {
    rx: Receiver<Record>,
}

impl RecordConsumer {
    pub fn pop(&self, timeout: Duration) -> Pop {
        match self.rx.recv_timeout(timeout) {
            Ok(record) => Pop::Record(record),
            Err(RecvTimeoutError::Timeout) => Pop::Empty,
            Err(RecvTimeoutError::Disconnected) => Pop::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn pops_in_push_order() {
        let (producer, consumer) = record_queue();
        for i in 0..5 {
            assert!(producer.push(Record::new(format!("{i},0"))));
        }
        for i in 0..5 {
            assert_eq!(
                consumer.pop(Duration::from_millis(10)),
                Pop::Record(Record::new(format!("{i},0")))
            );
        }
        assert_eq!(consumer.pop(Duration::from_millis(10)), Pop::Empty);
        drop(producer);
        assert_eq!(consumer.pop(Duration::from_millis(10)), Pop::Closed);
    }

    #[test]
    fn concurrent_push_pop_keeps_every_record_once() {
        let (producer, consumer) = record_queue();
        let writer = thread::spawn(move || {
            for i in 0..10_000 {
                producer.push(Record::new(i.to_string()));
            }
        });
        let mut seen = Vec::new();
        loop {
            match consumer.pop(Duration::from_millis(20)) {
                Pop::Record(r) => seen.push(r.as_str().parse::<usize>().unwrap()),
                Pop::Empty => continue,
                Pop::Closed => break,
            }
        }
        writer.join().unwrap();
        assert_eq!(seen, (0..10_000).collect::<Vec<_>>());
    }

    #[test]
    fn push_reports_missing_consumer() {
        let (producer, consumer) = record_queue();
        drop(consumer);
        assert!(!producer.push(Record::new("done")));
    }
}
