//! Bounded, ordered hand-off between an operator and its consumers.
//!
//! A connector has one lane per producer worker and a fixed number of
//! consumer threads. Lanes are bounded crossbeam channels: a push to a full
//! lane blocks the producer, a pop on an empty lane blocks the consumer. That
//! is the only backpressure in the engine.
//!
//! Ordering: consumers take strict turns and read lanes round-robin. A turn
//! token (which lane to read next, whether end-of-stream has been seen) is
//! passed from consumer to consumer through per-consumer channels, so a
//! producer that stripes its output `item k -> lane k % lanes` is read back as
//! one logical sequence.
//!
//! End-of-stream is sticky: after the first one is popped, every later pop on
//! any consumer yields end-of-stream without touching the lanes.
//!
//! With `retry_if_eoe`, a consumer that pops an end-of-epoch keeps the turn,
//! so its next pop continues the sequence instead of handing the first buffer
//! of the next epoch to another consumer. A caller that passes the marker on
//! instead of absorbing it hands the kept turn to the next consumer with
//! [`Connector::release_turn`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};

use epochflow_core::buffer::DataBuffer;
use epochflow_core::id::BufferId;

use crate::error::{ExecError, Result};
use crate::shutdown::ShutdownSignal;

#[derive(Debug)]
struct Lane {
    tx: Mutex<Option<Sender<DataBuffer>>>,
    rx: Receiver<DataBuffer>,
}

#[derive(Debug)]
struct TurnSlot {
    tx: Sender<Turn>,
    rx: Receiver<Turn>,
}

#[derive(Debug, Clone, Copy)]
struct Turn {
    pop_from: usize,
    end_of_stream: Option<BufferId>,
    kept: bool,
}

#[derive(Debug)]
pub struct Connector {
    lanes: Vec<Lane>,
    turns: Vec<TurnSlot>,
    capacity: usize,
    shutdown: ShutdownSignal,
    epochs_observed: AtomicU64,
}

impl Connector {
    pub fn new(
        num_producers: usize,
        num_consumers: usize,
        capacity: usize,
        shutdown: ShutdownSignal,
    ) -> Result<Self> {
        if num_producers == 0 {
            return Err(ExecError::Config {
                param: "num_producers",
                constraint: "must be greater than 0".into(),
            });
        }
        if num_consumers == 0 {
            return Err(ExecError::Config {
                param: "num_consumers",
                constraint: "must be greater than 0".into(),
            });
        }
        if capacity == 0 {
            return Err(ExecError::Config {
                param: "connector_queue_size",
                constraint: "must be greater than 0".into(),
            });
        }

        let lanes = (0..num_producers)
            .map(|_| {
                let (tx, rx) = bounded(capacity);
                Lane {
                    tx: Mutex::new(Some(tx)),
                    rx,
                }
            })
            .collect();
        let turns: Vec<TurnSlot> = (0..num_consumers)
            .map(|_| {
                let (tx, rx) = unbounded();
                TurnSlot { tx, rx }
            })
            .collect();

        let connector = Self {
            lanes,
            turns,
            capacity,
            shutdown,
            epochs_observed: AtomicU64::new(0),
        };
        connector.hand_over(
            0,
            Turn {
                pop_from: 0,
                end_of_stream: None,
                kept: false,
            },
        )?;
        Ok(connector)
    }

    pub fn num_producers(&self) -> usize {
        self.lanes.len()
    }

    pub fn num_consumers(&self) -> usize {
        self.turns.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// End-of-epoch markers popped so far, across all consumers.
    pub fn epochs_observed(&self) -> u64 {
        self.epochs_observed.load(Ordering::Relaxed)
    }

    /// Buffers currently queued on one lane.
    pub fn queued(&self, worker_id: usize) -> usize {
        self.lanes.get(worker_id).map(|l| l.rx.len()).unwrap_or(0)
    }

    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Enqueue on the calling worker's lane, blocking while the lane is full.
    pub fn push(&self, worker_id: usize, buffer: DataBuffer) -> Result<()> {
        let lane = self.lane(worker_id)?;
        let tx = lane
            .tx
            .lock()
            .map_err(|_| ExecError::poisoned("connector lane"))?
            .clone()
            .ok_or_else(|| {
                ExecError::UnexpectedState(format!("push on closed lane {worker_id}"))
            })?;

        select! {
            send(tx, buffer) -> res => res.map_err(|_| {
                ExecError::UnexpectedState(format!("lane {worker_id} lost its receiver"))
            }),
            recv(self.shutdown.listener()) -> _ => Err(ExecError::Interrupted),
        }
    }

    pub fn pop(&self, consumer: usize) -> Result<DataBuffer> {
        self.pop_with_retry(consumer, false)
    }

    /// Block until it is `consumer`'s turn and a buffer is available.
    pub fn pop_with_retry(&self, consumer: usize, retry_if_eoe: bool) -> Result<DataBuffer> {
        let slot = self.turns.get(consumer).ok_or_else(|| {
            ExecError::Structural(format!(
                "consumer {consumer} out of range for a connector with {} consumers",
                self.turns.len()
            ))
        })?;

        let mut turn = select! {
            recv(slot.rx) -> turn => turn.map_err(|_| {
                ExecError::UnexpectedState("connector turn channel closed".into())
            })?,
            recv(self.shutdown.listener()) -> _ => return Err(ExecError::Interrupted),
        };

        let buffer = match turn.end_of_stream {
            Some(id) => DataBuffer::end_of_stream(id),
            None => {
                let lane = &self.lanes[turn.pop_from];
                let popped = select! {
                    recv(lane.rx) -> buffer => buffer.ok(),
                    recv(self.shutdown.listener()) -> _ => {
                        self.hand_over(consumer, turn)?;
                        return Err(ExecError::Interrupted);
                    }
                };
                match popped {
                    Some(buffer) => buffer,
                    None => {
                        let lane_id = turn.pop_from;
                        self.hand_over(consumer, turn)?;
                        // producers that stop on shutdown close their lane too
                        if self.shutdown.is_shutdown() {
                            return Err(ExecError::Interrupted);
                        }
                        return Err(ExecError::UnexpectedState(format!(
                            "producer of lane {lane_id} terminated without end-of-stream"
                        )));
                    }
                }
            }
        };

        if buffer.is_eos() {
            turn.end_of_stream = Some(buffer.id());
        } else {
            turn.pop_from = (turn.pop_from + 1) % self.lanes.len();
        }

        let mut next = (consumer + 1) % self.turns.len();
        turn.kept = false;
        if buffer.is_eoe() {
            let seen = self.epochs_observed.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::trace!(consumer, epochs = seen, retry_if_eoe, "connector observed end of epoch");
            if retry_if_eoe {
                turn.kept = true;
                next = consumer;
            }
        }
        self.hand_over(next, turn)?;
        Ok(buffer)
    }

    /// Pass a turn kept by `pop_with_retry` on to the next consumer.
    ///
    /// Used when the end-of-epoch that kept the turn leaves the consumer as
    /// output, where it occupies a slot of the consumer's own sequence. A no-op
    /// when `consumer` holds no kept turn.
    pub fn release_turn(&self, consumer: usize) -> Result<()> {
        let slot = self.turns.get(consumer).ok_or_else(|| {
            ExecError::Structural(format!(
                "consumer {consumer} out of range for a connector with {} consumers",
                self.turns.len()
            ))
        })?;
        let Ok(mut turn) = slot.rx.try_recv() else {
            return Ok(());
        };
        if !turn.kept {
            return self.hand_over(consumer, turn);
        }
        turn.kept = false;
        tracing::trace!(consumer, "connector released a kept turn");
        self.hand_over((consumer + 1) % self.turns.len(), turn)
    }

    /// Called once a producer worker has exited. Buffers already queued stay
    /// poppable; popping past them is an `UnexpectedState` error.
    pub fn close_lane(&self, worker_id: usize) {
        if let Some(lane) = self.lanes.get(worker_id) {
            if let Ok(mut tx) = lane.tx.lock() {
                tx.take();
            }
        }
    }

    fn lane(&self, worker_id: usize) -> Result<&Lane> {
        self.lanes.get(worker_id).ok_or_else(|| {
            ExecError::Structural(format!(
                "worker {worker_id} out of range for a connector with {} lanes",
                self.lanes.len()
            ))
        })
    }

    fn hand_over(&self, consumer: usize, turn: Turn) -> Result<()> {
        self.turns[consumer]
            .tx
            .send(turn)
            .map_err(|_| ExecError::UnexpectedState("connector turn channel closed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use epochflow_core::types::RowBatch;

    fn data(id: u64) -> DataBuffer {
        DataBuffer::data(BufferId::new(id), RowBatch::from_i64_range("id", 0..1))
    }

    #[test]
    fn zero_sized_connectors_are_rejected() {
        let s = ShutdownSignal::new();
        assert!(Connector::new(0, 1, 1, s.clone()).is_err());
        assert!(Connector::new(1, 0, 1, s.clone()).is_err());
        assert!(Connector::new(1, 1, 0, s).unwrap_err().is_config());
    }

    #[test]
    fn single_lane_is_fifo() {
        let conn = Connector::new(1, 1, 8, ShutdownSignal::new()).unwrap();
        for i in 0..5 {
            conn.push(0, data(i)).unwrap();
        }
        for i in 0..5 {
            assert_eq!(conn.pop(0).unwrap().id(), BufferId::new(i));
        }
    }

    #[test]
    fn lanes_are_read_round_robin() {
        let conn = Connector::new(2, 1, 4, ShutdownSignal::new()).unwrap();
        conn.push(0, data(0)).unwrap();
        conn.push(1, data(1)).unwrap();
        conn.push(0, data(2)).unwrap();
        conn.push(1, data(3)).unwrap();
        let ids: Vec<u64> = (0..4).map(|_| conn.pop(0).unwrap().id().get()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    #[test]
    fn end_of_stream_is_sticky() {
        let conn = Connector::new(1, 2, 4, ShutdownSignal::new()).unwrap();
        conn.push(0, DataBuffer::end_of_stream(BufferId::new(9))).unwrap();
        assert!(conn.pop(0).unwrap().is_eos());
        // consumer 1 gets the turn next and sees the sticky marker
        let again = conn.pop(1).unwrap();
        assert!(again.is_eos());
        assert_eq!(again.id(), BufferId::new(9));
        assert!(conn.pop(0).unwrap().is_eos());
    }

    #[test]
    fn retry_keeps_the_turn_on_end_of_epoch() {
        let conn = Connector::new(1, 2, 8, ShutdownSignal::new()).unwrap();
        conn.push(0, DataBuffer::end_of_epoch(BufferId::new(0))).unwrap();
        conn.push(0, data(1)).unwrap();

        assert!(conn.pop_with_retry(0, true).unwrap().is_eoe());
        // still consumer 0's turn
        assert_eq!(conn.pop_with_retry(0, true).unwrap().id(), BufferId::new(1));
        assert_eq!(conn.epochs_observed(), 1);
    }

    #[test]
    fn released_turn_moves_to_the_next_consumer() {
        let conn = Connector::new(2, 2, 8, ShutdownSignal::new()).unwrap();
        conn.push(0, DataBuffer::end_of_epoch(BufferId::new(0))).unwrap();
        conn.push(1, data(1)).unwrap();
        conn.push(0, data(2)).unwrap();

        assert!(conn.pop_with_retry(0, true).unwrap().is_eoe());
        conn.release_turn(0).unwrap();
        // a second release finds no kept turn
        conn.release_turn(0).unwrap();
        assert_eq!(conn.pop_with_retry(1, true).unwrap().id(), BufferId::new(1));
        assert_eq!(conn.pop_with_retry(0, true).unwrap().id(), BufferId::new(2));
        assert!(conn.release_turn(2).is_err());
    }

    #[test]
    fn closed_lane_without_end_of_stream_is_fatal() {
        let conn = Connector::new(1, 1, 4, ShutdownSignal::new()).unwrap();
        conn.push(0, data(0)).unwrap();
        conn.close_lane(0);
        assert!(conn.pop(0).unwrap().is_data());
        let err = conn.pop(0).unwrap_err();
        assert!(err.is_fatal(), "{err}");
        assert!(conn.push(0, data(1)).is_err());
    }

    #[test]
    fn shutdown_unblocks_a_waiting_pop() {
        let signal = ShutdownSignal::new();
        let conn = std::sync::Arc::new(Connector::new(1, 1, 1, signal.clone()).unwrap());
        let waiter = std::sync::Arc::clone(&conn);
        let handle = std::thread::spawn(move || waiter.pop(0));
        std::thread::sleep(std::time::Duration::from_millis(20));
        signal.shutdown();
        assert!(matches!(handle.join().unwrap(), Err(ExecError::Interrupted)));
    }
}
