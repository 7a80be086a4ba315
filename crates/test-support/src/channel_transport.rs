//! crates/test-support/src/channel_transport.rs
//!
//! An in-process `Transport` backed by threads and `crossbeam-channel`
//! instead of MPI ranks and messages. Built so the orchestration crates'
//! test suites can exercise multi-rank behavior (the sliding window, the
//! scatter, the propagated failure broadcast) without an MPI runtime.
//!
//! Every collective call (`broadcast_tree`, `exchange`, `all_reduce_and`)
//! is matched across ranks by call order: the `k`-th call any given rank
//! makes to `broadcast_tree` is assumed to correspond to the `k`-th call
//! every other rank makes, which holds for the orchestration code in this
//! workspace because every rank runs the same sequence of collective
//! operations.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Condvar, Mutex};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use fetch_core::error::{FetchError, FetchResult};
use fetch_core::kvtree::KVTree;
use fetch_core::transport::{RecvHandle, Transport};

struct SlotBoard<T> {
    slots: Mutex<Vec<T>>,
    cv: Condvar,
}

impl<T: Clone> SlotBoard<T> {
    fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            cv: Condvar::new(),
        }
    }

    fn publish(&self, idx: usize, value: T) {
        let mut slots = self.slots.lock().unwrap();
        assert_eq!(slots.len(), idx, "collective calls must publish in order");
        slots.push(value);
        self.cv.notify_all();
    }

    fn read(&self, idx: usize) -> T {
        let mut slots = self.slots.lock().unwrap();
        while slots.len() <= idx {
            slots = self.cv.wait(slots).unwrap();
        }
        slots[idx].clone()
    }
}

struct ReduceBoard {
    values: Mutex<Vec<Vec<Option<bool>>>>,
    cv: Condvar,
    size: usize,
}

impl ReduceBoard {
    fn new(size: usize) -> Self {
        Self {
            values: Mutex::new(Vec::new()),
            cv: Condvar::new(),
            size,
        }
    }

    fn contribute(&self, idx: usize, rank: usize, value: bool) -> bool {
        let mut values = self.values.lock().unwrap();
        while values.len() <= idx {
            values.push(vec![None; self.size]);
        }
        values[idx][rank] = Some(value);
        self.cv.notify_all();

        loop {
            if let Some(row) = values.get(idx) {
                if row.iter().all(Option::is_some) {
                    return row.iter().all(|v| v.unwrap());
                }
            }
            values = self.cv.wait(values).unwrap();
        }
    }
}

struct Inner {
    size: usize,
    barrier: Barrier,
    broadcast_counters: Vec<AtomicUsize>,
    broadcast_board: SlotBoard<KVTree>,
    exchange_counters: Vec<AtomicUsize>,
    exchange_board: SlotBoard<Arc<Vec<Option<KVTree>>>>,
    reduce_counters: Vec<AtomicUsize>,
    reduce_board: ReduceBoard,
    channels: Vec<Vec<(Sender<bool>, Receiver<bool>)>>,
    start: Instant,
}

/// In-process, thread-backed [`Transport`] implementation for tests.
#[derive(Clone)]
pub struct ChannelTransport {
    rank: usize,
    inner: Arc<Inner>,
}

impl ChannelTransport {
    /// Builds a fully connected cluster of `size` transports, one per
    /// simulated rank, ready to be moved into `size` threads.
    #[must_use]
    pub fn cluster(size: usize) -> Vec<ChannelTransport> {
        assert!(size > 0, "a cluster needs at least one rank");

        let mut channels = Vec::with_capacity(size);
        for _ in 0..size {
            let mut row = Vec::with_capacity(size);
            for _ in 0..size {
                row.push(crossbeam_channel::unbounded());
            }
            channels.push(row);
        }

        let inner = Arc::new(Inner {
            size,
            barrier: Barrier::new(size),
            broadcast_counters: (0..size).map(|_| AtomicUsize::new(0)).collect(),
            broadcast_board: SlotBoard::new(),
            exchange_counters: (0..size).map(|_| AtomicUsize::new(0)).collect(),
            exchange_board: SlotBoard::new(),
            reduce_counters: (0..size).map(|_| AtomicUsize::new(0)).collect(),
            reduce_board: ReduceBoard::new(size),
            channels,
            start: Instant::now(),
        });

        (0..size)
            .map(|rank| ChannelTransport {
                rank,
                inner: inner.clone(),
            })
            .collect()
    }
}

impl Transport for ChannelTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.inner.size
    }

    fn barrier(&self) {
        self.inner.barrier.wait();
    }

    fn broadcast_tree(&self, root: usize, value: Option<KVTree>) -> FetchResult<KVTree> {
        let idx = self.inner.broadcast_counters[self.rank].fetch_add(1, Ordering::SeqCst);
        if self.rank == root {
            let value = value.ok_or_else(|| {
                FetchError::Transport("broadcast root must supply a value".into())
            })?;
            self.inner.broadcast_board.publish(idx, value.clone());
            Ok(value)
        } else {
            Ok(self.inner.broadcast_board.read(idx))
        }
    }

    fn broadcast_bool(&self, root: usize, value: Option<bool>) -> FetchResult<bool> {
        let mut tree = KVTree::new();
        let send = value.map(|v| {
            tree.set_bool("value", v);
            tree.clone()
        });
        let result = self.broadcast_tree(root, send)?;
        result
            .get_bool("value")
            .ok_or_else(|| FetchError::Transport("broadcast_bool carried no value".into()))
    }

    fn send_bool(&self, dest: usize, value: bool) -> FetchResult<()> {
        self.inner.channels[self.rank][dest]
            .0
            .send(value)
            .map_err(|e| FetchError::Transport(e.to_string()))
    }

    fn recv_bool(&self, source: usize) -> FetchResult<bool> {
        self.inner.channels[source][self.rank]
            .1
            .recv()
            .map_err(|e| FetchError::Transport(e.to_string()))
    }

    fn isend_bool(&self, dest: usize, value: bool) -> FetchResult<()> {
        self.send_bool(dest, value)
    }

    fn irecv_bool(&self, source: usize) -> FetchResult<RecvHandle> {
        let rx = self.inner.channels[source][self.rank].1.clone();
        Ok(RecvHandle::new(source, rx))
    }

    fn wait_any(&self, handles: &[RecvHandle]) -> FetchResult<(usize, bool)> {
        let mut select = crossbeam_channel::Select::new();
        for handle in handles {
            select.recv(handle.receiver());
        }
        let op = select.select();
        let index = op.index();
        let value = op
            .recv(handles[index].receiver())
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok((index, value))
    }

    fn wait(&self, handle: RecvHandle) -> FetchResult<bool> {
        handle
            .receiver()
            .recv()
            .map_err(|e| FetchError::Transport(e.to_string()))
    }

    fn exchange(&self, root: usize, send: Vec<(usize, KVTree)>) -> FetchResult<Option<KVTree>> {
        let idx = self.inner.exchange_counters[self.rank].fetch_add(1, Ordering::SeqCst);
        if self.rank == root {
            let mut slots: Vec<Option<KVTree>> = vec![None; self.inner.size];
            for (rank, tree) in send {
                slots[rank] = Some(tree);
            }
            self.inner.exchange_board.publish(idx, Arc::new(slots));
        }
        let slots = self.inner.exchange_board.read(idx);
        Ok(slots[self.rank].clone())
    }

    fn all_reduce_and(&self, value: bool) -> FetchResult<bool> {
        let idx = self.inner.reduce_counters[self.rank].fetch_add(1, Ordering::SeqCst);
        Ok(self.inner.reduce_board.contribute(idx, self.rank, value))
    }

    fn wall_time(&self) -> f64 {
        self.inner.start.elapsed().as_secs_f64()
    }
}
