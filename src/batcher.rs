use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Pure aggregation window: items accumulate until the target size is
/// reached, or until the timeout elapses measured from the first item
/// landing in an otherwise-empty window. Flushes are FIFO slices of at
/// most `size` items, delivered over the receiver returned by [`Batcher::new`].
pub struct Batcher<T> {
    size: usize,
    timeout: Option<Duration>,
    window: Arc<Mutex<Window<T>>>,
    flush_tx: mpsc::UnboundedSender<Vec<T>>,
}

struct Window<T> {
    items: VecDeque<T>,
    timer: Option<JoinHandle<()>>,
}

impl<T> Clone for Batcher<T> {
    fn clone(&self) -> Self {
        Batcher {
            size: self.size,
            timeout: self.timeout,
            window: Arc::clone(&self.window),
            flush_tx: self.flush_tx.clone(),
        }
    }
}

impl<T: Send + 'static> Batcher<T> {
    pub fn new(size: usize, timeout: Option<Duration>) -> (Self, mpsc::UnboundedReceiver<Vec<T>>) {
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        let batcher = Batcher {
            size: size.max(1),
            timeout,
            window: Arc::new(Mutex::new(Window {
                items: VecDeque::new(),
                timer: None,
            })),
            flush_tx,
        };
        (batcher, flush_rx)
    }

    /// Append an item. At the size threshold, flush exactly `size` oldest
    /// items and cancel any pending timer. If a timeout is configured and
    /// this push landed in an empty window, arm the timer.
    pub fn push(&self, item: T) {
        let mut window = self.window.lock().unwrap();
        window.items.push_back(item);

        if window.items.len() >= self.size {
            let batch: Vec<T> = window.items.drain(..self.size).collect();
            if let Some(timer) = window.timer.take() {
                timer.abort();
            }
            let _ = self.flush_tx.send(batch);
        } else if window.items.len() == 1 {
            if let Some(timeout) = self.timeout {
                window.timer = Some(self.arm_timer(timeout));
            }
        }
    }

    fn arm_timer(&self, timeout: Duration) -> JoinHandle<()> {
        let window = Arc::clone(&self.window);
        let flush_tx = self.flush_tx.clone();
        let size = self.size;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let mut window = window.lock().unwrap();
            window.timer = None;
            if window.items.is_empty() {
                return;
            }
            let take = window.items.len().min(size);
            let batch: Vec<T> = window.items.drain(..take).collect();
            debug!(flushed = batch.len(), "batch window timed out");
            let _ = flush_tx.send(batch);
        })
    }

    /// Discard buffered items and cancel any pending timer. Returns the
    /// discarded items so the owner can decide what to do with them (the
    /// consumer nacks buffered deliveries before dropping a dead channel).
    pub fn clear(&self) -> Vec<T> {
        let mut window = self.window.lock().unwrap();
        if let Some(timer) = window.timer.take() {
            timer.abort();
        }
        window.items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.window.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
