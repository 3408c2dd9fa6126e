use crate::chunk::Chunk;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Number of chunks pre-allocated per device queue.
pub const INITIAL_BUCKETS: usize = 6;

/// Dual circular queue handing chunk buffers between one capture loop and
/// the disk worker.
///
/// The producer takes from `empty` and returns into `full`; the consumer
/// takes from `full` and returns into `empty`. Moving the box is the
/// hand-off: both sides see the same payload memory, nothing is copied.
/// While a chunk is lent out it belongs to the borrowing side alone, so the
/// mutex is held only across the pointer moves, never across a driver read
/// or a file write.
pub struct DualQueue {
    inner: Mutex<Inner>,
}

struct Inner {
    empty: VecDeque<Box<Chunk>>,
    full: VecDeque<Box<Chunk>>,
    lent_producer: bool,
    lent_consumer: bool,
    allocated: usize,
    grown: bool,
}

impl DualQueue {
    pub fn new(buckets: usize) -> Self {
        let mut empty = VecDeque::with_capacity(buckets + 2);
        for _ in 0..buckets {
            empty.push_back(Box::new(Chunk::new()));
        }
        Self {
            inner: Mutex::new(Inner {
                empty,
                full: VecDeque::new(),
                lent_producer: false,
                lent_consumer: false,
                allocated: buckets,
                grown: false,
            }),
        }
    }

    /// Takes a fresh chunk for the producer. `None` means the empty queue
    /// was exhausted, which the auto-grow in [`Self::prod_free`] is supposed
    /// to make impossible; callers treat it as an invariant violation.
    pub fn prod_own(&self) -> Option<Box<Chunk>> {
        let mut q = self.lock();
        let chunk = q.empty.pop_front();
        q.lent_producer = chunk.is_some();
        chunk
    }

    /// Returns the producer's chunk, now ready for consumption. If this
    /// left the empty queue dry, one new bucket is allocated so the next
    /// `prod_own` cannot come up short.
    pub fn prod_free(&self, chunk: Box<Chunk>) {
        let mut q = self.lock();
        q.full.push_back(chunk);
        q.lent_producer = false;
        if q.empty.is_empty() {
            q.empty.push_back(Box::new(Chunk::new()));
            q.allocated += 1;
            q.grown = true;
        }
    }

    /// Takes the oldest full chunk, or `None` when there is nothing to do.
    pub fn cons_own(&self) -> Option<Box<Chunk>> {
        let mut q = self.lock();
        let chunk = q.full.pop_front();
        q.lent_consumer = chunk.is_some();
        chunk
    }

    /// Returns a consumed chunk to the empty queue for reuse.
    pub fn cons_free(&self, chunk: Box<Chunk>) {
        let mut q = self.lock();
        q.empty.push_back(chunk);
        q.lent_consumer = false;
    }

    /// Count of full buckets waiting for the consumer.
    pub fn prod_len(&self) -> usize {
        self.lock().full.len()
    }

    /// Count of empty buckets available to the producer.
    pub fn cons_len(&self) -> usize {
        self.lock().empty.len()
    }

    /// Reports whether the queue has grown since the last call, and lowers
    /// the flag.
    pub fn has_grown(&self) -> bool {
        let mut q = self.lock();
        std::mem::replace(&mut q.grown, false)
    }

    /// Total buckets ever allocated for this queue.
    pub fn allocated(&self) -> usize {
        self.lock().allocated
    }

    /// `(empty, full, lent_out)` bucket counts, taken atomically.
    pub fn census(&self) -> (usize, usize, usize) {
        let q = self.lock();
        let lent = usize::from(q.lent_producer) + usize::from(q.lent_consumer);
        (q.empty.len(), q.full.len(), lent)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("bucket queue poisoned")
    }
}

impl Default for DualQueue {
    fn default() -> Self {
        Self::new(INITIAL_BUCKETS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn census_total(q: &DualQueue) -> usize {
        let (empty, full, lent) = q.census();
        empty + full + lent
    }

    #[test]
    fn hand_off_is_fifo() {
        let q = DualQueue::new(3);

        let mut a = q.prod_own().unwrap();
        a.len = 1;
        q.prod_free(a);
        let mut b = q.prod_own().unwrap();
        b.len = 2;
        q.prod_free(b);

        assert_eq!(q.prod_len(), 2);
        assert_eq!(q.cons_own().unwrap().len, 1);
        assert_eq!(q.cons_own().unwrap().len, 2);
        assert!(q.cons_own().is_none());
    }

    #[test]
    fn consumer_sees_producer_writes() {
        let q = DualQueue::new(2);

        let mut chunk = q.prod_own().unwrap();
        chunk.reset();
        chunk.samples[0] = 1234;
        chunk.len = 1;
        q.prod_free(chunk);

        let seen = q.cons_own().unwrap();
        assert_eq!(seen.samples[0], 1234);
        q.cons_free(seen);
    }

    #[test]
    fn grows_when_producer_drains_the_empty_queue() {
        let q = DualQueue::new(2);

        // Hold one chunk on the consumer side so returning the second one
        // leaves the empty queue dry.
        let first = q.prod_own().unwrap();
        q.prod_free(first);
        let parked = q.cons_own().unwrap();

        let second = q.prod_own().unwrap();
        assert_eq!(q.cons_len(), 0);
        q.prod_free(second);

        assert_eq!(q.allocated(), 3);
        assert_eq!(q.cons_len(), 1);
        assert!(q.has_grown());
        assert!(!q.has_grown());

        q.cons_free(parked);
    }

    #[test]
    fn census_stays_balanced() {
        let q = DualQueue::new(INITIAL_BUCKETS);
        assert_eq!(census_total(&q), q.allocated());

        let chunk = q.prod_own().unwrap();
        assert_eq!(census_total(&q), q.allocated());
        q.prod_free(chunk);

        let chunk = q.cons_own().unwrap();
        assert_eq!(census_total(&q), q.allocated());
        q.cons_free(chunk);
        assert_eq!(census_total(&q), q.allocated());
    }

    /// Stalled-consumer stress: the producer must never see an exhausted
    /// empty queue, it grows instead.
    #[test]
    fn slow_consumer_triggers_growth_not_exhaustion() {
        let q = Arc::new(DualQueue::new(2));

        let producer = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || {
                for _ in 0..40 {
                    let chunk = q.prod_own().expect("empty queue exhausted");
                    q.prod_free(chunk);
                }
            })
        };
        let consumer = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || {
                let mut consumed = 0;
                while consumed < 40 {
                    match q.cons_own() {
                        Some(chunk) => {
                            std::thread::sleep(Duration::from_millis(1));
                            q.cons_free(chunk);
                            consumed += 1;
                        }
                        None => std::thread::sleep(Duration::from_micros(100)),
                    }
                }
            })
        };

        producer.join().unwrap();
        consumer.join().unwrap();

        assert!(q.allocated() > 2);
        assert!(q.has_grown());
        assert_eq!(census_total(&q), q.allocated());
    }
}
