//! Delayed delivery on a dedicated background thread
//!
//! The delivery thread runs a single-threaded tokio runtime whose only task
//! is a timer loop. Arrival threads post deliveries into the loop through an
//! unbounded channel; the loop keeps them in a deadline-ordered heap and
//! pushes each buffer downstream once its deadline passes. Shutdown is
//! itself a command on that channel so it is ordered with the deliveries.

use crate::metrics::recorder;
use crate::netsim::error::{FlowResult, NetSimError, NetSimResult};
use crate::netsim::sink::BufferSink;
use crate::netsim::types::{Buffer, FilterStats};
use parking_lot::{Condvar, Mutex};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Lifecycle of the delivery loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    Inactive,
    Starting,
    Running,
    Stopping,
}

enum LoopCommand {
    Deliver { deadline: Instant, buffer: Buffer },
    Quit,
}

struct LoopState {
    phase: SchedulerPhase,
    /// Set by the delivery thread while its loop is alive
    running: bool,
    commands: Option<mpsc::UnboundedSender<LoopCommand>>,
    thread: Option<JoinHandle<()>>,
}

struct Shared {
    state: Mutex<LoopState>,
    start_cond: Condvar,
}

impl Shared {
    fn signal_running(&self, running: bool) {
        let mut state = self.state.lock();
        state.running = running;
        if running {
            state.phase = SchedulerPhase::Running;
        }
        self.start_cond.notify_all();
    }
}

/// Clears `running` when the delivery thread exits, even by unwinding
struct StopSignal(Arc<Shared>);

impl Drop for StopSignal {
    fn drop(&mut self) {
        tracing::trace!("Delivery task signal end");
        self.0.signal_running(false);
    }
}

struct PendingDelivery {
    deadline: Instant,
    seq: u64,
    buffer: Buffer,
}

impl PartialEq for PendingDelivery {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for PendingDelivery {}

impl PartialOrd for PendingDelivery {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingDelivery {
    // Equal deadlines fire in posting order
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

pub struct ScheduledDelivery {
    shared: Arc<Shared>,
    sink: Arc<dyn BufferSink>,
    stats: Arc<FilterStats>,
}

impl ScheduledDelivery {
    pub fn new(sink: Arc<dyn BufferSink>, stats: Arc<FilterStats>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(LoopState {
                    phase: SchedulerPhase::Inactive,
                    running: false,
                    commands: None,
                    thread: None,
                }),
                start_cond: Condvar::new(),
            }),
            sink,
            stats,
        }
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.shared.state.lock().phase
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().commands.is_some()
    }

    /// Start the delivery thread and block until its loop is running.
    ///
    /// Does nothing if already active.
    pub fn activate(&self) -> NetSimResult<()> {
        let mut state = self.shared.state.lock();
        if state.commands.is_some() {
            return Ok(());
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(NetSimError::SchedulerStart)?;
        let (tx, rx) = mpsc::unbounded_channel();

        state.phase = SchedulerPhase::Starting;
        tracing::trace!("Starting delivery thread");

        let shared = Arc::clone(&self.shared);
        let sink = Arc::clone(&self.sink);
        let stats = Arc::clone(&self.stats);
        let thread = std::thread::Builder::new()
            .name("netsim-delivery".to_string())
            .spawn(move || delivery_task(runtime, rx, shared, sink, stats));

        let thread = match thread {
            Ok(thread) => thread,
            Err(e) => {
                state.phase = SchedulerPhase::Inactive;
                return Err(NetSimError::SchedulerStart(e));
            }
        };

        state.commands = Some(tx);
        state.thread = Some(thread);

        tracing::trace!("Waiting for delivery thread to start");
        while !state.running {
            self.shared.start_cond.wait(&mut state);
        }
        tracing::trace!("Delivery thread started");

        Ok(())
    }

    /// Stop the loop and join the delivery thread.
    ///
    /// Pending deliveries are discarded. Once this returns no further buffer
    /// is pushed by the delivery thread. Calling it while inactive is a no-op.
    pub fn deactivate(&self) {
        let mut state = self.shared.state.lock();
        let Some(commands) = state.commands.take() else {
            return;
        };

        state.phase = SchedulerPhase::Stopping;
        tracing::trace!("Stopping delivery loop");
        // A send error means the loop is already gone
        let _ = commands.send(LoopCommand::Quit);
        drop(commands);

        tracing::trace!("Waiting for delivery loop to stop");
        while state.running {
            self.shared.start_cond.wait(&mut state);
        }

        let thread = state.thread.take();
        state.phase = SchedulerPhase::Inactive;
        drop(state);

        if let Some(thread) = thread {
            if thread.join().is_err() {
                tracing::warn!("Delivery thread panicked");
            }
        }
        tracing::trace!("Delivery loop stopped");
    }

    /// Push `buffer` downstream after `delay`.
    ///
    /// When the loop is not running the buffer is pushed right away on the
    /// calling thread and the downstream result is returned.
    pub fn schedule(&self, delay: Duration, buffer: Buffer) -> FlowResult {
        let command = LoopCommand::Deliver {
            deadline: Instant::now() + delay,
            buffer,
        };

        let rejected = {
            let state = self.shared.state.lock();
            match state.commands.as_ref() {
                Some(commands) => commands.send(command).err().map(|e| e.0),
                None => Some(command),
            }
        };

        let Some(LoopCommand::Deliver { buffer, .. }) = rejected else {
            return Ok(());
        };

        tracing::debug!("Delivery loop not running, pushing buffer now");
        let size = buffer.len();
        let result = self.sink.push(buffer);
        self.stats
            .forwarded_immediate
            .fetch_add(1, AtomicOrdering::Relaxed);
        self.stats
            .bytes_forwarded
            .fetch_add(size as u64, AtomicOrdering::Relaxed);
        recorder::record_buffer_forwarded("immediate", size);
        result
    }
}

impl Drop for ScheduledDelivery {
    fn drop(&mut self) {
        self.deactivate();
    }
}

fn delivery_task(
    runtime: Runtime,
    commands: mpsc::UnboundedReceiver<LoopCommand>,
    shared: Arc<Shared>,
    sink: Arc<dyn BufferSink>,
    stats: Arc<FilterStats>,
) {
    tracing::trace!("Delivery task begin");
    let _stop = StopSignal(Arc::clone(&shared));

    tracing::trace!("Delivery task signal start");
    shared.signal_running(true);

    tracing::trace!("Delivery task run");
    let discarded = runtime.block_on(run_loop(commands, sink.as_ref(), &stats));
    drop(runtime);

    if discarded > 0 {
        tracing::debug!(discarded, "Discarded pending deliveries on stop");
        stats
            .discarded_on_stop
            .fetch_add(discarded as u64, AtomicOrdering::Relaxed);
    }
}

/// Returns the number of deliveries still pending when told to quit
async fn run_loop(
    mut commands: mpsc::UnboundedReceiver<LoopCommand>,
    sink: &dyn BufferSink,
    stats: &FilterStats,
) -> usize {
    let mut pending: BinaryHeap<Reverse<PendingDelivery>> = BinaryHeap::new();
    let mut next_seq = 0u64;

    loop {
        let next_deadline = pending.peek().map(|Reverse(p)| p.deadline);

        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(LoopCommand::Deliver { deadline, buffer }) => {
                    pending.push(Reverse(PendingDelivery {
                        deadline,
                        seq: next_seq,
                        buffer,
                    }));
                    next_seq += 1;
                }
                Some(LoopCommand::Quit) | None => {
                    tracing::debug!("Delivery loop quit");
                    break;
                }
            },

            _ = tokio::time::sleep_until(next_deadline.unwrap_or_else(Instant::now)),
                if next_deadline.is_some() =>
            {
                let now = Instant::now();
                while pending
                    .peek()
                    .is_some_and(|Reverse(p)| p.deadline <= now)
                {
                    if let Some(Reverse(delivery)) = pending.pop() {
                        deliver(sink, stats, delivery.buffer);
                    }
                }
            }
        }
    }

    pending.len()
}

fn deliver(sink: &dyn BufferSink, stats: &FilterStats, buffer: Buffer) {
    tracing::debug!("Pushing delayed buffer now");
    let size = buffer.len();
    if let Err(e) = sink.push(buffer) {
        tracing::debug!("Downstream refused delayed buffer: {}", e);
    }
    stats
        .forwarded_delayed
        .fetch_add(1, AtomicOrdering::Relaxed);
    stats
        .bytes_forwarded
        .fetch_add(size as u64, AtomicOrdering::Relaxed);
    recorder::record_buffer_forwarded("delayed", size);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netsim::error::FlowError;
    use std::thread::sleep;
    use std::time::Instant as StdInstant;

    #[derive(Default)]
    struct CollectSink {
        received: Mutex<Vec<(Buffer, StdInstant)>>,
    }

    impl CollectSink {
        fn payloads(&self) -> Vec<u8> {
            self.received
                .lock()
                .iter()
                .map(|(b, _)| b.data()[0])
                .collect()
        }

        fn len(&self) -> usize {
            self.received.lock().len()
        }
    }

    impl BufferSink for CollectSink {
        fn push(&self, buffer: Buffer) -> FlowResult {
            self.received.lock().push((buffer, StdInstant::now()));
            Ok(())
        }
    }

    fn scheduler() -> (ScheduledDelivery, Arc<CollectSink>, Arc<FilterStats>) {
        let sink = Arc::new(CollectSink::default());
        let stats = Arc::new(FilterStats::new());
        let scheduler = ScheduledDelivery::new(sink.clone(), stats.clone());
        (scheduler, sink, stats)
    }

    fn buffer(tag: u8) -> Buffer {
        Buffer::new(vec![tag; 16])
    }

    #[test]
    fn test_inactive_schedule_pushes_immediately() {
        let (scheduler, sink, stats) = scheduler();
        assert_eq!(scheduler.phase(), SchedulerPhase::Inactive);

        scheduler
            .schedule(Duration::from_secs(10), buffer(1))
            .unwrap();

        assert_eq!(sink.len(), 1);
        assert_eq!(stats.forwarded_immediate.load(AtomicOrdering::Relaxed), 1);
    }

    #[test]
    fn test_inactive_schedule_returns_downstream_status() {
        let stats = Arc::new(FilterStats::new());
        let sink = |_: Buffer| -> FlowResult { Err(FlowError::Flushing) };
        let scheduler = ScheduledDelivery::new(Arc::new(sink), stats);

        assert_eq!(
            scheduler.schedule(Duration::ZERO, buffer(1)),
            Err(FlowError::Flushing)
        );
    }

    #[test]
    fn test_delayed_delivery() {
        let (scheduler, sink, stats) = scheduler();
        scheduler.activate().unwrap();
        assert_eq!(scheduler.phase(), SchedulerPhase::Running);

        let posted = StdInstant::now();
        scheduler
            .schedule(Duration::from_millis(50), buffer(1))
            .unwrap();
        assert_eq!(sink.len(), 0);

        sleep(Duration::from_millis(300));
        let received = sink.received.lock();
        assert_eq!(received.len(), 1);
        assert!(received[0].1.duration_since(posted) >= Duration::from_millis(50));
        drop(received);

        assert_eq!(stats.forwarded_delayed.load(AtomicOrdering::Relaxed), 1);
        scheduler.deactivate();
    }

    #[test]
    fn test_shorter_delay_overtakes() {
        let (scheduler, sink, _) = scheduler();
        scheduler.activate().unwrap();

        scheduler
            .schedule(Duration::from_millis(150), buffer(1))
            .unwrap();
        scheduler
            .schedule(Duration::from_millis(10), buffer(2))
            .unwrap();

        sleep(Duration::from_millis(400));
        assert_eq!(sink.payloads(), vec![2, 1]);
        scheduler.deactivate();
    }

    #[test]
    fn test_equal_delays_keep_order() {
        let (scheduler, sink, _) = scheduler();
        scheduler.activate().unwrap();

        for tag in 0..20 {
            scheduler.schedule(Duration::ZERO, buffer(tag)).unwrap();
        }

        sleep(Duration::from_millis(200));
        assert_eq!(sink.payloads(), (0..20).collect::<Vec<u8>>());
        scheduler.deactivate();
    }

    #[test]
    fn test_deactivate_discards_pending() {
        let (scheduler, sink, stats) = scheduler();
        scheduler.activate().unwrap();

        scheduler
            .schedule(Duration::from_millis(200), buffer(1))
            .unwrap();
        scheduler.deactivate();
        assert_eq!(scheduler.phase(), SchedulerPhase::Inactive);

        sleep(Duration::from_millis(400));
        assert_eq!(sink.len(), 0);
        assert_eq!(stats.discarded_on_stop.load(AtomicOrdering::Relaxed), 1);
    }

    #[test]
    fn test_deactivate_is_idempotent() {
        let (scheduler, _, _) = scheduler();
        scheduler.deactivate();

        scheduler.activate().unwrap();
        scheduler.deactivate();
        scheduler.deactivate();
        assert!(!scheduler.is_running());
    }

    #[test]
    fn test_restart_after_deactivate() {
        let (scheduler, sink, _) = scheduler();

        for round in 0..3u8 {
            scheduler.activate().unwrap();
            scheduler.activate().unwrap();
            assert!(scheduler.is_running());

            scheduler
                .schedule(Duration::from_millis(5), buffer(round))
                .unwrap();
            sleep(Duration::from_millis(100));
            scheduler.deactivate();
        }

        assert_eq!(sink.payloads(), vec![0, 1, 2]);
    }

    #[test]
    fn test_drop_stops_thread() {
        let (scheduler, sink, _) = scheduler();
        scheduler.activate().unwrap();
        scheduler
            .schedule(Duration::from_millis(100), buffer(1))
            .unwrap();
        drop(scheduler);

        sleep(Duration::from_millis(250));
        assert_eq!(sink.len(), 0);
    }
}
