//! The network simulation filter
//!
//! Every arriving buffer goes through, in order: token bucket admission, the
//! deterministic drop countdown, the drop probability, the duplicate
//! probability and finally the delay decision for each forward. All of it
//! runs under one control lock, so the policy decisions of concurrent
//! arrivals never interleave. Buffers given different delays may leave in a
//! different order than they arrived.

use crate::metrics::recorder;
use crate::netsim::clock::{Clock, SystemClock};
use crate::netsim::distribution::NormalDistributionState;
use crate::netsim::error::{FlowResult, NetSimResult};
use crate::netsim::random::RandomSource;
use crate::netsim::scheduler::{ScheduledDelivery, SchedulerPhase};
use crate::netsim::sink::BufferSink;
use crate::netsim::token_bucket::TokenBucket;
use crate::netsim::types::{Buffer, FilterConfig, FilterStats, Property};
use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// State touched by the arrival path, guarded by the control lock
struct FilterState {
    config: FilterConfig,
    rng: RandomSource,
    bucket: TokenBucket,
    delay_state: NormalDistributionState,
}

pub struct NetSimFilter {
    control: Mutex<FilterState>,
    scheduler: ScheduledDelivery,
    sink: Arc<dyn BufferSink>,
    clock: Arc<dyn Clock>,
    stats: Arc<FilterStats>,
}

impl NetSimFilter {
    /// Create an inactive filter forwarding into `sink`
    pub fn new(config: FilterConfig, sink: Arc<dyn BufferSink>) -> Self {
        let stats = Arc::new(FilterStats::new());
        let bucket = TokenBucket::new(config.max_kbps, config.max_bucket_size);

        Self {
            control: Mutex::new(FilterState {
                config,
                rng: RandomSource::new(),
                bucket,
                delay_state: NormalDistributionState::new(),
            }),
            scheduler: ScheduledDelivery::new(Arc::clone(&sink), Arc::clone(&stats)),
            sink,
            clock: Arc::new(SystemClock::new()),
            stats,
        }
    }

    /// Use `clock` for token bucket replenishment
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Make every random decision reproducible
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.control.get_mut().rng.reseed(seed);
        self
    }

    pub fn reseed(&self, seed: u64) {
        self.control.lock().rng.reseed(seed);
    }

    /// Start the delivery thread. The token bucket starts full.
    ///
    /// Fails only if the delivery thread cannot be started.
    pub fn activate(&self) -> NetSimResult<()> {
        if self.scheduler.is_running() {
            return Ok(());
        }

        self.control.lock().bucket.reset();
        self.scheduler.activate()?;
        tracing::debug!("Filter activated");
        Ok(())
    }

    /// Stop the delivery thread, discarding buffers still waiting on a delay.
    pub fn deactivate(&self) {
        if !self.scheduler.is_running() {
            return;
        }

        self.scheduler.deactivate();
        tracing::debug!("Filter deactivated");
    }

    pub fn is_active(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.scheduler.phase()
    }

    pub fn stats(&self) -> Arc<FilterStats> {
        Arc::clone(&self.stats)
    }

    /// Process one arriving buffer.
    ///
    /// Policy outcomes are never errors: a rejected, dropped or delayed
    /// buffer returns `Ok`. Only an immediate push reports the downstream
    /// status; for a duplicated buffer that is the status of the second copy.
    pub fn chain(&self, buffer: Buffer) -> FlowResult {
        let mut guard = self.control.lock();
        let state = &mut *guard;

        self.stats.buffers_received.fetch_add(1, Ordering::Relaxed);
        recorder::record_buffer_received(buffer.len());

        if !state.bucket.admit(buffer.size_in_bits(), self.clock.now()) {
            self.stats.buffers_rejected.fetch_add(1, Ordering::Relaxed);
            recorder::record_buffer_rejected();
            return Ok(());
        }

        if state.config.drop_packets > 0 {
            state.config.drop_packets -= 1;
            tracing::debug!("Dropping buffer ({} left)", state.config.drop_packets);
            self.stats.buffers_dropped.fetch_add(1, Ordering::Relaxed);
            recorder::record_buffer_dropped("countdown");
            return Ok(());
        }

        if roll(&mut state.rng, state.config.drop_probability) {
            tracing::debug!("Dropping buffer");
            self.stats.buffers_dropped.fetch_add(1, Ordering::Relaxed);
            recorder::record_buffer_dropped("probability");
            return Ok(());
        }

        if roll(&mut state.rng, state.config.duplicate_probability) {
            tracing::debug!("Duplicating buffer");
            self.stats.buffers_duplicated.fetch_add(1, Ordering::Relaxed);
            recorder::record_buffer_duplicated();
            let _ = self.delay_buffer(state, buffer.clone());
            return self.delay_buffer(state, buffer);
        }

        self.delay_buffer(state, buffer)
    }

    /// Forward `buffer`, either now or after a sampled delay
    fn delay_buffer(&self, state: &mut FilterState, buffer: Buffer) -> FlowResult {
        if !roll(&mut state.rng, state.config.delay_probability) {
            return self.push_now(buffer);
        }

        let config = &state.config;
        let delay = config.delay_distribution.sample(
            &mut state.rng,
            config.min_delay,
            config.max_delay,
            &mut state.delay_state,
        );

        tracing::debug!("Delaying buffer by {}ms", delay);
        self.stats.buffers_delayed.fetch_add(1, Ordering::Relaxed);
        recorder::record_buffer_delayed(delay);
        self.scheduler.schedule(Duration::from_millis(delay), buffer)
    }

    fn push_now(&self, buffer: Buffer) -> FlowResult {
        let size = buffer.len();
        let result = self.sink.push(buffer);
        self.stats.forwarded_immediate.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_forwarded
            .fetch_add(size as u64, Ordering::Relaxed);
        recorder::record_buffer_forwarded("immediate", size);
        result
    }

    /// Set a property by its name, e.g. `("drop-probability", "0.1")`
    pub fn set_property(&self, name: &str, value: &str) -> NetSimResult<()> {
        let property: Property = name.parse()?;
        let mut state = self.control.lock();
        state.config.set(property, value)?;

        match property {
            Property::MaxKbps => {
                let max_kbps = state.config.max_kbps;
                state.bucket.set_max_kbps(max_kbps);
            }
            Property::MaxBucketSize => {
                let max_bucket_size = state.config.max_bucket_size;
                state.bucket.set_max_bucket_size(max_bucket_size);
            }
            _ => {}
        }

        Ok(())
    }

    /// Current value of a property, rendered as text
    pub fn property(&self, name: &str) -> NetSimResult<String> {
        let property: Property = name.parse()?;
        Ok(self.control.lock().config.get(property))
    }

    /// Snapshot of the configuration, including the remaining drop countdown
    pub fn config(&self) -> FilterConfig {
        self.control.lock().config.clone()
    }

    /// Replace the whole configuration. A limited bucket is refilled.
    pub fn set_config(&self, config: FilterConfig) {
        let mut state = self.control.lock();
        state.bucket.set_max_kbps(config.max_kbps);
        state.bucket.set_max_bucket_size(config.max_bucket_size);
        state.config = config;
    }
}

impl Drop for NetSimFilter {
    fn drop(&mut self) {
        self.deactivate();
    }
}

/// Bernoulli trial; a zero probability draws nothing
fn roll(rng: &mut RandomSource, probability: f32) -> bool {
    probability > 0.0 && rng.uniform_double() < f64::from(probability)
}
