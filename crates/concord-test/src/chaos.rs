//! Chaos for simulated links
//!
//! Links never lose messages (both broadcast variants assume reliable
//! links) but can:
//! - Delay
//! - Reorder, through per-message jitter
//! - Duplicate

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Link chaos configuration
#[derive(Clone, Debug)]
pub struct ChaosConfig {
    /// Fixed part of every delay
    pub base_latency: Duration,
    /// Extra delay drawn uniformly from `0..=jitter`
    pub jitter: Duration,
    /// Probability that a message is delivered twice
    pub duplicate_prob: f64,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        ChaosConfig::jittery()
    }
}

impl ChaosConfig {
    /// Constant latency: every link is FIFO
    pub fn fifo() -> Self {
        ChaosConfig {
            base_latency: Duration::from_millis(10),
            jitter: Duration::ZERO,
            duplicate_prob: 0.0,
        }
    }

    /// Jitter larger than the latency, so links reorder
    pub fn jittery() -> Self {
        ChaosConfig {
            base_latency: Duration::from_millis(10),
            jitter: Duration::from_millis(40),
            duplicate_prob: 0.0,
        }
    }

    /// Heavy reordering plus duplicates
    pub fn hostile() -> Self {
        ChaosConfig {
            base_latency: Duration::from_millis(20),
            jitter: Duration::from_millis(150),
            duplicate_prob: 0.1,
        }
    }

    fn sample_delay(&self, rng: &mut StdRng) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            rng.gen_range(0..=jitter_ms)
        };
        self.base_latency + Duration::from_millis(extra)
    }
}

#[derive(Clone, Debug)]
struct InFlight<T> {
    item: T,
    delivery_time: Duration,
    send_time: Duration,
    seq: u64,
}

/// Chaos link statistics
#[derive(Clone, Debug, Default)]
pub struct ChaosStats {
    pub sent: u64,
    pub delivered: u64,
    /// Deliveries that overtook an earlier send
    pub reordered: u64,
    pub duplicated: u64,
    pub total_latency_ms: u64,
    pub max_latency_ms: u64,
}

impl ChaosStats {
    pub fn avg_latency_ms(&self) -> f64 {
        if self.delivered == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.delivered as f64
        }
    }
}

/// One directed, seeded chaos link
pub struct ChaosNetwork<T> {
    config: ChaosConfig,
    rng: StdRng,
    in_flight: Vec<InFlight<T>>,
    current_time: Duration,
    next_seq: u64,
    highest_delivered: Option<u64>,
    stats: ChaosStats,
}

impl<T: Clone> ChaosNetwork<T> {
    pub fn new(config: ChaosConfig, seed: u64) -> Self {
        ChaosNetwork {
            config,
            rng: StdRng::seed_from_u64(seed),
            in_flight: Vec::new(),
            current_time: Duration::ZERO,
            next_seq: 0,
            highest_delivered: None,
            stats: ChaosStats::default(),
        }
    }

    pub fn send(&mut self, item: T) {
        self.stats.sent += 1;
        let seq = self.next_seq;
        self.next_seq += 1;

        if self.rng.gen::<f64>() < self.config.duplicate_prob {
            let delivery_time = self.current_time + self.config.sample_delay(&mut self.rng);
            self.in_flight.push(InFlight {
                item: item.clone(),
                delivery_time,
                send_time: self.current_time,
                seq,
            });
            self.stats.duplicated += 1;
        }

        let delivery_time = self.current_time + self.config.sample_delay(&mut self.rng);
        self.in_flight.push(InFlight {
            item,
            delivery_time,
            send_time: self.current_time,
            seq,
        });
    }

    /// Advance time; returns arrivals in delivery order
    pub fn tick(&mut self, dt: Duration) -> Vec<T> {
        self.current_time += dt;

        let now = self.current_time;
        let (mut due, pending): (Vec<_>, Vec<_>) = self
            .in_flight
            .drain(..)
            .partition(|packet| packet.delivery_time <= now);
        self.in_flight = pending;
        due.sort_by_key(|packet| (packet.delivery_time, packet.seq));

        let mut delivered = Vec::with_capacity(due.len());
        for packet in due {
            let latency = (packet.delivery_time - packet.send_time).as_millis() as u64;
            self.stats.delivered += 1;
            self.stats.total_latency_ms += latency;
            self.stats.max_latency_ms = self.stats.max_latency_ms.max(latency);

            match self.highest_delivered {
                Some(highest) if packet.seq < highest => self.stats.reordered += 1,
                _ => self.highest_delivered = Some(packet.seq),
            }
            delivered.push(packet.item);
        }
        delivered
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> &ChaosStats {
        &self.stats
    }

    pub fn current_time(&self) -> Duration {
        self.current_time
    }
}
