//! Bus metrics and dispatch histories
//!
//! Counters are updated synchronously on the dispatch path so a snapshot
//! taken right after a send is deterministic. The latency figure follows
//! the reference smoothing `avg := (avg + latency) / 2` — an exponential
//! moving average with alpha 0.5, not an arithmetic mean — and must stay
//! that way for behavioral compatibility.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::domain_types::{Message, MessageTimestamp, Response};
use crate::domain_types::MessageCount;

/// Width of the throughput window in milliseconds
const THROUGHPUT_WINDOW_MS: u64 = 1_000;

/// Point-in-time metrics view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Messages dispatched to agents
    pub total_messages: MessageCount,
    /// Responses that reported success
    pub successful_messages: MessageCount,
    /// Responses that reported failure
    pub failed_messages: MessageCount,
    /// Smoothed per-response latency in milliseconds
    pub average_latency: f64,
    /// Messages whose timestamp falls within one second of now
    pub throughput: u64,
}

/// Running counters owned by one bus instance
#[derive(Debug, Default)]
pub(crate) struct BusMetrics {
    total_messages: AtomicU64,
    successful_messages: AtomicU64,
    failed_messages: AtomicU64,
    average_latency: Mutex<f64>,
}

impl BusMetrics {
    /// Records a message handed to an agent
    pub(crate) fn record_sent(&self) {
        self.total_messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a response, updating the success/failure counters and the
    /// smoothed latency
    pub(crate) fn record_response(&self, response: &Response) {
        if response.success {
            self.successful_messages.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_messages.fetch_add(1, Ordering::Relaxed);
        }

        #[allow(clippy::cast_precision_loss)]
        let latency = response.metadata.processing_time as f64;
        if let Ok(mut average) = self.average_latency.lock() {
            *average = (*average + latency) / 2.0;
        }
    }

    pub(crate) fn snapshot(&self, throughput: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            total_messages: MessageCount::new(self.total_messages.load(Ordering::Relaxed)),
            successful_messages: MessageCount::new(
                self.successful_messages.load(Ordering::Relaxed),
            ),
            failed_messages: MessageCount::new(self.failed_messages.load(Ordering::Relaxed)),
            average_latency: self.average_latency.lock().map_or(0.0, |average| *average),
            throughput,
        }
    }

    pub(crate) fn reset(&self) {
        self.total_messages.store(0, Ordering::Relaxed);
        self.successful_messages.store(0, Ordering::Relaxed);
        self.failed_messages.store(0, Ordering::Relaxed);
        if let Ok(mut average) = self.average_latency.lock() {
            *average = 0.0;
        }
    }
}

/// Capped message and response histories backing the throughput metric
#[derive(Debug)]
pub(crate) struct DispatchHistory {
    messages: VecDeque<Message>,
    responses: VecDeque<Response>,
    capacity: usize,
}

impl DispatchHistory {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            responses: VecDeque::new(),
            capacity,
        }
    }

    pub(crate) fn record_message(&mut self, message: &Message) {
        if self.messages.len() == self.capacity {
            self.messages.pop_front();
        }
        self.messages.push_back(message.clone());
    }

    pub(crate) fn record_response(&mut self, response: &Response) {
        if self.responses.len() == self.capacity {
            self.responses.pop_front();
        }
        self.responses.push_back(response.clone());
    }

    /// Messages whose producer timestamp is within one second of `now`
    pub(crate) fn throughput(&self, now: MessageTimestamp) -> u64 {
        let now = now.as_millis();
        let count = self
            .messages
            .iter()
            .filter(|message| {
                let at = message.timestamp.as_millis();
                at <= now && now - at <= THROUGHPUT_WINDOW_MS
            })
            .count();
        count as u64
    }

    pub(crate) fn clear(&mut self) {
        self.messages.clear();
        self.responses.clear();
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.responses.is_empty()
    }
}
