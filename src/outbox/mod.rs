//! Transactional Outbox
//!
//! Domain events are written in the same database transaction as the
//! ledger mutation that caused them and delivered asynchronously by the
//! poller. Delivery is at-least-once; consumers dedupe on `event_id`.
//!
//! # State Machine
//!
//! ```text
//! PENDING → PROCESSING → DELIVERED
//!    ↑          │
//!    └──retry───┤
//!               └──────→ FAILED (alert)
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Write-With-Mutation**: rows become visible only when the business
//!    transaction commits
//! 2. **Single Owner**: a claim is exclusive; every later mark is a CAS on
//!    the claimed version
//! 3. **Terminal Is Final**: nothing leaves DELIVERED or FAILED
//! 4. **No Publish Past Lease**: a poller never starts a publish that could
//!    outlive its lease, so a reclaimed row is not in flight elsewhere

pub mod error;
pub mod memory;
pub mod metrics;
pub mod poller;
pub mod postgres;
pub mod publisher;
pub mod repository;
pub mod types;
pub mod writer;

pub use error::{OutboxError, PublishError};
pub use metrics::{MetricsSnapshot, OutboxMetrics};
pub use poller::{OutboxPoller, PollReport, PollerConfig};
pub use postgres::PgOutboxRepository;
pub use publisher::{EventPublisher, HttpPublisher, LogPublisher};
pub use repository::OutboxRepository;
pub use types::{NewOutboxEntry, OutboxEntry, OutboxStatus, StatusCounts};
pub use writer::OutboxWriter;
