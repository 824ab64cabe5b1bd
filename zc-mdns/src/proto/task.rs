use std::time::{Duration, Instant};

use crate::record::Record;

// A scheduled unit of protocol work. All tasks share one timeline: the
// engine runs every task whose deadline has passed and either reschedules
// it or drops it, so no task ever needs its own thread or timer.
#[derive(Debug)]
pub(crate) struct Task {
    pub(crate) kind: TaskKind,
    pub(crate) deadline: Instant,
    pub(crate) passes: u32,
}

#[derive(Debug)]
pub(crate) enum TaskKind {
    // Sends probe queries for every owned name still in a probing state.
    Prober,
    // Sends unsolicited authoritative announcements for names that
    // finished probing.
    Announcer,
    // Re-announces owned records as their TTL ages.
    Renewer,
    // Answers a query once, after a short coalescing delay.
    Responder {
        answers: Vec<Record>,
        additionals: Vec<Record>,
        max_payload: usize,
    },
    // Multicasts goodbyes (TTL 0) for withdrawn records.
    Canceler {
        records: Vec<Record>,
    },
    // Evicts expired cache entries.
    Reaper,
    // Queries PTR for a browsed service type.
    ServiceResolver {
        service_type: String,
    },
    // Enumerates service types via the DNS-SD meta-query.
    TypeResolver,
    // Queries SRV and TXT for one instance until it has data.
    InfoResolver {
        qualified_name: String,
    },
    // Discards a partial truncated query whose continuation never came.
    TruncationGc {
        received_at: Instant,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskOutcome {
    Reschedule(Duration),
    Done,
}
