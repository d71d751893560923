//! Concurrent table of live TCP sessions.
//!
//! The pool is a `DashMap` keyed by [`FlowKey`]: every shard is guarded by
//! its own reader/writer lock, so an insert takes an exclusive lock on one
//! shard and a flush scan takes shared locks shard by shard.
//!
//! A flush pass runs in two phases. The inspection phase walks the table under
//! shared locks and collects the keys of evictable sessions without removing
//! anything. The removal phase then takes each candidate out with
//! `remove_if`, re-checking the predicate under the shard's exclusive lock.
//! Sessions are handed to the callback by value once no lock is held, so a slow
//! callback (pattern matching, file I/O) never blocks inserts.
//!
//! A packet that arrives between the two phases either lands in the session
//! that is about to be removed (and is part of the evicted snapshot) or, if
//! it arrives after removal, starts a fresh session under the same key. The
//! map never holds two sessions for one key.

use crate::error::MonitorResult;
use crate::monitor::flow::segment_key;
use crate::monitor::parsers::CapturedPacket;
use crate::monitor::types::{FlowKey, Session};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Instant;

/// Initial capacity of the session table.
const INITIAL_CAPACITY: usize = 128;

#[derive(Debug)]
pub struct SessionPool {
    sessions: DashMap<FlowKey, Session>,
}

impl Default for SessionPool {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionPool {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::with_capacity(INITIAL_CAPACITY),
        }
    }

    /// Adds a packet to the session of its flow, creating the session if this
    /// is the first packet seen for the key.
    ///
    /// `now` becomes the session's `last_active`. A segment with RST or FIN
    /// marks the session closed.
    ///
    /// # Errors
    /// Fails when the packet carries no TCP segment. The table is not touched.
    pub fn insert(&self, packet: CapturedPacket, now: Instant) -> MonitorResult<FlowKey> {
        let (key, closing) = {
            let seg = packet.tcp_segment()?;
            (segment_key(&seg), seg.is_closing())
        };

        match self.sessions.entry(key) {
            Entry::Occupied(mut entry) => entry.get_mut().push(packet, now, closing),
            Entry::Vacant(entry) => {
                entry.insert(Session::new(key, packet, now, closing));
            }
        }
        Ok(key)
    }

    /// Evicts every session that is closed or whose `last_active` is strictly
    /// before `cutoff`, calling `on_evict` exactly once per evicted session.
    ///
    /// Returns the number of sessions evicted.
    pub fn flush<F>(&self, cutoff: Instant, on_evict: F) -> usize
    where
        F: FnMut(Session),
    {
        self.evict_where(|session| session.is_evictable(cutoff), on_evict)
    }

    /// Evicts every session regardless of state. Used on shutdown so that no
    /// buffered session is dropped without passing through `on_evict`.
    pub fn flush_all<F>(&self, on_evict: F) -> usize
    where
        F: FnMut(Session),
    {
        self.evict_where(|_| true, on_evict)
    }

    fn evict_where<P, F>(&self, predicate: P, mut on_evict: F) -> usize
    where
        P: Fn(&Session) -> bool,
        F: FnMut(Session),
    {
        // Inspection: shared shard locks only, released when the iterator is
        // dropped at the end of this statement.
        let candidates: Vec<FlowKey> = self
            .sessions
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| *entry.key())
            .collect();

        // Removal: one exclusive shard lock per candidate.
        let evicted: Vec<Session> = candidates
            .into_iter()
            .filter_map(|key| self.sessions.remove_if(&key, |_, s| predicate(s)))
            .map(|(_, session)| session)
            .collect();

        let count = evicted.len();
        for session in evicted {
            on_evict(session);
        }
        count
    }

    /// Clone of the live session for `key`, if any.
    #[cfg(test)]
    pub fn get(&self, key: &FlowKey) -> Option<Session> {
        self.sessions.get(key).map(|entry| entry.value().clone())
    }

    #[cfg(test)]
    pub fn contains(&self, key: &FlowKey) -> bool {
        self.sessions.contains_key(key)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
