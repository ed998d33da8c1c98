// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Restart journal (spec §4.B, §6): an append-only sequence of
//! serialized `ParamResponsePair`s, replayed into a fresh
//! [`EvaluationCache`] on startup.
//!
//! Split out of the cache proper so replay can be exercised without a
//! live scheduler (`SPEC_FULL.md` §4.B). Resolves spec.md's open
//! question on replay timing: this crate replays up-front, at
//! `CoreContext` construction, rather than traversing the journal
//! lazily on each lookup miss — the cache's hashed index has to be
//! populated before the first `lookup_exact` call can consult it.

use super::EvaluationCache;
use crate::error::CoreResult;
use crate::model::ParamResponsePair;
use std::collections::HashMap;
use std::io::{BufRead, Write};

/// Appends records to a durable stream, one JSON object per line.
/// Flushing after every write models the fsync-before-completion-report
/// contract in spec §4.B ("the stream is append-only and durable before
/// the corresponding completion is reported to the algorithm").
pub struct JournalWriter<W: Write> {
    sink: W,
}

impl<W: Write> JournalWriter<W> {
    pub fn new(sink: W) -> Self {
        Self { sink }
    }

    /// Appends one record and flushes.
    pub fn append(&mut self, pair: &ParamResponsePair) -> CoreResult<()> {
        serde_json::to_writer(&mut self.sink, pair)?;
        self.sink.write_all(b"\n")?;
        self.sink.flush()?;
        Ok(())
    }
}

/// Replays a journal stream into a fresh [`EvaluationCache`].
pub struct JournalReader;

impl JournalReader {
    /// Reads every record from `source`, keeping only the latest entry
    /// for a given `(interface-id, variables, active-set)` key (spec
    /// §6: "duplicates resolve to the latest entry for a given key"),
    /// then inserts each surviving entry into `cache` under a fresh
    /// non-positive evaluation id — journal-loaded entries are never
    /// positive (spec §3 invariant).
    ///
    /// Returns the number of records loaded.
    pub fn replay_into<R: BufRead>(source: R, cache: &mut EvaluationCache) -> CoreResult<usize> {
        let mut order: Vec<String> = Vec::new();
        let mut latest: HashMap<String, ParamResponsePair> = HashMap::new();

        for line in source.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let pair: ParamResponsePair = serde_json::from_str(&line)?;
            let key = journal_key(&pair);
            if !latest.contains_key(&key) {
                order.push(key.clone());
            }
            latest.insert(key, pair);
        }

        let mut next_id: i64 = 0;
        let mut loaded = 0;
        for key in order {
            let mut pair = latest.remove(&key).expect("key collected during scan");
            next_id -= 1;
            pair.eval_id = next_id;
            cache.insert(pair);
            loaded += 1;
        }
        Ok(loaded)
    }
}

/// A string key distinguishing journal entries the way the cache's
/// exact-hash key does, without borrowing the cache's private type.
fn journal_key(pair: &ParamResponsePair) -> String {
    format!(
        "{}|{:?}|{:?}|{:?}|{:?}",
        pair.interface_id,
        pair.variables.continuous.values.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
        pair.variables.discrete_int.values,
        pair.variables.discrete_real.values.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
        pair.variables.discrete_string.values,
    )
}
