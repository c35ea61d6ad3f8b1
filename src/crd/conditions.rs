//! Condition bookkeeping for status subresources.
//!
//! A [`ConditionSet`] names the dependent conditions of a resource; the
//! `Ready` condition is derived from them.  Marking a dependent `False`
//! drags `Ready` down with the same reason and message, marking the last
//! outstanding dependent `True` lifts it.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

pub const READY: &str = "Ready";

pub const STATUS_TRUE: &str = "True";
pub const STATUS_FALSE: &str = "False";
pub const STATUS_UNKNOWN: &str = "Unknown";

#[derive(Clone, Copy, Debug)]
pub struct ConditionSet {
    dependents: &'static [&'static str],
}

impl ConditionSet {
    pub const fn new(dependents: &'static [&'static str]) -> Self {
        Self { dependents }
    }

    pub fn dependents(&self) -> &'static [&'static str] {
        self.dependents
    }

    /// Add every missing condition as `Unknown`.
    pub fn initialize(&self, conditions: &mut Vec<Condition>, generation: Option<i64>) {
        for type_ in self.dependents.iter().chain(std::iter::once(&READY)) {
            if find(conditions, type_).is_none() {
                set(
                    conditions,
                    type_,
                    STATUS_UNKNOWN,
                    "Initializing",
                    "",
                    generation,
                );
            }
        }
    }

    pub fn mark_true(&self, conditions: &mut Vec<Condition>, type_: &str, generation: Option<i64>) {
        set(conditions, type_, STATUS_TRUE, type_, "", generation);
        let all_true = self
            .dependents
            .iter()
            .all(|d| is_true(conditions, d));
        if all_true {
            set(conditions, READY, STATUS_TRUE, READY, "", generation);
        }
    }

    pub fn mark_false(
        &self,
        conditions: &mut Vec<Condition>,
        type_: &str,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) {
        set(conditions, type_, STATUS_FALSE, reason, message, generation);
        if type_ != READY {
            set(conditions, READY, STATUS_FALSE, reason, message, generation);
        }
    }

    /// Mark `type_` as in progress.  `Ready` follows unless another
    /// dependent already failed.
    pub fn mark_unknown(
        &self,
        conditions: &mut Vec<Condition>,
        type_: &str,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) {
        set(conditions, type_, STATUS_UNKNOWN, reason, message, generation);
        let failed = self
            .dependents
            .iter()
            .any(|d| *d != type_ && status(conditions, d) == Some(STATUS_FALSE));
        if !failed && type_ != READY {
            set(conditions, READY, STATUS_UNKNOWN, reason, message, generation);
        }
    }

    /// `Ready=False` without touching the dependents.
    pub fn mark_not_ready(&self, conditions: &mut Vec<Condition>, reason: &str, message: &str, generation: Option<i64>) {
        set(conditions, READY, STATUS_FALSE, reason, message, generation);
    }
}

pub fn find<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

pub fn status<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a str> {
    find(conditions, type_).map(|c| c.status.as_str())
}

pub fn is_true(conditions: &[Condition], type_: &str) -> bool {
    status(conditions, type_) == Some(STATUS_TRUE)
}

pub fn is_ready(conditions: &[Condition]) -> bool {
    is_true(conditions, READY)
}

/// Insert or replace a condition.  The transition time only moves when the
/// status changes.
pub fn set(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: &str,
    reason: &str,
    message: &str,
    generation: Option<i64>,
) {
    let now = Time(chrono::Utc::now());
    match conditions.iter_mut().find(|c| c.type_ == type_) {
        Some(existing) => {
            if existing.status != status {
                existing.last_transition_time = now;
            }
            existing.status = status.to_string();
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            existing.observed_generation = generation;
        }
        None => conditions.push(Condition {
            type_: type_.to_string(),
            status: status.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            observed_generation: generation,
            last_transition_time: now,
        }),
    }
}
