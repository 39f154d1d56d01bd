// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Topic namespace and MQTT-style pattern matching.
//!
//! Every topic is rooted at `pioreactor/<unit>/<experiment>/…`. Job-scoped
//! topics add `/<job_name>/…` with the reserved leaves `$state`,
//! `$properties`, `<attr>/$settable`, `<attr>`, and `<attr>/set`.

use crate::identity::Ident;

/// Root segment of every topic in the fleet.
pub const ROOT: &str = "pioreactor";

/// Experiment-scoped topic: `pioreactor/<unit>/<experiment>/<leaf>`.
pub fn experiment_topic(ident: &Ident, leaf: &str) -> String {
    format!("{ROOT}/{}/{}/{leaf}", ident.unit, ident.experiment)
}

/// Job-scoped topic: `pioreactor/<unit>/<experiment>/<job>/<leaf>`.
pub fn job_topic(ident: &Ident, job_name: &str, leaf: &str) -> String {
    format!("{ROOT}/{}/{}/{job_name}/{leaf}", ident.unit, ident.experiment)
}

/// Retained lifecycle-state leaf for a job.
pub fn state_topic(ident: &Ident, job_name: &str) -> String {
    job_topic(ident, job_name, "$state")
}

/// Retained CSV of a job's editable settings.
pub fn properties_topic(ident: &Ident, job_name: &str) -> String {
    job_topic(ident, job_name, "$properties")
}

/// Retained current value of one editable setting.
pub fn attr_topic(ident: &Ident, job_name: &str, attr: &str) -> String {
    job_topic(ident, job_name, attr)
}

/// Retained settable flag for one editable setting.
pub fn settable_topic(ident: &Ident, job_name: &str, attr: &str) -> String {
    job_topic(ident, job_name, &format!("{attr}/$settable"))
}

/// Write-only command leaf for one editable setting.
pub fn set_topic(ident: &Ident, job_name: &str, attr: &str) -> String {
    job_topic(ident, job_name, &format!("{attr}/set"))
}

/// A parsed `…/<job>/<attr>/set` command topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingTopic {
    pub unit: String,
    pub experiment: String,
    pub job_name: String,
    pub attr: String,
}

/// Parse a setting-write topic. Returns `None` unless the topic has exactly
/// the six segments `pioreactor/<unit>/<experiment>/<job>/<attr>/set`.
/// A leading `$` on the attribute name is stripped.
pub fn parse_set_topic(topic: &str) -> Option<SettingTopic> {
    let parts: Vec<&str> = topic.split('/').collect();
    match parts.as_slice() {
        [ROOT, unit, experiment, job_name, attr, "set"] => Some(SettingTopic {
            unit: (*unit).to_string(),
            experiment: (*experiment).to_string(),
            job_name: (*job_name).to_string(),
            attr: attr.trim_start_matches('$').to_string(),
        }),
        _ => None,
    }
}

/// MQTT topic-filter matching: `+` matches one level, `#` (final level only)
/// matches the rest. `$broadcast` in a concrete topic is an ordinary segment.
pub fn matches(pattern: &str, topic: &str) -> bool {
    let mut filter = pattern.split('/');
    let mut levels = topic.split('/');

    loop {
        match (filter.next(), levels.next()) {
            (Some("#"), _) => return filter.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(p), Some(l)) if p == l => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// True when two topic filters can both match some concrete topic. Used by
/// the duplicate-subscription guard: two overlapping filters on the same
/// callback would double-fire it.
pub fn filters_overlap(a: &str, b: &str) -> bool {
    matches(a, b) || matches(b, a)
}

#[cfg(test)]
#[path = "topics_tests.rs"]
mod tests;
