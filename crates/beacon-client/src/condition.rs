use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Mutex, RwLock};

use chrono::{NaiveTime, Timelike};

use beacon_common::net;

type ConditionHandler = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Evaluates routing conditions for the local/remote decision.
///
/// A condition evaluating **true** means the call goes to the remote
/// provider; **false** routes it to the local implementation. The built-in
/// forms are:
///
/// - empty string: true
/// - `booltrue` / `boolfalse`: fixed verdicts
/// - `timeHHMM-HHMM`: true while the local wall clock is inside the range,
///   inclusive at both ends, spanning midnight when start > end
/// - `ip<dotted-quad>`: true when this host owns the address (cached)
///
/// Custom prefixes can be registered per evaluator instance; they are
/// consulted after the built-ins. Anything unrecognized is false.
#[derive(Default)]
pub struct ConditionEvaluator {
    custom: RwLock<Vec<(String, ConditionHandler)>>,
    ip_cache: Mutex<HashMap<String, bool>>,
}

impl ConditionEvaluator {
    pub fn new() -> Self {
        ConditionEvaluator::default()
    }

    /// Registers a handler for conditions starting with `prefix`.
    pub fn register_handler<F>(&self, prefix: impl Into<String>, handler: F)
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        let prefix = prefix.into();
        tracing::info!(%prefix, "custom condition handler registered");
        let mut handlers = self.custom.write().unwrap();
        handlers.retain(|(existing, _)| existing != &prefix);
        handlers.push((prefix, Box::new(handler)));
    }

    pub fn remove_handler(&self, prefix: &str) {
        let mut handlers = self.custom.write().unwrap();
        handlers.retain(|(existing, _)| existing != prefix);
    }

    /// Evaluates a condition string against the current wall clock and this
    /// host's addresses.
    pub fn evaluate(&self, condition: &str) -> bool {
        let condition = condition.trim();
        if condition.is_empty() {
            return true;
        }

        if condition.starts_with("time") {
            return self.evaluate_time(condition, chrono::Local::now().time());
        }
        if condition.starts_with("ip") {
            return self.evaluate_ip(condition);
        }
        if condition == "booltrue" {
            return true;
        }
        if condition == "boolfalse" {
            return false;
        }

        let handlers = self.custom.read().unwrap();
        for (prefix, handler) in handlers.iter() {
            if condition.starts_with(prefix.as_str()) {
                tracing::debug!(condition, %prefix, "custom condition matched");
                return handler(condition);
            }
        }

        tracing::warn!(condition, "unrecognized condition, evaluating false");
        false
    }

    fn evaluate_time(&self, condition: &str, now: NaiveTime) -> bool {
        match parse_time_range(condition) {
            Some((start, end)) => {
                let inside = time_in_range(now, start, end);
                tracing::debug!(
                    condition,
                    now = %now.format("%H:%M:%S"),
                    inside,
                    "time condition evaluated"
                );
                inside
            }
            None => {
                tracing::warn!(condition, "malformed time condition, expected timeHHMM-HHMM");
                false
            }
        }
    }

    fn evaluate_ip(&self, condition: &str) -> bool {
        let target = &condition[2..];
        if target.parse::<Ipv4Addr>().is_err() {
            tracing::warn!(condition, "malformed ip condition");
            return false;
        }

        let mut cache = self.ip_cache.lock().unwrap();
        if let Some(cached) = cache.get(target) {
            return *cached;
        }
        let owned = net::is_local_address(target);
        cache.insert(target.to_string(), owned);
        tracing::debug!(target, owned, "ip condition evaluated and cached");
        owned
    }
}

/// Parses `timeHHMM-HHMM` into its endpoints, rejecting anything that is
/// not exactly four digits, a dash, four digits with valid hour/minute
/// values.
fn parse_time_range(condition: &str) -> Option<(NaiveTime, NaiveTime)> {
    let rest = condition.strip_prefix("time")?;
    let bytes = rest.as_bytes();
    if bytes.len() != 9 || bytes[4] != b'-' {
        return None;
    }
    if !rest[..4].bytes().all(|b| b.is_ascii_digit())
        || !rest[5..].bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }

    let start = parse_hhmm(&rest[..4])?;
    let end = parse_hhmm(&rest[5..])?;
    Some((start, end))
}

fn parse_hhmm(digits: &str) -> Option<NaiveTime> {
    let hour: u32 = digits[..2].parse().ok()?;
    let minute: u32 = digits[2..].parse().ok()?;
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Range membership with inclusive bounds at whole-minute resolution; a
/// start after the end means the range spans midnight.
fn time_in_range(now: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    // The upper bound is inclusive through the whole minute: 18:00:59
    // still counts as 18:00.
    let now = NaiveTime::from_hms_opt(now.hour(), now.minute(), 0).unwrap_or(now);
    if start > end {
        now >= start || now <= end
    } else {
        now >= start && now <= end
    }
}
