//! Parses a trace/tweak specification string and applies it to the
//! recorder and tweak registries.
//!
//! Bootstrapping from environment variables (`RECORDER_TRACES` and
//! friends) is arguably an external collaborator's job, but reading them
//! is mechanical enough that this module folds it in here rather than
//! leaving every embedder to reimplement it.

use crate::dump::BackgroundDumper;
use crate::event::ARGS;
use crate::recorder::{self, Recorder};
use crate::shm::{self, ChanHandle, ChansFile};
use crate::tweak;
use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;

/// Default ring capacity for a recorder the config protocol creates on its
/// own behalf (there is none today, recorders are created by instrumented
/// code, but export channels reuse it as their embedded ring's sample
/// count).
pub const RING_DEFAULT: u64 = 1024;
/// A smaller preset, for export channels where a deep history is not
/// useful (e.g. a coarse health counter).
pub const RING_SMALL: u64 = 64;

/// Outcome of applying a configuration string.
/// `apply` keeps parsing remaining items even after the first error; the
/// returned status is whichever error was seen first, or `Ok` if none was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigStatus {
    Ok,
    InvalidName,
    InvalidValue,
}

/// Applies a colon/space-separated configuration spec. A null (empty)
/// input is a no-op returning `Ok`.
pub fn apply(spec: &str) -> ConfigStatus {
    tweak::register_builtins();
    let mut status = ConfigStatus::Ok;
    for token in tokenize(spec) {
        let item_status = apply_item(token);
        if item_status != ConfigStatus::Ok {
            log::warn!("configuration item {token:?} rejected: {item_status:?}");
            if status == ConfigStatus::Ok {
                status = item_status;
            }
        }
    }
    status
}

fn tokenize(spec: &str) -> impl Iterator<Item = &str> {
    spec.split(|c: char| c == ':' || c.is_whitespace()).filter(|s| !s.is_empty())
}

fn apply_item(token: &str) -> ConfigStatus {
    let lower = token.to_ascii_lowercase();
    if lower == "help" || lower == "list" {
        print_registries();
        return ConfigStatus::Ok;
    }

    if let Some(eq) = token.find('=') {
        let name_part = &token[..eq];
        let value_part = &token[eq + 1..];

        if name_part.eq_ignore_ascii_case("share") {
            return match shm::set_share_path(value_part) {
                Ok(_) => ConfigStatus::Ok,
                Err(_) => ConfigStatus::InvalidValue,
            };
        }

        let pattern = expand_all(name_part);
        let re = match compile_pattern(&pattern) {
            Ok(re) => re,
            Err(_) => return ConfigStatus::InvalidName,
        };

        if value_part.is_empty() {
            return ConfigStatus::InvalidValue;
        }
        if let Ok(n) = value_part.parse::<i64>() {
            apply_numeric(&re, n);
            ConfigStatus::Ok
        } else if starts_numeric(value_part) {
            // Numeric prefix with a non-numeric tail (e.g. "12abc") is a
            // malformed integer, not an export label.
            ConfigStatus::InvalidValue
        } else {
            apply_export(&re, value_part)
        }
    } else {
        let pattern = expand_all(token);
        let re = match compile_pattern(&pattern) {
            Ok(re) => re,
            Err(_) => return ConfigStatus::InvalidName,
        };
        apply_numeric(&re, 1);
        ConfigStatus::Ok
    }
}

/// True if `s` begins with a digit or sign, the `strtol`-style test for
/// "this was meant to be an integer". Used to reject a numeric prefix with
/// a non-numeric tail (`12abc`) as malformed rather than silently treating
/// it as an export label list.
fn starts_numeric(s: &str) -> bool {
    matches!(s.as_bytes().first(), Some(b'0'..=b'9' | b'+' | b'-'))
}

fn expand_all(name: &str) -> String {
    if name.eq_ignore_ascii_case("all") {
        ".*".to_string()
    } else {
        name.to_string()
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("(?i)^(?:{pattern})$"))
}

fn apply_numeric(re: &Regex, value: i64) {
    recorder::for_each(|r| {
        if re.is_match(r.name) {
            r.set_trace(value);
        }
    });
    tweak::for_each(|t| {
        if re.is_match(t.name) {
            t.set(value);
        }
    });
}

fn apply_export(re: &Regex, labels_spec: &str) -> ConfigStatus {
    let labels: Vec<&str> = labels_spec.split(',').filter(|s| !s.is_empty()).collect();
    if labels.is_empty() {
        return ConfigStatus::InvalidValue;
    }

    let mut matched: Vec<&'static Recorder> = Vec::new();
    recorder::for_each(|r| {
        if re.is_match(r.name) {
            matched.push(r);
        }
    });
    if matched.is_empty() {
        return ConfigStatus::Ok;
    }

    let chans = match shm::active_or_create_default() {
        Ok(chans) => chans,
        Err(_) => return ConfigStatus::InvalidValue,
    };
    let disambiguate = matched.len() > 1;

    for r in matched {
        for (i, label) in labels.iter().enumerate().take(ARGS) {
            if r.is_exported(i) {
                continue;
            }
            let chan_name = if disambiguate { format!("{}/{}", r.name, label) } else { (*label).to_string() };
            if let Some(handle) = find_or_create_channel(&chans, &chan_name, r.description) {
                r.export(i, &chans, handle);
            }
        }
    }
    ConfigStatus::Ok
}

fn find_or_create_channel(chans: &Arc<ChansFile>, name: &str, desc: &str) -> Option<ChanHandle> {
    if let Some(found) = ChanHandle::find(chans, name) {
        return Some(found);
    }
    ChanHandle::new_channel(chans, name, desc, "", 0.0, 0.0, RING_SMALL).ok()
}

fn print_registries() {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let _ = writeln!(out, "recorders:");
    recorder::for_each(|r| {
        let _ = writeln!(out, "  {:<32} active={} {}", r.name, i64::from(r.trace() != 0), r.description);
    });
    let _ = writeln!(out, "tweaks:");
    tweak::for_each(|t| {
        let v = t.get();
        let _ = writeln!(out, "  {:<32} dec={:<12} hex={:#x} {}", t.name, v, v, t.help);
    });
}

/// Reads `RECORDER_SHARE`, `RECORDER_TRACES`, `RECORDER_TWEAKS`, and
/// `RECORDER_DUMP` and applies them in that order. If `RECORDER_DUMP`
/// is set, spawns and returns a running [`BackgroundDumper`]; the caller
/// owns its lifetime and should call `stop()` on shutdown.
pub fn bootstrap_from_env() -> Option<Arc<BackgroundDumper>> {
    tweak::register_builtins();

    if let Ok(path) = std::env::var("RECORDER_SHARE") {
        let _ = shm::set_share_path(path);
    }
    if let Ok(spec) = std::env::var("RECORDER_TRACES") {
        let _ = apply(&spec);
    }
    if let Ok(spec) = std::env::var("RECORDER_TWEAKS") {
        let _ = apply(&spec);
    }
    if let Ok(pattern) = std::env::var("RECORDER_DUMP") {
        let dumper = Arc::new(BackgroundDumper::new(pattern));
        let handle = Arc::clone(&dumper);
        std::thread::spawn(move || handle.run());
        Some(dumper)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_sets_trace_to_one() {
        let r = Recorder::create_and_register("config.test.bare", "", 4);
        assert_eq!(apply("config\\.test\\.bare"), ConfigStatus::Ok);
        assert_eq!(r.trace(), 1);
    }

    #[test]
    fn numeric_value_sets_trace_and_tweak() {
        let r = Recorder::create_and_register("config.test.numeric", "", 4);
        assert_eq!(apply("config\\.test\\.numeric=7"), ConfigStatus::Ok);
        assert_eq!(r.trace(), 7);

        tweak::register_builtins();
        assert_eq!(apply("recorder_dump_sleep=250"), ConfigStatus::Ok);
        assert_eq!(tweak::RECORDER_DUMP_SLEEP.get(), 250);
        tweak::RECORDER_DUMP_SLEEP.set(100);
    }

    #[test]
    fn s5_all_is_idempotent() {
        let r = Recorder::create_and_register("config.test.s5", "", 4);
        assert_eq!(apply("all=1"), ConfigStatus::Ok);
        assert!(r.trace() != 0);
        assert_eq!(apply("all=0"), ConfigStatus::Ok);
        assert_eq!(r.trace(), 0);
    }

    #[test]
    fn bad_pattern_reports_invalid_name() {
        assert_eq!(apply("(unclosed=1"), ConfigStatus::InvalidName);
    }

    #[test]
    fn numeric_prefix_with_trailing_garbage_is_invalid_value() {
        let r = Recorder::create_and_register("config.test.leftover", "", 4);
        assert_eq!(apply("config\\.test\\.leftover=12abc"), ConfigStatus::InvalidValue);
        assert!(!r.is_exported(0));
        assert_eq!(r.trace(), 0);
    }

    #[test]
    fn full_match_regex_rejects_prefix_only_match() {
        let r = Recorder::create_and_register("config.test.fullmatch.extra", "", 4);
        // "config.test.fullmatch" must NOT match the longer recorder name.
        assert_eq!(apply("config\\.test\\.fullmatch=1"), ConfigStatus::Ok);
        assert_eq!(r.trace(), 0);
    }

    #[test]
    fn export_allocates_a_channel_and_sets_chan_magic() {
        let dir = std::env::temp_dir().join(format!("recorder_test_share_{}", std::process::id()));
        let _ = shm::set_share_path(&dir);

        let r = Recorder::create_and_register("config.test.export", "", 4);
        assert_eq!(apply("config\\.test\\.export=myval"), ConfigStatus::Ok);
        assert!(r.is_exported(0));
        assert_eq!(r.trace(), crate::recorder::CHAN_MAGIC);

        let _ = std::fs::remove_file(&dir);
    }
}
