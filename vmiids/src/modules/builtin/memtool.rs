// src/modules/builtin/memtool.rs

//! Adapter for the memory-forensics tool's text output.
//!
//! The tool prints fixed-width tables framed by its `>>>` prompt. Everything
//! that depends on column offsets stays in this file.

use std::collections::BTreeMap;

use serde::Serialize;

/// Header lines preceding the first row of the task list.
const TASKLIST_HEADER_LINES: usize = 2;
const PID_COLUMN: std::ops::Range<usize> = 5..13;
const NAME_COLUMN: std::ops::Range<usize> = 23..40;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuestProcess {
    pub pid: u32,
    pub name: String,
}

/// Text between the line holding the first `>>>` prompt and the last `>>>`.
/// Empty if the tool never printed a prompt.
pub fn extract_script_output(raw: &str) -> &str {
    let (Some(first), Some(last)) = (raw.find(">>>"), raw.rfind(">>>")) else {
        return "";
    };
    let start = match raw[first..].find('\n') {
        Some(nl) => first + nl + 1,
        None => return "",
    };
    if start >= last {
        return "";
    }
    &raw[start..last]
}

/// Parse the task list produced by `tasklist.js`, keyed by pid.
///
/// Only newline-terminated rows are considered; rows too short to reach the
/// name column are skipped.
pub fn parse_process_list(script_output: &str) -> BTreeMap<u32, GuestProcess> {
    let mut processes = BTreeMap::new();
    let Some(complete) = script_output.rfind('\n').map(|end| &script_output[..end + 1]) else {
        return processes;
    };

    for line in complete.lines().skip(TASKLIST_HEADER_LINES) {
        let bytes = line.as_bytes();
        if bytes.len() <= NAME_COLUMN.start {
            continue;
        }
        let pid = leading_int(&bytes[PID_COLUMN]);
        let name_end = NAME_COLUMN.end.min(bytes.len());
        let raw_name = String::from_utf8_lossy(&bytes[NAME_COLUMN.start..name_end]);
        let name = raw_name.split('"').next().unwrap_or_default().to_owned();
        processes.insert(pid, GuestProcess { pid, name });
    }
    processes
}

/// `atoi` semantics: optional leading blanks, then digits up to the first
/// non-digit. Anything unparseable is 0.
fn leading_int(field: &[u8]) -> u32 {
    field
        .iter()
        .skip_while(|b| b.is_ascii_whitespace())
        .take_while(|b| b.is_ascii_digit())
        .fold(0u32, |acc, b| acc.wrapping_mul(10).wrapping_add(u32::from(b - b'0')))
}
