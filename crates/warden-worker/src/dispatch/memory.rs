//! Process memory figures from `/proc/self/status`.

use std::fs;
use std::io;

use warden_core::protocol::MemoryInfo;

const STATUS_PATH: &str = "/proc/self/status";

/// Reads the current process's memory figures.
pub(crate) fn read() -> io::Result<MemoryInfo> {
    fs::read_to_string(STATUS_PATH).map(|text| parse(&text))
}

/// Parses the status text; missing or malformed fields read as zero.
pub(crate) fn parse(text: &str) -> MemoryInfo {
    let mut info = MemoryInfo::default();
    for line in text.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let value = rest
            .split_whitespace()
            .next()
            .and_then(|number| number.parse::<u64>().ok())
            .unwrap_or_default();
        match key {
            "VmRSS" => info.vm_rss_kb = value,
            "VmHWM" => info.vm_hwm_kb = value,
            "VmSize" => info.vm_size_kb = value,
            "VmData" => info.vm_data_kb = value,
            "Threads" => info.threads = value,
            _ => {}
        }
    }
    info
}
