//! Linux free-memory reader backed by `/proc/meminfo`.

const MEMINFO_PATH: &str = "/proc/meminfo";

/// Reads `MemAvailable` from `/proc/meminfo` in bytes.
///
/// Returns 0 if the file is unreadable or the field is missing.
pub fn read_available_memory() -> u64 {
    match std::fs::read_to_string(MEMINFO_PATH) {
        Ok(content) => parse_available(&content).unwrap_or(0),
        Err(e) => {
            tracing::warn!(path = MEMINFO_PATH, "failed to read meminfo: {e}");
            0
        }
    }
}

/// Finds the `MemAvailable` line in meminfo content, returns bytes.
fn parse_available(content: &str) -> Option<u64> {
    content
        .lines()
        .find_map(|line| parse_meminfo_kb(line, "MemAvailable:"))
        .map(|kb| kb.saturating_mul(1024))
}

/// Parses a line from `/proc/meminfo` matching a prefix, returns value in kB.
fn parse_meminfo_kb(line: &str, prefix: &str) -> Option<u64> {
    let rest = line.strip_prefix(prefix)?;
    rest.split_whitespace().next().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "MemTotal:       16000000 kB\n\
                          MemFree:         1200000 kB\n\
                          MemAvailable:    8000000 kB\n\
                          Buffers:          300000 kB\n";

    #[test]
    fn parse_available_from_sample() {
        assert_eq!(parse_available(SAMPLE), Some(8_000_000 * 1024));
    }

    #[test]
    fn parse_available_missing_field() {
        assert_eq!(parse_available("MemTotal: 100 kB\nMemFree: 50 kB\n"), None);
    }

    #[test]
    fn parse_meminfo_kb_valid() {
        assert_eq!(
            parse_meminfo_kb("MemAvailable:   8000000 kB", "MemAvailable:"),
            Some(8000000)
        );
    }

    #[test]
    fn parse_meminfo_kb_mismatch() {
        assert_eq!(
            parse_meminfo_kb("MemTotal:       16000000 kB", "MemAvailable:"),
            None
        );
    }

    #[test]
    fn parse_meminfo_kb_garbage_value() {
        assert_eq!(parse_meminfo_kb("MemAvailable: lots kB", "MemAvailable:"), None);
    }

    #[test]
    fn read_available_memory_on_host() {
        // Any Linux host running the tests has some memory available.
        assert!(read_available_memory() > 0);
    }
}
