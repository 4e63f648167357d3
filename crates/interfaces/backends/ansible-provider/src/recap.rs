//! PLAY RECAP parsing
//!
//! The recap block is the runner's summary of what actually happened
//! on each host. Lines look like:
//!
//! ```text
//! PLAY RECAP *********************************************************
//! web1    : ok=5    changed=2    unreachable=0    failed=0    skipped=1
//! ```
//!
//! Counts we do not track (skipped, rescued, ignored) are parsed over
//! and dropped.

use serde::{Deserialize, Serialize};

/// Per-host counts parsed from a PLAY RECAP block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecap {
    /// Host name as the inventory knows it
    pub host: String,
    /// Tasks that ran cleanly
    pub ok: u32,
    /// Tasks that changed the host
    pub changed: u32,
    /// The host could not be reached at all
    pub unreachable: u32,
    /// Tasks that failed
    pub failed: u32,
}

impl HostRecap {
    /// Recap with zero counts
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ok: 0,
            changed: 0,
            unreachable: 0,
            failed: 0,
        }
    }

    /// Whether this host makes the run a failure
    pub fn is_failed(&self) -> bool {
        self.failed > 0 || self.unreachable > 0
    }
}

/// Parse every host line of the PLAY RECAP block in `output`
///
/// Returns an empty vec when no recap is present, which callers treat
/// as "fall back to the exit code".
pub fn parse_recap(output: &str) -> Vec<HostRecap> {
    let mut hosts = Vec::new();
    let mut in_recap = false;

    for line in output.lines() {
        if line.trim_start().starts_with("PLAY RECAP") {
            in_recap = true;
            continue;
        }
        if !in_recap {
            continue;
        }

        let Some((host_part, counts_part)) = line.split_once(':') else {
            continue;
        };
        let host = host_part.trim();
        if host.is_empty() {
            continue;
        }

        let mut recap = HostRecap::new(host);
        let mut matched = false;
        for token in counts_part.split_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            let Ok(count) = value.parse::<u32>() else {
                continue;
            };
            matched = true;
            match key {
                "ok" => recap.ok = count,
                "changed" => recap.changed = count,
                "unreachable" => recap.unreachable = count,
                "failed" => recap.failed = count,
                _ => {}
            }
        }
        if matched {
            hosts.push(recap);
        }
    }

    hosts
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLEAN_RUN: &str = "\
PLAY [all] *********************************************************************

TASK [Gathering Facts] *********************************************************
ok: [web1]
ok: [db1]

PLAY RECAP *********************************************************************
web1                       : ok=5    changed=2    unreachable=0    failed=0    skipped=1    rescued=0    ignored=0
db1                        : ok=4    changed=1    unreachable=0    failed=0    skipped=0    rescued=0    ignored=0
";

    const FAILED_RUN: &str = "\
PLAY RECAP *********************************************************************
web1                       : ok=3    changed=1    unreachable=0    failed=2    skipped=0    rescued=0    ignored=0
db1                        : ok=0    changed=0    unreachable=1    failed=0    skipped=0    rescued=0    ignored=0
";

    #[test]
    fn test_parses_all_hosts() {
        let hosts = parse_recap(CLEAN_RUN);
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].host, "web1");
        assert_eq!(hosts[0].ok, 5);
        assert_eq!(hosts[0].changed, 2);
        assert_eq!(hosts[1].host, "db1");
        assert_eq!(hosts[1].ok, 4);
        assert!(!hosts[0].is_failed());
    }

    #[test]
    fn test_failed_and_unreachable_hosts() {
        let hosts = parse_recap(FAILED_RUN);
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].failed, 2);
        assert!(hosts[0].is_failed());
        assert_eq!(hosts[1].unreachable, 1);
        assert!(hosts[1].is_failed(), "unreachable counts as failure");
    }

    #[test]
    fn test_no_recap_yields_empty() {
        assert!(parse_recap("TASK [setup] ***\nok: [web1]\n").is_empty());
        assert!(parse_recap("").is_empty());
    }

    #[test]
    fn test_lines_before_recap_are_ignored() {
        let output = "web1 : ok=9 changed=9 failed=9\nPLAY RECAP ****\nweb1 : ok=1 changed=0 unreachable=0 failed=0\n";
        let hosts = parse_recap(output);
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].ok, 1);
    }
}
