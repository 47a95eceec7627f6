use std::time::Duration;

use crate::report::ScanReport;

/// Human duration, e.g. `4.2s` or `3m 12s`.
pub fn format_duration(d: Duration) -> String {
    // round once, then split, so 119.7s reads 2m 0s
    let millis = d.as_millis();
    let tenths = (millis + 50) / 100;
    if tenths < 600 {
        format!("{}.{}s", tenths / 10, tenths % 10)
    } else {
        let secs = (millis + 500) / 1000;
        format!("{}m {}s", secs / 60, secs % 60)
    }
}

/// Per-module failure lines, worst first. Empty when nothing failed.
pub fn format_failure_summary(report: &ScanReport) -> String {
    let mut failing: Vec<_> = report
        .module_stats
        .iter()
        .filter(|(_, s)| s.failed > 0 || s.setup_error.is_some() || s.backpressure_stalls > 0)
        .collect();
    failing.sort_by(|a, b| b.1.failed.cmp(&a.1.failed).then_with(|| a.0.cmp(b.0)));

    let mut output = String::new();
    for (name, stats) in failing {
        if let Some(err) = &stats.setup_error {
            output.push_str(&format!("• {name}: disabled, setup failed: {err}\n"));
            continue;
        }
        if stats.failed > 0 {
            output.push_str(&format!(
                "• {name}: {} of {} invocations failed",
                stats.failed,
                stats.failed + stats.handled
            ));
            if let Some(last) = &stats.last_error {
                output.push_str(&format!(" (last: {last})"));
            }
            output.push('\n');
        }
        if stats.backpressure_stalls > 0 {
            output.push_str(&format!(
                "• {name}: queue saturated {} time(s)\n",
                stats.backpressure_stalls
            ));
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_short_and_long_durations() {
        assert_eq!(format_duration(Duration::from_millis(4200)), "4.2s");
        assert_eq!(format_duration(Duration::from_secs(192)), "3m 12s");
    }

    #[test]
    fn rounding_carries_into_the_next_unit() {
        assert_eq!(format_duration(Duration::from_millis(119_700)), "2m 0s");
        assert_eq!(format_duration(Duration::from_millis(59_960)), "1m 0s");
        assert_eq!(format_duration(Duration::from_millis(59_940)), "59.9s");
        assert_eq!(format_duration(Duration::from_millis(60_400)), "1m 0s");
        assert_eq!(format_duration(Duration::ZERO), "0.0s");
    }
}
