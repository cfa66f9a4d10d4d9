//! Terminal rendering of aggregated reports

use parley_core::AggregatedReport;

/// Print a report for humans
pub fn print_report(report: &AggregatedReport) {
    println!();
    println!("  Job {}", report.job_id);
    println!("  {}", "-".repeat(72));
    println!("  {}", report.consensus_summary);

    if !report.consensus.is_empty() {
        println!();
        println!("  Agreed");
        for point in &report.consensus {
            println!("   ✓ {} [{}]", point.statement, point.services.join(", "));
        }
    }

    if !report.disagreements.is_empty() {
        println!();
        println!("  Disputed");
        for disagreement in &report.disagreements {
            println!("   ⚠ {}", disagreement.topic);
            for position in &disagreement.positions {
                println!("       {} [{}]", position.statement, position.services.join(", "));
            }
        }
    }

    if !report.attributed.is_empty() {
        println!();
        println!("  Single-source");
        for point in &report.attributed {
            println!("   • {} [{}]", point.statement, point.service_id);
        }
    }

    println!();
    println!("  {:<16} {:<12} {:<10} {:<8} Summary", "Service", "Category", "Parse", "Conf.");
    println!("  {}", "-".repeat(72));
    for response in report.per_service_responses.iter().filter(|r| r.is_success()) {
        let parse = match response.parse_mode {
            parley_core::ParseMode::StructuredParsed => "json",
            parley_core::ParseMode::FallbackHeuristic => "heuristic",
        };
        println!(
            "  {:<16} {:<12} {:<10} {:<8.2} {}",
            response.service_id,
            response.category.as_str(),
            parse,
            response.confidence,
            truncate(&response.summary, 60)
        );
    }

    for failure in &report.failures {
        println!(
            "  {:<16} ✗ {} after {} attempt(s)",
            failure.service_id, failure.outcome, failure.attempts
        );
    }
    println!();
}

/// Shorten to `max` characters with an ellipsis
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut short: String = text.chars().take(max.saturating_sub(1)).collect();
    short.push('…');
    short
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_counts_characters() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("déjà vu again", 5), "déjà…");
    }
}
