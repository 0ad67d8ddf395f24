use crate::engine::session::StatsSnapshot;
use crate::findings::Severity;
use crate::output::report::SessionReport;

fn marker(s: Severity) -> &'static str {
    match s {
        Severity::Critical => "[!]",
        Severity::High => "[!!]",
        Severity::Medium => "[i]",
        Severity::Low => "[·]",
        Severity::Info => "[*]",
    }
}

fn color(s: Severity) -> &'static str {
    match s {
        Severity::Critical => "\x1b[1;91m",
        Severity::High => "\x1b[1;33m",
        Severity::Medium => "\x1b[1;93m",
        Severity::Low => "\x1b[1;94m",
        Severity::Info => "\x1b[1;96m",
    }
}

const RESET: &str = "\x1b[0m";

/// Terminal summary printed after a session.
pub fn render_summary(report: &SessionReport, stats: &StatsSnapshot) -> String {
    let mut out = Vec::new();
    out.push("=".repeat(60));
    out.push(format!("              SESSION {} COMPLETE", report.session_id));
    out.push("=".repeat(60));

    out.push(String::new());
    out.push("[*] Summary:".into());
    out.push(format!("   Mode: {}", report.mode));
    out.push(format!("   Tests: {}", report.summary.total_tests));
    out.push(format!("   Pages crawled: {}", stats.pages_crawled));
    out.push(format!("   Candidates tried: {}", stats.candidates_tried));
    out.push(format!(
        "   Skipped: {} out of scope, {} over limits, {} duplicate",
        stats.out_of_scope, stats.limit_reached, stats.duplicates
    ));
    out.push(format!(
        "   Failed: {} network, {} tls, {} unclassifiable",
        stats.network_failures, stats.tls_failures, stats.logic_failures
    ));
    if stats.throttled > 0 {
        out.push(format!("   Throttled responses: {}", stats.throttled));
    }
    if let Some(l) = &stats.token_latency_ms {
        out.push(format!("   Token latency: min {}ms, max {}ms, mean {:.1}ms over {}", l.min, l.max, l.mean, l.attempts));
    }

    out.push(String::new());
    out.push("[*] Findings:".into());
    if report.findings.is_empty() {
        out.push("   [OK] Nothing reportable".into());
    }
    for f in &report.findings {
        out.push(format!(
            "   {}{} {:<8}{} {} x{} at {}",
            color(f.severity),
            marker(f.severity),
            format!("{:?}", f.severity).to_uppercase(),
            RESET,
            f.kind,
            f.count,
            f.endpoint
        ));
    }
    out.join("\n")
}

pub fn print_summary(report: &SessionReport, stats: &StatsSnapshot) {
    println!("\n{}\n", render_summary(report, stats));
}
