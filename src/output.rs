use console::Style;

use crate::mutants::{MutantResult, MutationStatus};
use crate::report::MutationReport;
use crate::sandbox::ExecutionStatus;

pub fn print_error(msg: &str) {
    let style = Style::new().red().bold();
    eprintln!("{} {}", style.apply_to("✗"), msg);
}

pub fn print_success(msg: &str) {
    let style = Style::new().green().bold();
    println!("{} {}", style.apply_to("✓"), msg);
}

pub fn print_report(report: &MutationReport) {
    let score_pct = report.score * 100.0;
    let scored = report.killed + report.survived;
    let seconds = report.duration_ms as f64 / 1000.0;

    let failing: Vec<_> = report
        .tests
        .iter()
        .filter(|t| t.status != Some(ExecutionStatus::Passed))
        .collect();
    if !failing.is_empty() {
        let dim = Style::new().dim();
        for t in &failing {
            let status = t.status.map(|s| s.as_str()).unwrap_or("not run");
            println!("  {} test {} {} at baseline", dim.apply_to("·"), t.name, status);
        }
    }

    if report.survived == 0 {
        print_success(&format!(
            "{} mutants scored, all killed ({:.1}%) in {:.1}s",
            scored, score_pct, seconds
        ));
    } else {
        let style = Style::new().yellow().bold();
        println!(
            "{} {} survived / {} scored ({:.1}% killed) in {:.1}s",
            style.apply_to("!"),
            report.survived,
            scored,
            score_pct,
            seconds,
        );
    }

    let dim = Style::new().dim();
    if report.not_covered > 0 {
        println!("  {} {} mutants not covered by any test", dim.apply_to("·"), report.not_covered);
    }
    if report.compile_errors > 0 {
        println!("  {} {} mutants not scored (compile/baseline error)", dim.apply_to("·"), report.compile_errors);
    }
    if report.timed_out > 0 {
        println!("  {} {} mutants killed by timeout", dim.apply_to("·"), report.timed_out);
    }
    if report.crashed > 0 {
        println!("  {} {} mutants killed by crash", dim.apply_to("·"), report.crashed);
    }

    if report.survived == 0 {
        return;
    }
    println!();
    for (i, m) in report.survivors().enumerate() {
        let ref_style = Style::new().cyan().bold();
        let loc_style = Style::new().dim();
        println!(
            "  {} {}#{} {}",
            ref_style.apply_to(format!("@m{}", i + 1)),
            m.function,
            m.index,
            loc_style.apply_to(format!("[{}]", m.operator)),
        );
    }
}

pub fn print_mutant_detail(reference: &str, m: &MutantResult) {
    let ref_style = Style::new().cyan().bold();
    println!(
        "{} {}#{} [{}] {}",
        ref_style.apply_to(format!("@{}", reference.trim_start_matches('@'))),
        m.function,
        m.index,
        m.operator,
        m.status.as_str(),
    );
    println!();
    for line in m.diff.lines() {
        if line.starts_with('-') {
            println!("  {}", Style::new().red().apply_to(line));
        } else if line.starts_with('+') {
            println!("  {}", Style::new().green().apply_to(line));
        }
    }
    if m.status == MutationStatus::Killed {
        for kill in &m.killers {
            println!("  killed by {} ({})", kill.test, kill.status.as_str());
        }
    }
}

pub fn print_status(report: &MutationReport) {
    println!(
        "Last run: {} mutants, {} killed, {} survived, {} not covered ({:.1}% score)",
        report.total,
        report.killed,
        report.survived,
        report.not_covered,
        report.score * 100.0,
    );

    if report.survived > 0 {
        println!();
        for (i, m) in report.survivors().enumerate() {
            let ref_style = Style::new().cyan().bold();
            println!(
                "  {} {}#{} {}",
                ref_style.apply_to(format!("@m{}", i + 1)),
                m.function,
                m.index,
                m.operator,
            );
        }
        println!();
        println!("Use `irmut show @m1` for details on a specific mutant.");
    }
}
