//! Local cleanup applied to extracted markdown before the AI pass.
//!
//! Removes lines the extraction service passes through from page chrome so
//! they do not count toward the model's input budget.

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Archive link runs shorter than this are kept (likely real content).
const MIN_ARCHIVE_RUN: usize = 3;

/// Drop navigation and comment scaffolding lines, then collapse runs of
/// month-archive links.
pub fn strip_boilerplate(content: &str) -> String {
    let kept: Vec<&str> = content.lines().filter(|l| !is_chrome_line(l)).collect();

    let mut out: Vec<&str> = Vec::with_capacity(kept.len());
    let mut run: Vec<&str> = Vec::new();

    for line in kept {
        if is_archive_link(line) {
            run.push(line);
            continue;
        }
        flush_run(&mut out, &mut run);
        out.push(line);
    }
    flush_run(&mut out, &mut run);

    out.join("\n")
}

fn flush_run<'a>(out: &mut Vec<&'a str>, run: &mut Vec<&'a str>) {
    if run.len() < MIN_ARCHIVE_RUN {
        out.append(run);
    } else {
        run.clear();
    }
}

fn is_chrome_line(line: &str) -> bool {
    let t = line.trim();
    t.starts_with("[Skip to content]")
        || t.starts_with("[Skip to main content]")
        || t.starts_with("Email (Required)")
        || t.contains("Proudly powered by WordPress")
        || matches!(
            t,
            "Loading Comments..." | "Write a Comment..." | "%d" | "Menu" | "Share this:"
        )
}

/// `*   [Month YYYY](url)` as produced by blog archive widgets.
fn is_archive_link(line: &str) -> bool {
    let Some(rest) = line.trim().strip_prefix('*') else {
        return false;
    };
    let Some(label) = rest.trim_start().strip_prefix('[') else {
        return false;
    };
    MONTHS.iter().any(|month| {
        label
            .strip_prefix(month)
            .and_then(|after| after.strip_prefix(' '))
            .and_then(|after| after.get(..4))
            .is_some_and(|year| year.chars().all(|c| c.is_ascii_digit()))
    })
}
