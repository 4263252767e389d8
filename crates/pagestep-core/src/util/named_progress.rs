use indicatif::ProgressStyle;

/// Column width reserved for the label in front of every bar.
const LABEL_WIDTH: usize = 28;

/// Extension trait for creating labelled progress bars.
pub trait NamedProgress {
    /// Creates a progress bar style showing `name` in front of the bar.
    fn named_bar(name: &str) -> Self;

    /// Creates a progress bar style for sample loops, showing throughput
    /// instead of the remaining time.
    fn sample_bar(name: &str) -> Self;
}

fn padded(name: &str) -> String {
    format!("{:<width$}", name, width = LABEL_WIDTH)
}

impl NamedProgress for ProgressStyle {
    fn named_bar(name: &str) -> Self {
        let template = padded(name)
            + " {wide_bar:40.cyan/blue} {pos:>4}/{len:<4} [{elapsed_precise} ({eta} remaining)] {msg}";
        ProgressStyle::default_bar()
            .template(&template)
            .unwrap_or(ProgressStyle::default_bar())
    }

    fn sample_bar(name: &str) -> Self {
        let template =
            padded(name) + " {wide_bar:40.green/white} {pos:>4}/{len:<4} {per_sec} {msg}";
        ProgressStyle::default_bar()
            .template(&template)
            .unwrap_or(ProgressStyle::default_bar())
    }
}
