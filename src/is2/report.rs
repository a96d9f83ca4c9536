//! Bayes factors and table rendering for IS2 reports.

use comfy_table::{
    Attribute, Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED,
};

use super::types::Is2Report;

/// Kass-Raftery strength of evidence on the `2 ln BF` scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EvidenceStrength {
    /// `2 ln BF < 2`.
    Negligible,
    /// `2 <= 2 ln BF < 6`.
    Positive,
    /// `6 <= 2 ln BF < 10`.
    Strong,
    /// `2 ln BF >= 10`.
    VeryStrong,
}

/// Log Bayes factor of model `a` over model `b`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BayesFactor {
    pub log_bayes_factor: f64,
    /// `sqrt(se_a^2 + se_b^2)` from the two bootstrap standard errors.
    pub standard_error: f64,
}

impl BayesFactor {
    /// `true` when the first model is preferred.
    #[must_use]
    pub fn favours_first(&self) -> bool {
        self.log_bayes_factor > 0.0
    }

    /// Strength of evidence for whichever model is preferred.
    #[must_use]
    pub fn evidence(&self) -> EvidenceStrength {
        let scaled = 2.0 * self.log_bayes_factor.abs();
        if scaled >= 10.0 {
            EvidenceStrength::VeryStrong
        } else if scaled >= 6.0 {
            EvidenceStrength::Strong
        } else if scaled >= 2.0 {
            EvidenceStrength::Positive
        } else {
            EvidenceStrength::Negligible
        }
    }
}

/// Compare two independent IS2 estimates.
#[must_use]
pub fn compare_estimates(a: &Is2Report, b: &Is2Report) -> BayesFactor {
    BayesFactor {
        log_bayes_factor: a.log_marginal_likelihood - b.log_marginal_likelihood,
        standard_error: a.standard_error.hypot(b.standard_error),
    }
}

/// Render one report as a two-column summary table.
#[must_use]
pub fn render_report_table(report: &Is2Report) -> String {
    let diagnostics = &report.diagnostics;
    let mut table = make_table(&["quantity", "value"]);
    let rows = [
        (
            "log marginal likelihood",
            format!("{:.4}", report.log_marginal_likelihood),
        ),
        ("bootstrap SE", format!("{:.4}", report.standard_error)),
        (
            "95% bootstrap interval",
            format!("[{:.4}, {:.4}]", report.bootstrap.lower, report.bootstrap.upper),
        ),
        (
            "dropped bootstrap resamples",
            report.bootstrap.dropped_resamples.to_string(),
        ),
        ("subjects", diagnostics.subjects.to_string()),
        (
            "proposals (finite)",
            format!("{} ({})", diagnostics.proposals, diagnostics.finite_weights),
        ),
        (
            "particles per subject",
            diagnostics.particles_per_subject.to_string(),
        ),
        ("mixture components", diagnostics.components.to_string()),
        ("mixture fit attempts", diagnostics.fit_attempts.to_string()),
        (
            "effective sample size",
            format!("{:.1}", diagnostics.effective_sample_size),
        ),
        (
            "non-finite likelihoods",
            diagnostics.non_finite_likelihoods.to_string(),
        ),
        (
            "degenerate proposals",
            diagnostics.degenerate_proposals.to_string(),
        ),
        ("workers", diagnostics.workers.to_string()),
    ];
    for (name, value) in rows {
        table.add_row(vec![Cell::new(name), Cell::new(value)]);
    }
    table.to_string()
}

/// Render named reports side by side, highlighting the largest marginal
/// likelihood and showing each model's log Bayes factor against it.
#[must_use]
pub fn render_comparison_table(reports: &[(&str, &Is2Report)]) -> String {
    let mut table = make_table(&["model", "log ML", "SE", "ln BF vs best", "ESS"]);
    let best = reports
        .iter()
        .map(|(_, report)| report.log_marginal_likelihood)
        .fold(f64::NEG_INFINITY, f64::max);
    let best_report = reports
        .iter()
        .find(|(_, report)| report.log_marginal_likelihood >= best)
        .map(|(_, report)| *report);
    for (name, report) in reports {
        let is_best = report.log_marginal_likelihood >= best;
        let log_ml = format!("{:.3}", report.log_marginal_likelihood);
        let log_ml_cell = if is_best {
            Cell::new(log_ml)
                .fg(Color::Green)
                .add_attribute(Attribute::Bold)
        } else {
            Cell::new(log_ml)
        };
        let versus_best = best_report.map_or_else(String::new, |leader| {
            let factor = compare_estimates(report, leader);
            format!("{:.3} ± {:.3}", factor.log_bayes_factor, factor.standard_error)
        });
        table.add_row(vec![
            Cell::new(*name),
            log_ml_cell,
            Cell::new(format!("{:.3}", report.standard_error)),
            Cell::new(versus_best),
            Cell::new(format!("{:.1}", report.diagnostics.effective_sample_size)),
        ]);
    }
    table.to_string()
}

fn make_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.iter().map(|h| Cell::new(*h)).collect::<Vec<_>>());
    table
}
