use crate::poller::{JobOutcome, JobReport, JobState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{self, Write};

/// The parts of a finished analytics result worth showing on a terminal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyticsResult {
    #[serde(default)]
    pub generation_date: Option<String>,
    #[serde(default)]
    pub building_location: Option<String>,
    #[serde(default)]
    pub building_space_type: Option<String>,
    #[serde(default)]
    pub building_gross_floor_area: Option<f64>,
    #[serde(default)]
    pub savings_target: Option<String>,
    #[serde(default)]
    pub min_model_r_squared: Option<f64>,
    #[serde(default)]
    pub assessment: Option<Assessment>,
    #[serde(default)]
    pub inverse_model: Option<HashMap<String, Option<ModelFit>>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Assessment {
    #[serde(default)]
    pub ee_measures: Option<Vec<String>>,
    #[serde(default)]
    pub assessment_results: Option<AssessmentResults>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssessmentResults {
    #[serde(default)]
    pub energy_savings_combined: Option<f64>,
    #[serde(default)]
    pub energy_savings_pct_combined: Option<f64>,
    #[serde(default)]
    pub cost_savings_combined: Option<f64>,
    #[serde(default)]
    pub cost_savings_pct_combined: Option<f64>,
    #[serde(default)]
    pub ghg_savings_combined: Option<f64>,
    #[serde(default)]
    pub ghg_reductions_pct_combined: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelFit {
    #[serde(default)]
    pub r2: Option<f64>,
    #[serde(default)]
    pub cvrmse: Option<f64>,
}

/// Human-readable account of one job run, whatever state it ended in.
pub struct AnalysisSummary<'a> {
    report: &'a JobReport,
}

impl<'a> AnalysisSummary<'a> {
    pub fn new(report: &'a JobReport) -> Self {
        Self { report }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = self.write_to(&mut out);
        out
    }

    fn write_to(&self, out: &mut String) -> fmt::Result {
        let report = self.report;
        writeln!(out, "--- Analysis Summary for Building ID: {} ---", report.building_id)?;

        let snapshot = match &report.outcome {
            JobOutcome::Rejected(error) => {
                writeln!(out, "Analysis could not be started.")?;
                writeln!(out, "  Error: {}", error)?;
                return Ok(());
            }
            JobOutcome::NoDataObtained => {
                writeln!(out, "Analysis data is unavailable ({}).", report.state)?;
                match &report.last_error {
                    Some(error) => writeln!(out, "  Error: {}", error)?,
                    None => writeln!(out, "  No status was obtained.")?,
                }
                return Ok(());
            }
            JobOutcome::Snapshot(snapshot) => snapshot,
        };

        if report.state != JobState::Complete {
            writeln!(out, "Analysis Status: {} ({})", report.state, snapshot.generation_result())?;
            writeln!(out, "  Message: {}", snapshot.generation_message().unwrap_or("N/A"))?;
            if report.state == JobState::TimedOut {
                if let Some(error) = &report.last_error {
                    writeln!(out, "  Last error: {}", error)?;
                }
            }
            return Ok(());
        }

        let result: AnalyticsResult = match serde_json::from_value(snapshot.payload().clone()) {
            Ok(result) => result,
            Err(e) => {
                writeln!(out, "  Result payload could not be decoded: {}", e)?;
                return Ok(());
            }
        };

        writeln!(out, "  Analysis Generation Date: {}", text(&result.generation_date))?;
        writeln!(out, "  Building Location: {}", text(&result.building_location))?;
        writeln!(out, "  Building Space Type: {}", text(&result.building_space_type))?;
        writeln!(out, "  Gross Floor Area: {} sqm", number(result.building_gross_floor_area))?;
        writeln!(out, "  Savings Target Used: {}", text(&result.savings_target))?;
        writeln!(out, "  Min R-Squared Used: {}", number(result.min_model_r_squared))?;

        let assessment = result.assessment.unwrap_or_default();
        let results = assessment.assessment_results.unwrap_or_default();

        writeln!(out)?;
        writeln!(out, "  Key Assessment Results:")?;
        match assessment.ee_measures {
            Some(measures) if !measures.is_empty() => {
                writeln!(out, "    Recommended EE Measures: {}", measures.join(", "))?
            }
            _ => writeln!(out, "    Recommended EE Measures: N/A or not provided")?,
        }
        writeln!(
            out,
            "    Combined Energy Savings: {} kWh ({}%)",
            number(results.energy_savings_combined),
            number(results.energy_savings_pct_combined)
        )?;
        writeln!(
            out,
            "    Combined Cost Savings: {} Currency ({}%)",
            number(results.cost_savings_combined),
            number(results.cost_savings_pct_combined)
        )?;
        writeln!(
            out,
            "    Combined GHG Reductions: {} kg ({}%)",
            number(results.ghg_savings_combined),
            number(results.ghg_reductions_pct_combined)
        )?;

        writeln!(out)?;
        writeln!(out, "  Model Fit:")?;
        let models = result.inverse_model.unwrap_or_default();
        for (key, label) in [("ELECTRICITY", "Electricity"), ("FOSSIL_FUEL", "Fossil Fuel")] {
            if let Some(Some(fit)) = models.get(key) {
                writeln!(out, "    {} Model R-squared: {}", label, number(fit.r2))?;
                writeln!(out, "    {} Model CVRMSE: {}", label, number(fit.cvrmse))?;
            }
        }

        Ok(())
    }
}

impl fmt::Display for AnalysisSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn text(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("N/A")
}

fn number(value: Option<f64>) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| v.to_string())
}
