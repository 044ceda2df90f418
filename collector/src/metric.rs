use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Usage metrics the analytics API can be queried for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Interactions,
    TopIntents,
    UniqueUsers,
    CreditUsage,
    FunctionUsage,
    ApiCalls,
    KbDocuments,
    Integrations,
}

impl Metric {
    pub const ALL: [Metric; 8] = [
        Metric::Interactions,
        Metric::TopIntents,
        Metric::UniqueUsers,
        Metric::CreditUsage,
        Metric::FunctionUsage,
        Metric::ApiCalls,
        Metric::KbDocuments,
        Metric::Integrations,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Metric::Interactions => "interactions",
            Metric::TopIntents => "top_intents",
            Metric::UniqueUsers => "unique_users",
            Metric::CreditUsage => "credit_usage",
            Metric::FunctionUsage => "function_usage",
            Metric::ApiCalls => "api_calls",
            Metric::KbDocuments => "kb_documents",
            Metric::Integrations => "integrations",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("Invalid metric. Supported metrics: {}", supported_metrics())]
pub struct UnknownMetric;

impl FromStr for Metric {
    type Err = UnknownMetric;

    /// Case-insensitive, surrounding whitespace ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        Metric::ALL
            .into_iter()
            .find(|metric| metric.as_str() == normalized)
            .ok_or(UnknownMetric)
    }
}

pub fn supported_metrics() -> String {
    Metric::ALL.map(|m| m.as_str()).join(", ")
}

/// Every rejected entry of a metric list, reported together.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("Invalid metrics: {}. Supported metrics: {}", .invalid.join(", "), supported_metrics())]
pub struct InvalidMetrics {
    pub invalid: Vec<String>,
}

/// Parses a list of metric names.
///
/// Entries are trimmed and lower-cased, blanks dropped and duplicates
/// collapsed keeping first-seen order. Any unknown entry fails the whole list.
/// An empty result means the caller should fall back to its default set.
pub fn parse_metrics<S: AsRef<str>>(input: &[S]) -> Result<Vec<Metric>, InvalidMetrics> {
    let mut seen: Vec<String> = Vec::new();
    for entry in input {
        let normalized = entry.as_ref().trim().to_lowercase();
        if !normalized.is_empty() && !seen.contains(&normalized) {
            seen.push(normalized);
        }
    }

    let mut metrics = Vec::with_capacity(seen.len());
    let mut invalid = Vec::new();
    for name in seen {
        match name.parse::<Metric>() {
            Ok(metric) => metrics.push(metric),
            Err(UnknownMetric) => invalid.push(name),
        }
    }

    if !invalid.is_empty() {
        return Err(InvalidMetrics { invalid });
    }

    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_metric() {
        assert_eq!("  Top_Intents ".parse::<Metric>(), Ok(Metric::TopIntents));
        assert_eq!("bogus".parse::<Metric>(), Err(UnknownMetric));
    }

    #[test]
    fn test_parse_metrics_normalizes() {
        let metrics = parse_metrics(&["Interactions", " api_calls", "", "INTERACTIONS"]).unwrap();
        assert_eq!(metrics, vec![Metric::Interactions, Metric::ApiCalls]);
    }

    #[test]
    fn test_parse_metrics_empty_means_default() {
        assert_eq!(parse_metrics::<&str>(&[]).unwrap(), vec![]);
        assert_eq!(parse_metrics(&[" ", ""]).unwrap(), vec![]);
    }

    #[test]
    fn test_unknown_metric_fails_whole_list() {
        let err = parse_metrics(&["interactions", "bogus", "Nope", "bogus"]).unwrap_err();
        assert_eq!(err.invalid, vec!["bogus", "nope"]);
        assert_eq!(
            err.to_string(),
            "Invalid metrics: bogus, nope. Supported metrics: interactions, top_intents, \
             unique_users, credit_usage, function_usage, api_calls, kb_documents, integrations"
        );
    }

    #[test]
    fn test_serde_names_match_display() {
        for metric in Metric::ALL {
            let encoded = serde_json::to_value(metric).unwrap();
            assert_eq!(encoded, metric.as_str());
        }
    }
}
