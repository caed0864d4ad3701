//! Threshold expressions such as `p(95)<100` or `rate<0.01`.
use crate::ConfigError;
use std::fmt;
use std::str::FromStr;

/// Metrics a threshold can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricName {
    /// Request latency in milliseconds.
    HttpReqDuration,
    /// Completed requests.
    HttpReqs,
    /// Share of requests that failed at the HTTP level.
    HttpReqFailed,
    /// Share of requests whose checks failed.
    Errors,
    /// Fire events dropped because the pool was saturated.
    DroppedIterations,
}

impl MetricName {
    pub const ALL: [MetricName; 5] = [
        MetricName::HttpReqDuration,
        MetricName::HttpReqs,
        MetricName::HttpReqFailed,
        MetricName::Errors,
        MetricName::DroppedIterations,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::HttpReqDuration => "http_req_duration",
            MetricName::HttpReqs => "http_reqs",
            MetricName::HttpReqFailed => "http_req_failed",
            MetricName::Errors => "errors",
            MetricName::DroppedIterations => "dropped_iterations",
        }
    }

    pub fn supports(&self, aggregation: Aggregation) -> bool {
        use Aggregation::*;
        match self {
            MetricName::HttpReqDuration => {
                matches!(aggregation, Avg | Min | Max | Med | Percentile(_))
            }
            MetricName::HttpReqs | MetricName::DroppedIterations => {
                matches!(aggregation, Count | Rate)
            }
            MetricName::HttpReqFailed | MetricName::Errors => matches!(aggregation, Rate),
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricName {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricName::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownMetric(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    Avg,
    Min,
    Max,
    Med,
    /// Percentile in percent, e.g. `95.` for `p(95)`.
    Percentile(f64),
    Rate,
    Count,
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Avg => f.write_str("avg"),
            Aggregation::Min => f.write_str("min"),
            Aggregation::Max => f.write_str("max"),
            Aggregation::Med => f.write_str("med"),
            Aggregation::Percentile(p) => write!(f, "p({p})"),
            Aggregation::Rate => f.write_str("rate"),
            Aggregation::Count => f.write_str("count"),
        }
    }
}

impl FromStr for Aggregation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "avg" => Ok(Aggregation::Avg),
            "min" => Ok(Aggregation::Min),
            "max" => Ok(Aggregation::Max),
            "med" => Ok(Aggregation::Med),
            "rate" => Ok(Aggregation::Rate),
            "count" => Ok(Aggregation::Count),
            _ => {
                let inner = s
                    .strip_prefix("p(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .ok_or_else(|| format!("unknown aggregation `{s}`"))?;
                let percent: f64 = inner
                    .parse()
                    .map_err(|_| format!("invalid percentile `{inner}`"))?;
                if percent > 0. && percent <= 100. {
                    Ok(Aggregation::Percentile(percent))
                } else {
                    Err(format!("percentile {percent} is outside (0, 100]"))
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    pub fn holds(&self, observed: f64, bound: f64) -> bool {
        match self {
            Comparison::Lt => observed < bound,
            Comparison::Le => observed <= bound,
            Comparison::Gt => observed > bound,
            Comparison::Ge => observed >= bound,
            Comparison::Eq => observed == bound,
            Comparison::Ne => observed != bound,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Eq => "==",
            Comparison::Ne => "!=",
        }
    }

    /// Splits a leading operator off `s`, returning the operator and the remainder.
    fn split(s: &str) -> Option<(Self, &str)> {
        const OPERATORS: [(&str, Comparison); 6] = [
            ("<=", Comparison::Le),
            (">=", Comparison::Ge),
            ("==", Comparison::Eq),
            ("!=", Comparison::Ne),
            ("<", Comparison::Lt),
            (">", Comparison::Gt),
        ];
        OPERATORS
            .iter()
            .find_map(|(symbol, op)| s.strip_prefix(symbol).map(|rest| (*op, rest)))
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A pass/fail bound on one aggregated metric.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub metric: MetricName,
    pub aggregation: Aggregation,
    pub comparison: Comparison,
    pub bound: f64,
    /// The expression as written in the configuration.
    pub source: String,
}

impl Threshold {
    pub fn parse(metric: &str, expression: &str) -> Result<Self, ConfigError> {
        let metric_name: MetricName = metric.parse()?;
        let invalid = |reason: String| ConfigError::InvalidThreshold {
            metric: metric.to_string(),
            expression: expression.to_string(),
            reason,
        };

        let compact: String = expression.chars().filter(|c| !c.is_whitespace()).collect();
        let split_at = compact
            .find(['<', '>', '=', '!'])
            .ok_or_else(|| invalid("missing comparison operator".to_string()))?;
        let (lhs, rhs) = compact.split_at(split_at);

        let aggregation: Aggregation = lhs.parse().map_err(invalid)?;
        let (comparison, bound) =
            Comparison::split(rhs).ok_or_else(|| invalid(format!("bad operator in `{rhs}`")))?;
        let bound: f64 = bound
            .parse()
            .map_err(|_| invalid(format!("`{bound}` is not a number")))?;
        if !bound.is_finite() {
            return Err(invalid(format!("bound {bound} is not finite")));
        }

        if !metric_name.supports(aggregation) {
            return Err(ConfigError::UnsupportedAggregation {
                metric: metric.to_string(),
                aggregation: aggregation.to_string(),
            });
        }

        Ok(Self {
            metric: metric_name,
            aggregation,
            comparison,
            bound,
            source: expression.to_string(),
        })
    }

    pub fn passes(&self, observed: f64) -> bool {
        self.comparison.holds(observed, self.bound)
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.metric, self.source)
    }
}
