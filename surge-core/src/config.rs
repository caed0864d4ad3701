use crate::{
    ConfigError, Stage, Threshold, ACCEPTED_STATUS, DEFAULT_BACKLOG, DEFAULT_GRACEFUL_STOP,
    DEFAULT_PRE_ALLOCATED_VUS, DEFAULT_PROGRESS_INTERVAL, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_TIME_UNIT,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Everything needed to plan a run. Field names follow the k6 `options` object so existing
/// scripts translate one to one.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    pub scenarios: BTreeMap<String, ScenarioConfig>,

    /// Metric name to a list of expressions such as `p(95)<100`.
    #[serde(default)]
    pub thresholds: BTreeMap<String, Vec<String>>,

    /// Hard cap on the run. Defaults to the end of the last scenario plus its grace period.
    #[serde(default, with = "human_duration::option")]
    pub max_duration: Option<Duration>,

    #[serde(default = "default_progress_interval", with = "human_duration")]
    pub progress_interval: Duration,
}

impl RunConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn thresholds(&self) -> Result<Vec<Threshold>, ConfigError> {
        let mut thresholds = vec![];
        for (metric, expressions) in &self.thresholds {
            for expression in expressions {
                thresholds.push(Threshold::parse(metric, expression)?);
            }
        }
        Ok(thresholds)
    }

    /// The ingestion profile: a two minute warm-up to 2k events/s, a ten-fold spike and a
    /// cool-down, judged on p95/p99 latency and the error rate.
    pub fn ingestion() -> Self {
        let stages = [
            (60, 2_000.),
            (180, 2_000.),
            (15, 20_000.),
            (30, 20_000.),
            (30, 2_000.),
            (120, 2_000.),
            (30, 0.),
        ]
        .into_iter()
        .map(|(secs, target)| StageConfig {
            duration: Duration::from_secs(secs),
            target,
        })
        .collect();

        let scenario = ScenarioConfig {
            pre_allocated_vus: 1_000,
            max_vus: Some(5_000),
            ..ScenarioConfig::new(ExecutorConfig::RampingArrivalRate {
                start_rate: 0.,
                stages,
            })
        };

        Self {
            scenarios: BTreeMap::from([("ingestion_test".to_string(), scenario)]),
            thresholds: BTreeMap::from([
                (
                    "http_req_duration".to_string(),
                    vec!["p(95)<60".to_string(), "p(99)<150".to_string()],
                ),
                ("errors".to_string(), vec!["rate<0.01".to_string()]),
            ]),
            max_duration: None,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioConfig {
    #[serde(flatten)]
    pub executor: ExecutorConfig,

    /// Rates are expressed per `time_unit`.
    #[serde(default = "default_time_unit", with = "human_duration")]
    pub time_unit: Duration,

    #[serde(rename = "preAllocatedVUs", default = "default_pre_allocated_vus")]
    pub pre_allocated_vus: usize,

    /// Defaults to `pre_allocated_vus`.
    #[serde(rename = "maxVUs", default)]
    pub max_vus: Option<usize>,

    /// Offset from the start of the run.
    #[serde(default, with = "human_duration")]
    pub start_time: Duration,

    #[serde(default = "default_graceful_stop", with = "human_duration")]
    pub graceful_stop: Duration,

    #[serde(default = "default_request_timeout", with = "human_duration")]
    pub request_timeout: Duration,

    /// Fire events that may wait for a free worker before being dropped.
    #[serde(default = "default_backlog")]
    pub backlog: usize,

    #[serde(default = "default_checks")]
    pub checks: Vec<CheckConfig>,
}

impl ScenarioConfig {
    pub fn new(executor: ExecutorConfig) -> Self {
        Self {
            executor,
            time_unit: DEFAULT_TIME_UNIT,
            pre_allocated_vus: DEFAULT_PRE_ALLOCATED_VUS,
            max_vus: None,
            start_time: Duration::ZERO,
            graceful_stop: DEFAULT_GRACEFUL_STOP,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            backlog: DEFAULT_BACKLOG,
            checks: default_checks(),
        }
    }

    pub fn max_vus(&self) -> usize {
        self.max_vus.unwrap_or(self.pre_allocated_vus)
    }

    /// Checks everything that does not need the schedule compiled.
    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.time_unit.is_zero() {
            return Err(ConfigError::ZeroTimeUnit {
                scenario: name.to_string(),
            });
        }
        if self.max_vus() == 0 || self.max_vus() < self.pre_allocated_vus {
            return Err(ConfigError::InvalidVus {
                scenario: name.to_string(),
                pre_allocated: self.pre_allocated_vus,
                max: self.max_vus(),
            });
        }
        if self.backlog == 0 {
            return Err(ConfigError::ZeroBacklog {
                scenario: name.to_string(),
            });
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ZeroRequestTimeout {
                scenario: name.to_string(),
            });
        }
        Ok(())
    }

    /// Starting rate and stages with rates converted to requests per second.
    pub fn stages(&self) -> (f64, Vec<Stage>) {
        let per_unit = self.time_unit.as_secs_f64();
        match &self.executor {
            ExecutorConfig::RampingArrivalRate { start_rate, stages } => (
                start_rate / per_unit,
                stages
                    .iter()
                    .map(|s| Stage::new(s.duration, s.target / per_unit))
                    .collect(),
            ),
            ExecutorConfig::ConstantArrivalRate { rate, duration } => {
                let rate = rate / per_unit;
                (rate, vec![Stage::new(*duration, rate)])
            }
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(
    tag = "executor",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ExecutorConfig {
    RampingArrivalRate {
        #[serde(default)]
        start_rate: f64,
        stages: Vec<StageConfig>,
    },
    ConstantArrivalRate {
        rate: f64,
        #[serde(with = "human_duration")]
        duration: Duration,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StageConfig {
    #[serde(with = "human_duration")]
    pub duration: Duration,
    pub target: f64,
}

/// A response predicate. Every configured check must hold for a request to count as a success.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CheckConfig {
    Status {
        equals: u16,
    },
    /// `field` is a dotted path into a JSON response body, e.g. `status` or `data.id`.
    BodyField {
        field: String,
        equals: serde_json::Value,
    },
}

impl CheckConfig {
    pub fn name(&self) -> String {
        match self {
            CheckConfig::Status { equals } => format!("status is {equals}"),
            CheckConfig::BodyField { field, equals } => format!("body.{field} is {equals}"),
        }
    }
}

fn default_checks() -> Vec<CheckConfig> {
    vec![CheckConfig::Status {
        equals: ACCEPTED_STATUS,
    }]
}

fn default_time_unit() -> Duration {
    DEFAULT_TIME_UNIT
}

fn default_pre_allocated_vus() -> usize {
    DEFAULT_PRE_ALLOCATED_VUS
}

fn default_graceful_stop() -> Duration {
    DEFAULT_GRACEFUL_STOP
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

fn default_backlog() -> usize {
    DEFAULT_BACKLOG
}

fn default_progress_interval() -> Duration {
    DEFAULT_PROGRESS_INTERVAL
}

/// Durations as humantime strings (`"1m30s"`) or plain seconds.
mod human_duration {
    use serde::de::{self, Visitor};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::fmt;
    use std::time::Duration;

    struct HumanDuration(Duration);

    impl Serialize for HumanDuration {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_str(&humantime::format_duration(self.0).to_string())
        }
    }

    impl<'de> Deserialize<'de> for HumanDuration {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            struct DurationVisitor;

            impl<'de> Visitor<'de> for DurationVisitor {
                type Value = HumanDuration;

                fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    f.write_str("a duration such as \"30s\" or a number of seconds")
                }

                fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                    Ok(HumanDuration(Duration::from_secs(v)))
                }

                fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                    u64::try_from(v)
                        .map(|v| HumanDuration(Duration::from_secs(v)))
                        .map_err(|_| E::custom("duration must not be negative"))
                }

                fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
                    Duration::try_from_secs_f64(v)
                        .map(HumanDuration)
                        .map_err(E::custom)
                }

                fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                    humantime::parse_duration(v)
                        .map(HumanDuration)
                        .map_err(E::custom)
                }
            }

            deserializer.deserialize_any(DurationVisitor)
        }
    }

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        HumanDuration(*value).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        HumanDuration::deserialize(deserializer).map(|d| d.0)
    }

    pub mod option {
        use super::HumanDuration;
        use serde::{Deserialize, Deserializer, Serialize, Serializer};
        use std::time::Duration;

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            value.map(HumanDuration).serialize(serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Ok(Option::<HumanDuration>::deserialize(deserializer)?.map(|d| d.0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT_OPTIONS: &str = r#"{
        "scenarios": {
            "ingestion_test": {
                "executor": "ramping-arrival-rate",
                "startRate": 0,
                "timeUnit": "1s",
                "preAllocatedVUs": 1000,
                "maxVUs": 5000,
                "stages": [
                    { "duration": "1m", "target": 2000 },
                    { "duration": "3m", "target": 2000 },
                    { "duration": "15s", "target": 20000 },
                    { "duration": "30s", "target": 20000 },
                    { "duration": "30s", "target": 2000 },
                    { "duration": "2m", "target": 2000 },
                    { "duration": "30s", "target": 0 }
                ]
            }
        },
        "thresholds": {
            "http_req_duration": ["p(95)<60", "p(99)<150"],
            "errors": ["rate<0.01"]
        }
    }"#;

    #[test]
    fn parses_k6_style_options() {
        let config = RunConfig::from_json(SCRIPT_OPTIONS).unwrap();
        let scenario = &config.scenarios["ingestion_test"];
        assert_eq!(scenario.pre_allocated_vus, 1_000);
        assert_eq!(scenario.max_vus(), 5_000);
        assert_eq!(scenario.graceful_stop, DEFAULT_GRACEFUL_STOP);
        assert_eq!(scenario.checks, default_checks());
        assert_eq!(config.progress_interval, DEFAULT_PROGRESS_INTERVAL);

        let (start, stages) = scenario.stages();
        assert_eq!(start, 0.);
        assert_eq!(stages.len(), 7);
        assert_eq!(stages[0], Stage::new(Duration::from_secs(60), 2_000.));
        assert_eq!(stages[2], Stage::new(Duration::from_secs(15), 20_000.));

        assert_eq!(config.thresholds().unwrap().len(), 3);
    }

    #[test]
    fn builtin_profile_matches_script() {
        let parsed = RunConfig::from_json(SCRIPT_OPTIONS).unwrap();
        let builtin = RunConfig::ingestion();
        assert_eq!(
            parsed.scenarios["ingestion_test"].stages(),
            builtin.scenarios["ingestion_test"].stages()
        );
        assert_eq!(parsed.thresholds, builtin.thresholds);
    }

    #[test]
    fn time_unit_scales_rates() {
        let config = RunConfig::from_json(
            r#"{ "scenarios": { "slow": {
                "executor": "constant-arrival-rate",
                "rate": 30, "timeUnit": "1m", "duration": 120
            } } }"#,
        )
        .unwrap();
        let (start, stages) = config.scenarios["slow"].stages();
        assert_eq!(start, 0.5);
        assert_eq!(stages, vec![Stage::new(Duration::from_secs(120), 0.5)]);
    }

    #[test]
    fn optional_fields() {
        let config = RunConfig::from_json(
            r#"{
                "maxDuration": "5m",
                "progressInterval": 2,
                "scenarios": { "spike": {
                    "executor": "ramping-arrival-rate",
                    "startTime": "1m30s",
                    "gracefulStop": "5s",
                    "requestTimeout": 0.5,
                    "backlog": 10,
                    "stages": [{ "duration": "10s", "target": 100 }],
                    "checks": [
                        { "type": "status", "equals": 202 },
                        { "type": "body-field", "field": "status", "equals": "accepted" }
                    ]
                } }
            }"#,
        )
        .unwrap();
        assert_eq!(config.max_duration, Some(Duration::from_secs(300)));
        assert_eq!(config.progress_interval, Duration::from_secs(2));

        let spike = &config.scenarios["spike"];
        assert_eq!(spike.start_time, Duration::from_secs(90));
        assert_eq!(spike.graceful_stop, Duration::from_secs(5));
        assert_eq!(spike.request_timeout, Duration::from_millis(500));
        assert_eq!(spike.backlog, 10);
        assert_eq!(spike.checks[1].name(), "body.status is \"accepted\"");
    }

    #[test]
    fn rejects_unknown_executor() {
        let err = RunConfig::from_json(
            r#"{ "scenarios": { "a": { "executor": "per-vu-iterations", "vus": 2 } } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn validates_workers_and_backlog() {
        let mut scenario = ScenarioConfig::new(ExecutorConfig::ConstantArrivalRate {
            rate: 1.,
            duration: Duration::from_secs(1),
        });
        assert!(scenario.validate("a").is_ok());

        scenario.pre_allocated_vus = 10;
        scenario.max_vus = Some(5);
        assert!(matches!(
            scenario.validate("a"),
            Err(ConfigError::InvalidVus { max: 5, .. })
        ));

        scenario.max_vus = None;
        scenario.backlog = 0;
        assert!(matches!(
            scenario.validate("a"),
            Err(ConfigError::ZeroBacklog { .. })
        ));

        scenario.backlog = 1;
        scenario.time_unit = Duration::ZERO;
        assert!(matches!(
            scenario.validate("a"),
            Err(ConfigError::ZeroTimeUnit { .. })
        ));
    }
}
