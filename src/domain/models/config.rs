use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Main configuration structure for ecoverify
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Path to the project registry file
    #[serde(default = "default_registry")]
    pub registry: PathBuf,

    /// Maximum number of projects verified concurrently within a wave
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Fix -> audit loops before negotiation (1-3)
    #[serde(default = "default_max_loops")]
    pub max_loops: u32,

    /// Negotiation rounds before escalating to a human (1-5)
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Wall-clock budget per project in seconds
    #[serde(default = "default_project_timeout_secs")]
    pub project_timeout_secs: u64,

    /// Directory for isolated worktrees and other run state
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Version-control naming
    #[serde(default)]
    pub vcs: VcsConfig,

    /// Authenticity auditing thresholds
    #[serde(default)]
    pub audit: AuditConfig,

    /// Negotiation settings
    #[serde(default)]
    pub escalation: EscalationConfig,

    /// Built-in remediation strategy settings
    #[serde(default)]
    pub remediation: RemediationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_registry() -> PathBuf {
    PathBuf::from("projects.yaml")
}

const fn default_workers() -> usize {
    4
}

const fn default_max_loops() -> u32 {
    3
}

const fn default_max_rounds() -> u32 {
    5
}

const fn default_project_timeout_secs() -> u64 {
    1800
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".ecoverify")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry: default_registry(),
            workers: default_workers(),
            max_loops: default_max_loops(),
            max_rounds: default_max_rounds(),
            project_timeout_secs: default_project_timeout_secs(),
            state_dir: default_state_dir(),
            vcs: VcsConfig::default(),
            audit: AuditConfig::default(),
            escalation: EscalationConfig::default(),
            remediation: RemediationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Branch and tag naming for change-sets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VcsConfig {
    /// Prefix of isolated fix branches
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,

    /// Prefix of baseline marker tags
    #[serde(default = "default_tag_prefix")]
    pub tag_prefix: String,
}

fn default_branch_prefix() -> String {
    "ecoverify/fix".to_string()
}

fn default_tag_prefix() -> String {
    "ecoverify/baseline".to_string()
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            branch_prefix: default_branch_prefix(),
            tag_prefix: default_tag_prefix(),
        }
    }
}

/// Minimum plausible durations (seconds) per operation kind
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DurationFloors {
    #[serde(default = "default_network_floor")]
    pub network: f64,
    #[serde(default = "default_storage_floor")]
    pub storage: f64,
    #[serde(default = "default_filesystem_floor")]
    pub filesystem: f64,
    #[serde(default = "default_integration_floor")]
    pub integration: f64,
}

const fn default_network_floor() -> f64 {
    0.05
}

const fn default_storage_floor() -> f64 {
    0.1
}

const fn default_filesystem_floor() -> f64 {
    0.01
}

const fn default_integration_floor() -> f64 {
    0.5
}

impl Default for DurationFloors {
    fn default() -> Self {
        Self {
            network: default_network_floor(),
            storage: default_storage_floor(),
            filesystem: default_filesystem_floor(),
            integration: default_integration_floor(),
        }
    }
}

/// Confidence points deducted per finding
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PenaltyConfig {
    #[serde(default = "default_missing_evidence_penalty")]
    pub missing_evidence: u8,
    #[serde(default = "default_below_floor_penalty")]
    pub below_floor: u8,
    #[serde(default = "default_uniform_timing_penalty")]
    pub uniform_timing: u8,
    #[serde(default = "default_perfect_pass_rate_penalty")]
    pub perfect_pass_rate: u8,
    #[serde(default = "default_unanswered_question_penalty")]
    pub unanswered_question: u8,
}

const fn default_missing_evidence_penalty() -> u8 {
    20
}

const fn default_below_floor_penalty() -> u8 {
    30
}

const fn default_uniform_timing_penalty() -> u8 {
    15
}

const fn default_perfect_pass_rate_penalty() -> u8 {
    5
}

const fn default_unanswered_question_penalty() -> u8 {
    10
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        Self {
            missing_evidence: default_missing_evidence_penalty(),
            below_floor: default_below_floor_penalty(),
            uniform_timing: default_uniform_timing_penalty(),
            perfect_pass_rate: default_perfect_pass_rate_penalty(),
            unanswered_question: default_unanswered_question_penalty(),
        }
    }
}

/// Authenticity auditing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AuditConfig {
    /// How many times the suite runs per audit (variance detection needs >= 3)
    #[serde(default = "default_repeat_runs")]
    pub repeat_runs: u32,

    /// Confidence below this triggers cross-examination; audits need at least this
    #[serde(default = "default_cross_examination_threshold")]
    pub cross_examination_threshold: u8,

    /// Run confidence below this is treated as an authenticity violation
    #[serde(default = "default_collapse_threshold")]
    pub collapse_threshold: u8,

    /// Coefficient of variation under which repeated timings count as uniform
    #[serde(default = "default_uniformity_cv")]
    pub uniformity_cv: f64,

    /// Minimum batch size for the perfect pass-rate penalty
    #[serde(default = "default_perfect_pass_min_tests")]
    pub perfect_pass_min_tests: usize,

    /// Timeout for one suite execution in seconds
    #[serde(default = "default_test_timeout_secs")]
    pub test_timeout_secs: u64,

    /// Whether the honeypot battery runs
    #[serde(default = "default_true")]
    pub honeypots: bool,

    #[serde(default)]
    pub duration_floors: DurationFloors,

    #[serde(default)]
    pub penalties: PenaltyConfig,
}

const fn default_repeat_runs() -> u32 {
    3
}

const fn default_cross_examination_threshold() -> u8 {
    90
}

const fn default_collapse_threshold() -> u8 {
    25
}

const fn default_uniformity_cv() -> f64 {
    0.01
}

const fn default_perfect_pass_min_tests() -> usize {
    20
}

const fn default_test_timeout_secs() -> u64 {
    600
}

const fn default_true() -> bool {
    true
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            repeat_runs: default_repeat_runs(),
            cross_examination_threshold: default_cross_examination_threshold(),
            collapse_threshold: default_collapse_threshold(),
            uniformity_cv: default_uniformity_cv(),
            perfect_pass_min_tests: default_perfect_pass_min_tests(),
            test_timeout_secs: default_test_timeout_secs(),
            honeypots: true,
            duration_floors: DurationFloors::default(),
            penalties: PenaltyConfig::default(),
        }
    }
}

/// HTTP endpoint of the secondary reasoning agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentEndpointConfig {
    /// URL accepting a JSON negotiation request
    pub endpoint: String,

    /// Model name forwarded to the endpoint
    #[serde(default)]
    pub model: Option<String>,

    /// Environment variable holding a bearer token
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Transient-failure retries per round
    #[serde(default = "default_agent_retries")]
    pub max_retries: u32,
}

const fn default_agent_retries() -> u32 {
    2
}

/// Negotiation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EscalationConfig {
    /// Temperature of the first round
    #[serde(default = "default_temperature_start")]
    pub temperature_start: f64,

    /// Temperature of the last round
    #[serde(default = "default_temperature_end")]
    pub temperature_end: f64,

    /// Timeout per negotiation round in seconds
    #[serde(default = "default_round_timeout_secs")]
    pub round_timeout_secs: u64,

    /// Secondary agent; negotiation is skipped when absent
    #[serde(default)]
    pub agent: Option<AgentEndpointConfig>,
}

const fn default_temperature_start() -> f64 {
    0.3
}

const fn default_temperature_end() -> f64 {
    0.8
}

const fn default_round_timeout_secs() -> u64 {
    120
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            temperature_start: default_temperature_start(),
            temperature_end: default_temperature_end(),
            round_timeout_secs: default_round_timeout_secs(),
            agent: None,
        }
    }
}

/// Built-in strategy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RemediationConfig {
    /// Module name -> package name, for imports whose package differs
    #[serde(default = "default_package_aliases")]
    pub package_aliases: BTreeMap<String, String>,

    /// Test directory created by the directory-structure strategy
    #[serde(default = "default_test_directory")]
    pub test_directory: PathBuf,
}

fn default_package_aliases() -> BTreeMap<String, String> {
    [
        ("yaml", "pyyaml"),
        ("cv2", "opencv-python"),
        ("PIL", "pillow"),
        ("sklearn", "scikit-learn"),
        ("bs4", "beautifulsoup4"),
        ("dotenv", "python-dotenv"),
    ]
    .into_iter()
    .map(|(m, p)| (m.to_string(), p.to_string()))
    .collect()
}

fn default_test_directory() -> PathBuf {
    PathBuf::from("tests")
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            package_aliases: default_package_aliases(),
            test_directory: default_test_directory(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Log file rotation policy
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    #[default]
    Daily,
    Hourly,
    Never,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: LogFormat,

    /// Directory for log files (stderr only when absent)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default)]
    pub rotation: RotationPolicy,
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: RotationPolicy::default(),
        }
    }
}
