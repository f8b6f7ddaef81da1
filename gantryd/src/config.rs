//! Controller configuration
//!
//! All settings come from `CONTROLLER_`-prefixed environment variables.
//! The GitHub token and exactly one of `CONTROLLER_ORG` /
//! `CONTROLLER_REPO` are required; everything else has defaults tuned for
//! a small fleet.

use std::time::Duration;

use gantry_core::domain::worker::ResourceLimits;
use gantry_github::Scope;

/// Labels every worker registers with, before configured extras.
pub const BASE_RUNNER_LABELS: &[&str] = &["docker-dind", "linux", "self-hosted"];

/// GitHub's documented floor for polling cadence; staying above it keeps
/// the controller inside API quotas.
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Controller configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// GitHub Personal Access Token
    pub token: String,

    /// Managed scope: one repository or a whole organization
    pub scope: Scope,

    /// Floor of online workers the controller maintains
    pub min_runners: u32,

    /// Hard ceiling of worker containers, counted before every creation
    pub max_runners: u32,

    /// Queue pressure that triggers a scale-up
    pub scale_up_threshold: u32,

    /// Queue pressure at or below which one worker is retired
    pub scale_down_threshold: u32,

    /// How long an idle worker may linger before scale-down considers it
    pub idle_timeout: Duration,

    /// Cadence of the queue monitor
    pub poll_interval: Duration,

    /// How long a fresh container may run unregistered before it is
    /// treated as an orphan
    pub registration_grace: Duration,

    /// Minimum gap between two queue-driven scale-ups
    pub scale_up_cooldown: Duration,

    /// SIGTERM grace handed to stopping workers
    pub stop_grace: Duration,

    /// How long teardown waits for the worker's own deregistration hook
    /// before deleting the registration itself
    pub deregistration_wait: Duration,

    /// Identity prefix; the sole ownership filter on the registry side
    pub runner_prefix: String,

    /// Container-name prefix
    pub runner_name_prefix: String,

    /// Value of the `managed-by` label on everything this controller creates
    pub controller_id: String,

    /// Worker container image
    pub runner_image: String,

    /// Dedicated bridge network for workers
    pub runner_network: String,

    /// Extra labels appended to the base label set
    pub runner_labels: Vec<String>,

    /// Docker daemon socket
    pub docker_socket: String,

    /// Optional worker resource caps
    pub limits: ResourceLimits,

    /// Default log level when `RUST_LOG` is unset
    pub log_level: String,

    /// Emit JSON logs instead of human-readable ones
    pub structured_logging: bool,

    /// HTTP surface bind address
    pub bind_addr: String,
}

impl Config {
    /// Creates a configuration with defaults for everything but the
    /// credentials.
    pub fn new(token: impl Into<String>, scope: Scope) -> Self {
        Self {
            token: token.into(),
            scope,
            min_runners: 2,
            max_runners: 10,
            scale_up_threshold: 3,
            scale_down_threshold: 1,
            idle_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(30),
            registration_grace: Duration::from_secs(120),
            scale_up_cooldown: Duration::from_secs(60),
            stop_grace: Duration::from_secs(30),
            deregistration_wait: Duration::from_secs(30),
            runner_prefix: "orchestrated".to_string(),
            runner_name_prefix: "github-runner".to_string(),
            controller_id: "gantry".to_string(),
            runner_image: "ghcr.io/actions/actions-runner:latest".to_string(),
            runner_network: "runner-network".to_string(),
            runner_labels: vec!["orchestrated".to_string(), "x64".to_string()],
            docker_socket: "/var/run/docker.sock".to_string(),
            limits: ResourceLimits::default(),
            log_level: "info".to_string(),
            structured_logging: false,
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }

    /// Loads configuration from `CONTROLLER_*` environment variables and
    /// validates it.
    pub fn from_env() -> anyhow::Result<Self> {
        let token = require_var("CONTROLLER_TOKEN")?;

        let org = optional_var("CONTROLLER_ORG");
        let repo = optional_var("CONTROLLER_REPO");
        let scope = match (org, repo) {
            (Some(org), None) => Scope::Org(org),
            (None, Some(repo)) => Scope::Repo(repo),
            (Some(_), Some(_)) => {
                anyhow::bail!("CONTROLLER_ORG and CONTROLLER_REPO are mutually exclusive")
            }
            (None, None) => {
                anyhow::bail!("one of CONTROLLER_ORG or CONTROLLER_REPO must be set")
            }
        };

        let mut config = Config::new(token, scope);

        if let Some(v) = parse_var::<u32>("CONTROLLER_MIN_RUNNERS")? {
            config.min_runners = v;
        }
        if let Some(v) = parse_var::<u32>("CONTROLLER_MAX_RUNNERS")? {
            config.max_runners = v;
        }
        if let Some(v) = parse_var::<u32>("CONTROLLER_SCALE_UP_THRESHOLD")? {
            config.scale_up_threshold = v;
        }
        if let Some(v) = parse_var::<u32>("CONTROLLER_SCALE_DOWN_THRESHOLD")? {
            config.scale_down_threshold = v;
        }
        if let Some(v) = parse_var::<u64>("CONTROLLER_IDLE_TIMEOUT")? {
            config.idle_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<u64>("CONTROLLER_POLL_INTERVAL")? {
            config.poll_interval = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<u64>("CONTROLLER_REGISTRATION_GRACE")? {
            config.registration_grace = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<u64>("CONTROLLER_SCALE_UP_COOLDOWN")? {
            config.scale_up_cooldown = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<u64>("CONTROLLER_DEREGISTRATION_WAIT")? {
            config.deregistration_wait = Duration::from_secs(v);
        }
        if let Some(v) = optional_var("CONTROLLER_RUNNER_PREFIX") {
            config.runner_prefix = v;
        }
        if let Some(v) = optional_var("CONTROLLER_RUNNER_NAME_PREFIX") {
            config.runner_name_prefix = v;
        }
        if let Some(v) = optional_var("CONTROLLER_ID") {
            config.controller_id = v;
        }
        if let Some(v) = optional_var("CONTROLLER_RUNNER_IMAGE") {
            config.runner_image = v;
        }
        if let Some(v) = optional_var("CONTROLLER_RUNNER_NETWORK") {
            config.runner_network = v;
        }
        if let Some(v) = optional_var("CONTROLLER_RUNNER_LABELS") {
            config.runner_labels = parse_labels(&v);
        }
        if let Some(v) = optional_var("CONTROLLER_DOCKER_SOCKET") {
            config.docker_socket = v;
        }
        if let Some(v) = optional_var("CONTROLLER_LOG_LEVEL") {
            config.log_level = v;
        }
        if let Some(v) = parse_var::<bool>("CONTROLLER_STRUCTURED_LOGGING")? {
            config.structured_logging = v;
        }
        if let Some(v) = optional_var("CONTROLLER_BIND_ADDR") {
            config.bind_addr = v;
        }

        let memory = optional_var("CONTROLLER_RUNNER_MEMORY");
        let cpus = optional_var("CONTROLLER_RUNNER_CPUS");
        config.limits = ResourceLimits::parse(memory.as_deref(), cpus.as_deref())
            .map_err(anyhow::Error::msg)?;

        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the controller cannot run safely with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.token.is_empty() {
            anyhow::bail!("token cannot be empty");
        }

        if let Scope::Repo(repo) = &self.scope {
            if !repo.contains('/') {
                anyhow::bail!("repository must be in 'owner/repo' form, got '{repo}'");
            }
        }

        if self.max_runners == 0 {
            anyhow::bail!("max_runners must be at least 1");
        }

        if self.min_runners > self.max_runners {
            anyhow::bail!(
                "min_runners ({}) cannot exceed max_runners ({})",
                self.min_runners,
                self.max_runners
            );
        }

        if self.scale_up_threshold == 0 {
            anyhow::bail!("scale_up_threshold must be at least 1");
        }

        if self.scale_down_threshold >= self.scale_up_threshold {
            anyhow::bail!(
                "scale_down_threshold ({}) must be below scale_up_threshold ({})",
                self.scale_down_threshold,
                self.scale_up_threshold
            );
        }

        if self.poll_interval < MIN_POLL_INTERVAL {
            anyhow::bail!(
                "poll_interval must be at least {}s to stay within API quotas",
                MIN_POLL_INTERVAL.as_secs()
            );
        }

        if self.runner_prefix.is_empty() || self.runner_name_prefix.is_empty() {
            anyhow::bail!("runner prefixes cannot be empty");
        }

        if self.controller_id.is_empty() {
            anyhow::bail!("controller id cannot be empty");
        }

        Ok(())
    }

    /// The full label set workers register with.
    pub fn worker_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = BASE_RUNNER_LABELS.iter().map(|l| l.to_string()).collect();
        for label in &self.runner_labels {
            if !labels.iter().any(|existing| existing == label) {
                labels.push(label.clone());
            }
        }
        labels
    }
}

fn require_var(name: &str) -> anyhow::Result<String> {
    optional_var(name).ok_or_else(|| anyhow::anyhow!("{name} environment variable not set"))
}

fn optional_var(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> anyhow::Result<Option<T>> {
    match optional_var(name) {
        Some(v) => v
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{name} has an invalid value: '{v}'")),
        None => Ok(None),
    }
}

fn parse_labels(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config::new("t0ken", Scope::Repo("acme/widgets".to_string()))
    }

    #[test]
    fn default_config_is_valid() {
        let config = base_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.min_runners, 2);
        assert_eq!(config.max_runners, 10);
        assert_eq!(config.scale_up_threshold, 3);
        assert_eq!(config.poll_interval, Duration::from_secs(30));
    }

    #[test]
    fn floor_above_ceiling_is_rejected() {
        let mut config = base_config();
        config.min_runners = 11;
        assert!(config.validate().is_err());
    }

    #[test]
    fn poll_interval_floor_is_enforced() {
        let mut config = base_config();
        config.poll_interval = Duration::from_secs(10);
        assert!(config.validate().is_err());

        config.poll_interval = Duration::from_secs(15);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn thresholds_must_be_ordered() {
        let mut config = base_config();
        config.scale_down_threshold = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn repo_scope_requires_owner_and_name() {
        let mut config = base_config();
        config.scope = Scope::Repo("just-a-name".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn label_parsing_drops_empty_entries() {
        assert_eq!(
            parse_labels("orchestrated, x64,,gpu "),
            vec!["orchestrated", "x64", "gpu"]
        );
    }

    #[test]
    fn worker_labels_include_base_set_without_duplicates() {
        let mut config = base_config();
        config.runner_labels = vec!["linux".to_string(), "x64".to_string()];

        let labels = config.worker_labels();
        assert_eq!(labels, vec!["docker-dind", "linux", "self-hosted", "x64"]);
    }
}
