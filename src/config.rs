use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Where the process is running. Decides the browser acquisition strategy
/// and the default concurrency policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeEnv {
    Local,
    Serverless,
}

/// Environment signals captured once at startup. Detection is a pure
/// function of this snapshot so every component agrees on the answer.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSignals {
    pub function_name: bool,
    pub k_service: bool,
    pub netlify: bool,
    pub aws_execution_env: bool,
    pub platform_linux: bool,
}

impl EnvSignals {
    pub fn capture() -> Self {
        Self {
            function_name: env::var_os("FUNCTION_NAME").is_some(),
            k_service: env::var_os("K_SERVICE").is_some(),
            netlify: env::var_os("NETLIFY").is_some(),
            aws_execution_env: env::var_os("AWS_EXECUTION_ENV").is_some(),
            platform_linux: cfg!(target_os = "linux"),
        }
    }
}

/// Serverless when any known platform variable is present, or on Linux,
/// where deployments run a provisioned chromium under tight memory.
pub fn detect_runtime(signals: &EnvSignals) -> RuntimeEnv {
    if signals.function_name
        || signals.k_service
        || signals.netlify
        || signals.aws_execution_env
        || signals.platform_linux
    {
        RuntimeEnv::Serverless
    } else {
        RuntimeEnv::Local
    }
}

/// How many extractors may hold a live browser process at once.
///
/// Each Chrome process costs hundreds of MB, so constrained hosts run the
/// set in small batches with a pause in between; an unconstrained host runs
/// everything at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyPolicy {
    Parallel,
    Batched { batch_size: usize, pause: Duration },
}

impl ConcurrencyPolicy {
    pub fn for_runtime(runtime: RuntimeEnv) -> Self {
        match runtime {
            RuntimeEnv::Local => ConcurrencyPolicy::Parallel,
            RuntimeEnv::Serverless => ConcurrencyPolicy::Batched {
                batch_size: 1,
                pause: Duration::from_millis(250),
            },
        }
    }
}

/// Deployment-wide configuration, computed once per process start and
/// passed explicitly into the browser manager and orchestrator.
#[derive(Debug, Clone)]
pub struct DeploymentContext {
    pub runtime: RuntimeEnv,
    pub policy: ConcurrencyPolicy,
    /// Disable the Facebook extractor entirely (datacenter IPs get blocked).
    pub skip_facebook: bool,
    /// Base URL of the external AI browsing agent.
    pub agent_base_url: String,
    /// Explicit browser binary; `None` lets headless_chrome auto-detect.
    pub chrome_executable: Option<PathBuf>,
}

pub const DEFAULT_AGENT_URL: &str = "http://localhost:8001";

/// Provisioned chromium path inside serverless containers.
const SERVERLESS_CHROME_PATH: &str = "/usr/bin/chromium";

impl DeploymentContext {
    pub fn from_env() -> Self {
        let signals = EnvSignals::capture();
        let runtime = detect_runtime(&signals);

        let chrome_executable = env::var_os("CHROME_EXECUTABLE")
            .map(PathBuf::from)
            .or_else(|| match runtime {
                RuntimeEnv::Serverless => {
                    let provisioned = PathBuf::from(SERVERLESS_CHROME_PATH);
                    provisioned.exists().then_some(provisioned)
                }
                RuntimeEnv::Local => None,
            });

        Self {
            runtime,
            policy: ConcurrencyPolicy::for_runtime(runtime),
            skip_facebook: env::var("SKIP_FACEBOOK")
                .map(|v| v == "true")
                .unwrap_or(false),
            agent_base_url: env::var("BROWSER_AGENT_URL")
                .unwrap_or_else(|_| DEFAULT_AGENT_URL.to_string()),
            chrome_executable,
        }
    }

    /// Context for tests and local tooling: parallel, nothing disabled.
    pub fn local() -> Self {
        Self {
            runtime: RuntimeEnv::Local,
            policy: ConcurrencyPolicy::Parallel,
            skip_facebook: false,
            agent_base_url: DEFAULT_AGENT_URL.to_string(),
            chrome_executable: None,
        }
    }

    /// Facebook is dropped only in constrained deployments that opted in.
    pub fn facebook_disabled(&self) -> bool {
        self.skip_facebook && self.runtime == RuntimeEnv::Serverless
    }
}
