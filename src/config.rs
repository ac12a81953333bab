use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use bpaf::{OptionParser, Parser, construct, long};
use serde::Deserialize;
use thiserror::Error;

use crate::{
    constants::{
        DEFAULT_AZURE_API_VERSION, DEFAULT_AZURE_DEPLOYMENTS, DEFAULT_COOLDOWN_MARGIN_SECS,
        DEFAULT_COOLDOWN_SECS, DEFAULT_CORPUS_PATH, DEFAULT_OPENAI_MODELS, DEFAULT_PROMPT_SIZES,
        DEFAULT_TIME_BUDGET_SECS, DEFAULT_TOKEN_LIMITS,
    },
    model::{PromptSize, TokenLimit},
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no endpoints configured")]
    NoEndpoints,
    #[error("no prompt sizes configured")]
    NoPromptSizes,
    #[error("no max-token limits configured")]
    NoTokenLimits,
    #[error("time budget must be greater than zero")]
    ZeroTimeBudget,
    #[error("missing {0} in environment")]
    MissingEnv(&'static str),
    #[error("failed to read matrix file {path}: {source}")]
    ReadFile {
        path:   PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse matrix file {path}: {source}")]
    ParseFile {
        path:   PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Azure,
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "azure" => Ok(ProviderKind::Azure),
            other => Err(format!("unknown provider '{other}', expected openai or azure")),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::OpenAi => write!(f, "openai"),
            ProviderKind::Azure => write!(f, "azure"),
        }
    }
}

/// Raw command-line flags.
#[derive(Debug, Clone)]
pub struct CliArgs {
    pub provider:        ProviderKind,
    pub matrix:          Option<PathBuf>,
    pub endpoints:       Vec<String>,
    pub time_budget:     u64,
    pub cooldown:        u64,
    pub cooldown_margin: u64,
    pub corpus:          PathBuf,
    pub api_version:     String,
}

pub fn cli() -> OptionParser<CliArgs> {
    let provider = long("provider")
        .help("Provider to probe: openai or azure")
        .argument::<ProviderKind>("PROVIDER")
        .fallback(ProviderKind::Azure)
        .display_fallback();
    let matrix = long("config")
        .help("JSON file with endpoints, prompt_sizes and token_limits")
        .argument::<PathBuf>("PATH")
        .optional();
    let endpoints = long("endpoint")
        .help("Endpoint to probe (deployment or model); repeat for several")
        .argument::<String>("NAME")
        .many();
    let time_budget = long("time-budget")
        .help("Seconds each experiment keeps calling its endpoint")
        .argument::<u64>("SECS")
        .fallback(DEFAULT_TIME_BUDGET_SECS)
        .display_fallback();
    let cooldown = long("cooldown")
        .help("Minimum seconds between experiments on the same endpoint")
        .argument::<u64>("SECS")
        .fallback(DEFAULT_COOLDOWN_SECS)
        .display_fallback();
    let cooldown_margin = long("cooldown-margin")
        .help("Extra seconds added to every cooldown nap")
        .argument::<u64>("SECS")
        .fallback(DEFAULT_COOLDOWN_MARGIN_SECS)
        .display_fallback();
    let corpus = long("corpus")
        .help("Reference text used to build long prompts")
        .argument::<PathBuf>("PATH")
        .fallback(PathBuf::from(DEFAULT_CORPUS_PATH));
    let api_version = long("api-version")
        .help("Azure OpenAI API version")
        .argument::<String>("VERSION")
        .fallback(DEFAULT_AZURE_API_VERSION.to_string())
        .display_fallback();

    construct!(CliArgs {
        provider,
        matrix,
        endpoints,
        time_budget,
        cooldown,
        cooldown_margin,
        corpus,
        api_version,
    })
    .to_options()
    .descr("Probe how chat-completion endpoints count tokens against their rate limits")
}

/// Optional JSON description of the sweep. Missing sections fall back to the
/// built-in defaults; order inside each list is the sweep order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatrixFile {
    #[serde(default)]
    pub endpoints:    Vec<String>,
    #[serde(default)]
    pub prompt_sizes: Vec<PromptSize>,
    #[serde(default)]
    pub token_limits: Vec<TokenLimit>,
}

impl MatrixFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::ParseFile {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub provider:        ProviderKind,
    pub endpoints:       Vec<String>,
    pub prompt_sizes:    Vec<PromptSize>,
    pub token_limits:    Vec<TokenLimit>,
    pub time_budget:     Duration,
    pub cooldown:        Duration,
    pub cooldown_margin: Duration,
    pub corpus:          PathBuf,
    pub api_version:     String,
}

impl HarnessConfig {
    /// Merges flags over the matrix file over the defaults, then validates.
    pub fn resolve(args: CliArgs, file: Option<MatrixFile>) -> Result<Self, ConfigError> {
        let file = file.unwrap_or_default();

        let mut endpoints = if !args.endpoints.is_empty() {
            args.endpoints
        } else if !file.endpoints.is_empty() {
            file.endpoints
        } else {
            default_endpoints(args.provider)
        };
        endpoints.retain(|endpoint| !endpoint.trim().is_empty());

        let prompt_sizes = if file.prompt_sizes.is_empty() {
            DEFAULT_PROMPT_SIZES
                .iter()
                .map(|(label, tokens)| PromptSize {
                    label:  label.to_string(),
                    tokens: *tokens,
                })
                .collect()
        } else {
            file.prompt_sizes
        };

        let token_limits = if file.token_limits.is_empty() {
            DEFAULT_TOKEN_LIMITS
                .iter()
                .map(|(label, max_tokens)| TokenLimit {
                    label:      label.to_string(),
                    max_tokens: *max_tokens,
                })
                .collect()
        } else {
            file.token_limits
        };

        let config = Self {
            provider: args.provider,
            endpoints,
            prompt_sizes,
            token_limits,
            time_budget: Duration::from_secs(args.time_budget),
            cooldown: Duration::from_secs(args.cooldown),
            cooldown_margin: Duration::from_secs(args.cooldown_margin),
            corpus: args.corpus,
            api_version: args.api_version,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }
        if self.prompt_sizes.is_empty() {
            return Err(ConfigError::NoPromptSizes);
        }
        if self.token_limits.is_empty() {
            return Err(ConfigError::NoTokenLimits);
        }
        if self.time_budget.is_zero() {
            return Err(ConfigError::ZeroTimeBudget);
        }
        Ok(())
    }
}

fn default_endpoints(provider: ProviderKind) -> Vec<String> {
    let names = match provider {
        ProviderKind::OpenAi => DEFAULT_OPENAI_MODELS,
        ProviderKind::Azure => DEFAULT_AZURE_DEPLOYMENTS,
    };
    names.iter().map(|name| name.to_string()).collect()
}
