/// Seconds each experiment keeps calling before it is declared a success.
/// Some deployments never throttle, so the loop needs an end.
pub const DEFAULT_TIME_BUDGET_SECS: u64 = 20;

/// Minimum seconds between two experiments on the same endpoint. The
/// provider's token and request counters reset on a window of this length.
pub const DEFAULT_COOLDOWN_SECS: u64 = 60;

/// Extra seconds added to every cooldown nap to absorb clock jitter.
pub const DEFAULT_COOLDOWN_MARGIN_SECS: u64 = 1;

/// Reference text used to build long prompts.
pub const DEFAULT_CORPUS_PATH: &str = "hamlet.txt";

/// Azure OpenAI REST API version used in the deployment URL.
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-02-15-preview";

/// Deployments swept when running against Azure OpenAI without a matrix file.
pub const DEFAULT_AZURE_DEPLOYMENTS: &[&str] = &[
    "gpt-4-1106",
    "gpt-4-0613",
    "gpt-4-vision-preview",
    "gpt-4-turbo-2024-04-09",
    "gpt-4o-2024-05-13",
    "gpt-35-turbo-0613",
    "gpt-35-turbo-1106",
    "gpt-35-turbo-16k-0613",
    "gpt-4-32k-0613",
];

/// Models swept when running against OpenAI without a matrix file.
pub const DEFAULT_OPENAI_MODELS: &[&str] = &["gpt-3.5-turbo-1106", "gpt-3.5-turbo-0613"];

pub const DEFAULT_PROMPT_SIZES: &[(&str, u32)] = &[("small", 100), ("large", 3400)];

pub const DEFAULT_TOKEN_LIMITS: &[(&str, Option<u32>)] =
    &[("no", None), ("small", Some(100)), ("large", Some(2000))];
