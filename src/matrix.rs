use crate::model::{ExperimentSpec, SizedPrompt, TokenLimit};

/// Expands sizes × limits × endpoints into the ordered experiment list.
///
/// Endpoints vary fastest, so every endpoint sees a given (size, limit) pair
/// back to back before the sweep moves on to the next limit. Duplicate
/// labels are kept as separate experiments.
pub fn build_matrix(
    endpoints: &[String],
    prompts: &[SizedPrompt],
    limits: &[TokenLimit],
) -> Vec<ExperimentSpec> {
    let mut matrix = Vec::with_capacity(prompts.len() * limits.len() * endpoints.len());

    for prompt in prompts {
        for limit in limits {
            let name = format!("{}_prompt_{}_max_tokens", prompt.label, limit.label);
            for endpoint in endpoints {
                matrix.push(ExperimentSpec::new(
                    endpoint.as_str(),
                    name.as_str(),
                    prompt,
                    limit.max_tokens,
                ));
            }
        }
    }

    matrix
}
