//! Flattening prompts x count into an ordered request sequence.

use zimg_core::sanitize::{is_prompt_problematic, sanitize_prompt};

/// One image to produce. Indices are 1-based, for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedRequest {
    pub prompt: String,
    /// Set when the prompt is unusable even after sanitizing.
    pub problematic: bool,
    pub prompt_index: usize,
    pub prompt_total: usize,
    pub repeat_index: usize,
    pub count: usize,
    pub overall_index: usize,
    pub overall_total: usize,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone)]
struct PlannedPrompt {
    text: String,
    problematic: bool,
}

/// Prompts are sanitized once up front; requests are produced on demand.
#[derive(Debug, Clone)]
pub struct Plan {
    prompts: Vec<PlannedPrompt>,
    count: usize,
    base_seed: Option<u64>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.prompts.len().saturating_mul(self.count)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Prompt-major, repetition-minor. With a base seed, the k-th request
    /// (0-based, across the whole run) gets `base_seed + k`.
    pub fn requests(&self) -> impl Iterator<Item = PlannedRequest> + '_ {
        let prompt_total = self.prompts.len();
        let overall_total = self.len();
        self.prompts.iter().enumerate().flat_map(move |(p, prompt)| {
            (0..self.count).map(move |r| {
                let k = p * self.count + r;
                PlannedRequest {
                    prompt: prompt.text.clone(),
                    problematic: prompt.problematic,
                    prompt_index: p + 1,
                    prompt_total,
                    repeat_index: r + 1,
                    count: self.count,
                    overall_index: k + 1,
                    overall_total,
                    seed: self.base_seed.map(|s| s.wrapping_add(k as u64)),
                }
            })
        })
    }
}

pub fn plan_requests(prompts: &[String], count: usize, base_seed: Option<u64>) -> Plan {
    let prompts = prompts
        .iter()
        .enumerate()
        .map(|(p, raw)| {
            let text = sanitize_prompt(raw);
            let problematic = is_prompt_problematic(&text);
            if problematic {
                tracing::warn!("prompt {} looks unusable after sanitizing: {:?}", p + 1, raw);
            }
            PlannedPrompt { text, problematic }
        })
        .collect();
    Plan {
        prompts,
        count,
        base_seed,
    }
}
