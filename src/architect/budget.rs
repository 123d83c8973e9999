//! Agent budget registry
//!
//! Explicit typed map from agent role to prompt template and budget tier.
//! Tier selection trades reasoning depth against spend: prompts flagged by
//! memory or structurally large get the standard tier, everything else runs
//! on the lite tier.

use serde::Serialize;

/// Roles the pipeline dispatches to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentRole {
    Architect,
    Auditor,
}

/// Model and token ceiling for one external call
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetTier {
    pub tier: u8,
    pub model: String,
    pub max_tokens: u32,
}

impl BudgetTier {
    /// Worst-case cost of a call under this tier, used for the pre-call
    /// governance estimate ($0.0015 per 1K tokens)
    pub fn estimated_cost_usd(&self) -> f64 {
        (self.max_tokens as f64 / 1000.0) * 0.0015
    }
}

/// Per-role prompt template and tier ladder
#[derive(Debug, Clone)]
pub struct AgentProfile {
    pub prompt_template: &'static str,
    lite: BudgetTier,
    standard: BudgetTier,
}

/// Prompts at or past this size get the standard tier
const LARGE_PROMPT_CHARS: usize = 950;

pub struct AgentRegistry;

impl AgentRegistry {
    pub fn profile(role: AgentRole) -> AgentProfile {
        match role {
            AgentRole::Architect => AgentProfile {
                prompt_template: "Produce a strict-JSON implementation plan for: {prompt}",
                lite: BudgetTier {
                    tier: 1,
                    model: "google/gemma-3-12b-it:free".to_string(),
                    max_tokens: 512,
                },
                standard: BudgetTier {
                    tier: 2,
                    model: "qwen/qwen3-next-80b-a3b-instruct:free".to_string(),
                    max_tokens: 1024,
                },
            },
            AgentRole::Auditor => AgentProfile {
                prompt_template: "Score this plan 0-100 and list missed requirements: {plan}",
                lite: BudgetTier {
                    tier: 1,
                    model: "google/gemma-3-12b-it:free".to_string(),
                    max_tokens: 256,
                },
                standard: BudgetTier {
                    tier: 2,
                    model: "qwen/qwen3-next-80b-a3b-instruct:free".to_string(),
                    max_tokens: 512,
                },
            },
        }
    }
}

impl AgentProfile {
    /// Pick a tier for this request. Advisory memory hits and large prompts
    /// justify the deeper tier.
    pub fn select_tier(&self, prompt: &str, advisory_active: bool) -> BudgetTier {
        if advisory_active || prompt.len() >= LARGE_PROMPT_CHARS {
            self.standard.clone()
        } else {
            self.lite.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_prompt_gets_lite_tier() {
        let profile = AgentRegistry::profile(AgentRole::Architect);
        let tier = profile.select_tier("add a login page", false);
        assert_eq!(tier.tier, 1);
        assert_eq!(tier.max_tokens, 512);
    }

    #[test]
    fn advisory_hit_escalates_tier() {
        let profile = AgentRegistry::profile(AgentRole::Architect);
        let tier = profile.select_tier("add a login page", true);
        assert_eq!(tier.tier, 2);
    }

    #[test]
    fn large_prompt_escalates_tier() {
        let profile = AgentRegistry::profile(AgentRole::Architect);
        let tier = profile.select_tier(&"x".repeat(1000), false);
        assert_eq!(tier.tier, 2);
    }

    #[test]
    fn estimated_cost_tracks_token_ceiling() {
        let tier = BudgetTier {
            tier: 1,
            model: "m".to_string(),
            max_tokens: 1000,
        };
        assert!((tier.estimated_cost_usd() - 0.0015).abs() < 1e-9);
    }
}
