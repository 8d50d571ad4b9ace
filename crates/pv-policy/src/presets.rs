// presets.rs — Built-in policy presets.
//
// The presets differ only in their rule and limit data; all of them are
// evaluated by the same engine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;
use crate::policy::{Effect, Limits, Policy, Rule, TargetPattern};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyPreset {
    /// Deny secrets and destructive commands, mask credentials, rate-limit.
    StrictEnterprise,
    /// Block key material and root wipes; warn on the rest.
    Balanced,
    /// Observe only: warns, never blocks.
    DevSandbox,
}

impl PolicyPreset {
    pub const ALL: [PolicyPreset; 3] = [
        PolicyPreset::StrictEnterprise,
        PolicyPreset::Balanced,
        PolicyPreset::DevSandbox,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PolicyPreset::StrictEnterprise => "STRICT_ENTERPRISE",
            PolicyPreset::Balanced => "BALANCED",
            PolicyPreset::DevSandbox => "DEV_SANDBOX",
        }
    }

    /// Build the preset's policy.
    pub fn policy(self) -> Policy {
        match self {
            PolicyPreset::StrictEnterprise => strict_enterprise(),
            PolicyPreset::Balanced => balanced(),
            PolicyPreset::DevSandbox => dev_sandbox(),
        }
    }
}

impl fmt::Display for PolicyPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PolicyPreset {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        PolicyPreset::ALL
            .into_iter()
            .find(|p| p.name() == normalized)
            .ok_or_else(|| PolicyError::UnknownPreset(s.to_string()))
    }
}

fn path(id: &str, priority: i32, glob: &str, effect: Effect) -> Rule {
    Rule::new(id, priority, TargetPattern::Path(glob.to_string()), effect)
}

fn keyword(id: &str, priority: i32, word: &str, effect: Effect) -> Rule {
    Rule::new(id, priority, TargetPattern::Keyword(word.to_string()), effect)
}

fn tool(id: &str, priority: i32, glob: &str, effect: Effect) -> Rule {
    Rule::new(id, priority, TargetPattern::Tool(glob.to_string()), effect)
}

fn strict_enterprise() -> Policy {
    Policy::new(PolicyPreset::StrictEnterprise.name())
        .with_description("Deny secrets and destructive commands; mask credentials")
        .with_default(Effect::Warn)
        .with_limits(Limits {
            max_actions_per_minute: Some(60),
            max_cost_per_session: Some(25.0),
            max_cost_per_action: Some(5.0),
        })
        .with_rule(
            path("deny-dotenv", 100, ".env*", Effect::Deny)
                .with_description("environment files hold secrets"),
        )
        .with_rule(path("deny-pem", 100, "*.pem", Effect::Deny))
        .with_rule(path("deny-key", 100, "*.key", Effect::Deny))
        .with_rule(path("deny-ssh-key", 100, "id_rsa*", Effect::Deny))
        .with_rule(path("deny-ssh-dir", 100, "*.ssh/*", Effect::Deny))
        .with_rule(
            keyword("deny-rm-rf", 90, "rm -rf", Effect::Deny).with_description("recursive delete"),
        )
        .with_rule(
            keyword("deny-sudo", 90, "sudo ", Effect::Deny)
                .with_description("privilege elevation"),
        )
        .with_rule(keyword("mask-password", 80, "password", Effect::Mask))
        .with_rule(keyword("mask-api-key", 80, "api_key", Effect::Mask))
        .with_rule(keyword("mask-secret", 80, "secret", Effect::Mask))
        .with_rule(tool("warn-network", 50, "network_call", Effect::Warn))
        .with_rule(tool("allow-read", 10, "file_read", Effect::Allow))
        .with_rule(tool("allow-write", 10, "file_write", Effect::Allow))
}

fn balanced() -> Policy {
    Policy::new(PolicyPreset::Balanced.name())
        .with_description("Block key material and root wipes; mask environment files")
        .with_default(Effect::Allow)
        .with_limits(Limits {
            max_actions_per_minute: Some(120),
            max_cost_per_session: Some(100.0),
            max_cost_per_action: Some(20.0),
        })
        .with_rule(path("deny-pem", 100, "*.pem", Effect::Deny))
        .with_rule(path("deny-key", 100, "*.key", Effect::Deny))
        .with_rule(path("deny-ssh-key", 100, "id_rsa*", Effect::Deny))
        .with_rule(keyword("deny-rm-root", 90, "rm -rf /", Effect::Deny))
        .with_rule(path("mask-dotenv", 80, ".env*", Effect::Mask))
        .with_rule(keyword("mask-password", 70, "password", Effect::Mask))
        .with_rule(keyword("warn-sudo", 60, "sudo ", Effect::Warn))
        .with_rule(tool("warn-network", 50, "network_call", Effect::Warn))
}

fn dev_sandbox() -> Policy {
    Policy::new(PolicyPreset::DevSandbox.name())
        .with_description("Observe only; never blocks")
        .with_default(Effect::Allow)
        .with_rule(path("warn-dotenv", 50, ".env*", Effect::Warn))
        .with_rule(keyword("warn-rm-root", 50, "rm -rf /", Effect::Warn))
        .with_rule(keyword("warn-sudo", 50, "sudo ", Effect::Warn))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::PolicyAction;
    use crate::simulation::simulate_policy;

    #[test]
    fn every_preset_validates() {
        for preset in PolicyPreset::ALL {
            let policy = preset.policy();
            policy.validate().unwrap();
            assert_eq!(policy.name, preset.name());
        }
    }

    #[test]
    fn preset_names_parse() {
        assert_eq!(
            "STRICT_ENTERPRISE".parse::<PolicyPreset>().unwrap(),
            PolicyPreset::StrictEnterprise
        );
        assert_eq!("balanced".parse::<PolicyPreset>().unwrap(), PolicyPreset::Balanced);
        assert_eq!("dev-sandbox".parse::<PolicyPreset>().unwrap(), PolicyPreset::DevSandbox);
        match "PERMISSIVE".parse::<PolicyPreset>() {
            Err(PolicyError::UnknownPreset(name)) => assert_eq!(name, "PERMISSIVE"),
            other => panic!("expected UnknownPreset, got {:?}", other),
        }
    }

    #[test]
    fn preset_serializes_as_constant_name() {
        let json = serde_json::to_string(&PolicyPreset::DevSandbox).unwrap();
        assert_eq!(json, "\"DEV_SANDBOX\"");
    }

    #[test]
    fn one_env_read_is_blocked_only_by_strict() {
        let history = vec![
            PolicyAction::new("h", "file_read").with_path("src/lib.rs"),
            PolicyAction::new("h", "file_read").with_path("/app/.env"),
            PolicyAction::new("h", "file_write").with_path("config.py"),
            PolicyAction::new("h", "network_call").with_text("https://api.example.com"),
        ];
        let strict = simulate_policy(&PolicyPreset::StrictEnterprise.policy(), &history).unwrap();
        assert_eq!(strict.denied, 1);
        assert_eq!(strict.decisions[1].matched_rule.as_deref(), Some("deny-dotenv"));

        let sandbox = simulate_policy(&PolicyPreset::DevSandbox.policy(), &history).unwrap();
        assert_eq!(sandbox.denied, 0);
        assert_eq!(sandbox.warned, 1);
    }

    #[test]
    fn balanced_masks_env_and_blocks_keys() {
        let history = vec![
            PolicyAction::new("h", "file_read").with_path(".env"),
            PolicyAction::new("h", "file_read").with_path("certs/server.pem"),
            PolicyAction::new("h", "bash").with_text("sudo apt install jq"),
        ];
        let report = simulate_policy(&PolicyPreset::Balanced.policy(), &history).unwrap();
        let effects: Vec<Effect> = report.decisions.iter().map(|d| d.effect).collect();
        assert_eq!(effects, vec![Effect::Mask, Effect::Deny, Effect::Warn]);
    }
}
