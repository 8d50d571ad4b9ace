// scenarios.rs — Policy and risk behavior through the audit service.
//
// Each test drives the service the way an agent integration would: actions
// come in as events, the policy decides, the chain records, and the analysis
// runs on demand.

use std::sync::Arc;
use std::thread;

use pv_chain::{ActivityType, Actor};
use pv_core::{ActionEvent, AuditService, MASKED};
use pv_policy::{Effect, Policy, PolicyAction, PolicyEngine, PolicyPreset, Rule, TargetPattern};
use pv_risk::RiskLevel;

fn env_then_upload(service: &AuditService, session: &str) {
    service
        .record_action(session, ActionEvent::new(ActivityType::FileRead, ".env"))
        .unwrap();
    service
        .record_action(
            session,
            ActionEvent::new(ActivityType::NetworkCall, "https://paste.example.com/upload"),
        )
        .unwrap();
}

#[test]
fn env_read_then_network_call_is_exfiltration() {
    let service = AuditService::in_memory(PolicyPreset::Balanced.policy()).unwrap();
    env_then_upload(&service, "s1");

    let report = service.analyze("s1").unwrap();
    let finding = report
        .findings_for("data_exfiltration")
        .next()
        .expect("exfiltration finding");
    assert!(finding.risk_level >= RiskLevel::High);
    assert_eq!(finding.matched_record_indices, vec![0, 1]);
    assert!(report.risk_score > 0.0);
}

#[test]
fn approval_between_read_and_upload_suppresses_exfiltration() {
    let service = AuditService::in_memory(PolicyPreset::Balanced.policy()).unwrap();
    service
        .record_action("s1", ActionEvent::new(ActivityType::FileRead, ".env"))
        .unwrap();
    service
        .record_decision("s1", Effect::Allow, Some("security-review"), "upload approved")
        .unwrap();
    service
        .record_action(
            "s1",
            ActionEvent::new(ActivityType::NetworkCall, "https://paste.example.com/upload"),
        )
        .unwrap();

    let report = service.analyze("s1").unwrap();
    assert_eq!(report.findings_for("data_exfiltration").count(), 0);
}

#[test]
fn strict_blocks_the_env_read_sandbox_does_not() {
    let actions = |service: &AuditService| {
        let mut blocked = 0;
        for event in [
            ActionEvent::new(ActivityType::UserCommand, "summarize the repo"),
            ActionEvent::new(ActivityType::FileRead, ".env"),
            ActionEvent::new(ActivityType::FileRead, "src/main.rs"),
        ] {
            if !service.record_action("s1", event).unwrap().is_permitted() {
                blocked += 1;
            }
        }
        blocked
    };

    let strict = AuditService::in_memory(PolicyPreset::StrictEnterprise.policy()).unwrap();
    assert_eq!(actions(&strict), 1);
    let report = strict.generate_audit_report("s1").unwrap();
    assert_eq!(report.decisions.deny, 1);
    assert_eq!(report.policies, vec!["STRICT_ENTERPRISE"]);

    let sandbox = AuditService::in_memory(PolicyPreset::DevSandbox.policy()).unwrap();
    assert_eq!(actions(&sandbox), 0);
    assert_eq!(sandbox.generate_audit_report("s1").unwrap().decisions.deny, 0);
}

#[test]
fn higher_priority_wins_regardless_of_order() {
    let allow = Rule::new("allow-bash", 10, TargetPattern::Tool("bash".into()), Effect::Allow);
    let deny = Rule::new("deny-bash", 20, TargetPattern::Tool("bash".into()), Effect::Deny);
    for rules in [vec![allow.clone(), deny.clone()], vec![deny.clone(), allow.clone()]] {
        let mut policy = Policy::new("ordering");
        for rule in rules {
            policy = policy.with_rule(rule);
        }
        let service = AuditService::in_memory(policy).unwrap();
        let recorded = service
            .record_action("s1", ActionEvent::new(ActivityType::ToolCall, "bash: ls"))
            .unwrap();
        assert_eq!(recorded.decision.matched_rule.as_deref(), Some("deny-bash"));
    }
}

#[test]
fn simulation_matches_live_enforcement() {
    let recorder = AuditService::in_memory(PolicyPreset::DevSandbox.policy()).unwrap();
    let events = vec![
        ActionEvent::new(ActivityType::FileRead, "id_rsa"),
        ActionEvent::new(ActivityType::ToolCall, "bash: sudo apt install jq"),
        ActionEvent::new(ActivityType::NetworkCall, "https://api.example.com"),
        ActionEvent::new(ActivityType::FileWrite, "notes.md"),
        ActionEvent::new(ActivityType::ToolCall, "bash: rm -rf /"),
    ];
    for event in &events {
        recorder.record_action("s1", event.clone()).unwrap();
    }

    let balanced = PolicyPreset::Balanced.policy();
    let simulated = recorder.simulate_session(&balanced, "s1").unwrap();

    let live = AuditService::in_memory(balanced).unwrap();
    let effects: Vec<Effect> = events
        .into_iter()
        .map(|e| live.record_action("s2", e).unwrap().decision.effect)
        .collect();
    let simulated_effects: Vec<Effect> = simulated.decisions.iter().map(|d| d.effect).collect();
    assert_eq!(simulated_effects, effects);
    assert_eq!(simulated.denied, 2);
}

#[test]
fn mask_redacts_recorded_payload() {
    let service = AuditService::in_memory(PolicyPreset::Balanced.policy()).unwrap();
    let recorded = service
        .record_action(
            "s1",
            ActionEvent::new(ActivityType::FileRead, ".env.production")
                .with_attribute("content", "DATABASE_URL=postgres://admin:pw@db/prod"),
        )
        .unwrap();
    assert_eq!(recorded.decision.effect, Effect::Mask);
    assert_eq!(recorded.record.attr_str("content"), Some(MASKED));
    assert_eq!(recorded.record.attr_str("path"), Some(".env.production"));
    assert!(service.verify("s1").unwrap().valid);
}

#[test]
fn mask_reaches_secret_and_url_attributes() {
    let service = AuditService::in_memory(PolicyPreset::StrictEnterprise.policy()).unwrap();
    let recorded = service
        .record_action(
            "s1",
            ActionEvent::new(ActivityType::ToolCall, "vault read secret")
                .with_attribute("secret", "password=hunter22-prod")
                .with_attribute("url", "https://vault.internal/v1?api_key=abcdefgh12345"),
        )
        .unwrap();
    assert_eq!(recorded.decision.effect, Effect::Mask);
    assert_eq!(recorded.record.attr_str("secret"), Some(MASKED));
    let url = recorded.record.attr_str("url").unwrap();
    assert!(url.starts_with("https://vault.internal/"));
    assert!(!url.contains("abcdefgh12345"));
    assert!(service.verify("s1").unwrap().valid);
}

#[test]
fn limits_downgrade_to_deny() {
    let mut policy = Policy::new("budget").with_default(Effect::Allow);
    policy.limits.max_cost_per_session = Some(1.0);
    let service = AuditService::in_memory(policy).unwrap();

    let first = service
        .record_action("s1", ActionEvent::new(ActivityType::ToolCall, "llm: plan").with_cost(0.75))
        .unwrap();
    assert!(first.is_permitted());
    let second = service
        .record_action("s1", ActionEvent::new(ActivityType::ToolCall, "llm: code").with_cost(0.5))
        .unwrap();
    assert_eq!(second.decision.effect, Effect::Deny);
    assert!(second.decision.limit_exceeded.is_some());

    let report = service.generate_audit_report("s1").unwrap();
    assert_eq!(report.decisions.limit_denials, 1);
}

#[test]
fn policy_swap_applies_to_following_actions() {
    let service = AuditService::in_memory(PolicyPreset::DevSandbox.policy()).unwrap();
    let before = service
        .record_action("s1", ActionEvent::new(ActivityType::FileRead, ".env"))
        .unwrap();
    assert!(before.is_permitted());

    service
        .set_policy(PolicyPreset::StrictEnterprise.policy())
        .unwrap();
    assert_eq!(service.get_policy().name, "STRICT_ENTERPRISE");
    let after = service
        .record_action("s1", ActionEvent::new(ActivityType::FileRead, ".env"))
        .unwrap();
    assert!(!after.is_permitted());

    let report = service.generate_audit_report("s1").unwrap();
    assert_eq!(report.policies, vec!["DEV_SANDBOX", "STRICT_ENTERPRISE"]);

    assert!(service.set_policy(Policy::new("")).is_err());
    assert_eq!(service.get_policy().name, "STRICT_ENTERPRISE");
}

#[test]
fn privilege_escalation_is_flagged() {
    let service = AuditService::in_memory(PolicyPreset::DevSandbox.policy()).unwrap();
    let actor = Actor::new("builder");
    service
        .record_action_as("s1", &actor, ActionEvent::new(ActivityType::ToolCall, "bash: make"))
        .unwrap();
    service
        .record_action_as(
            "s1",
            &actor,
            ActionEvent::new(ActivityType::ToolCall, "bash: sudo chmod u+s /usr/local/bin/tool"),
        )
        .unwrap();

    let report = service.analyze("s1").unwrap();
    assert!(report.findings_for("privilege_escalation").count() >= 1);
}

#[test]
fn concurrent_sessions_record_independently() {
    let service = Arc::new(AuditService::in_memory(PolicyPreset::Balanced.policy()).unwrap());
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                let session = format!("session-{}", t);
                for i in 0..25 {
                    service
                        .record_action(
                            &session,
                            ActionEvent::new(ActivityType::FileWrite, format!("out-{}.txt", i)),
                        )
                        .unwrap();
                }
                session
            })
        })
        .collect();

    for handle in handles {
        let session = handle.join().unwrap();
        let result = service.verify(&session).unwrap();
        assert!(result.valid);
        assert_eq!(result.record_count, 25);
    }
}

#[test]
fn live_engine_and_service_agree() {
    let policy = PolicyPreset::StrictEnterprise.policy();
    let engine = PolicyEngine::new(policy.clone()).unwrap();
    let service = AuditService::in_memory(policy).unwrap();

    let direct = engine.evaluate(&PolicyAction::new("s1", "file_read").with_path("deploy.pem"));
    let via_service = service
        .record_action("s1", ActionEvent::new(ActivityType::FileRead, "deploy.pem"))
        .unwrap()
        .decision;
    assert_eq!(direct.effect, via_service.effect);
    assert_eq!(direct.matched_rule, via_service.matched_rule);
}
