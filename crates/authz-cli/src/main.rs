mod cli;
mod config;
mod input;

use std::path::Path;

use abac_engine::{
    evaluate_policy, loader, AuthorizationDecision, AuthorizationResponse, PolicyBundle,
    PolicyEngine, PolicySource, RequestContext,
};
use anyhow::{Context, Result};
use audit_log::{
    AuditEntry, AuditEventType, AuditSink, AuditSource, DecisionRecord, EvaluationErrorRecord,
};
use clap::Parser;
use tracing::{info, warn};

use crate::cli::{Cli, Command};
use crate::config::{Config, LoggingConfig};

const COMPONENT: &str = "authz-cli";

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args.
    let cli = Cli::parse();

    // 2. Load config, then merge CLI overrides.
    let loaded = config::load(&cli.config)?;
    let config_found = loaded.is_some();
    let mut cfg = loaded.unwrap_or_default();
    if let Some(policy) = cli.command.policy_override() {
        cfg.policy_file = policy.clone();
    }

    // 3. Init tracing. Logs go to stderr; stdout carries command output.
    init_tracing(&cfg.logging);
    if !config_found {
        warn!(
            path = %cli.config.display(),
            "configuration file not found; using defaults"
        );
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        policy_file = %cfg.policy_file.display(),
        "authz starting"
    );

    // 4. Start the audit trail.
    let (audit, audit_handle) = AuditSink::start(&cfg.logging.audit_log_path)
        .await
        .with_context(|| {
            format!(
                "failed to open audit log {}",
                cfg.logging.audit_log_path.display()
            )
        })?;
    audit
        .log(AuditEntry::new(
            AuditEventType::ProcessStarted,
            AuditSource::new(COMPONENT),
            serde_json::json!({ "version": env!("CARGO_PKG_VERSION") }),
        ))
        .await;

    // 5. Run the command, then flush the audit trail whatever the outcome.
    let result = run(&cli.command, &cfg, &audit).await;

    drop(audit);
    if let Err(err) = audit_handle.await {
        warn!(%err, "audit writer task failed");
    }

    result
}

fn init_tracing(logging: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(command: &Command, cfg: &Config, audit: &AuditSink) -> Result<()> {
    match command {
        Command::Validate { .. } => {
            let bundle = load_bundle(cfg, audit).await?;
            print_summary(&cfg.policy_file, &bundle);
            Ok(())
        }
        Command::Check { request, .. } => {
            let bundle = load_bundle(cfg, audit).await?;
            check(PolicyEngine::new(bundle), request, audit).await
        }
        Command::Explain { rule, request, .. } => {
            let bundle = load_bundle(cfg, audit).await?;
            explain(&bundle, rule, request)
        }
    }
}

/// Load the configured bundle and record the outcome in the audit trail.
async fn load_bundle(cfg: &Config, audit: &AuditSink) -> Result<PolicyBundle> {
    let policy_file = cfg.policy_file.display().to_string();

    match loader::load_bundle(&cfg.policy_file, &cfg.validation) {
        Ok(bundle) => {
            info!(
                policy_file = %policy_file,
                endpoints = bundle.endpoints.len(),
                policies = bundle.policies.len(),
                "policy bundle loaded"
            );
            audit
                .log(AuditEntry::new(
                    AuditEventType::BundleLoaded,
                    AuditSource::new(COMPONENT),
                    serde_json::json!({
                        "policy_file": policy_file,
                        "version": bundle.version,
                        "endpoints": bundle.endpoints.len(),
                        "policies": bundle.policies.len(),
                    }),
                ))
                .await;
            Ok(bundle)
        }
        Err(err) => {
            audit
                .log(AuditEntry::new(
                    AuditEventType::BundleRejected,
                    AuditSource::new(COMPONENT),
                    serde_json::json!({
                        "policy_file": policy_file,
                        "error": format!("{err:#}"),
                    }),
                ))
                .await;
            Err(err)
        }
    }
}

fn print_summary(path: &Path, bundle: &PolicyBundle) {
    println!(
        "{}: valid policy bundle (version {}, {} endpoint(s), {} policy rule(s))",
        path.display(),
        bundle.version,
        bundle.endpoints.len(),
        bundle.policies.len()
    );
    for endpoint in &bundle.endpoints {
        let rules = bundle.rules_for(endpoint.id);
        let fallback = if endpoint.deny_unauthorized {
            "deny"
        } else {
            "allow"
        };
        println!(
            "  {} {}: {} rule(s), unmatched requests {}",
            endpoint.method,
            endpoint.path,
            rules.len(),
            fallback
        );
        for rule in rules {
            println!("    [{}] {} ({})", rule.effect, rule.name, rule.id);
        }
    }
}

async fn check(engine: PolicyEngine, request_path: &Path, audit: &AuditSink) -> Result<()> {
    let file = input::load_request(request_path)?;
    let mut source = AuditSource::new(COMPONENT)
        .with_request(file.request.method.as_str(), file.request.path.clone());
    if let Some(subject_id) = file.subject_id() {
        source = source.with_subject(subject_id);
    }

    let response = match engine.decide_request(file.subject, &file.request) {
        Ok(decision) => {
            audit_decision(audit, &decision, source).await;
            decision.to_response()
        }
        Err(err) => {
            info!(%err, "authorization requested for unregistered endpoint");
            let response = AuthorizationResponse::denied(err.to_string());
            audit
                .log(
                    AuditEntry::new(
                        AuditEventType::AccessDenied,
                        source,
                        serde_json::json!({}),
                    )
                    .with_decision(DecisionRecord {
                        allowed: false,
                        reason: response.reason.clone(),
                        policy_id: None,
                        policy_name: None,
                        evaluation_errors: Vec::new(),
                    }),
                )
                .await;
            response
        }
    };

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

/// Record a decision, with one extra entry per rule that failed to evaluate.
/// Raw evaluation errors only ever reach the audit trail.
async fn audit_decision(audit: &AuditSink, decision: &AuthorizationDecision, source: AuditSource) {
    for failure in &decision.errors {
        audit
            .log(AuditEntry::new(
                AuditEventType::PolicyEvaluationFailed,
                source.clone(),
                serde_json::json!({
                    "policy_id": failure.rule.id,
                    "policy_name": failure.rule.name,
                    "error": failure.error.to_string(),
                }),
            ))
            .await;
    }

    let event_type = if decision.is_allowed() {
        AuditEventType::AccessAllowed
    } else {
        AuditEventType::AccessDenied
    };
    let record = DecisionRecord {
        allowed: decision.is_allowed(),
        reason: decision.reason.clone(),
        policy_id: decision.matched_rule.as_ref().map(|rule| rule.id),
        policy_name: decision.matched_rule.as_ref().map(|rule| rule.name.clone()),
        evaluation_errors: decision
            .errors
            .iter()
            .map(|failure| EvaluationErrorRecord {
                policy_id: failure.rule.id,
                policy_name: failure.rule.name.clone(),
                error: failure.error.to_string(),
            })
            .collect(),
    };
    audit
        .log(AuditEntry::new(event_type, source, serde_json::json!({})).with_decision(record))
        .await;
}

fn explain(bundle: &PolicyBundle, rule_key: &str, request_path: &Path) -> Result<()> {
    let rule = input::find_rule(bundle, rule_key)?;
    let file = input::load_request(request_path)?;

    let targets_rule = bundle
        .endpoint(file.request.method, &file.request.path)
        .is_some_and(|endpoint| endpoint.id == rule.end_point_id);
    if !targets_rule {
        warn!(
            rule = %rule.name,
            method = %file.request.method,
            path = %file.request.path,
            "request does not target the endpoint this rule is attached to"
        );
    }

    let ctx = RequestContext::from_request(file.subject, &file.request);
    let evaluation = evaluate_policy(rule, &ctx);
    println!("{}", serde_json::to_string_pretty(&evaluation)?);
    Ok(())
}
