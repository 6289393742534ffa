//! CLI command implementations
//!
//! Each command opens the file-backed permission store, builds the pipeline
//! service, and prints results for operator consumption.

use crate::{Cli, Commands, GrantArgs, RunArgs};
use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stratbox_auth::{AccessDecision, AccessLogFilter, FileStore};
use stratbox_common::{GrantId, PermissionType, ResourceType, StratboxConfig, TerminationReason};
use stratbox_core::SandboxService;
use stratbox_sandbox::{Interpreter, ResourceLimits};
use stratbox_scan::Scanner;

pub async fn dispatch(cli: Cli) -> Result<()> {
    let (config, data) = (cli.config.as_path(), cli.data_dir.as_path());
    match cli.command {
        Commands::Run(args) => run(config, data, args).await,
        Commands::Scan { file, json } => scan(config, file, json),
        Commands::CreatePrincipal { id, credential, roles } => {
            let service = open_service(config, data).await?;
            let roles: Vec<&str> = roles.iter().map(String::as_str).collect();
            service.create_principal(&id, &credential, &roles).await?;
            println!("created principal {id}");
            Ok(())
        }
        Commands::AssignRole { principal, role } => {
            let service = open_service(config, data).await?;
            service.assign_role(&principal, &role).await?;
            println!("assigned role {role} to {principal}");
            Ok(())
        }
        Commands::Grant(args) => grant(config, data, args).await,
        Commands::Revoke { grant_id } => {
            let service = open_service(config, data).await?;
            let id = GrantId(
                uuid::Uuid::parse_str(&grant_id)
                    .with_context(|| format!("invalid grant id {grant_id}"))?,
            );
            if service.revoke_grant(id).await? {
                println!("revoked grant {grant_id}");
            } else {
                println!("no such grant {grant_id}");
            }
            Ok(())
        }
        Commands::AccessLog { principal, decision, limit } => {
            access_log(config, data, principal, decision, limit).await
        }
    }
}

async fn open_service(config_path: &Path, data_dir: &Path) -> Result<SandboxService> {
    let config = StratboxConfig::load_or_default(config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;
    let store = FileStore::open(data_dir)
        .await
        .with_context(|| format!("opening permission store in {}", data_dir.display()))?;
    Ok(SandboxService::new(&config, Arc::new(store)))
}

fn read_code(file: Option<PathBuf>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("reading code unit from {}", path.display())),
        None => {
            let mut code = String::new();
            std::io::stdin()
                .read_to_string(&mut code)
                .context("reading code unit from stdin")?;
            Ok(code)
        }
    }
}

fn parse_permission(name: &str) -> Result<PermissionType> {
    Ok(match name {
        "code-execute" => PermissionType::CodeExecute,
        "file-read" => PermissionType::FileRead,
        "file-write" => PermissionType::FileWrite,
        "network-access" => PermissionType::NetworkAccess,
        "strategy-manage" => PermissionType::StrategyManage,
        "admin-manage" => PermissionType::AdminManage,
        other => return Err(anyhow!("unknown permission type: {other}")),
    })
}

fn parse_resource(name: &str) -> Result<ResourceType> {
    Ok(match name {
        "process" => ResourceType::Process,
        "file" => ResourceType::File,
        "network" => ResourceType::Network,
        "strategy" => ResourceType::Strategy,
        "system" => ResourceType::System,
        other => return Err(anyhow!("unknown resource type: {other}")),
    })
}

async fn run(config: &Path, data: &Path, args: RunArgs) -> Result<()> {
    let service = open_service(config, data).await?;
    let code = read_code(args.file)?;

    let token = service
        .authenticate(&args.principal, &args.credential)
        .await
        .context("authentication failed")?;

    let mut limits = ResourceLimits::default();
    if let Some(secs) = args.wall_secs {
        limits = limits.with_wall_secs(secs);
    }
    if let Some(mb) = args.memory_mb {
        limits = limits.with_memory_bytes(mb * 1024 * 1024);
    }
    let interpreter = match args.interpreter.as_str() {
        "shell" => Interpreter::Shell,
        _ => Interpreter::Python,
    };

    let outcome = service
        .run_user_code(&token, &code, interpreter, Some(limits))
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    let result = &outcome.execution;
    println!(
        "execution {}  reason={}  exit={}  duration={}ms cpu={}ms",
        result.id,
        result.reason,
        result.exit_code.map_or_else(|| "-".into(), |c| c.to_string()),
        result.duration_ms,
        result.cpu_time_ms
    );
    if let Some(scan) = &outcome.scan {
        println!(
            "scan       severity={:?} findings={} blocking={}",
            scan.severity,
            scan.findings.len(),
            scan.blocking
        );
    }
    if let Some(summary) = &outcome.summary {
        println!(
            "resources  peak_mem={:.0}B avg_cpu={:.1}% snapshots={} breaches={}",
            summary.memory_bytes.peak,
            summary.cpu_percent.average,
            summary.snapshots.len(),
            summary.breach_count
        );
    }
    if !result.stdout.is_empty() {
        println!("--- stdout ---\n{}", result.stdout);
    }
    if !result.stderr.is_empty() {
        println!("--- stderr ---\n{}", result.stderr);
    }

    if result.reason == TerminationReason::Completed && result.success {
        Ok(())
    } else {
        Err(anyhow!("execution finished with reason {}", result.reason))
    }
}

fn scan(config_path: &Path, file: Option<PathBuf>, json: bool) -> Result<()> {
    let config = StratboxConfig::load_or_default(config_path)?;
    let code = read_code(file)?;
    let result = Scanner::with_threshold(config.block_severity_threshold).scan(&code);

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!(
        "severity={:?} blocking={} findings={}",
        result.severity,
        result.blocking,
        result.findings.len()
    );
    for finding in &result.findings {
        println!(
            "  line {:>4}  {:<9?}  {}  {}",
            finding.line, finding.severity, finding.pattern_id, finding.description
        );
    }
    Ok(())
}

async fn grant(config: &Path, data: &Path, args: GrantArgs) -> Result<()> {
    let service = open_service(config, data).await?;
    let grant_id = service
        .grant_permission(
            &args.from,
            &args.to,
            parse_permission(&args.permission)?,
            parse_resource(&args.resource)?,
            args.scope,
            args.expires_secs.map(chrono::Duration::seconds),
        )
        .await?;
    println!("issued grant {grant_id}");
    Ok(())
}

async fn access_log(
    config: &Path,
    data: &Path,
    principal: Option<String>,
    decision: Option<String>,
    limit: usize,
) -> Result<()> {
    let service = open_service(config, data).await?;
    let filter = AccessLogFilter {
        principal,
        decision: decision.map(|d| {
            if d == "allow" {
                AccessDecision::Allow
            } else {
                AccessDecision::Deny
            }
        }),
        since: None,
        until: None,
    };
    let entries = service.query_access_log(&filter).await?;
    let start = entries.len().saturating_sub(limit);
    for entry in &entries[start..] {
        println!(
            "{}  {:<16}  {:?} on {:?}{}  {:?}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.principal,
            entry.permission,
            entry.resource,
            entry
                .scope
                .as_deref()
                .map(|s| format!(" [{s}]"))
                .unwrap_or_default(),
            entry.decision
        );
    }
    Ok(())
}
