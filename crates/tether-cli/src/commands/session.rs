use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};

use tether::agent::Agent;
use tether::providers::configs::OpenAiProviderConfig;
use tether::providers::factory::{self, ProviderType};
use tether::session::Session as ProviderSession;
use tether::toolkit::DemoToolkit;
use tether::transport::{ChildProcessTransport, TcpTransport};

use crate::profile::{self, Profile};
use crate::prompt::cliclack::CliclackPrompt;
use crate::session::{session_file, Session};
use crate::Cli;

/// Assemble the agent and REPL from flags, profile and environment.
/// Precedence: explicit flag, then profile, then provider defaults.
pub async fn build_session(cli: &Cli, name: Option<String>) -> Result<Session> {
    let profile = match &cli.profile {
        Some(profile_name) => profile::load_profile(profile_name)?
            .with_context(|| format!("no profile named '{}'", profile_name))?,
        None => Profile::default(),
    };

    let provider_type = resolve_provider_type(cli, &profile)?;
    let api_key = cli
        .api_key
        .clone()
        .or_else(|| std::env::var(provider_type.api_key_var()).ok())
        .with_context(|| {
            format!(
                "API key must be provided via --api-key or {}",
                provider_type.api_key_var()
            )
        })?;
    let host = cli
        .host
        .clone()
        .or_else(|| profile.host.clone())
        .unwrap_or_else(|| provider_type.default_host().to_string());
    let model = cli
        .model
        .clone()
        .or_else(|| profile.model.clone())
        .unwrap_or_else(|| provider_type.default_model().to_string());

    let config = OpenAiProviderConfig::new(host, api_key, model);
    let provider = factory::get_provider(provider_type, config)?;

    let (tap, events) = tokio::sync::mpsc::unbounded_channel();
    let mut agent = Agent::new(provider).with_event_tap(tap);
    if let Some(system) = &cli.system {
        agent = agent.with_system_prompt(system);
    }
    if let Some(max_turns) = cli.max_turns {
        agent = agent.with_max_turns(max_turns);
    }

    let mut tool_commands = profile.tool_servers.clone();
    tool_commands.extend(cli.tool_servers.iter().cloned());
    for command in &tool_commands {
        let transport = ChildProcessTransport::spawn_command_line(command)
            .with_context(|| format!("failed to spawn tool server '{}'", command))?;
        let session = ProviderSession::open(Box::new(transport))
            .await
            .with_context(|| format!("failed to open session with '{}'", command))?;
        agent.register_session(Arc::new(session))?;
    }
    for addr in &cli.tool_server_addrs {
        let transport = TcpTransport::connect(addr.as_str())
            .await
            .with_context(|| format!("failed to connect to tool server at {}", addr))?;
        let session = ProviderSession::open(Box::new(transport))
            .await
            .with_context(|| format!("failed to open session with {}", addr))?;
        agent.register_session(Arc::new(session))?;
    }

    if agent.registry().is_empty() {
        tracing::info!("no tool providers configured, using the built-in demo toolkit");
        agent.register_toolkit(Arc::new(DemoToolkit::new()))?;
    }

    let session_file = session_file::session_file_path(name)?;
    Ok(Session::new(
        agent,
        Box::new(CliclackPrompt::new()),
        session_file,
        events,
    ))
}

fn resolve_provider_type(cli: &Cli, profile: &Profile) -> Result<ProviderType> {
    if let Some(variant) = cli.provider {
        return Ok(variant.into());
    }
    if let Some(name) = &profile.provider {
        return ProviderType::from_str(name)
            .map_err(|_| anyhow::anyhow!("unknown provider '{}' in profile", name));
    }
    Ok(ProviderType::OpenAi)
}
