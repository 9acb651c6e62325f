use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use rustyline::DefaultEditor;
use tracing::{info, warn};

use crate::client::StarClient;
use crate::config::ClientConfig;
use crate::net::LoginError;

pub fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} --connect <url> [--user <u>] [--password <p>] [--star <name>] [--instance <id>] [--config <file>]\n\nFlags:\n  --connect <url>      Dashboard base URL of a cluster member (default from config or STARCLIENT_BASE_URL)\n  --user <u>           Username for password login (prompted when needed; defaults to the OS user)\n  --password <p>       Password for password login (prompted when needed)\n  --star <name>        Route requests and events to this cluster member\n  --instance <id>      Only receive events for this service instance\n  --config <file>      JSON client configuration\n  -h, --help           Show this help\n\nEvents are printed one per line until Ctrl-C."
    );
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchArgs {
    pub connect: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub star: Option<String>,
    pub instance: Option<String>,
    pub config: Option<PathBuf>,
}

impl WatchArgs {
    /// Parse `args` (program name first). `Ok(None)` means help was requested.
    pub fn parse(args: &[String]) -> Result<Option<Self>> {
        let mut out = WatchArgs::default();
        let mut i = 1usize;
        while i < args.len() {
            let flag = args[i].as_str();
            let mut value = || -> Result<String> {
                i += 1;
                args.get(i).cloned().ok_or_else(|| anyhow!("{} needs a value", flag))
            };
            match flag {
                "--connect" => out.connect = Some(value()?),
                "--user" => out.user = Some(value()?),
                "--password" => out.password = Some(value()?),
                "--star" => out.star = Some(value()?),
                "--instance" => out.instance = Some(value()?),
                "--config" => out.config = Some(PathBuf::from(value()?)),
                "-h" | "--help" => return Ok(None),
                other => return Err(anyhow!("unknown argument '{}'", other)),
            }
            i += 1;
        }
        Ok(Some(out))
    }

    pub fn client_config(&self) -> Result<ClientConfig> {
        let mut cfg = ClientConfig::load(self.config.as_deref())?;
        if let Some(url) = &self.connect {
            let mut fresh = ClientConfig::new(url.clone());
            fresh.instance_id = cfg.instance_id.take();
            fresh.state_file = cfg.state_file.take();
            fresh.no_auto_login = fresh.no_auto_login || cfg.no_auto_login;
            fresh.ping_interval_ms = cfg.ping_interval_ms;
            fresh.reconnect_interval_ms = cfg.reconnect_interval_ms;
            fresh.poll_retry_delay_ms = cfg.poll_retry_delay_ms;
            fresh.sso_loop_guard_ms = cfg.sso_loop_guard_ms;
            fresh.debounce_ms = cfg.debounce_ms;
            fresh.throttle_ms = cfg.throttle_ms;
            cfg = fresh;
        }
        if let Some(instance) = &self.instance {
            cfg.instance_id = Some(instance.clone());
        }
        Ok(cfg)
    }
}

/// Ask for whatever is missing. The username defaults to the OS user.
pub async fn prompt_credentials(user: Option<String>, password: Option<String>) -> Result<(String, String)> {
    tokio::task::spawn_blocking(move || -> Result<(String, String)> {
        let mut rl = DefaultEditor::new().context("terminal unavailable for prompting")?;
        let user = match user {
            Some(u) => u,
            None => {
                let default = whoami::username();
                let typed = rl.readline(&format!("user [{}]: ", default))?;
                if typed.trim().is_empty() { default } else { typed.trim().to_string() }
            }
        };
        let password = match password {
            Some(p) => p,
            None => rl.readline("password: ")?,
        };
        Ok((user, password))
    })
    .await?
}

/// Build the client and get it a session: stored cookie or SSO first, password login when
/// that is not enough.
pub async fn connect(args: &WatchArgs) -> Result<StarClient> {
    let cfg = args.client_config()?;
    info!(target: "starclient::cli", base_url = %cfg.base_url, instance = cfg.instance_id.as_deref().unwrap_or("-"), "connecting");
    let client = StarClient::from_config(cfg)?;
    if let Some(star) = &args.star {
        client.select_star(Some(star));
    }

    let explicit = args.user.is_some() || args.password.is_some();
    let user = if explicit {
        let (u, p) = prompt_credentials(args.user.clone(), args.password.clone()).await?;
        client.login_with(&u, &p).await
    } else {
        match client.login().user_info().await {
            Err(LoginError::MissingCredentials) | Err(LoginError::Rejected(_)) => {
                let (u, p) = prompt_credentials(None, None).await?;
                client.login_with(&u, &p).await
            }
            other => other,
        }
    }
    .map_err(|e| anyhow!("login failed: {}", e))?;
    info!(target: "starclient::cli", user = %user.name, admin = client.session().is_admin(), "logged in");

    if let Err(e) = client.refresh_stars().await {
        warn!(target: "starclient::cli", "could not list cluster members: {}", e);
    }
    match client.local_star_info().await {
        Ok(star) => info!(target: "starclient::cli", star = %star.star_name, url = %star.star_url, "attached"),
        Err(e) => warn!(target: "starclient::cli", "local star unknown: {}", e),
    }
    Ok(client)
}
