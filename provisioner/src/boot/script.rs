//! Bash fragments of the boot payload
//!
//! Static fragments are plain string constants so their braces and `$`
//! survive untouched; only the dynamic lines go through `format!`.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Map, Value};

use super::BootConfig;
use crate::errors::ClawError;
use crate::registry::{env_var_name, Registry};

pub const SHEBANG: &str = "#!/usr/bin/env bash";

/// Pinned agent runtime release
pub const RUNTIME_VERSION: &str = "2026.2.17";

const PREAMBLE: &str = r#"set -euo pipefail

AGENT_DIR="/opt/openclaw"
INSTALL_MARKER="/opt/openclaw/.installed"
STATE_DIR="/root/.openclaw"
REPO_BASE="https://raw.githubusercontent.com/Adawodu/dynoclaw/main"

log() { echo "==> $*"; }
"#;

const RUNTIME: &str = r#"
# Runtime, first boot only
if [ ! -f "${INSTALL_MARKER}" ]; then
  log "Installing dependencies..."
  apt-get update -y
  apt-get install -y git curl build-essential python3 gettext-base openssl

  log "Installing Node 22..."
  curl -fsSL https://deb.nodesource.com/setup_22.x | bash -
  apt-get install -y nodejs

  log "Installing OpenClaw..."
  npm install -g "openclaw@${RUNTIME_VERSION}"

  mkdir -p "${AGENT_DIR}"
  touch "${INSTALL_MARKER}"
fi
"#;

const FETCH_SECRET: &str = r#"
fetch_secret() {
  gcloud secrets versions access latest --secret="$1" --project="${PROJECT_ID}" 2>/dev/null
}

log "Fetching secrets..."
"#;

const INSTALL_PLUGIN: &str = r#"
install_plugin() {
  local id="$1"
  local dest="${STATE_DIR}/extensions/${id}"
  mkdir -p "${dest}"
  for f in package.json index.ts openclaw.plugin.json; do
    curl -sfL "${REPO_BASE}/plugins/${id}/${f}" -o "${dest}/${f}" 2>/dev/null || rm -f "${dest}/${f}"
  done
  if [ -f "${dest}/openclaw.plugin.json" ] && (cd "${dest}" && npm install --omit=dev >/dev/null 2>&1); then
    log "plugin installed: ${id}"
  else
    rm -rf "${dest}"
    log "plugin install failed: ${id}"
  fi
}

log "Installing plugins..."
"#;

const INSTALL_SKILL: &str = r#"
install_skill() {
  local id="$1"
  local cron="${2:-}"
  local dir="${STATE_DIR}/skills/${id}"
  mkdir -p "${dir}"
  if curl -sfL "${REPO_BASE}/skills/${id}/SKILL.md" -o "${dir}/SKILL.md"; then
    if [ -n "${cron}" ]; then
      openclaw cron add --name "${id}" --cron "${cron}" --message "/${id}" >/dev/null 2>&1 || true
    fi
    log "skill installed: ${id}"
  else
    log "skill install failed: ${id}"
  fi
}

log "Installing skills..."
"#;

const AUTH_PROFILES: &str = r#"
log "Writing auth profiles..."
AUTH_FILE="${STATE_DIR}/agents/main/agent/auth-profiles.json"
mkdir -p "$(dirname "${AUTH_FILE}")"
{
  printf '{"version":1,"profiles":{'
  SEP=""
  for entry in google:GOOGLE_AI_API_KEY anthropic:ANTHROPIC_API_KEY openai:OPENAI_API_KEY openrouter:OPENROUTER_API_KEY; do
    provider="${entry%%:*}"
    var="${entry#*:}"
    if [ -n "${!var:-}" ]; then
      printf '%s"%s:manual":{"provider":"%s","token":"%s"}' "${SEP}" "${provider}" "${provider}" "${!var}"
      SEP=","
    fi
  done
  printf '}}'
} > "${AUTH_FILE}"
chmod 600 "${AUTH_FILE}"
"#;

const SERVICE_START: &str = r#"
systemctl daemon-reload
systemctl enable openclaw
systemctl restart openclaw
log "OpenClaw gateway started"

# First boot starts under heavy I/O from plugin installs; restart once it settles
if [ ! -f "${AGENT_DIR}/.grace-restarted" ]; then
  (sleep 90 && systemctl restart openclaw && touch "${AGENT_DIR}/.grace-restarted") &
  disown
fi

# Health lines for the control plane, for ten minutes after boot
(for _ in $(seq 1 30); do sleep 20; log "agent health: $(systemctl is-active openclaw || true)"; done) &
disown

sleep 5
log "agent health: $(systemctl is-active openclaw || true)"
log "CLAW_BOOT_COMPLETE"
"#;

pub fn preamble() -> String {
    format!("{}RUNTIME_VERSION=\"{}\"\n", PREAMBLE, RUNTIME_VERSION)
}

pub fn runtime() -> &'static str {
    RUNTIME
}

/// Fetch every known slot by name and write the 0600 env file
pub fn secrets(project_id: &str, names: &BTreeSet<&'static str>) -> String {
    let mut out = format!("\n# Secrets\nPROJECT_ID=\"{}\"\n", project_id);
    out.push_str(FETCH_SECRET);
    for name in names {
        out.push_str(&format!(
            "{}=\"$(fetch_secret {} || true)\"\n",
            env_var_name(name),
            name
        ));
    }

    out.push_str("\numask 077\ncat > /etc/openclaw.env <<ENVFILE\n");
    for name in names {
        let var = env_var_name(name);
        out.push_str(&format!("{}=${{{}}}\n", var, var));
    }
    out.push_str("GEMINI_API_KEY=${GOOGLE_AI_API_KEY}\nENVFILE\nchmod 600 /etc/openclaw.env\n");
    out
}

pub fn plugins(ids: &BTreeSet<String>) -> String {
    let mut out = String::from(INSTALL_PLUGIN);
    for id in ids {
        out.push_str(&format!("install_plugin {}\n", id));
    }
    out
}

/// Install calls with the effective cron: override, then catalog default
pub fn skills(skills: &BTreeMap<String, Option<String>>, registry: &Registry) -> String {
    let mut out = String::from(INSTALL_SKILL);
    for (id, cron_override) in skills {
        let cron = cron_override
            .as_deref()
            .or_else(|| registry.skill(id).and_then(|s| s.cron));
        match cron {
            Some(cron) => out.push_str(&format!("install_skill {} '{}'\n", id, cron)),
            None => out.push_str(&format!("install_skill {}\n", id)),
        }
    }
    out
}

/// Agent config JSON with `${VAR}` placeholders, written through a quoted
/// heredoc and expanded by `envsubst` for the listed variables only
pub fn agent_config(
    config: &BootConfig,
    registry: &Registry,
    secret_names: &BTreeSet<&'static str>,
) -> Result<String, ClawError> {
    let json = serde_json::to_string_pretty(&agent_config_json(config, registry))?;

    let mut vars: Vec<String> = vec!["${GATEWAY_TOKEN}".to_string()];
    vars.extend(secret_names.iter().map(|n| format!("${{{}}}", env_var_name(n))));
    let exports: Vec<String> = secret_names.iter().map(|n| env_var_name(n)).collect();

    let mut out = String::from("\nlog \"Writing agent configuration...\"\n");
    out.push_str("GATEWAY_TOKEN=\"$(openssl rand -hex 32)\"\n");
    out.push_str(&format!("export GATEWAY_TOKEN {}\n", exports.join(" ")));
    out.push_str("mkdir -p \"${STATE_DIR}\"\n");
    out.push_str("cat > \"${STATE_DIR}/openclaw.json.tmpl\" <<'CFGEOF'\n");
    out.push_str(&json);
    out.push_str("\nCFGEOF\n");
    out.push_str(&format!(
        "envsubst '{}' < \"${{STATE_DIR}}/openclaw.json.tmpl\" > \"${{STATE_DIR}}/openclaw.json\"\n",
        vars.join(" ")
    ));
    out.push_str("rm -f \"${STATE_DIR}/openclaw.json.tmpl\"\nchmod 600 \"${STATE_DIR}/openclaw.json\"\n");
    Ok(out)
}

fn agent_config_json(config: &BootConfig, registry: &Registry) -> Value {
    let mut models = Map::new();
    for model in std::iter::once(&config.models.primary).chain(config.models.fallbacks.iter()) {
        models.insert(model.clone(), json!({}));
    }

    let mut identity = Map::new();
    identity.insert("name".into(), json!(config.branding.bot_name));
    identity.insert("personality".into(), json!(config.branding.personality));
    if let Some(prompt) = &config.branding.system_prompt {
        identity.insert("systemPrompt".into(), json!(prompt));
    }

    let mut entries = Map::new();
    for plugin in config.plugins.iter().filter_map(|id| registry.plugin(id)) {
        let mut plugin_config = Map::new();
        for key in plugin.keys() {
            plugin_config.insert(
                key.config_key.to_string(),
                json!(format!("${{{}}}", env_var_name(key.secret_name))),
            );
        }
        entries.insert(
            plugin.id.to_string(),
            json!({ "enabled": true, "config": plugin_config }),
        );
    }

    json!({
        "meta": { "lastTouchedVersion": RUNTIME_VERSION },
        "agents": {
            "defaults": {
                "model": {
                    "primary": config.models.primary,
                    "fallbacks": config.models.fallbacks,
                },
                "models": models,
                "identity": identity,
            }
        },
        "channels": {
            "telegram": {
                "enabled": true,
                "dmPolicy": "open",
                "botToken": "${TELEGRAM_BOT_TOKEN}",
                "allowFrom": ["*"],
                "groupPolicy": "open",
            }
        },
        "gateway": {
            "mode": "local",
            "bind": "loopback",
            "auth": { "token": "${GATEWAY_TOKEN}" },
        },
        "plugins": {
            "allow": config.plugins,
            "entries": entries,
        },
    })
}

pub fn auth_profiles() -> &'static str {
    AUTH_PROFILES
}

/// systemd unit named after the bot, then start and report
pub fn service(bot_name: &str) -> String {
    let mut out = String::from("\ncat > /etc/systemd/system/openclaw.service <<'UNIT'\n[Unit]\n");
    out.push_str(&format!(
        "Description=OpenClaw Gateway - {}\n",
        unit_description(bot_name)
    ));
    out.push_str(
        "After=network-online.target
Wants=network-online.target

[Service]
Type=simple
EnvironmentFile=/etc/openclaw.env
ExecStartPre=-/usr/bin/env openclaw security audit
ExecStart=/usr/bin/env openclaw gateway run --bind loopback
Restart=always
RestartSec=10

[Install]
WantedBy=multi-user.target
UNIT
",
    );
    out.push_str(SERVICE_START);
    out
}

/// Single line, with systemd `%` specifiers escaped
fn unit_description(bot_name: &str) -> String {
    bot_name
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .replace('%', "%%")
}
