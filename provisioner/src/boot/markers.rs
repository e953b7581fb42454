//! Serial console markers echoed by the boot payload

/// Printed once the payload has run to the end
pub const BOOT_COMPLETE: &str = "CLAW_BOOT_COMPLETE";

/// Every marker line starts with this prefix
pub const PREFIX: &str = "==> ";

const PLUGIN_INSTALLED: &str = "plugin installed: ";
const PLUGIN_FAILED: &str = "plugin install failed: ";
const SKILL_INSTALLED: &str = "skill installed: ";
const SKILL_FAILED: &str = "skill install failed: ";
const HEALTH: &str = "agent health: ";

/// Outcome of one install as reported on the console
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMark {
    Installed,
    Failed,
    Missing,
}

/// Marker payloads (text after the `==> ` prefix) in console order. Guest
/// agents prefix lines with their own tags so the marker may appear mid-line.
fn marks(console: &str) -> impl Iterator<Item = &str> {
    console
        .lines()
        .filter_map(|line| line.find(PREFIX).map(|i| line[i + PREFIX.len()..].trim_end()))
}

pub fn boot_complete(console: &str) -> bool {
    marks(console).any(|m| m == BOOT_COMPLETE)
}

fn install_mark(console: &str, ok: &str, failed: &str, id: &str) -> InstallMark {
    let mut mark = InstallMark::Missing;
    for m in marks(console) {
        if m.strip_prefix(ok) == Some(id) {
            mark = InstallMark::Installed;
        } else if m.strip_prefix(failed) == Some(id) {
            mark = InstallMark::Failed;
        }
    }
    mark
}

/// Latest plugin install mark for `id`
pub fn plugin(console: &str, id: &str) -> InstallMark {
    install_mark(console, PLUGIN_INSTALLED, PLUGIN_FAILED, id)
}

/// Latest skill install mark for `id`
pub fn skill(console: &str, id: &str) -> InstallMark {
    install_mark(console, SKILL_INSTALLED, SKILL_FAILED, id)
}

/// Service state from the most recent health line, e.g. `active`
pub fn last_health(console: &str) -> Option<&str> {
    marks(console)
        .filter_map(|m| m.strip_prefix(HEALTH))
        .last()
        .map(str::trim)
}
