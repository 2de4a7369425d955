/// Bootstrap payload rendering
///
/// A cloud instance is handed one opaque payload at creation time that
/// installs MongoDB and starts every process placed on it. The
/// orchestrator only orders and concatenates fragments; how a single
/// process fragment looks is the renderer's business.
use crate::config::{OsFamily, Role};

const MONGOD_LINUX: &str = include_str!("templates/install-mongod-linux.sh");
const MONGOS_LINUX: &str = include_str!("templates/install-mongos-linux.sh");
const MONGOD_WINDOWS: &str = include_str!("templates/install-mongod-windows.ps1");
const MONGOS_WINDOWS: &str = include_str!("templates/install-mongos-windows.ps1");

/// Snapshot of one process as the renderer sees it
#[derive(Debug, Clone)]
pub struct RenderSpec {
    pub role: Role,
    pub options: String,
    pub dbpath: String,
    pub logpath: String,
    pub configdb: Option<String>,
}

/// Renders one process into a bootstrap fragment
pub trait PayloadRenderer: Send + Sync {
    fn render(&self, spec: &RenderSpec, os: OsFamily) -> String;
}

/// Template-based renderer with `{{ key }}` substitution
pub struct ScriptRenderer;

impl PayloadRenderer for ScriptRenderer {
    fn render(&self, spec: &RenderSpec, os: OsFamily) -> String {
        let template = match (spec.role, os) {
            (Role::Mongod, OsFamily::Linux) => MONGOD_LINUX,
            (Role::Mongos, OsFamily::Linux) => MONGOS_LINUX,
            (Role::Mongod, OsFamily::Windows) => MONGOD_WINDOWS,
            (Role::Mongos, OsFamily::Windows) => MONGOS_WINDOWS,
        };
        let context = [
            ("options", spec.options.as_str()),
            ("dbpath", spec.dbpath.as_str()),
            ("logpath", spec.logpath.as_str()),
            ("configdb", spec.configdb.as_deref().unwrap_or("")),
        ];
        normalize_newlines(&substitute(template, &context), os)
    }
}

/// Concatenate rendered fragments into one instance payload.
///
/// Windows user data must be CRLF-joined and wrapped in powershell
/// markers for the agent on the instance to execute it.
pub fn join_fragments(fragments: &[String], os: OsFamily) -> String {
    match os {
        OsFamily::Linux => fragments.join("\n"),
        OsFamily::Windows => format!("<powershell>\r\n{}\r\n</powershell>", fragments.join("\r\n")),
    }
}

/// Replace every `{{ key }}` marker with its context value.
///
/// Unknown keys substitute to the empty string, matching how absent
/// options are rendered away rather than left as literal markers.
fn substitute(template: &str, context: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                if let Some((_, value)) = context.iter().find(|(k, _)| *k == key) {
                    out.push_str(value);
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn normalize_newlines(document: &str, os: OsFamily) -> String {
    let unix = document.replace("\r\n", "\n").replace('\r', "\n");
    match os {
        OsFamily::Linux => unix.trim().to_string(),
        OsFamily::Windows => unix.replace('\n', "\r\n").trim().to_string(),
    }
}
