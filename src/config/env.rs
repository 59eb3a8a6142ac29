/// Isolated environment for build-verification phases
///
/// The harness never mutates its own process environment. Phases that must be
/// shielded from ambient host state receive this value, which is applied to
/// the child `Command` only.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Offline switches for the common package managers a build phase may invoke
const OFFLINE_SWITCHES: &[(&str, &str)] = &[
    ("CARGO_NET_OFFLINE", "true"),
    ("GOFLAGS", "-mod=vendor"),
    ("GOPROXY", "off"),
    ("PIP_NO_INDEX", "1"),
];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolatedEnv {
    /// Replacement `HOME`; relative paths resolve against the artifacts dir
    pub home: PathBuf,
    /// Replacement `XDG_CACHE_HOME`
    pub cache: PathBuf,
    /// Disable network dependency resolution
    pub offline: bool,
    /// Additional variables, applied last
    pub vars: BTreeMap<String, String>,
}

impl Default for IsolatedEnv {
    fn default() -> Self {
        Self {
            home: PathBuf::from("isolated/home"),
            cache: PathBuf::from("isolated/cache"),
            offline: true,
            vars: BTreeMap::new(),
        }
    }
}

impl IsolatedEnv {
    /// Resolve relative home/cache paths against `base`
    pub fn rooted_at(&self, base: &std::path::Path) -> Self {
        let mut resolved = self.clone();
        if resolved.home.is_relative() {
            resolved.home = base.join(&resolved.home);
        }
        if resolved.cache.is_relative() {
            resolved.cache = base.join(&resolved.cache);
        }
        resolved
    }

    /// Variables this environment sets, in application order
    pub fn variables(&self) -> Vec<(String, String)> {
        let mut vars = vec![
            ("HOME".to_string(), self.home.display().to_string()),
            (
                "XDG_CACHE_HOME".to_string(),
                self.cache.display().to_string(),
            ),
        ];
        if self.offline {
            vars.extend(
                OFFLINE_SWITCHES
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string())),
            );
        }
        vars.extend(self.vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        vars
    }

    /// Create the home and cache directories
    pub fn prepare(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.home)?;
        std::fs::create_dir_all(&self.cache)
    }
}
