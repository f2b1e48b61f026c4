//! Snapshot of the process environment, captured once at startup

use drydock_build::ProxyEnv;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmbientEnv {
    vars: BTreeMap<String, String>,
}

impl AmbientEnv {
    /// Reads the current process environment.
    pub fn capture() -> Self {
        Self::from_pairs(std::env::vars())
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn proxy(&self) -> ProxyEnv {
        ProxyEnv::from_lookup(|key| self.get(key).map(str::to_string))
    }

    /// `NAME=value` build args for each listed variable that is set and not
    /// already present in `existing`.
    pub fn build_args_from(&self, names: &[String], existing: &[String]) -> Vec<String> {
        names
            .iter()
            .filter(|name| !name.is_empty())
            .filter(|name| {
                let prefix = format!("{}=", name);
                !existing.iter().any(|arg| arg.starts_with(&prefix))
            })
            .filter_map(|name| {
                let value = self.get(name);
                if value.is_none() {
                    tracing::debug!("Build arg {} not set in the environment", name);
                }
                value.map(|value| format!("{}={}", name, value))
            })
            .collect()
    }
}
