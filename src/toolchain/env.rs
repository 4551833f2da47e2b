//! Child-process environment for external tool invocations
//!
//! Tools never see the orchestrator's ambient environment directly. Each
//! invocation carries an explicit [`ToolEnv`] built by an [`EnvPolicy`]:
//! ambient keys are filtered through an allow/deny list and then explicit
//! overrides (e.g. `NODE_PATH`) are layered on top. The map is applied with
//! `Command::env_clear().envs(..)`, so it lives exactly as long as the child.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

/// Keys never forwarded to child tools
const DENIED_KEYS: &[&str] = &[
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_SESSION_TOKEN",
    "GITHUB_TOKEN",
    "GH_TOKEN",
    "GITLAB_TOKEN",
    "CI_JOB_TOKEN",
    "NPM_TOKEN",
    "CONAN_PASSWORD",
    "CONAN_LOGIN_USERNAME",
    "DOCKER_PASSWORD",
    "SSH_AUTH_SOCK",
    "SSH_AGENT_PID",
];

/// Keys always forwarded, even in strict mode
const ALLOWED_KEYS: &[&str] = &[
    "HOME",
    "USER",
    "PATH",
    "SHELL",
    "TERM",
    "LANG",
    "LC_ALL",
    "TMPDIR",
    "TEMP",
    "TMP",
    "SystemRoot",
    "USERPROFILE",
    "CC",
    "CXX",
    "ANDROID_NDK_HOME",
];

/// Environment variable filter for child tools
#[derive(Debug, Clone)]
pub struct EnvPolicy {
    allowed_keys: HashSet<String>,
    denied_keys: HashSet<String>,
    /// Whether keys on neither list pass through
    pass_unlisted: bool,
}

impl Default for EnvPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvPolicy {
    /// Permissive policy: everything except denied keys
    pub fn new() -> Self {
        Self {
            allowed_keys: ALLOWED_KEYS.iter().map(|k| k.to_string()).collect(),
            denied_keys: DENIED_KEYS.iter().map(|k| k.to_string()).collect(),
            pass_unlisted: true,
        }
    }

    /// Only allowlisted keys pass
    pub fn strict() -> Self {
        Self {
            pass_unlisted: false,
            ..Self::new()
        }
    }

    pub fn allow(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.denied_keys.remove(&key);
        self.allowed_keys.insert(key);
        self
    }

    pub fn deny(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.allowed_keys.remove(&key);
        self.denied_keys.insert(key);
        self
    }

    pub fn should_pass(&self, key: &str) -> bool {
        if self.denied_keys.contains(key) {
            return false;
        }
        self.allowed_keys.contains(key) || self.pass_unlisted
    }

    /// Filter an ambient environment into a tool environment.
    pub fn apply<I, K, V>(&self, ambient: I) -> ToolEnv
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut env = ToolEnv::default();
        for (key, value) in ambient {
            let key = key.into();
            if self.should_pass(&key) {
                env.vars.insert(key, value.into());
            } else {
                env.dropped_keys.push(key);
            }
        }
        env.dropped_keys.sort();
        env
    }
}

/// Explicit environment handed to one external invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolEnv {
    vars: BTreeMap<String, String>,

    /// Ambient keys the policy withheld
    #[serde(default)]
    dropped_keys: Vec<String>,

    /// Keys set explicitly by the orchestrator
    #[serde(default)]
    override_keys: Vec<String>,
}

impl ToolEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or replace a variable for this invocation only
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if !self.override_keys.contains(&key) {
            self.override_keys.push(key.clone());
        }
        self.vars.insert(key, value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    pub fn dropped_keys(&self) -> &[String] {
        &self.dropped_keys
    }

    pub fn override_keys(&self) -> &[String] {
        &self.override_keys
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}
