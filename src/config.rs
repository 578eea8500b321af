use std::str::FromStr;

use crate::{Error, Result};

const RECONCILE_MODE_VAR: &str = "RECONCILE_MODE";
const SYSTEM_NAMESPACE_PREFIX_VAR: &str = "SYSTEM_NAMESPACE_PREFIX";
const NS_FILTER_VAR: &str = "VELERO_ANNOTATIONS_CONTROLLER_NS_FILTER";
const PVCS_ONLY_VAR: &str = "VELERO_ANNOTATIONS_CONTROLLER_PVCS_ONLY";

const DEFAULT_SYSTEM_NAMESPACE_PREFIX: &str = "kube-";

/// How accepted events are reconciled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconcileMode {
    /// Each event is reconciled inline before the next one is pulled.
    Serial,
    /// Each event runs as its own task; newer events for a pod cancel older ones.
    #[default]
    Supervised,
}

impl FromStr for ReconcileMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "serial" => Ok(ReconcileMode::Serial),
            "supervised" => Ok(ReconcileMode::Supervised),
            other => Err(Error::Config(format!(
                "{} must be `serial` or `supervised`, got `{}`",
                RECONCILE_MODE_VAR, other
            ))),
        }
    }
}

/// Which pod volumes belong in the backup annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VolumeSelection {
    #[default]
    PersistentVolumeClaims,
    All,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub mode: ReconcileMode,
    pub system_namespace_prefix: String,
    /// Namespaces to reconcile; `None` means all of them
    pub namespaces: Option<Vec<String>>,
    pub volume_selection: VolumeSelection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: ReconcileMode::default(),
            system_namespace_prefix: DEFAULT_SYSTEM_NAMESPACE_PREFIX.to_string(),
            namespaces: None,
            volume_selection: VolumeSelection::default(),
        }
    }
}

impl Config {
    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mode = match lookup(RECONCILE_MODE_VAR) {
            Some(value) if !value.trim().is_empty() => value.parse()?,
            _ => ReconcileMode::default(),
        };

        let system_namespace_prefix = lookup(SYSTEM_NAMESPACE_PREFIX_VAR)
            .unwrap_or_else(|| DEFAULT_SYSTEM_NAMESPACE_PREFIX.to_string());

        let namespaces: Vec<String> = lookup(NS_FILTER_VAR)
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let volume_selection = if lookup(PVCS_ONLY_VAR).as_deref() == Some("false") {
            VolumeSelection::All
        } else {
            VolumeSelection::PersistentVolumeClaims
        };

        Ok(Self {
            mode,
            system_namespace_prefix,
            namespaces: if namespaces.is_empty() {
                None
            } else {
                Some(namespaces)
            },
            volume_selection,
        })
    }

    pub fn is_system_namespace(&self, namespace: &str) -> bool {
        !self.system_namespace_prefix.is_empty()
            && namespace.starts_with(&self.system_namespace_prefix)
    }

    pub fn is_namespace_watched(&self, namespace: &str) -> bool {
        match &self.namespaces {
            Some(namespaces) => namespaces.iter().any(|ns| ns == namespace),
            None => true,
        }
    }
}
