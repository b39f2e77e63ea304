//! Priority classes and the alias table that resolves free-form names
//!
//! Callers name their urgency loosely ("jsvv", "alarm", "incoming_call",
//! "schedule", ...). Those names are resolved once, through a table built
//! from configuration, into a closed set of canonical classes.

use crate::error::{ArbiterError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Canonical priority classes, most urgent first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityClass {
    /// Stop / abort of an ongoing transmission
    Stop,
    /// Emergency alert sequence (JSVV)
    Jsvv,
    /// Incoming call handler
    Gsm,
    /// Scheduled or operator-planned broadcast
    Plan,
    /// Background status polling
    Polling,
}

impl PriorityClass {
    /// All classes in ascending level order
    pub const ALL: [PriorityClass; 5] = [
        PriorityClass::Stop,
        PriorityClass::Jsvv,
        PriorityClass::Gsm,
        PriorityClass::Plan,
        PriorityClass::Polling,
    ];

    /// Numeric level (lower = more urgent)
    #[must_use]
    pub fn level(self) -> i32 {
        match self {
            Self::Stop => 0,
            Self::Jsvv => 10,
            Self::Gsm => 20,
            Self::Plan => 30,
            Self::Polling => 40,
        }
    }

    /// Canonical lowercase name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Jsvv => "jsvv",
            Self::Gsm => "gsm",
            Self::Plan => "plan",
            Self::Polling => "polling",
        }
    }
}

impl fmt::Display for PriorityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PriorityClass {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stop" => Ok(Self::Stop),
            "jsvv" => Ok(Self::Jsvv),
            "gsm" => Ok(Self::Gsm),
            "plan" => Ok(Self::Plan),
            "polling" => Ok(Self::Polling),
            other => Err(format!("unknown priority class: {other}")),
        }
    }
}

/// Priority settings as they appear in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityConfig {
    /// Class used for empty or unknown names
    #[serde(default = "default_class_name")]
    pub default_class: String,
    /// Extra aliases (alias -> canonical class name), merged over the built-ins
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

fn default_class_name() -> String {
    "plan".to_string()
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            default_class: default_class_name(),
            aliases: HashMap::new(),
        }
    }
}

const BUILTIN_ALIASES: &[(&str, PriorityClass)] = &[
    ("stop", PriorityClass::Stop),
    ("abort", PriorityClass::Stop),
    ("emergency_stop", PriorityClass::Stop),
    ("jsvv", PriorityClass::Jsvv),
    ("alarm", PriorityClass::Jsvv),
    ("emergency", PriorityClass::Jsvv),
    ("gsm", PriorityClass::Gsm),
    ("call", PriorityClass::Gsm),
    ("incoming_call", PriorityClass::Gsm),
    ("plan", PriorityClass::Plan),
    ("schedule", PriorityClass::Plan),
    ("scheduled", PriorityClass::Plan),
    ("manual", PriorityClass::Plan),
    ("live", PriorityClass::Plan),
    ("playlist", PriorityClass::Plan),
    ("polling", PriorityClass::Polling),
    ("poll", PriorityClass::Polling),
    ("status", PriorityClass::Polling),
];

/// Resolved alias table
#[derive(Debug, Clone)]
pub struct PriorityTable {
    aliases: HashMap<String, PriorityClass>,
    default_class: PriorityClass,
}

impl PriorityTable {
    /// Build and validate the table from configuration
    ///
    /// # Errors
    ///
    /// Returns `ArbiterError::InvalidConfig` if the default class or any
    /// alias target is not a canonical class name.
    pub fn from_config(config: &PriorityConfig) -> Result<Self> {
        let default_class = config.default_class.parse().map_err(|e: String| {
            ArbiterError::InvalidConfig(format!("default_class: {e}"))
        })?;

        let mut aliases: HashMap<String, PriorityClass> = BUILTIN_ALIASES
            .iter()
            .map(|(name, class)| ((*name).to_string(), *class))
            .collect();

        for (alias, target) in &config.aliases {
            let class = target.parse().map_err(|e: String| {
                ArbiterError::InvalidConfig(format!("alias '{alias}': {e}"))
            })?;
            aliases.insert(normalize(alias), class);
        }

        Ok(Self {
            aliases,
            default_class,
        })
    }

    /// Resolve a free-form priority name
    #[must_use]
    pub fn resolve(&self, name: &str) -> PriorityClass {
        let key = normalize(name);
        if key.is_empty() {
            return self.default_class;
        }
        self.aliases
            .get(&key)
            .copied()
            .unwrap_or(self.default_class)
    }

    /// Class used for unknown names
    #[must_use]
    pub fn default_class(&self) -> PriorityClass {
        self.default_class
    }
}

impl Default for PriorityTable {
    fn default() -> Self {
        // built-ins only ever point at canonical classes
        Self {
            aliases: BUILTIN_ALIASES
                .iter()
                .map(|(name, class)| ((*name).to_string(), *class))
                .collect(),
            default_class: PriorityClass::Plan,
        }
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace(['-', ' '], "_")
}
