//! Team logo and color lookup
//!
//! Loaded from the tournament's INI export, one entry per line:
//! `TeamLogoAndColor=(TeamNo=1,TeamName=Alpha,TeamLogoPath=C:\logos\a.png,TeamColor=#FF0000)`

use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

const ENTRY_PREFIX: &str = "TeamLogoAndColor=(";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamStyle {
    pub logo: String,
    pub color: String,
}

#[derive(Debug, Clone)]
pub struct TeamDirectory {
    styles: Vec<TeamStyle>,
    by_name: HashMap<String, usize>,
    by_number: HashMap<String, usize>,
    default: TeamStyle,
}

impl TeamDirectory {
    pub fn new(default: TeamStyle) -> Self {
        Self {
            styles: Vec::new(),
            by_name: HashMap::new(),
            by_number: HashMap::new(),
            default,
        }
    }

    pub fn insert(&mut self, number: Option<&str>, name: &str, style: TeamStyle) {
        self.styles.push(style);
        let slot = self.styles.len() - 1;
        self.by_name.insert(name.trim().to_lowercase(), slot);
        if let Some(number) = number {
            self.by_number.insert(normalize_number(number), slot);
        }
    }

    pub fn len(&self) -> usize {
        self.styles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.styles.is_empty()
    }

    pub fn default_style(&self) -> &TeamStyle {
        &self.default
    }

    /// Style by team name (case-insensitive), then team number, else the default
    pub fn lookup(&self, name: &str, team_number: Option<&str>) -> &TeamStyle {
        let slot = self
            .by_name
            .get(&name.trim().to_lowercase())
            .or_else(|| team_number.and_then(|n| self.by_number.get(&normalize_number(n))));
        match slot {
            Some(slot) => &self.styles[*slot],
            None => {
                log::debug!("No style configured for {}, using default", name);
                &self.default
            }
        }
    }

    pub fn from_ini_str(content: &str, logo_prefix: &str, default: TeamStyle) -> Self {
        let mut directory = Self::new(default);

        for line in content.lines() {
            let line = line.trim();
            let Some(body) = line.strip_prefix(ENTRY_PREFIX) else {
                continue;
            };
            let body = body.trim_end().trim_end_matches(')');

            let mut number = None;
            let mut name = None;
            let mut logo_path = None;
            let mut color = None;
            for pair in body.split(',') {
                let Some((key, value)) = pair.split_once('=') else {
                    continue;
                };
                let value = value.trim().trim_matches('"');
                if value.is_empty() {
                    continue;
                }
                match key.trim() {
                    "TeamNo" => number = Some(value),
                    "TeamName" => name = Some(value),
                    "TeamLogoPath" => logo_path = Some(value),
                    "TeamColor" => color = Some(value),
                    _ => {}
                }
            }

            let Some(name) = name else {
                log::warn!("⚠️  Team entry without TeamName skipped: {}", line);
                continue;
            };
            let logo = match logo_path.and_then(file_name) {
                Some(file) => format!("{}{}", logo_prefix, file),
                None => directory.default.logo.clone(),
            };
            let color = color
                .map(str::to_string)
                .unwrap_or_else(|| directory.default.color.clone());
            directory.insert(number, name, TeamStyle { logo, color });
        }

        directory
    }

    /// Load the INI file; a missing or unreadable file gives an empty directory
    pub fn load(path: &Path, logo_prefix: &str, default: TeamStyle) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let directory = Self::from_ini_str(&content, logo_prefix, default);
                log::info!("🎨 Loaded {} team styles from {}", directory.len(), path.display());
                directory
            }
            Err(e) => {
                log::warn!(
                    "⚠️  Team config {} not loaded ({}), every team uses the default style",
                    path.display(),
                    e
                );
                Self::new(default)
            }
        }
    }
}

/// "01" and "1" name the same team slot
fn normalize_number(number: &str) -> String {
    let number = number.trim();
    number
        .parse::<u64>()
        .map(|n| n.to_string())
        .unwrap_or_else(|_| number.to_string())
}

fn file_name(path: &str) -> Option<&str> {
    path.rsplit(|c: char| c == '/' || c == '\\').next().filter(|name| !name.is_empty())
}
