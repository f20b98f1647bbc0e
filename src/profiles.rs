// src/profiles.rs
//! Built-in scan presets.

use crate::models::{Detection, Options, Technique};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanProfile {
    Quick,
    Full,
    Custom,
}

impl ScanProfile {
    pub fn description(&self) -> &'static str {
        match self {
            ScanProfile::Quick => "Quick Scan - low risk, boolean/error/union/time techniques, basic fingerprint",
            ScanProfile::Full => "Full Scan - maximum risk and level, every technique and enumeration",
            ScanProfile::Custom => "Custom - options used as given",
        }
    }

    /// Overwrites the preset fields of `options`. `Custom` leaves them alone.
    pub fn apply(&self, options: &mut Options) {
        match self {
            ScanProfile::Quick => {
                options.risk = 1;
                options.level = 1;
                options.threads = 1;
                options.timeout = 30;
                options.techniques = vec!['B', 'E', 'U', 'T'];
                options.detection = [Detection::Banner, Detection::CurrentUser, Detection::CurrentDb]
                    .into_iter()
                    .collect();
            }
            ScanProfile::Full => {
                options.risk = 3;
                options.level = 5;
                options.threads = 3;
                options.timeout = 60;
                options.techniques = Technique::ALL.iter().map(Technique::letter).collect();
                options.detection = Detection::ALL.into_iter().collect();
            }
            ScanProfile::Custom => {}
        }
    }

    pub fn options(&self) -> Options {
        let mut options = Options::default();
        self.apply(&mut options);
        options
    }
}

impl FromStr for ScanProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" | "quick scan" => Ok(ScanProfile::Quick),
            "full" | "full scan" => Ok(ScanProfile::Full),
            "custom" => Ok(ScanProfile::Custom),
            other => Err(format!("Unknown scan profile: {}", other)),
        }
    }
}

impl fmt::Display for ScanProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScanProfile::Quick => "quick",
            ScanProfile::Full => "full",
            ScanProfile::Custom => "custom",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::InvocationBuilder;

    #[test]
    fn test_quick_profile() {
        let options = ScanProfile::Quick.options();
        assert_eq!((options.risk, options.level, options.threads, options.timeout), (1, 1, 1, 30));
        assert_eq!(options.technique_string(), "BEUT");
        assert_eq!(options.detection.len(), 3);
        assert!(options.detection.contains(&Detection::CurrentDb));
    }

    #[test]
    fn test_full_profile_is_valid() {
        let options = ScanProfile::Full.options();
        assert_eq!((options.risk, options.level, options.threads, options.timeout), (3, 5, 3, 60));
        assert_eq!(options.technique_string(), "BEUSTQ");
        assert_eq!(options.detection.len(), 13);
        assert!(InvocationBuilder::validate_options(&options).is_empty());
    }

    #[test]
    fn test_custom_leaves_options_untouched() {
        let mut options = Options {
            risk: 2,
            proxy: Some("http://127.0.0.1:8080".to_string()),
            ..Default::default()
        };
        let before = options.clone();
        ScanProfile::Custom.apply(&mut options);
        assert_eq!(options, before);
    }

    #[test]
    fn test_apply_keeps_unrelated_fields() {
        let mut options = Options {
            tamper: Some("space2comment".to_string()),
            ..Default::default()
        };
        ScanProfile::Full.apply(&mut options);
        assert_eq!(options.tamper.as_deref(), Some("space2comment"));
    }

    #[test]
    fn test_parse() {
        assert_eq!("Quick Scan".parse::<ScanProfile>().unwrap(), ScanProfile::Quick);
        assert_eq!("FULL".parse::<ScanProfile>().unwrap(), ScanProfile::Full);
        assert_eq!(" custom ".parse::<ScanProfile>().unwrap(), ScanProfile::Custom);
        assert!("deep".parse::<ScanProfile>().is_err());
    }
}
