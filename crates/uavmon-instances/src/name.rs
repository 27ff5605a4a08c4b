use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const INSTANCE_SUFFIX: &str = ".txt";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("instance name '{0}' has no version segment (expected ...V<version>)")]
    MissingVersion(String),
    #[error("instance name '{name}' has an invalid {segment} segment")]
    BadSegment { name: String, segment: &'static str },
    #[error("instance name '{0}' has an empty family")]
    EmptyFamily(String),
}

/// Parsed form of `{family}N{targets}D{drones}T{horizon}V{version}`.
///
/// Legacy instances omit the `T{horizon}` segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceName {
    pub family: String,
    pub targets: u32,
    pub drones: u32,
    pub horizon: Option<u32>,
    pub version: String,
}

impl InstanceName {
    pub fn new(family: &str, targets: u32, drones: u32, horizon: u32, version: &str) -> Self {
        Self {
            family: family.to_string(),
            targets,
            drones,
            horizon: Some(horizon),
            version: version.to_string(),
        }
    }

    /// Accepts either a bare stem or a file name carrying the instance suffix.
    pub fn parse(raw: &str) -> Result<Self, NameError> {
        let stem = raw.strip_suffix(INSTANCE_SUFFIX).unwrap_or(raw);

        let (head, version) = stem
            .rsplit_once('V')
            .filter(|(_, v)| !v.is_empty())
            .ok_or_else(|| NameError::MissingVersion(raw.to_string()))?;

        let (head, horizon) = match head.rsplit_once('T') {
            Some((h, t)) if is_digits(t) => (h, Some(parse_segment(raw, t, "horizon")?)),
            _ => (head, None),
        };

        let (head, drones) = split_numeric(raw, head, 'D', "drone")?;
        let (family, targets) = split_numeric(raw, head, 'N', "target")?;
        if family.is_empty() {
            return Err(NameError::EmptyFamily(raw.to_string()));
        }

        Ok(Self {
            family: family.to_string(),
            targets,
            drones,
            horizon,
            version: version.to_string(),
        })
    }

    pub fn file_name(&self) -> String {
        format!("{}{}", self, INSTANCE_SUFFIX)
    }
}

impl fmt::Display for InstanceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}N{}D{}", self.family, self.targets, self.drones)?;
        if let Some(horizon) = self.horizon {
            write!(f, "T{}", horizon)?;
        }
        write!(f, "V{}", self.version)
    }
}

impl FromStr for InstanceName {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn parse_segment(raw: &str, digits: &str, segment: &'static str) -> Result<u32, NameError> {
    digits.parse().map_err(|_| NameError::BadSegment {
        name: raw.to_string(),
        segment,
    })
}

fn split_numeric<'a>(
    raw: &str,
    head: &'a str,
    marker: char,
    segment: &'static str,
) -> Result<(&'a str, u32), NameError> {
    match head.rsplit_once(marker) {
        Some((rest, digits)) if is_digits(digits) => {
            Ok((rest, parse_segment(raw, digits, segment)?))
        }
        _ => Err(NameError::BadSegment {
            name: raw.to_string(),
            segment,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_current_names_with_horizon() {
        let name = InstanceName::parse("C1N10D20T12V1.txt").expect("parse");
        assert_eq!(name, InstanceName::new("C1", 10, 20, 12, "1"));
    }

    #[test]
    fn parses_multi_letter_family_and_suffixed_version() {
        let name = InstanceName::parse("SZ_GusuN19D30T12V1p").expect("parse");
        assert_eq!(name.family, "SZ_Gusu");
        assert_eq!(name.targets, 19);
        assert_eq!(name.version, "1p");

        let rc = InstanceName::parse("RC1N35D100T18V34p").expect("parse");
        assert_eq!(rc.family, "RC1");
        assert_eq!(rc.horizon, Some(18));
    }

    #[test]
    fn parses_legacy_names_without_horizon() {
        let name = InstanceName::parse("R1N25D30V3").expect("parse");
        assert_eq!(name.horizon, None);
        assert_eq!(name.to_string(), "R1N25D30V3");
    }

    #[test]
    fn display_round_trips_the_stem() {
        for raw in ["C1N10D20T12V1", "RC1N5D10T6V2p", "C2N25D30V1"] {
            let name: InstanceName = raw.parse().expect("parse");
            assert_eq!(name.to_string(), raw);
        }
        assert_eq!(
            InstanceName::new("R1", 5, 10, 6, "2").file_name(),
            "R1N5D10T6V2.txt"
        );
    }

    #[test]
    fn rejects_malformed_names() {
        assert!(matches!(
            InstanceName::parse("notes.txt"),
            Err(NameError::MissingVersion(_))
        ));
        assert!(matches!(
            InstanceName::parse("C1NxD20T12V1"),
            Err(NameError::BadSegment { segment: "target", .. })
        ));
        assert!(matches!(
            InstanceName::parse("N10D20T12V1"),
            Err(NameError::EmptyFamily(_))
        ));
    }
}
