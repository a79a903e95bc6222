// Version parsing and compatibility checks.
//
// Deliberately not built on the `semver` crate: real SemVer precedence treats
// prerelease versions as *less than* their release (`1.0.0-alpha < 1.0.0`)
// and compares prerelease identifiers field-by-field. The comparison rule
// here instead drops any prerelease/build suffix entirely before comparing,
// and treats the literal string "dev" as a wildcard equal to anything else.
// Those are different semantics, so a hand-rolled parser/comparator is used.

use crate::error::HostError;

/// A parsed `MAJOR.MINOR.PATCH` triple. Prerelease and build metadata are
/// accepted during parsing but discarded — they play no role in comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

/// A parsed version string: either a concrete triple, or the `dev` wildcard,
/// which compares equal to everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedVersion {
    Dev,
    Number(Version),
}

impl ParsedVersion {
    pub fn parse(input: &str) -> Result<Self, HostError> {
        let input = input.trim();
        if input == "dev" {
            return Ok(ParsedVersion::Dev);
        }

        let without_prefix = input.strip_prefix('v').unwrap_or(input);
        // Drop build metadata first (+build), then prerelease (-prerelease);
        // a build tag may follow a prerelease tag, so strip in this order.
        let without_build = without_prefix.split('+').next().unwrap_or(without_prefix);
        let core = without_build.split('-').next().unwrap_or(without_build);

        let mut parts = core.split('.');
        let major = parts
            .next()
            .ok_or_else(|| HostError::ParseError(format!("invalid version: {input}")))?;
        let minor = parts
            .next()
            .ok_or_else(|| HostError::ParseError(format!("invalid version: {input}")))?;
        let patch = parts
            .next()
            .ok_or_else(|| HostError::ParseError(format!("invalid version: {input}")))?;

        if parts.next().is_some() {
            return Err(HostError::ParseError(format!("invalid version: {input}")));
        }

        let major = major
            .parse::<u64>()
            .map_err(|_| HostError::ParseError(format!("invalid version: {input}")))?;
        let minor = minor
            .parse::<u64>()
            .map_err(|_| HostError::ParseError(format!("invalid version: {input}")))?;
        let patch = patch
            .parse::<u64>()
            .map_err(|_| HostError::ParseError(format!("invalid version: {input}")))?;

        Ok(ParsedVersion::Number(Version { major, minor, patch }))
    }
}

impl PartialOrd for ParsedVersion {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ParsedVersion {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match (self, other) {
            (ParsedVersion::Dev, _) | (_, ParsedVersion::Dev) => Ordering::Equal,
            (ParsedVersion::Number(a), ParsedVersion::Number(b)) => {
                (a.major, a.minor, a.patch).cmp(&(b.major, b.minor, b.patch))
            }
        }
    }
}

/// Compares two version strings per the rule above. Returns an error if
/// either string fails to parse.
pub fn compare(a: &str, b: &str) -> Result<std::cmp::Ordering, HostError> {
    let pa = ParsedVersion::parse(a)?;
    let pb = ParsedVersion::parse(b)?;
    Ok(pa.cmp(&pb))
}

/// `IsCompatible(hostVer, pluginVer, minHost, maxHost)`. `pluginVer` is
/// accepted but unused by the bound check itself — it only needs to parse,
/// since the bound is expressed against the host's own version.
pub fn is_compatible(
    host_version: &str,
    _plugin_version: &str,
    min_host: &str,
    max_host: &str,
) -> Result<bool, HostError> {
    let host = ParsedVersion::parse(host_version)?;

    if !min_host.is_empty() {
        let min = ParsedVersion::parse(min_host)?;
        if host.cmp(&min) == std::cmp::Ordering::Less {
            return Ok(false);
        }
    }

    if !max_host.is_empty() {
        let max = ParsedVersion::parse(max_host)?;
        if host.cmp(&max) == std::cmp::Ordering::Greater {
            return Ok(false);
        }
    }

    Ok(true)
}

/// `IsAPICompatible(hostAPI, pluginAPI)`. API versioning is strict major:
/// compatible iff the two strings are byte-equal.
pub fn is_api_compatible(host_api: &str, plugin_api: &str) -> bool {
    host_api == plugin_api
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    #[test]
    fn parses_bare_and_v_prefixed() {
        assert_eq!(
            ParsedVersion::parse("1.2.3").unwrap(),
            ParsedVersion::Number(Version { major: 1, minor: 2, patch: 3 })
        );
        assert_eq!(
            ParsedVersion::parse("v1.2.3").unwrap(),
            ParsedVersion::Number(Version { major: 1, minor: 2, patch: 3 })
        );
    }

    #[test]
    fn ignores_prerelease_and_build_suffix() {
        let a = ParsedVersion::parse("1.2.3-alpha.1").unwrap();
        let b = ParsedVersion::parse("1.2.3+build.5").unwrap();
        let c = ParsedVersion::parse("1.2.3-rc.1+build.9").unwrap();
        assert_eq!(a, ParsedVersion::Number(Version { major: 1, minor: 2, patch: 3 }));
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn dev_is_a_wildcard() {
        assert_eq!(compare("dev", "9.9.9").unwrap(), Ordering::Equal);
        assert_eq!(compare("9.9.9", "dev").unwrap(), Ordering::Equal);
        assert_eq!(compare("dev", "dev").unwrap(), Ordering::Equal);
    }

    #[test]
    fn rejects_unparseable_strings() {
        assert!(ParsedVersion::parse("not-a-version").is_err());
        assert!(ParsedVersion::parse("1.2").is_err());
        assert!(ParsedVersion::parse("1.2.3.4").is_err());
        assert!(ParsedVersion::parse("1.x.3").is_err());
    }

    #[test]
    fn lexicographic_triple_compare() {
        assert_eq!(compare("1.2.3", "1.2.4").unwrap(), Ordering::Less);
        assert_eq!(compare("2.0.0", "1.9.9").unwrap(), Ordering::Greater);
        assert_eq!(compare("1.2.3", "1.2.3").unwrap(), Ordering::Equal);
    }

    #[test]
    fn compatible_when_bounds_empty() {
        assert!(is_compatible("1.0.0", "1.0.0", "", "").unwrap());
    }

    #[test]
    fn compatible_respects_min_and_max_bounds() {
        assert!(is_compatible("1.5.0", "1.0.0", "1.0.0", "2.0.0").unwrap());
        assert!(!is_compatible("0.9.0", "1.0.0", "1.0.0", "2.0.0").unwrap());
        assert!(!is_compatible("2.1.0", "1.0.0", "1.0.0", "2.0.0").unwrap());
    }

    #[test]
    fn compatibility_is_monotone_in_bounds() {
        // Strengthening the max bound can only flip true -> false, never back.
        assert!(is_compatible("1.5.0", "1.0.0", "", "2.0.0").unwrap());
        assert!(!is_compatible("1.5.0", "1.0.0", "", "1.0.0").unwrap());
    }

    #[test]
    fn api_compatibility_is_strict_equality() {
        assert!(is_api_compatible("v1", "v1"));
        assert!(!is_api_compatible("v1", "v2"));
    }
}
