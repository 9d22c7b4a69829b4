// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Firmware version parsing and the upgrade gate

/// Parse a firmware version string (e.g. "1.4.2", "v1.4.2") into a (major, minor, patch) triple.
///
/// Parsing is lenient: each component takes its leading digits, anything after them is
/// ignored, and parsing stops at the first component without digits. Missing components
/// are zero, so an unparseable string yields (0, 0, 0).
pub fn parse_version(s: &str) -> (u32, u32, u32) {
    let s = s
        .trim()
        .trim_start_matches('v')
        .trim_start_matches('V');

    let mut parts = [0_u32; 3];
    let mut rest = s;
    for (idx, slot) in parts.iter_mut().enumerate() {
        if idx > 0 {
            match rest.strip_prefix('.') {
                Some(tail) => rest = tail,
                None => break,
            }
        }

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            break;
        }
        let (number, tail) = rest.split_at(digits);
        match number.parse::<u32>() {
            Ok(value) => *slot = value,
            Err(_) => break,
        }
        rest = tail;
    }

    (parts[0], parts[1], parts[2])
}

/// Returns true if `remote` is strictly newer than `local`, comparing major, then minor, then patch
pub fn is_newer(local: &str, remote: &str) -> bool {
    parse_version(remote) > parse_version(local)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("0.2.38"), (0, 2, 38));
        assert_eq!(parse_version("v0.2.38"), (0, 2, 38));
        assert_eq!(parse_version("V0.2.38"), (0, 2, 38));
        assert_eq!(parse_version("10.20.30"), (10, 20, 30));
    }

    #[test]
    fn test_parse_version_lenient() {
        assert_eq!(parse_version("1.2"), (1, 2, 0));
        assert_eq!(parse_version("1.2.3-rc1"), (1, 2, 3));
        assert_eq!(parse_version("1.x.3"), (1, 0, 0));
        assert_eq!(parse_version(" 2.0.1 "), (2, 0, 1));
    }

    #[test]
    fn test_parse_version_unparseable_defaults_to_zero() {
        assert_eq!(parse_version(""), (0, 0, 0));
        assert_eq!(parse_version("invalid"), (0, 0, 0));
        assert_eq!(parse_version("a.b.c"), (0, 0, 0));
        assert_eq!(parse_version("99999999999.1.1"), (0, 0, 0));
    }

    #[test]
    fn test_is_newer() {
        assert!(is_newer("1.9.9", "2.0.0"));
        assert!(!is_newer("1.2.0", "1.2.0"));
        assert!(is_newer("0.2.38", "0.2.39"));
        assert!(is_newer("0.2.38", "0.3.0"));
        assert!(!is_newer("0.2.39", "0.2.38"));
        // Major wins over larger minor/patch
        assert!(!is_newer("1.0.0", "0.9.99"));
    }

    #[test]
    fn test_is_newer_never_upgrades_to_garbage() {
        assert!(!is_newer("0.0.1", "garbage"));
        assert!(!is_newer("garbage", "garbage"));
        assert!(is_newer("garbage", "0.0.1"));
    }

    #[test]
    fn test_equal_or_lower_never_newer() {
        // Ascending order
        let versions = ["0.0.0", "0.0.1", "0.1.0", "0.1.9", "1.0.0", "1.2.3", "2.0.0"];
        for (i, local) in versions.iter().enumerate() {
            for (j, remote) in versions.iter().enumerate() {
                assert_eq!(is_newer(local, remote), j > i, "{local} vs {remote}");
            }
        }
    }
}
