use semver::{BuildMetadata, Version};

use crate::JsiiError;

/// Strips a trailing `+build` suffix (lowercase alphanumerics only, the
/// form the kernel appends) from a version string.
fn strip_build_suffix(version: &str) -> &str {
    match version.split_once('+') {
        Some((base, build))
            if !build.is_empty()
                && build
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()) =>
        {
            base
        }
        _ => version,
    }
}

/// Compares runtime versions ignoring build metadata on either side.
///
/// Both sides are parsed as semver when possible, which handles richer
/// build suffixes; otherwise the comparison falls back to stripping the
/// plain `+[a-z0-9]+` form and comparing the remainder verbatim.
pub(crate) fn runtime_versions_compatible(expected: &str, actual: &str) -> bool {
    match (Version::parse(expected), Version::parse(actual)) {
        (Ok(mut expected), Ok(mut actual)) => {
            expected.build = BuildMetadata::EMPTY;
            actual.build = BuildMetadata::EMPTY;
            expected == actual
        }
        _ => strip_build_suffix(expected) == strip_build_suffix(actual),
    }
}

pub(crate) fn check_runtime_compat(expected: &str, actual: &str) -> Result<(), JsiiError> {
    if runtime_versions_compatible(expected, actual) {
        Ok(())
    } else {
        Err(JsiiError::IncompatibleRuntime {
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}
