use crate::error::{BorealisError, Result};

/// Parse a semantic version string into its (major, minor, patch) triple.
///
/// Pre-release and build suffixes (`-rc1`, `+abc`) are ignored; missing
/// components default to zero, so `"0.4"` parses as `(0, 4, 0)`.
pub fn parse_version(version: &str) -> Result<(u64, u64, u64)> {
    let core = version
        .split(['-', '+'])
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| BorealisError::InvalidVersion(version.to_string()))?;

    let mut parts = core.split('.');
    let mut next = || -> Result<u64> {
        match parts.next() {
            None => Ok(0),
            Some(p) => p
                .parse()
                .map_err(|_| BorealisError::InvalidVersion(version.to_string())),
        }
    };
    let major = next()?;
    let minor = next()?;
    let patch = next()?;
    Ok((major, minor, patch))
}

/// Check whether a configuration written for `config` may run against a
/// pipeline at version `pipeline`.
///
/// While the pipeline major version is 0, behavior may change on minor
/// releases, so the major and minor must match exactly and the pipeline
/// patch must be at least the configuration patch. From 1.0 on, the major
/// must match and the pipeline must be at least as new as the
/// configuration in (minor, patch) order.
pub fn check_version(config: &str, pipeline: &str) -> Result<bool> {
    let (config_maj, config_min, config_pat) = parse_version(config)?;
    let (pipe_maj, pipe_min, pipe_pat) = parse_version(pipeline)?;

    let flag = if pipe_maj == 0 {
        config_maj == pipe_maj && config_min == pipe_min && pipe_pat >= config_pat
    } else {
        config_maj == pipe_maj
            && (pipe_min > config_min || (pipe_min == config_min && pipe_pat >= config_pat))
    };
    Ok(flag)
}
