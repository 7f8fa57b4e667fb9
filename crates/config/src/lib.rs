#![forbid(unsafe_code)]

mod channel;
mod error;
mod timeout;

pub use channel::Channel;
pub use error::Error;
pub use timeout::Timeout;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Largest whitelist the one-byte header count can describe.
pub const MAX_WHITELIST_LEN: usize = u8::MAX as usize;

/// Longest whitelist entry the two-byte header length can describe.
pub const MAX_PATTERN_LEN: usize = u16::MAX as usize;

/// Prefix of the environment variables that override file settings.
pub const ENV_PREFIX: &str = "BBTRACE_";

/// Check that `patterns` fit the trace header: at most
/// [`MAX_WHITELIST_LEN`] entries, each non-empty and at most
/// [`MAX_PATTERN_LEN`] bytes.
pub fn check_whitelist<S: AsRef<str>>(patterns: &[S]) -> Result<(), Error> {
    if patterns.len() > MAX_WHITELIST_LEN {
        return Err(Error::TooManyImages(patterns.len()));
    }
    for (index, pattern) in patterns.iter().enumerate() {
        let pattern = pattern.as_ref();
        if pattern.is_empty() {
            return Err(Error::EmptyPattern(index));
        }
        if pattern.len() > MAX_PATTERN_LEN {
            return Err(Error::PatternTooLong {
                index,
                len: pattern.len(),
            });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Substrings naming the images worth tracing, in wire index order.
    pub whitelist: Vec<String>,

    pub channel: Channel,

    /// Operator-triggered timeout. `None` when the instrumentation engine
    /// delivers fatal signals itself.
    pub timeout: Option<Timeout>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the configuration from `path`, layering `BBTRACE_*` environment
    /// variables on top.
    ///
    /// Nested keys use a double underscore, eg. `BBTRACE_CHANNEL__PATH`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::InvalidPath(path.to_owned()));
        }
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Check every rule a collector relies on before it starts.
    pub fn validate(&self) -> Result<(), Error> {
        if self.channel.path.as_os_str().is_empty() {
            return Err(Error::MissingChannel);
        }
        check_whitelist(&self.whitelist)?;
        if let Some(timeout) = &self.timeout {
            timeout.signal()?;
        }
        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, Error> {
        Ok(toml_edit::ser::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::path::PathBuf;

    fn with_channel(path: &str) -> Config {
        Config {
            channel: Channel {
                path: PathBuf::from(path),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn missing_channel_is_rejected() {
        let config = Config::new();
        assert!(matches!(config.validate(), Err(Error::MissingChannel)));
    }

    #[test]
    fn empty_pattern_is_rejected() {
        let mut config = with_channel("/tmp/trace.fifo");
        config.whitelist = vec!["libfoo".into(), String::new()];
        assert!(matches!(config.validate(), Err(Error::EmptyPattern(1))));
    }

    #[test]
    fn long_pattern_is_rejected() {
        let patterns = ["lib".to_string(), "x".repeat(MAX_PATTERN_LEN + 1)];
        assert!(matches!(
            check_whitelist(&patterns),
            Err(Error::PatternTooLong { index: 1, len }) if len == MAX_PATTERN_LEN + 1
        ));
        assert!(check_whitelist(&["x".repeat(MAX_PATTERN_LEN)]).is_ok());
    }

    #[test]
    fn unknown_signal_is_rejected() {
        let mut config = with_channel("/tmp/trace.fifo");
        config.timeout = Some(Timeout {
            signal: "SIGNOPE".into(),
            ..Default::default()
        });
        assert!(matches!(config.validate(), Err(Error::UnknownSignal(_))));
    }

    #[test]
    fn toml_rendering_round_trips() {
        let mut config = with_channel("/tmp/trace.fifo");
        config.whitelist = vec!["libfoo".into(), "libbar".into()];
        config.timeout = Some(Timeout::default());

        let rendered = config.to_toml().unwrap();
        let parsed: Config = toml_edit::de::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }

    proptest! {
        #[test]
        fn whitelist_length_is_bounded(len in 0usize..300) {
            let mut config = with_channel("/tmp/trace.fifo");
            config.whitelist = (0..len).map(|i| format!("lib{i}")).collect();
            let result = config.validate();
            if len > MAX_WHITELIST_LEN {
                prop_assert!(matches!(result, Err(Error::TooManyImages(n)) if n == len));
            } else {
                prop_assert!(result.is_ok());
            }
        }
    }
}
