use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use serde_json::Value;

use crate::Error;
use crate::Result;

/// Environment variable carrying a base64 encoded JSON object with the sink settings.
pub const ENV_SINK_OBJECT: &str = "FILESINK_SINK_OBJECT";

pub const KEY_FILENAME: &str = "filename";
// spelling used by older agent files
const KEY_FILENAME_ALIAS: &str = "fileName";
const KEY_DECODE: &str = "decode";
const KEY_SYNC: &str = "sync";
const KEY_TAKE_TIMEOUT_MS: &str = "take_timeout_ms";
const KEY_POLL_INTERVAL_MS: &str = "poll_interval_ms";
const KEY_POLL_MAX_INTERVAL_MS: &str = "poll_max_interval_ms";
const KEY_CAPACITY: &str = "capacity";
const KEY_TRANSACTION_CAPACITY: &str = "transactionCapacity";
const KEY_BACKOFF_INCREMENT_MS: &str = "backoff_increment_ms";
const KEY_MAX_BACKOFF_MS: &str = "max_backoff_ms";

const DEFAULT_TAKE_TIMEOUT_MS: u64 = 500;
const DEFAULT_POLL_INTERVAL_MS: u64 = 10;
const DEFAULT_POLL_MAX_INTERVAL_MS: u64 = 100;
const DEFAULT_CAPACITY: usize = 1000;
const DEFAULT_TRANSACTION_CAPACITY: usize = 100;
const DEFAULT_BACKOFF_INCREMENT_MS: u64 = 1000;
const DEFAULT_MAX_BACKOFF_MS: u64 = 5000;

/// Flat string-keyed settings handed to a component when it is configured.
///
/// Keys of an agent file look like `a1.sinks.k1.filename`; use [`Context::sub_properties`] to
/// narrow down to a single component.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    parameters: BTreeMap<String, String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `key = value` lines. Blank lines and lines starting with `#` or `!` are skipped.
    pub fn from_properties(text: &str) -> Result<Self> {
        let mut parameters = BTreeMap::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(Error::Config(format!(
                    "line {}: expected 'key = value', got '{line}'",
                    idx + 1
                )));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(Error::Config(format!("line {}: empty key", idx + 1)));
            }
            parameters.insert(key.to_string(), value.trim().to_string());
        }
        Ok(Self { parameters })
    }

    /// Decodes a base64 encoded JSON object. Nested objects are flattened with `.` separators,
    /// so `{"channel": {"capacity": 10}}` becomes `channel.capacity = 10`.
    pub fn from_base64_json(encoded: &str) -> Result<Self> {
        let raw = BASE64_STANDARD
            .decode(encoded.trim().as_bytes())
            .map_err(|e| Error::Config(format!("decoding base64 sink object: {e}")))?;
        let value: Value = serde_json::from_slice(&raw)
            .map_err(|e| Error::Config(format!("parsing sink object: {e}")))?;
        if !value.is_object() {
            return Err(Error::Config("sink object must be a JSON object".to_string()));
        }
        let mut parameters = BTreeMap::new();
        flatten("", &value, &mut parameters)?;
        Ok(Self { parameters })
    }

    /// Loads the context from [`ENV_SINK_OBJECT`], if the variable is set.
    pub fn from_env() -> Result<Option<Self>> {
        env::var(ENV_SINK_OBJECT)
            .ok()
            .map(|encoded| Self::from_base64_json(&encoded))
            .transpose()
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.parameters.insert(key.into(), value.into());
    }

    /// Entries whose key starts with `prefix`, with the prefix stripped.
    pub fn sub_properties(&self, prefix: &str) -> Context {
        let parameters = self
            .parameters
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(prefix)
                    .filter(|rest| !rest.is_empty())
                    .map(|rest| (rest.to_string(), v.clone()))
            })
            .collect();
        Context { parameters }
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Result<Option<u64>> {
        self.parse(key)
    }

    pub fn get_usize(&self, key: &str) -> Result<Option<usize>> {
        self.parse(key)
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        self.parse(key)
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.get_string(key)
            .map(|raw| {
                raw.parse::<T>()
                    .map_err(|e| Error::Config(format!("invalid value '{raw}' for '{key}': {e}")))
            })
            .transpose()
    }
}

fn flatten(prefix: &str, value: &Value, out: &mut BTreeMap<String, String>) -> Result<()> {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                flatten(&key, v, out)?;
            }
        }
        Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        Value::Number(n) => {
            out.insert(prefix.to_string(), n.to_string());
        }
        Value::Bool(b) => {
            out.insert(prefix.to_string(), b.to_string());
        }
        Value::Null => {}
        Value::Array(_) => {
            return Err(Error::Config(format!(
                "arrays are not supported (key '{prefix}')"
            )));
        }
    }
    Ok(())
}

/// What to do with payloads that are not valid UTF-8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodePolicy {
    /// Fail the delivery; the event stays in the channel.
    #[default]
    Strict,
    /// Replace invalid sequences with U+FFFD and write the record anyway.
    Lossy,
}

impl FromStr for DecodePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(DecodePolicy::Strict),
            "lossy" => Ok(DecodePolicy::Lossy),
            other => Err(Error::Config(format!(
                "unknown decode policy '{other}', expected 'strict' or 'lossy'"
            ))),
        }
    }
}

impl fmt::Display for DecodePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodePolicy::Strict => write!(f, "strict"),
            DecodePolicy::Lossy => write!(f, "lossy"),
        }
    }
}

/// Settings of a [`crate::sinker::FileSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSinkConfig {
    /// Target file; created on first append, its directory must already exist.
    pub path: PathBuf,
    pub decode: DecodePolicy,
    /// `sync_data` after every record.
    pub sync: bool,
    /// How long one `process` call waits for an event before reporting backoff.
    pub take_timeout: Duration,
    /// First delay between empty polls.
    pub poll_interval: Duration,
    /// Upper bound for the delay between empty polls.
    pub poll_max_interval: Duration,
}

impl FileSinkConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            decode: DecodePolicy::default(),
            sync: false,
            take_timeout: Duration::from_millis(DEFAULT_TAKE_TIMEOUT_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            poll_max_interval: Duration::from_millis(DEFAULT_POLL_MAX_INTERVAL_MS),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(Error::Config(format!("'{KEY_FILENAME}' must not be empty")));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::Config(format!(
                "'{KEY_POLL_INTERVAL_MS}' must be greater than zero"
            )));
        }
        if self.poll_max_interval < self.poll_interval {
            return Err(Error::Config(format!(
                "'{KEY_POLL_MAX_INTERVAL_MS}' must not be smaller than '{KEY_POLL_INTERVAL_MS}'"
            )));
        }
        Ok(())
    }
}

impl TryFrom<&Context> for FileSinkConfig {
    type Error = Error;

    fn try_from(context: &Context) -> Result<Self> {
        let filename = context
            .get_string(KEY_FILENAME)
            .or_else(|| context.get_string(KEY_FILENAME_ALIAS))
            .map(str::trim)
            .ok_or_else(|| Error::Config(format!("missing required key '{KEY_FILENAME}'")))?;

        let mut config = FileSinkConfig::new(filename);
        if let Some(decode) = context.get_string(KEY_DECODE) {
            config.decode = decode.parse()?;
        }
        if let Some(sync) = context.get_bool(KEY_SYNC)? {
            config.sync = sync;
        }
        if let Some(ms) = context.get_u64(KEY_TAKE_TIMEOUT_MS)? {
            config.take_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = context.get_u64(KEY_POLL_INTERVAL_MS)? {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = context.get_u64(KEY_POLL_MAX_INTERVAL_MS)? {
            config.poll_max_interval = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }
}

/// Settings of a [`crate::channel::MemoryChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Maximum number of events held, queued and in-flight together.
    pub capacity: usize,
    /// Maximum number of events a single transaction may take.
    pub transaction_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            transaction_capacity: DEFAULT_TRANSACTION_CAPACITY,
        }
    }
}

impl TryFrom<&Context> for ChannelConfig {
    type Error = Error;

    fn try_from(context: &Context) -> Result<Self> {
        let mut config = ChannelConfig::default();
        if let Some(capacity) = context.get_usize(KEY_CAPACITY)? {
            config.capacity = capacity;
        }
        if let Some(txn_capacity) = context.get_usize(KEY_TRANSACTION_CAPACITY)? {
            config.transaction_capacity = txn_capacity;
        }
        if config.capacity == 0 || config.transaction_capacity == 0 {
            return Err(Error::Config(format!(
                "'{KEY_CAPACITY}' and '{KEY_TRANSACTION_CAPACITY}' must be greater than zero"
            )));
        }
        if config.transaction_capacity > config.capacity {
            return Err(Error::Config(format!(
                "'{KEY_TRANSACTION_CAPACITY}' ({}) must not exceed '{KEY_CAPACITY}' ({})",
                config.transaction_capacity, config.capacity
            )));
        }
        Ok(config)
    }
}

/// Settings of a [`crate::runner::SinkRunner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Added to the pause after every consecutive backoff or failure.
    pub backoff_increment: Duration,
    /// Longest pause between two `process` calls.
    pub max_backoff: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            backoff_increment: Duration::from_millis(DEFAULT_BACKOFF_INCREMENT_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
        }
    }
}

impl RunnerConfig {
    /// Pause after the `consecutive`-th backoff in a row: grows linearly, capped at
    /// `max_backoff`.
    pub fn pause_for(&self, consecutive: u32) -> Duration {
        self.backoff_increment
            .saturating_mul(consecutive)
            .min(self.max_backoff)
    }
}

impl TryFrom<&Context> for RunnerConfig {
    type Error = Error;

    fn try_from(context: &Context) -> Result<Self> {
        let mut config = RunnerConfig::default();
        if let Some(ms) = context.get_u64(KEY_BACKOFF_INCREMENT_MS)? {
            config.backoff_increment = Duration::from_millis(ms);
        }
        if let Some(ms) = context.get_u64(KEY_MAX_BACKOFF_MS)? {
            config.max_backoff = Duration::from_millis(ms);
        }
        if config.max_backoff < config.backoff_increment {
            return Err(Error::Config(format!(
                "'{KEY_MAX_BACKOFF_MS}' must not be smaller than '{KEY_BACKOFF_INCREMENT_MS}'"
            )));
        }
        Ok(config)
    }
}
