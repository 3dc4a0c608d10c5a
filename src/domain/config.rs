//! Size limits shared by the coalescer and the splitter.
//!
//! All lengths are counted in characters (Unicode scalar values), which is
//! how the remote platform measures its message limit.

/// Default maximum characters per transmission.
pub const DEFAULT_MAX_PAYLOAD: usize = 2000;

/// Default backlog size at which the coalescer asks for a flush.
pub const DEFAULT_SOFT_LIMIT: usize = 1000;

/// Default distance below the budget inside which the splitter looks for a
/// line break.
pub const DEFAULT_SPLIT_MARGIN: usize = 100;

/// Error returned when a size configuration is invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Maximum payload size must be greater than zero
    ZeroMaxPayload,
    /// Soft limit must be below the maximum payload size
    SoftLimitTooLarge {
        /// Configured soft limit
        soft_limit: usize,
        /// Configured maximum payload
        max_payload: usize,
    },
    /// Split margin must be greater than zero
    ZeroSplitMargin,
    /// Fence markers plus split margin leave no room for content
    NoRoomForContent {
        /// Characters reserved for fences and the margin
        reserved: usize,
        /// Configured maximum payload
        max_payload: usize,
    },
    /// Fence markers must not be empty
    EmptyFence,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ZeroMaxPayload => write!(f, "max_payload must be greater than 0"),
            ConfigError::SoftLimitTooLarge {
                soft_limit,
                max_payload,
            } => write!(
                f,
                "soft_limit ({}) must be below max_payload ({})",
                soft_limit, max_payload
            ),
            ConfigError::ZeroSplitMargin => write!(f, "split margin must be greater than 0"),
            ConfigError::NoRoomForContent {
                reserved,
                max_payload,
            } => write!(
                f,
                "fences and split margin reserve {} of {} characters, leaving no room for content",
                reserved, max_payload
            ),
            ConfigError::EmptyFence => write!(f, "fence markers must not be empty"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Configuration for the [`Coalescer`](crate::domain::coalescer::Coalescer).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CoalescerConfig {
    /// Maximum characters in one merged transmission
    pub max_payload: usize,
    /// Backlog size at which `append` starts signalling a flush
    pub soft_limit: usize,
    /// Inserted between merged payloads
    pub separator: String,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
            soft_limit: DEFAULT_SOFT_LIMIT,
            separator: "\n".to_string(),
        }
    }
}

impl CoalescerConfig {
    /// Create a validated coalescer configuration.
    ///
    /// # Errors
    /// Returns `ConfigError` if `max_payload` is zero or `soft_limit` is not
    /// below it.
    pub fn new(
        max_payload: usize,
        soft_limit: usize,
        separator: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            max_payload,
            soft_limit,
            separator: separator.into(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants `new` enforces, e.g. after deserializing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_payload == 0 {
            return Err(ConfigError::ZeroMaxPayload);
        }
        if self.soft_limit >= self.max_payload {
            return Err(ConfigError::SoftLimitTooLarge {
                soft_limit: self.soft_limit,
                max_payload: self.max_payload,
            });
        }
        Ok(())
    }

    pub(crate) fn separator_len(&self) -> usize {
        self.separator.chars().count()
    }
}

/// Delimiter pair bracketing a formatted block.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Fence {
    /// Marker that opens the block
    pub open: String,
    /// Marker that closes the block
    pub close: String,
}

impl Fence {
    /// Fence using the same marker on both sides.
    pub fn symmetric(marker: impl Into<String>) -> Self {
        let marker = marker.into();
        Self {
            open: marker.clone(),
            close: marker,
        }
    }

    /// Characters added when a chunk is both re-opened and re-closed.
    pub fn overhead(&self) -> usize {
        self.open.chars().count() + self.close.chars().count()
    }
}

impl Default for Fence {
    fn default() -> Self {
        Self::symmetric("```")
    }
}

/// Configuration for the [`Splitter`](crate::domain::splitter::Splitter).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SplitterConfig {
    /// Maximum characters in one chunk, fences included
    pub max_payload: usize,
    /// Line breaks are only honoured this close to the chunk budget
    pub margin: usize,
    /// Fence preserved across chunk boundaries, if any
    pub fence: Option<Fence>,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
            margin: DEFAULT_SPLIT_MARGIN,
            fence: Some(Fence::default()),
        }
    }
}

impl SplitterConfig {
    /// Create a validated splitter configuration.
    ///
    /// # Errors
    /// Returns `ConfigError` if the margin is zero, a fence marker is empty, or
    /// the fences and margin consume the whole payload budget.
    pub fn new(
        max_payload: usize,
        margin: usize,
        fence: Option<Fence>,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            max_payload,
            margin,
            fence,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants `new` enforces, e.g. after deserializing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_payload == 0 {
            return Err(ConfigError::ZeroMaxPayload);
        }
        if self.margin == 0 {
            return Err(ConfigError::ZeroSplitMargin);
        }
        if let Some(fence) = &self.fence {
            if fence.open.is_empty() || fence.close.is_empty() {
                return Err(ConfigError::EmptyFence);
            }
        }
        let reserved = self.fence_overhead() + self.margin;
        if reserved >= self.max_payload {
            return Err(ConfigError::NoRoomForContent {
                reserved,
                max_payload: self.max_payload,
            });
        }
        Ok(())
    }

    pub(crate) fn fence_overhead(&self) -> usize {
        self.fence.as_ref().map_or(0, Fence::overhead)
    }
}
