//! Breaks an oversized payload into size-bounded chunks.
//!
//! Cuts prefer the last line break close to the size budget and fall back
//! to a hard cut so content without line breaks still terminates. When the
//! payload opens with a fence marker, every chunk is re-fenced so it stays
//! well-formed on its own.

use crate::domain::config::{ConfigError, Fence, SplitterConfig};

/// A size-bounded piece of a split payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Chunk text, re-fenced where needed
    pub content: String,
    /// First chunk of the payload
    pub is_first: bool,
    /// Last chunk of the payload
    pub is_last: bool,
}

impl Chunk {
    /// Take ownership of the chunk text.
    pub fn into_content(self) -> String {
        self.content
    }
}

/// Splits payloads that exceed the maximum payload size.
///
/// # Example
/// ```
/// use dispatch_throttle::{Splitter, SplitterConfig};
///
/// let splitter = Splitter::new(SplitterConfig::new(12, 4, None).unwrap()).unwrap();
/// let chunks = splitter.split("first line\nsecond line");
///
/// let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
/// assert_eq!(texts, vec!["first line\n", "second line"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Splitter {
    config: SplitterConfig,
}

impl Splitter {
    /// Create a splitter, checking the configuration first.
    ///
    /// # Errors
    /// Returns `ConfigError` if `config` fails
    /// [`SplitterConfig::validate`], e.g. one built as a struct literal or
    /// deserialized with a margin wider than the payload.
    pub fn new(config: SplitterConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The configuration this splitter was built with.
    pub fn config(&self) -> &SplitterConfig {
        &self.config
    }

    /// Whether `content` fits in one transmission unchanged.
    pub fn fits(&self, content: &str) -> bool {
        content.chars().count() <= self.config.max_payload
    }

    /// Split `content` into chunks of at most `max_payload` characters.
    ///
    /// Content that already fits, including empty content, comes back as a
    /// single unchanged chunk.
    pub fn split(&self, content: &str) -> Vec<Chunk> {
        if self.fits(content) {
            return vec![Chunk {
                content: content.to_string(),
                is_first: true,
                is_last: true,
            }];
        }

        let fence = self
            .config
            .fence
            .as_ref()
            .filter(|fence| content.starts_with(fence.open.as_str()));
        let pieces = self.cut(content, fence);
        let last = pieces.len() - 1;

        pieces
            .into_iter()
            .enumerate()
            .map(|(i, piece)| {
                let is_first = i == 0;
                let is_last = i == last;
                Chunk {
                    content: refence(piece, fence, is_first, is_last),
                    is_first,
                    is_last,
                }
            })
            .collect()
    }

    fn cut<'a>(&self, content: &'a str, fence: Option<&Fence>) -> Vec<&'a str> {
        let max = self.config.max_payload;
        let (open_len, overhead) = match fence {
            Some(fence) => (fence.open.chars().count(), fence.overhead()),
            None => (0, 0),
        };
        // Validated config keeps this above the margin.
        let budget = max - overhead;

        let mut pieces = Vec::new();
        let mut rest = content;
        loop {
            let reopen = if pieces.is_empty() { 0 } else { open_len };
            if rest.chars().count() + reopen <= max {
                pieces.push(rest);
                return pieces;
            }

            let end = byte_offset(rest, budget);
            let start = byte_offset(rest, budget - self.config.margin);
            // Without a line break in the margin, cut at the full budget.
            let cut = match rest[start..end].rfind('\n') {
                Some(pos) => start + pos + 1,
                None => end,
            };
            let (piece, tail) = rest.split_at(cut);
            pieces.push(piece);
            rest = tail;
        }
    }
}

/// Byte offset of the `chars`-th character, or the end of `s`.
fn byte_offset(s: &str, chars: usize) -> usize {
    s.char_indices().nth(chars).map_or(s.len(), |(i, _)| i)
}

fn refence(piece: &str, fence: Option<&Fence>, is_first: bool, is_last: bool) -> String {
    let Some(fence) = fence else {
        return piece.to_string();
    };
    let mut content = String::with_capacity(piece.len() + fence.open.len() + fence.close.len());
    if !is_first {
        content.push_str(&fence.open);
    }
    content.push_str(piece);
    if !is_last {
        content.push_str(&fence.close);
    }
    content
}
