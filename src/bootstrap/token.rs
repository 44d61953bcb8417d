//! Join token harvested from the primary node
//!
//! The token authenticates every secondary node to the cluster. It is kept
//! out of `Debug` output and has no `Display` impl; the only way to read it is
//! [`JoinToken::expose`], used when composing the join command.

/// Opaque join credential read from the primary's token file
#[derive(Clone, PartialEq, Eq)]
pub struct JoinToken {
    value: String,
}

impl JoinToken {
    /// Build the token from the raw token file content.
    ///
    /// Exactly one trailing `\n` is removed; everything else, including a
    /// preceding `\r`, is kept byte for byte.
    pub fn from_output(raw: &str) -> Self {
        let value = raw.strip_suffix('\n').unwrap_or(raw);
        Self {
            value: value.to_string(),
        }
    }

    /// The raw token value
    pub fn expose(&self) -> &str {
        &self.value
    }

    /// True when the token file was empty
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

impl std::fmt::Debug for JoinToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Don't expose the actual token in debug output
        f.debug_struct("JoinToken")
            .field("len", &self.value.len())
            .finish()
    }
}
