use gramfeed_core::{CoreError, InstagramApiError};

/// Pool of API keys for the third-party content API.
///
/// A key is chosen at random per request attempt, spreading load across the
/// pool and letting a failing key be silently swapped on retry.
#[derive(Debug, Clone)]
pub struct CredentialPool {
    keys: Vec<String>,
}

impl CredentialPool {
    pub fn new(keys: Vec<String>) -> Self {
        let keys = keys
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        Self { keys }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Pick a random credential, or fail when none are configured.
    pub fn pick(&self) -> Result<&str, CoreError> {
        if self.keys.is_empty() {
            return Err(InstagramApiError::Unconfigured.into());
        }
        Ok(&self.keys[fastrand::usize(..self.keys.len())])
    }
}
