use secrecy::{ExposeSecret, SecretBox, SecretString};

/// User passcode. Possibly empty: a profile without a passcode still derives
/// its wrapping key from the empty string.
pub struct Passcode {
    inner: SecretBox<Vec<u8>>,
}

impl Passcode {
    pub fn new(passcode: &str) -> Self {
        Self { inner: SecretBox::new(Box::new(passcode.as_bytes().to_vec())) }
    }

    pub fn from_bytes(data: &[u8]) -> Self {
        Self { inner: SecretBox::new(Box::new(data.to_vec())) }
    }

    pub fn empty() -> Self {
        Self::from_bytes(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.inner.expose_secret().is_empty()
    }

    pub fn expose_secret(&self) -> &[u8] {
        self.inner.expose_secret()
    }
}

impl From<SecretString> for Passcode {
    fn from(secret: SecretString) -> Self {
        Self::new(secret.expose_secret())
    }
}

impl std::fmt::Debug for Passcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Passcode([... {} bytes ...])", self.inner.expose_secret().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts() {
        let passcode = Passcode::new("hunter2");
        assert_eq!(format!("{passcode:?}"), "Passcode([... 7 bytes ...])");
    }

    #[test]
    fn test_empty() {
        assert!(Passcode::empty().is_empty());
        assert!(!Passcode::new("1").is_empty());
    }
}
