//! Credential resolution for the submission source and the task queue.
//!
//! A credential may be configured three ways, checked in this order:
//!
//! 1. **Direct value** (`accessTokenInsecure`) for local experiments
//! 2. **File** (`accessTokenFile`) for mounted secrets
//! 3. **Environment variable** (`accessTokenEnvVar`) for deployments

use secrecy::SecretString;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },

    #[error("Secret resolved from {origin} is empty")]
    Empty { origin: &'static str },
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// The three places a credential may be configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecretRef<'a> {
    pub direct: Option<&'a str>,
    pub file: Option<&'a str>,
    pub env_var: Option<&'a str>,
}

impl<'a> SecretRef<'a> {
    pub fn new(direct: Option<&'a str>, file: Option<&'a str>, env_var: Option<&'a str>) -> Self {
        Self {
            direct: non_empty(direct),
            file: non_empty(file),
            env_var: non_empty(env_var),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.direct.is_some() || self.file.is_some() || self.env_var.is_some()
    }

    /// First configured source wins; a broken higher-priority source is an
    /// error rather than a fall-through.
    pub fn resolve(&self) -> Result<SecretString> {
        let value = if let Some(value) = non_empty(self.direct) {
            value.to_string()
        } else if let Some(path) = non_empty(self.file) {
            read_file(path)?
        } else if let Some(name) = non_empty(self.env_var) {
            read_env(name)?
        } else {
            return Err(SecretError::NoSourceProvided);
        };
        Ok(SecretString::from(value))
    }

    /// Like [`resolve`](Self::resolve) but maps "nothing configured" to `None`.
    pub fn resolve_optional(&self) -> Result<Option<SecretString>> {
        if !self.is_configured() {
            return Ok(None);
        }
        self.resolve().map(Some)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn read_file(path: &str) -> Result<String> {
    let path = expand_home(path);
    let content = std::fs::read_to_string(&path).map_err(|source| SecretError::FileReadError {
        path: path.clone(),
        source,
    })?;
    trimmed(&content, "file")
}

fn read_env(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) => trimmed(&value, "environment"),
        Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
            name: name.to_string(),
        }),
        Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
            name: name.to_string(),
        }),
    }
}

fn trimmed(raw: &str, origin: &'static str) -> Result<String> {
    match raw.trim() {
        "" => Err(SecretError::Empty { origin }),
        value => Ok(value.to_string()),
    }
}

/// `~/x` becomes `$HOME/x`; `~user/...` is left alone.
fn expand_home(path: &str) -> String {
    match (path.strip_prefix('~'), dirs::home_dir()) {
        (Some(rest), Some(home)) if rest.is_empty() || rest.starts_with('/') => {
            format!("{}{}", home.to_string_lossy(), rest)
        }
        _ => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_direct_value_takes_priority() {
        let secret = SecretRef::new(Some("direct"), Some("/nonexistent"), Some("NOPE"))
            .resolve()
            .unwrap();
        assert_eq!(secret.expose_secret(), "direct");
    }

    #[test]
    #[serial]
    fn test_file_takes_priority_over_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "  from-file  ").unwrap();
        std::env::set_var("GALLERIA_TEST_TOKEN_A", "from-env");

        let path = file.path().to_string_lossy().to_string();
        let secret = SecretRef::new(None, Some(&path), Some("GALLERIA_TEST_TOKEN_A")).resolve();
        std::env::remove_var("GALLERIA_TEST_TOKEN_A");

        assert_eq!(secret.unwrap().expose_secret(), "from-file");
    }

    #[test]
    #[serial]
    fn test_env_var_fallback() {
        std::env::set_var("GALLERIA_TEST_TOKEN_B", "from-env\n");
        let secret = SecretRef::new(None, None, Some("GALLERIA_TEST_TOKEN_B")).resolve();
        std::env::remove_var("GALLERIA_TEST_TOKEN_B");
        assert_eq!(secret.unwrap().expose_secret(), "from-env");
    }

    #[test]
    fn test_no_source_error() {
        assert!(matches!(
            SecretRef::new(None, Some(""), Some("")).resolve(),
            Err(SecretError::NoSourceProvided)
        ));
    }

    #[test]
    fn test_empty_file_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_string_lossy().to_string();
        assert!(matches!(
            SecretRef::new(None, Some(&path), None).resolve(),
            Err(SecretError::Empty { origin: "file" })
        ));
    }

    #[test]
    fn test_missing_file_error() {
        assert!(matches!(
            SecretRef::new(None, Some("/nonexistent/galleria/token"), None).resolve(),
            Err(SecretError::FileReadError { .. })
        ));
    }

    #[test]
    #[serial]
    fn test_env_var_not_set_error() {
        std::env::remove_var("GALLERIA_TEST_TOKEN_MISSING");
        assert!(matches!(
            SecretRef::new(None, None, Some("GALLERIA_TEST_TOKEN_MISSING")).resolve(),
            Err(SecretError::EnvVarNotSet { .. })
        ));
    }

    #[test]
    fn test_secret_ref_optional() {
        let unset = SecretRef::default();
        assert!(!unset.is_configured());
        assert!(unset.resolve_optional().unwrap().is_none());

        let direct = SecretRef::new(Some("abc"), None, None);
        assert!(direct.is_configured());
        assert_eq!(
            direct.resolve_optional().unwrap().unwrap().expose_secret(),
            "abc"
        );
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/abs/path"), "/abs/path");
        if let Some(home) = dirs::home_dir() {
            let expanded = expand_home("~/token");
            assert!(expanded.starts_with(&*home.to_string_lossy()));
            assert!(expanded.ends_with("token"));
        }
    }
}
