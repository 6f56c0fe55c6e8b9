//! Loader configuration and scoped overrides.
//!
//! [`LoaderConfig::apply`] returns an [`Options`] holding the values it
//! replaced, so applying that result again restores the earlier state.

/// Configuration owned by a [`DotEnv`](crate::DotEnv) instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Variable naming the app environment.
    pub env_key: String,
    /// Variable holding the debug flag written by `boot_env`.
    pub debug_key: String,
    /// App environment used when `env_key` is unset.
    pub default_env: String,
    /// App environments for which debug defaults to off.
    pub prod_envs: Vec<String>,
    /// App environments for which `<path>.local` is never loaded.
    pub test_envs: Vec<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            env_key: "APP_ENV".to_owned(),
            debug_key: "APP_DEBUG".to_owned(),
            default_env: "dev".to_owned(),
            prod_envs: vec!["prod".to_owned()],
            test_envs: Vec::new(),
        }
    }
}

impl LoaderConfig {
    /// Apply every field present in `options` and return the replaced values.
    pub fn apply(&mut self, options: Options) -> Options {
        let mut previous = Options::default();

        if let Some(env_key) = options.env_key {
            previous.env_key = Some(std::mem::replace(&mut self.env_key, env_key));
        }
        if let Some(debug_key) = options.debug_key {
            previous.debug_key = Some(std::mem::replace(&mut self.debug_key, debug_key));
        }
        if let Some(default_env) = options.default_env {
            previous.default_env = Some(std::mem::replace(&mut self.default_env, default_env));
        }
        if let Some(prod_envs) = options.prod_envs {
            previous.prod_envs = Some(std::mem::replace(&mut self.prod_envs, prod_envs));
        }
        if let Some(test_envs) = options.test_envs {
            previous.test_envs = Some(std::mem::replace(&mut self.test_envs, test_envs));
        }

        previous
    }

    pub fn is_test_env(&self, env: &str) -> bool {
        self.test_envs.iter().any(|name| name == env)
    }

    pub fn is_prod_env(&self, env: &str) -> bool {
        self.prod_envs.iter().any(|name| name == env)
    }
}

/// Partial configuration; unset fields leave the current value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    pub env_key: Option<String>,
    pub debug_key: Option<String>,
    pub default_env: Option<String>,
    pub prod_envs: Option<Vec<String>>,
    pub test_envs: Option<Vec<String>>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn env_key(mut self, env_key: impl Into<String>) -> Self {
        self.env_key = Some(env_key.into());
        self
    }

    pub fn debug_key(mut self, debug_key: impl Into<String>) -> Self {
        self.debug_key = Some(debug_key.into());
        self
    }

    pub fn default_env(mut self, default_env: impl Into<String>) -> Self {
        self.default_env = Some(default_env.into());
        self
    }

    pub fn prod_envs<I, S>(mut self, prod_envs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prod_envs = Some(prod_envs.into_iter().map(Into::into).collect());
        self
    }

    pub fn test_envs<I, S>(mut self, test_envs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.test_envs = Some(test_envs.into_iter().map(Into::into).collect());
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
