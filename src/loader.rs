use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use crate::env::TargetEnv;
use crate::error::Error;
use crate::model::{LoadReport, Values};
use crate::options::{LoaderConfig, Options};
use crate::parser::parse_with_lookup;

/// Load one or several `.env` files into the process environment without
/// overriding variables that are already set.
///
/// Each call builds its own [`DotEnv`]; nothing is shared between calls.
///
/// # Safety
///
/// The caller must ensure no other threads concurrently read or write the
/// process environment while this function runs.
pub unsafe fn load<I, P>(paths: I) -> Result<LoadReport, Error>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    unsafe { DotEnv::process() }.load(paths)
}

/// Like [`load`], but replaces variables that are already set.
///
/// # Safety
///
/// Same contract as [`load`].
pub unsafe fn overload<I, P>(paths: I) -> Result<LoadReport, Error>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    unsafe { DotEnv::process() }.overload(paths)
}

/// Load `path` and its `.local`, `.{env}` and `.{env}.local` siblings into
/// the process environment. See [`DotEnv::load_env`].
///
/// # Safety
///
/// Same contract as [`load`].
pub unsafe fn load_env(path: impl AsRef<Path>, options: Options) -> Result<LoadReport, Error> {
    unsafe { DotEnv::process() }.load_env(path, options)
}

/// [`load_env`] followed by debug-flag normalization. See [`DotEnv::boot_env`].
///
/// # Safety
///
/// Same contract as [`load`].
pub unsafe fn boot_env(path: impl AsRef<Path>, options: Options) -> Result<LoadReport, Error> {
    unsafe { DotEnv::process() }.boot_env(path, options)
}

/// A dotenv loader instance.
///
/// Holds the loader configuration, the target environment and the set of
/// variables this instance has written. Variables it wrote itself are always
/// replaced by later loads, whatever the override flag says.
#[derive(Debug, Clone, Default)]
pub struct DotEnv {
    config: LoaderConfig,
    loaded_vars: HashSet<String>,
    target: TargetEnv,
}

impl DotEnv {
    /// Create a loader over an empty in-memory environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a loader that reads and writes the process environment.
    ///
    /// # Safety
    ///
    /// See [`TargetEnv::process`].
    pub unsafe fn process() -> Self {
        Self::with_target(unsafe { TargetEnv::process() })
    }

    pub fn with_target(target: TargetEnv) -> Self {
        Self {
            target,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Apply `options` and return the options that undo the change.
    pub fn options(&mut self, options: Options) -> Options {
        self.config.apply(options)
    }

    pub fn target_env(&self) -> &TargetEnv {
        &self.target
    }

    pub fn into_target(self) -> TargetEnv {
        self.target
    }

    /// Whether this instance has written `name` at least once.
    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded_vars.contains(name)
    }

    /// Parse dotenv text; references fall back to the target environment.
    pub fn parse(&self, data: &str, path: impl AsRef<Path>) -> Result<Values, Error> {
        let path = path.as_ref();
        let source = (!path.as_os_str().is_empty()).then_some(path);
        let lookup = |name: &str| self.target.get_var(name);
        Ok(parse_with_lookup(data, source, &lookup)?)
    }

    /// Load files in order without overriding variables set by others.
    pub fn load<I, P>(&mut self, paths: I) -> Result<LoadReport, Error>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        self.do_load(false, paths)
    }

    /// Load files in order, replacing variables that are already set.
    pub fn overload<I, P>(&mut self, paths: I) -> Result<LoadReport, Error>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        self.do_load(true, paths)
    }

    /// Write `values` to the target environment.
    ///
    /// A variable already present in the environment is left alone unless
    /// `override_existing` is set or this instance wrote it before. All pairs
    /// are checked first, so a rejected pair leaves the environment untouched.
    pub fn populate(
        &mut self,
        values: &Values,
        override_existing: bool,
    ) -> Result<LoadReport, Error> {
        for (name, value) in values.iter() {
            TargetEnv::check_var(name, value)?;
        }

        let mut report = LoadReport::default();
        for (name, value) in values.iter() {
            let loaded = self.loaded_vars.contains(name);
            if !loaded && !override_existing && self.target.contains_key(name) {
                tracing::debug!(variable = name, "skipping variable already set in the environment");
                report.skipped_existing += 1;
                continue;
            }

            self.target.set_var(name, value);
            if !loaded {
                self.loaded_vars.insert(name.to_owned());
            }
            report.loaded += 1;
        }

        Ok(report)
    }

    /// Load `path` and its environment-specific siblings.
    ///
    /// 1. `path`, or `path.dist` when only the latter exists.
    /// 2. `path.local`, unless the app environment is a test environment.
    /// 3. `path.{env}` and `path.{env}.local`, unless the app environment is
    ///    `local`.
    ///
    /// When the app environment variable is unset on entry it is set to the
    /// configured default. `options` apply for this call only.
    pub fn load_env(
        &mut self,
        path: impl AsRef<Path>,
        options: Options,
    ) -> Result<LoadReport, Error> {
        let previous = self.config.apply(options);
        let result = self.cascade(path.as_ref());
        self.config.apply(previous);
        result.map(|(_, report)| report)
    }

    /// [`DotEnv::load_env`], then normalize the debug flag to `"1"` or `"0"`.
    ///
    /// An existing flag keeps its truthiness; an unset flag is off for
    /// production environments and on otherwise.
    pub fn boot_env(
        &mut self,
        path: impl AsRef<Path>,
        options: Options,
    ) -> Result<LoadReport, Error> {
        let previous = self.config.apply(options);
        let result = self.cascade(path.as_ref()).and_then(|(env, mut report)| {
            report.merge(self.normalize_debug(&env)?);
            Ok(report)
        });
        self.config.apply(previous);
        result
    }

    /// Runs the cascade and returns the working app environment.
    fn cascade(&mut self, path: &Path) -> Result<(String, LoadReport), Error> {
        let env_key = self.config.env_key.clone();
        let initial_env = self.target.get_var(&env_key).unwrap_or_default();
        let mut report = LoadReport::default();

        let dist = sibling(path, "dist");
        if path.is_file() || !dist.is_file() {
            report.merge(self.load([path])?);
        } else {
            tracing::debug!(path = %dist.display(), "base file missing, using dist file");
            report.merge(self.load([&dist])?);
        }

        let mut env = initial_env;
        if env.is_empty() {
            env = self.config.default_env.clone();
            tracing::debug!(key = %env_key, env = %env, "app environment unset, using default");
            let defaults: Values = [(env_key.as_str(), env.as_str())].into_iter().collect();
            report.merge(self.populate(&defaults, false)?);
        }

        let local = sibling(path, "local");
        if self.config.is_test_env(&env) {
            tracing::debug!(env = %env, "test environment, skipping local file");
        } else if local.is_file() {
            report.merge(self.load([&local])?);
            if let Some(current) = self.target.get_var(&env_key).filter(|value| !value.is_empty())
            {
                env = current;
            }
        }
        tracing::debug!(env = %env, path = %path.display(), "resolved app environment");

        if env == "local" {
            tracing::debug!("local environment, skipping environment-specific files");
            return Ok((env, report));
        }

        let env_file = sibling(path, &env);
        if env_file.is_file() {
            report.merge(self.load([&env_file])?);
        }

        let env_local = sibling(path, &format!("{env}.local"));
        if env_local.is_file() {
            report.merge(self.load([&env_local])?);
        }

        Ok((env, report))
    }

    fn normalize_debug(&mut self, env: &str) -> Result<LoadReport, Error> {
        let debug_key = self.config.debug_key.clone();
        let debug = match self.target.get_var(&debug_key) {
            Some(value) => is_truthy(&value),
            None => !self.config.is_prod_env(env),
        };

        let flag = if debug { "1" } else { "0" };
        tracing::debug!(key = %debug_key, flag, "normalized debug flag");
        let values: Values = [(debug_key, flag)].into_iter().collect();
        self.populate(&values, true)
    }

    fn do_load<I, P>(&mut self, override_existing: bool, paths: I) -> Result<LoadReport, Error>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut report = LoadReport::default();
        for path in paths {
            let path = path.as_ref();
            let bytes = std::fs::read(path).map_err(|source| Error::Path {
                path: path.to_path_buf(),
                source,
            })?;
            let content = std::str::from_utf8(&bytes).map_err(|err| Error::Path {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidData, err),
            })?;
            let values = self.parse(content, path)?;
            tracing::debug!(path = %path.display(), entries = values.len(), "parsed dotenv file");

            report.files_read += 1;
            report.files.push(path.to_path_buf());
            report.merge(self.populate(&values, override_existing)?);
        }

        Ok(report)
    }
}

/// `path` with `.{suffix}` appended to its file name.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn is_truthy(value: &str) -> bool {
    ["1", "true", "on", "yes"]
        .iter()
        .any(|truthy| value.trim().eq_ignore_ascii_case(truthy))
}
