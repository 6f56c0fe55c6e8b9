//! Parse `.env` files and load them through an environment cascade.
//!
//! Values may be single-quoted (verbatim), double-quoted (escapes and
//! interpolation) or unquoted. `$NAME`, `${NAME}`, `${NAME:-default}` and
//! `${NAME:=default}` resolve against earlier declarations of the same file,
//! then against the environment.
//!
//! [`DotEnv`] is an explicitly constructed loader. [`DotEnv::new`] works on an
//! in-memory map; [`DotEnv::process`] and the convenience functions (`load`,
//! `overload`, `load_env`, `boot_env`) mutate the process environment and are
//! `unsafe`, because callers must guarantee no concurrent environment access.
//!
//! ```
//! use cascadenv::DotEnv;
//!
//! let loader = DotEnv::new();
//! let values = loader
//!     .parse("HOST=localhost\nURL=\"http://${HOST}:${PORT:-8080}\"\n", ".env")
//!     .unwrap();
//! assert_eq!(values.get("URL"), Some("http://localhost:8080"));
//! ```

mod command;
mod env;
mod error;
mod interpolate;
mod loader;
mod model;
mod options;
mod parser;

pub use env::TargetEnv;
pub use error::{Error, ParseError, ParseErrorKind};
pub use loader::{DotEnv, boot_env, load, load_env, overload};
pub use model::{Entry, LoadReport, Values};
pub use options::{LoaderConfig, Options};
pub use parser::{parse_bytes, parse_reader, parse_str};
