//! kgflow steps - typed step handlers and the step runtime
//!
//! One [`StepHandler`] per step kind, registered in a [`HandlerRegistry`].
//! Handlers reach the outside world only through [`StepEnv`]: the shared
//! store, the template renderer, and the HTTP, process and filesystem seams.

pub mod env;
pub mod error;
pub mod fs;
pub mod handlers;
pub mod http;
pub mod process;
pub mod registry;
pub mod runtime;
pub mod template;

pub use env::StepEnv;
pub use error::{kind_for, HandlerError};
pub use fs::{FileSystem, MemoryFileSystem, OsFileSystem};
pub use handlers::{create_default_registry, OutputFormat};
pub use http::{HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestClient};
pub use process::{CommandSpec, ProcessError, ProcessLauncher, ProcessOutput, ShellLauncher};
pub use registry::{HandlerRegistry, Inputs, StepHandler};
pub use template::{RenderError, TemplateRenderer};
